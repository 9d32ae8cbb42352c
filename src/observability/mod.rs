//! Observability: structured logging and per-client metrics

pub mod logging;
pub mod metrics;

pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{LiveMetrics, MetricsSnapshot};

pub use logging::{connection_span, dispatch_span};
