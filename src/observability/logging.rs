//! Structured logging using the tracing crate
//!
//! ## Log Format Options
//!
//! The output format is controlled by the `LOG_FORMAT` environment variable:
//!
//! - `json` - Structured JSON for log aggregation (default)
//! - `pretty` - Human-readable, multi-line, with colors
//! - `compact` - Single-line terminal output with colors
//!
//! ## Environment Variables
//!
//! - `LOG_LEVEL`: ERROR, WARN, INFO, DEBUG or TRACE - defaults to INFO
//! - `LOG_FORMAT`: json, pretty or compact - defaults to json
//! - `LOG_SPANS`: Emit span open/close events (true/false) - defaults to false
//! - `RUST_LOG`: Overrides filtering entirely (env_logger syntax)
//!
//! ## Examples
//!
//! ```bash
//! LOG_FORMAT=pretty LOG_LEVEL=DEBUG ./schoolbridge-live run
//! RUST_LOG=schoolbridge_live=trace,rumqttc=debug ./schoolbridge-live run
//! ```

use std::env;
use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Machine-readable JSON lines
    Json,
    /// Colors and indentation
    Pretty,
    /// Colors, one line per event
    Compact,
}

impl LogFormat {
    /// Parse a format name; unknown names fall back to JSON
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Json,
        }
    }
}

/// Parse a level name; unknown names fall back to INFO
pub fn parse_level(s: &str) -> Level {
    match s.trim().to_uppercase().as_str() {
        "ERROR" => Level::ERROR,
        "WARN" => Level::WARN,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        _ => Level::INFO,
    }
}

/// Parse the `LOG_SPANS` flag; only "true" (any case) enables it
pub fn parse_span_flag(s: &str) -> bool {
    s.trim().eq_ignore_ascii_case("true")
}

/// Filter for `level` with network-stack noise capped at WARN
pub fn build_filter(level: Level) -> EnvFilter {
    let filter = EnvFilter::new(level.to_string());
    ["rumqttc=warn", "tokio=warn", "rustls=warn"]
        .into_iter()
        .filter_map(|directive| directive.parse::<Directive>().ok())
        .fold(filter, |filter, directive| filter.add_directive(directive))
}

fn span_events(include_spans: bool) -> FmtSpan {
    if include_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

/// Initialize logging with manual configuration
///
/// Does nothing if a global subscriber is already installed.
pub fn init_logging(level: Level, format: LogFormat, include_spans: bool) {
    let filter = match env::var("RUST_LOG") {
        Ok(rust_log) => EnvFilter::new(rust_log),
        Err(_) => build_filter(level),
    };

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        LogFormat::Json => subscriber
            .with(fmt::layer().json().with_span_events(span_events(include_spans)))
            .try_init(),
        LogFormat::Pretty => subscriber
            .with(
                fmt::layer()
                    .pretty()
                    .with_ansi(true)
                    .with_span_events(span_events(include_spans)),
            )
            .try_init(),
        LogFormat::Compact => subscriber
            .with(
                fmt::layer()
                    .compact()
                    .with_ansi(true)
                    .with_target(false)
                    .with_span_events(span_events(include_spans)),
            )
            .try_init(),
    };

    if installed.is_err() {
        tracing::debug!("Global subscriber already installed, keeping it");
    }
}

/// Initialize logging from `LOG_LEVEL`, `LOG_FORMAT` and `LOG_SPANS`
pub fn init_default_logging() {
    let level = parse_level(&env::var("LOG_LEVEL").unwrap_or_default());
    let format = LogFormat::parse(&env::var("LOG_FORMAT").unwrap_or_default());
    let include_spans = parse_span_flag(&env::var("LOG_SPANS").unwrap_or_default());

    init_logging(level, format, include_spans);
}

/// Span wrapping the connection supervisor of one client
#[macro_export]
macro_rules! connection_span {
    ($($field:tt)*) => {
        tracing::info_span!("live_connection", $($field)*)
    };
}

/// Span wrapping the dispatch of one inbound message
#[macro_export]
macro_rules! dispatch_span {
    ($($field:tt)*) => {
        tracing::debug_span!("live_dispatch", $($field)*)
    };
}

pub use {connection_span, dispatch_span};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("PRETTY"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse(" compact\n"), LogFormat::Compact);
        assert_eq!(LogFormat::parse("xml"), LogFormat::Json);
        assert_eq!(LogFormat::parse(""), LogFormat::Json);
    }

    #[test]
    fn test_parse_level() {
        let cases = [
            ("ERROR", Level::ERROR),
            ("warn", Level::WARN),
            ("Info", Level::INFO),
            ("debug", Level::DEBUG),
            ("TRACE", Level::TRACE),
            ("verbose", Level::INFO),
            ("", Level::INFO),
        ];
        for (input, expected) in cases {
            assert_eq!(parse_level(input), expected, "Failed for input: {input}");
        }
    }

    #[test]
    fn test_parse_span_flag() {
        assert!(parse_span_flag("true"));
        assert!(parse_span_flag("TRUE"));
        assert!(!parse_span_flag("yes"));
        assert!(!parse_span_flag("1"));
        assert!(!parse_span_flag(""));
    }

    #[test]
    fn test_build_filter_caps_dependencies() {
        let rendered = build_filter(Level::DEBUG).to_string().to_lowercase();
        assert!(rendered.contains("rumqttc=warn"), "{rendered}");
        assert!(rendered.contains("debug"), "{rendered}");
    }

    #[test]
    fn test_span_macros_build_spans() {
        let span = connection_span!(client_id = "parent-app-1");
        let _guard = span.enter();
        let dispatch = dispatch_span!(topic = "school/42/alerts");
        drop(dispatch);
    }
}
