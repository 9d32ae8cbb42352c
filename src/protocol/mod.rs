//! Message types and topic rules for the SchoolBridge live-update channel

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
