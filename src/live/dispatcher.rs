//! Handler table and fan-out of inbound messages
//!
//! Handlers run synchronously on the supervisor task, in registration order.
//! A handler that returns an error or panics is counted and skipped; the
//! remaining handlers still see the message.

use crate::protocol::{topic_matches_filter, InboundMessage};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Failure reported by a message handler
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HandlerError {
    #[error("Handler rejected message: {0}")]
    Rejected(String),
    #[error("Handler channel is full")]
    ChannelFull,
    #[error("Handler channel is closed")]
    ChannelClosed,
}

impl HandlerError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }
}

/// A message handler
pub type HandlerFn = Arc<dyn Fn(&InboundMessage) -> Result<(), HandlerError> + Send + Sync>;

/// Identifies a registered handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(pub u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

/// Build a handler that forwards matching messages into a bounded channel
pub fn channel_handler(sender: mpsc::Sender<InboundMessage>) -> HandlerFn {
    Arc::new(move |message: &InboundMessage| -> Result<(), HandlerError> {
        sender.try_send(message.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => HandlerError::ChannelFull,
            mpsc::error::TrySendError::Closed(_) => HandlerError::ChannelClosed,
        })
    })
}

/// Outcome of dispatching one message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers whose filter matched
    pub matched: usize,
    /// Handlers that returned Ok
    pub delivered: usize,
    /// Handlers that returned an error or panicked
    pub failed: usize,
}

impl DispatchReport {
    pub fn is_unmatched(&self) -> bool {
        self.matched == 0
    }
}

struct Registration {
    id: HandlerId,
    filter: String,
    handler: HandlerFn,
}

/// Registration-ordered handler table
#[derive(Default)]
pub struct Dispatcher {
    handlers: Vec<Registration>,
    next_id: u64,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field(
                "handlers",
                &self
                    .handlers
                    .iter()
                    .map(|r| (r.id, r.filter.as_str()))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler for messages whose topic matches `filter`
    ///
    /// The filter is expected to be validated by the caller.
    pub fn register(&mut self, filter: impl Into<String>, handler: HandlerFn) -> HandlerId {
        self.next_id += 1;
        let id = HandlerId(self.next_id);
        self.handlers.push(Registration {
            id,
            filter: filter.into(),
            handler,
        });
        id
    }

    /// Remove a handler; returns false if it was already gone
    pub fn deregister(&mut self, id: HandlerId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|r| r.id != id);
        self.handlers.len() != before
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Deliver a message to every matching handler, in registration order
    pub fn dispatch(&self, message: &InboundMessage) -> DispatchReport {
        let mut report = DispatchReport::default();

        for registration in self
            .handlers
            .iter()
            .filter(|r| topic_matches_filter(&message.topic, &r.filter))
        {
            report.matched += 1;
            let handler = &registration.handler;
            match catch_unwind(AssertUnwindSafe(|| handler(message))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!(
                        handler = %registration.id,
                        filter = %registration.filter,
                        topic = %message.topic,
                        error = %e,
                        "Message handler failed"
                    );
                }
                Err(panic) => {
                    report.failed += 1;
                    warn!(
                        handler = %registration.id,
                        filter = %registration.filter,
                        topic = %message.topic,
                        panic = panic_message(panic.as_ref()),
                        "Message handler panicked"
                    );
                }
            }
        }

        if report.is_unmatched() {
            debug!(topic = %message.topic, "No handler matched inbound message");
        }
        report
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> HandlerFn {
        let log = Arc::clone(log);
        Arc::new(move |message: &InboundMessage| -> Result<(), HandlerError> {
            log.lock().unwrap().push(format!("{name}:{}", message.topic));
            Ok(())
        })
    }

    fn inbound(topic: &str) -> InboundMessage {
        InboundMessage::new(topic, "{}")
    }

    #[test]
    fn test_wildcard_delivery() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = Dispatcher::new();
        dispatcher.register("school/+/alerts", recorder(&log, "alerts"));

        let delivered = dispatcher.dispatch(&inbound("school/42/alerts"));
        let ignored = dispatcher.dispatch(&inbound("school/42/grades"));

        assert_eq!(delivered.delivered, 1);
        assert!(ignored.is_unmatched());
        assert_eq!(*log.lock().unwrap(), vec!["alerts:school/42/alerts"]);
    }

    #[test]
    fn test_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = Dispatcher::new();
        dispatcher.register("school/#", recorder(&log, "first"));
        dispatcher.register("school/42/alerts", recorder(&log, "second"));
        dispatcher.register("+/42/+", recorder(&log, "third"));

        let report = dispatcher.dispatch(&inbound("school/42/alerts"));

        assert_eq!(report.matched, 3);
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "first:school/42/alerts",
                "second:school/42/alerts",
                "third:school/42/alerts"
            ]
        );
    }

    #[test]
    fn test_failures_are_isolated() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(
            "school/#",
            Arc::new(|_: &InboundMessage| -> Result<(), HandlerError> {
                Err(HandlerError::rejected("bad payload"))
            }),
        );
        dispatcher.register(
            "school/#",
            Arc::new(|_: &InboundMessage| -> Result<(), HandlerError> { panic!("handler bug") }),
        );
        dispatcher.register("school/#", recorder(&log, "survivor"));

        let report = dispatcher.dispatch(&inbound("school/1/grades"));

        assert_eq!(
            report,
            DispatchReport {
                matched: 3,
                delivered: 1,
                failed: 2
            }
        );
        assert_eq!(*log.lock().unwrap(), vec!["survivor:school/1/grades"]);
    }

    #[test]
    fn test_deregister() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = Dispatcher::new();
        let id = dispatcher.register("users/7/messages", recorder(&log, "inbox"));

        assert!(dispatcher.deregister(id));
        assert!(!dispatcher.deregister(id));
        assert!(dispatcher.is_empty());
        assert!(dispatcher.dispatch(&inbound("users/7/messages")).is_unmatched());
    }

    #[tokio::test]
    async fn test_channel_handler_reports_full_and_closed() {
        let (tx, mut rx) = mpsc::channel(1);
        let handler = channel_handler(tx);

        assert_eq!(handler(&inbound("a")), Ok(()));
        assert_eq!(handler(&inbound("b")), Err(HandlerError::ChannelFull));
        assert_eq!(rx.recv().await.unwrap().topic, "a");

        drop(rx);
        assert_eq!(handler(&inbound("c")), Err(HandlerError::ChannelClosed));
    }
}
