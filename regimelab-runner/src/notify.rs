//! Operator notifications. Failures are logged by the caller and never block
//! the pipeline.

use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str) -> Result<(), NotifyError>;
}

impl<T: Notifier + ?Sized> Notifier for Arc<T> {
    fn notify(&self, message: &str) -> Result<(), NotifyError> {
        (**self).notify(message)
    }
}

/// Writes alerts to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str) -> Result<(), NotifyError> {
        info!(target: "regimelab::alert", "{message}");
        Ok(())
    }
}

/// Keeps every message in memory; used by tests and dry runs.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str) -> Result<(), NotifyError> {
        self.messages
            .lock()
            .map_err(|_| NotifyError("recording notifier lock poisoned".into()))?
            .push(message.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_notifier_keeps_order() {
        let n = RecordingNotifier::new();
        n.notify("first").unwrap();
        n.notify("second").unwrap();
        assert_eq!(n.messages(), vec!["first", "second"]);
        assert!(LogNotifier.notify("hello").is_ok());
    }
}
