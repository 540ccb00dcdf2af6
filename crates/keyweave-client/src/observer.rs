//! # Operation Observers
//!
//! Side-effect hooks invoked after each mutating operation. Observers are
//! synchronous and fire-and-forget: they cannot fail the operation or alter
//! its result.

use std::fmt;

/// Result summary handed to observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The store applied the command; carries a reply summary
    Applied(String),
    /// The command failed; carries the error text
    Failed(String),
}

impl Outcome {
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Applied(summary) => write!(f, "applied: {summary}"),
            Self::Failed(error) => write!(f, "failed: {error}"),
        }
    }
}

/// One observed mutation
#[derive(Debug, Clone, Copy)]
pub struct OperationEvent<'a> {
    /// Operation name, e.g. `hash.put`
    pub operation: &'a str,
    pub key: &'a str,
    pub outcome: &'a Outcome,
}

/// Sink for mutating-operation events
pub trait OperationObserver: Send + Sync {
    fn on_operation(&self, event: &OperationEvent<'_>);
}

/// Logs every mutation through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl OperationObserver for TracingObserver {
    fn on_operation(&self, event: &OperationEvent<'_>) {
        match event.outcome {
            Outcome::Applied(summary) => tracing::info!(
                operation = event.operation,
                key = event.key,
                outcome = %summary,
                "Cache operation applied"
            ),
            Outcome::Failed(error) => tracing::warn!(
                operation = event.operation,
                key = event.key,
                error = %error,
                "Cache operation failed"
            ),
        }
    }
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl OperationObserver for NoopObserver {
    fn on_operation(&self, _event: &OperationEvent<'_>) {}
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::{OperationEvent, OperationObserver, Outcome};

    /// Records `(operation, key, outcome)` for assertions.
    #[derive(Default)]
    pub struct RecordingObserver {
        pub events: Mutex<Vec<(String, String, Outcome)>>,
    }

    impl RecordingObserver {
        pub fn operations(&self) -> Vec<String> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .map(|(operation, _, _)| operation.clone())
                .collect()
        }
    }

    impl OperationObserver for RecordingObserver {
        fn on_operation(&self, event: &OperationEvent<'_>) {
            self.events.lock().unwrap().push((
                event.operation.to_string(),
                event.key.to_string(),
                event.outcome.clone(),
            ));
        }
    }
}
