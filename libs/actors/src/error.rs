//! Actor Runtime Error Types
//!
//! Error taxonomy for dispatch, topology management and the worker pool.
//! Resolution and invocation failures are values that travel back to the
//! caller inside RETURN envelopes, so every variant is `Send + Sync`.

use crate::messages::EnvelopeId;
use crate::registry::ActorId;
use thiserror::Error;

/// Main actor runtime error type
#[derive(Error, Debug)]
pub enum ActorError {
    /// Send to an identity that is not in the sender's address book
    #[error("Actor {actor} has no address for {receiver}")]
    UnknownReceiver { actor: ActorId, receiver: ActorId },

    /// CALL named an operation the receiver does not have
    #[error("Actor {actor} cannot resolve operation '{operation}'")]
    UnknownOperation { actor: ActorId, operation: String },

    /// CALL arguments do not match the operation's declared arity
    #[error("Operation '{operation}' expects {expected}, got {positional} positional argument(s)")]
    Arity {
        operation: String,
        expected: String,
        positional: usize,
    },

    /// Payload or argument did not have the required type
    #[error("Payload type mismatch: expected {expected}")]
    PayloadType { expected: &'static str },

    /// Operation registered twice under the same name
    #[error("Operation '{operation}' is already registered")]
    DuplicateOperation { operation: String },

    /// Operation ran but failed (or panicked)
    #[error("Operation '{operation}' failed: {message}")]
    Invocation { operation: String, message: String },

    /// RETURN whose cause does not match any outstanding CALL
    #[error("No outstanding call matches cause {cause}")]
    UnknownCorrelation { cause: EnvelopeId },

    /// Message protocol invariant broken
    #[error("Protocol violation: {message}")]
    ProtocolViolation { message: String },

    /// Receive or join exceeded its deadline
    #[error("Timeout error: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Actor observed cancellation while waiting
    #[error("Actor {actor} was cancelled")]
    Cancelled { actor: ActorId },

    /// Every sender to this mailbox is gone
    #[error("Mailbox of {actor} is closed")]
    MailboxClosed { actor: ActorId },

    /// Execution unit could not be started
    #[error("Failed to spawn actor {actor}: {source}")]
    Spawn {
        actor: ActorId,
        #[source]
        source: std::io::Error,
    },

    /// Actor thread panicked
    #[error("Actor {actor} panicked: {message}")]
    Panicked { actor: ActorId, message: String },

    /// A managed member exited with an error while the manager was running
    #[error("Member {actor} failed: {message}")]
    MemberFailed { actor: ActorId, message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },
}

/// Result type alias for actor runtime operations
pub type Result<T> = std::result::Result<T, ActorError>;

impl ActorError {
    /// Create a resolution failure
    pub fn unknown_operation(actor: &ActorId, operation: impl Into<String>) -> Self {
        Self::UnknownOperation {
            actor: actor.clone(),
            operation: operation.into(),
        }
    }

    /// Create an invocation failure
    pub fn invocation(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invocation {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a payload type mismatch error for `T`
    pub fn payload_type<T: 'static>() -> Self {
        Self::PayloadType {
            expected: std::any::type_name::<T>(),
        }
    }

    /// Create a protocol violation
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    /// Whether the error came from CALL resolution rather than execution
    pub fn is_resolution_failure(&self) -> bool {
        matches!(
            self,
            Self::UnknownOperation { .. } | Self::Arity { .. } | Self::PayloadType { .. }
        )
    }
}

/// Render a panic payload captured by `catch_unwind` or `JoinHandle::join`
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ActorError::timeout("receive", 250);
        assert_eq!(err.to_string(), "Timeout error: receive exceeded 250ms");

        let err = ActorError::configuration("workers must be positive", Some("workers"));
        assert!(err.to_string().contains("workers must be positive"));
    }

    #[test]
    fn test_resolution_failure_classification() {
        let id = ActorId::new();
        assert!(ActorError::unknown_operation(&id, "missing").is_resolution_failure());
        assert!(ActorError::payload_type::<u32>().is_resolution_failure());
        assert!(!ActorError::invocation("f", "boom").is_resolution_failure());
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("static boom");
        assert_eq!(panic_message(payload.as_ref()), "static boom");

        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(panic_message(payload.as_ref()), "owned boom");

        let payload: Box<dyn std::any::Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
