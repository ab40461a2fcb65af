//! Message handler trait for queue consumers.
//!
//! A [`MessageHandler`] turns one raw payload into side effects. It reports
//! failures with a [`HandlerError`] whose variant tells the consumer what to do
//! with the message:
//!
//! | Result | Consumer action |
//! |--------|-----------------|
//! | `Ok(())` | ack |
//! | `Err(Malformed)` | log, ack (the message can never succeed) |
//! | `Err(Transient)` | log, requeue, pause before the next message |

use async_trait::async_trait;
use thiserror::Error;

/// Why a handler could not process a message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The payload can never be processed (bad encoding, unknown event kind)
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Processing failed for a reason that may clear up (e.g. a failed downstream publish)
    #[error("Transient failure: {0}")]
    Transient(String),
}

impl HandlerError {
    /// Whether the message should be delivered again.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Processes raw messages received from one queue.
///
/// Handlers must tolerate redelivery: the broker guarantees at-least-once, not
/// exactly-once.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Handle a raw message body.
    ///
    /// # Errors
    ///
    /// - [`HandlerError::Malformed`] if the payload is not a usable event
    /// - [`HandlerError::Transient`] if processing should be retried later
    async fn handle(&self, payload: &[u8]) -> Result<(), HandlerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retried() {
        assert!(HandlerError::Transient("broker down".into()).is_transient());
        assert!(!HandlerError::Malformed("not json".into()).is_transient());
    }
}
