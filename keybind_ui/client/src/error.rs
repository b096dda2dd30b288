use sync_core::protocol::ErrorCode;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClientError {
    #[error("ws actor unavailable")]
    ActorUnavailable,
    #[error("backend not connected")]
    Disconnected,
    #[error("backend request timed out")]
    Timeout,
    #[error("backend error ({code:?}): {msg}")]
    Backend { code: ErrorCode, msg: String },
    #[error("unexpected reply: expected {expected}, got {got}")]
    UnexpectedReply {
        expected: &'static str,
        got: &'static str,
    },
}
