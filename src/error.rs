//! Error taxonomy shared across the agent core and the gateway.
//!
//! Every port returns `Result<_, CoreError>` so that boundaries (the A2A
//! server, the gateway pipeline) can classify failures without string
//! matching. Variants are cheap to clone; adapters attach context through the
//! message payloads.

use crate::messages::MAX_MESSAGE_LEN;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// Caller-supplied data violates an invariant.
    #[error("validation: {0}")]
    Validation(String),

    /// The requested entity does not exist.
    #[error("not found")]
    NotFound,

    /// Cooperative cancellation observed.
    #[error("request cancelled")]
    Cancelled,

    /// A deadline elapsed before the operation finished.
    #[error("deadline exceeded")]
    Deadline,

    /// A transient upstream failure.
    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    /// Retryable back-pressure from an upstream service.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The operation needs credentials the caller did not present.
    #[error("authentication required: {0}")]
    AuthRequired(String),

    /// Presented credentials were rejected.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The server does not support authorization at all; anonymous
    /// connections are still allowed.
    #[error("authorization is not supported by this server")]
    AuthUnsupported,

    /// The caller is authenticated but not allowed to do this.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Message content (or marshaled tool payload) exceeds the per-message
    /// byte bound. Consumed by the orchestrator to downgrade oversized tool
    /// responses into `ToolError` messages.
    #[error("message content exceeds {MAX_MESSAGE_LEN} bytes")]
    MessageTooLarge,

    /// Invariant violation or unclassified failure.
    #[error("internal: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn merge_type_mismatch(expected: &str, got: &str) -> Self {
        Self::Internal(format!(
            "merge tag shared between incompatible kinds: expected {expected}, got {got}"
        ))
    }

    /// Stable machine-readable reason, used in A2A error details.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "invalid_argument",
            Self::NotFound => "not_found",
            Self::Cancelled => "cancelled",
            Self::Deadline => "deadline_exceeded",
            Self::Unavailable(_) => "unavailable",
            Self::RateLimited(_) => "resource_exhausted",
            Self::AuthRequired(_) | Self::AuthFailed(_) => "unauthenticated",
            Self::AuthUnsupported => "auth_unsupported",
            Self::PermissionDenied(_) => "permission_denied",
            Self::MessageTooLarge => "message_too_large",
            Self::Internal(_) => "internal",
        }
    }
}
