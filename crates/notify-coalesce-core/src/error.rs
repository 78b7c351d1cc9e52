//! Error types for the coalescing engine.

use thiserror::Error;

use crate::key::CoalescingKey;

/// Errors surfaced synchronously by engine calls.
///
/// Dispatch failures on the timer path have no caller to return to; those are
/// logged instead, and bulk flush reports them in its `FlushReport`.
#[derive(Debug, Error)]
pub enum CoalesceError {
    /// A key component or the payload was empty.
    #[error("[C001] Invalid event: {field} must not be empty")]
    InvalidInput { field: &'static str },

    /// Timers need a Tokio runtime to be spawned on.
    #[error("[C002] Coalescing engine must be created inside a Tokio runtime")]
    NoRuntime,

    /// Engine settings that would make windows unusable.
    #[error("[C004] Invalid engine config: {reason}")]
    InvalidConfig { reason: &'static str },

    /// The dispatch collaborator rejected the notification for this key.
    #[error("[C003] Dispatch failed for {key}: {source}")]
    Dispatch {
        key: CoalescingKey,
        #[source]
        source: anyhow::Error,
    },
}

impl CoalesceError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "C001",
            Self::NoRuntime => "C002",
            Self::Dispatch { .. } => "C003",
            Self::InvalidConfig { .. } => "C004",
        }
    }
}

pub type Result<T> = std::result::Result<T, CoalesceError>;
