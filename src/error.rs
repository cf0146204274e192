// ABOUTME: Classified error kinds for adapter send paths plus HTTP/network classifiers.
// ABOUTME: The retry policy in the worker loops is driven entirely by these variants.

use thiserror::Error;

/// Classified outcome of an adapter `send`/`send_media`/`edit_message` call.
///
/// Adapters must surface every delivery failure as one of these kinds, either
/// by constructing a variant directly or through [`SendError::from_status`] /
/// [`SendError::from_network`]. The orchestrator's retry policy keys off the
/// variant alone:
///
/// - `NotRunning`, `Failed`: permanent, never retried
/// - `RateLimited`: retried after a fixed delay
/// - `Temporary`, `Other`: retried with exponential backoff
#[derive(Debug, Error)]
pub enum SendError {
    /// The adapter is stopped. Permanent.
    #[error("adapter not running")]
    NotRunning,

    /// The platform signalled throttling (HTTP 429 or equivalent).
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Transient failure (5xx, network error, timeout).
    #[error("temporary send failure: {0}")]
    Temporary(String),

    /// Permanent application failure (4xx other than 429, bad chat id).
    #[error("send failed: {0}")]
    Failed(String),

    /// Unclassified failure. Treated like `Temporary` by the retry policy.
    #[error("{0}")]
    Other(String),
}

impl SendError {
    /// Classify a failure from an HTTP status code.
    ///
    /// `429` maps to `RateLimited`, `5xx` to `Temporary`, any other `4xx` to
    /// `Failed`. Statuses outside the error ranges pass through unclassified.
    pub fn from_status(status: u16, msg: impl Into<String>) -> Self {
        let msg = msg.into();
        match status {
            429 => Self::RateLimited(msg),
            s if s >= 500 => Self::Temporary(msg),
            s if s >= 400 => Self::Failed(msg),
            _ => Self::Other(msg),
        }
    }

    /// Classify a network-layer failure (connect, DNS, timeout) as transient.
    pub fn from_network(err: impl std::fmt::Display) -> Self {
        Self::Temporary(err.to_string())
    }

    /// True for kinds the worker must never retry.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::NotRunning | Self::Failed(_))
    }

    /// True when the platform asked us to back off for a fixed delay.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}
