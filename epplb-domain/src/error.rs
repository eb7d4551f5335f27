use thiserror::Error;

// ---

use super::message::Message;

// ---------------------------------------------------------------------------
// EppError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum EppError {
    // ---
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer closed the stream cleanly before the first byte of a frame.
    #[error("peer disconnected")]
    Disconnected,

    #[error("invalid frame length {0} (header counts itself, minimum 4)")]
    InvalidFrameLength(u32),

    #[error("frame too large: max {max} got {got}")]
    FrameTooLarge { max: usize, got: usize },

    #[error("message is not a response")]
    NotAResponse,

    #[error("response is missing result")]
    MissingResult,

    /// Upstream answered a login with a failure result. Carries the
    /// upstream response so it can be relayed as-is.
    #[error("login failed; {reason}")]
    LoginFailed { reason: String, response: Message },

    #[error("upstream error: {0}")]
    Upstream(#[source] Box<EppError>),

    /// An upstream failure that left `failed` unanswered. `None` means the
    /// failure happened before any command was taken from downstream.
    #[error("retryable upstream error: {source}")]
    RetryableUpstream {
        #[source]
        source: Box<EppError>,
        failed: Option<Message>,
    },

    #[error("max retries reached after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("pool error: {0}")]
    Pool(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("session closed")]
    SessionClosed,
}

// ---

impl EppError {
    // ---
    /// Wrap an error observed on the upstream leg.
    pub fn upstream(e: impl Into<EppError>) -> Self {
        match e.into() {
            e @ EppError::Upstream(_) => e,
            e => EppError::Upstream(Box::new(e)),
        }
    }

    // ---

    /// Promote an upstream failure to a replayable one.
    pub fn retryable(source: EppError, failed: Option<Message>) -> Self {
        EppError::RetryableUpstream {
            source: Box::new(source),
            failed,
        }
    }
}

// ---

pub type Result<T> = std::result::Result<T, EppError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn upstream_wrap_is_not_nested() {
        // ---
        let e = EppError::upstream(EppError::upstream(EppError::Disconnected));
        match e {
            EppError::Upstream(inner) => assert!(matches!(*inner, EppError::Disconnected)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn retryable_keeps_source() {
        // ---
        let e = EppError::retryable(EppError::upstream(EppError::Disconnected), None);
        match &e {
            EppError::RetryableUpstream { source, failed } => {
                assert!(matches!(**source, EppError::Upstream(_)));
                assert!(failed.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(e.to_string().contains("peer disconnected"));
    }
}
