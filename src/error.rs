use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Which rolling quota window denied a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuotaWindow {
    Hourly,
    Daily,
}

impl QuotaWindow {
    pub fn length(self) -> Duration {
        match self {
            QuotaWindow::Hourly => Duration::from_secs(60 * 60),
            QuotaWindow::Daily => Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl fmt::Display for QuotaWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaWindow::Hourly => f.write_str("hourly"),
            QuotaWindow::Daily => f.write_str("daily"),
        }
    }
}

/// Terminal outcome of a failed gateway call.
///
/// Every variant is cheap to clone so a failed [`Response`](crate::Response)
/// can carry it by value.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GatewayError {
    #[error("{window} quota exceeded, resets in {}s", .retry_after.as_secs())]
    QuotaExceeded {
        window: QuotaWindow,
        retry_after: Duration,
    },

    #[error("provider unavailable: {0}")]
    Transport(TransportError),

    #[error("provider rejected credentials ({status}): {message}")]
    Auth { status: u16, message: String },

    #[error("provider rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error(transparent)]
    SchemaViolation(#[from] SchemaViolation),

    #[error("invalid schema descriptor: {0}")]
    InvalidSchema(String),

    #[error("quota store unavailable: {0}")]
    Store(String),
}

/// Coarse classification callers map to user-facing behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    QuotaDenied,
    ProviderUnavailable,
    Rejected,
    Unparseable,
}

impl GatewayError {
    pub fn kind(&self) -> FailureKind {
        match self {
            GatewayError::QuotaExceeded { .. } => FailureKind::QuotaDenied,
            GatewayError::Transport(_) | GatewayError::Store(_) => {
                FailureKind::ProviderUnavailable
            }
            GatewayError::Auth { .. }
            | GatewayError::Rejected { .. }
            | GatewayError::InvalidSchema(_) => FailureKind::Rejected,
            GatewayError::SchemaViolation(_) => FailureKind::Unparseable,
        }
    }

    /// Returns a user-friendly suggestion for how to resolve this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            GatewayError::QuotaExceeded {
                window: QuotaWindow::Hourly,
                ..
            } => Some("AI suggestions are paused for this hour, try again later"),
            GatewayError::QuotaExceeded {
                window: QuotaWindow::Daily,
                ..
            } => Some("Today's AI budget is used up, try again tomorrow"),
            GatewayError::Transport(TransportError::Timeout(_)) => {
                Some("The AI provider is slow to answer, try again in a moment")
            }
            GatewayError::Transport(_) => Some("The AI provider is unavailable, try again later"),
            GatewayError::Auth { .. } => Some("Check the provider API key in the configuration"),
            GatewayError::SchemaViolation(_) => {
                Some("Couldn't understand the AI output, ask again")
            }
            _ => None,
        }
    }

    /// Raw model text attached to the error, if any.
    pub fn raw_text(&self) -> Option<&str> {
        match self {
            GatewayError::SchemaViolation(v) => Some(&v.raw_text),
            _ => None,
        }
    }
}

impl From<TransportError> for GatewayError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Auth { status, message } => GatewayError::Auth { status, message },
            TransportError::Rejected { status, message } => {
                GatewayError::Rejected { status, message }
            }
            other => GatewayError::Transport(other),
        }
    }
}

/// Failure of a single provider attempt.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    #[error("authentication failed ({status}): {message}")]
    Auth { status: u16, message: String },

    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout(_)
                | TransportError::Network(_)
                | TransportError::ServerError { .. }
                | TransportError::RateLimited { .. }
        )
    }

    /// Server-provided hint for how long to wait before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            TransportError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Model output that could not be decoded into the expected shape.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("model output does not match schema '{schema}': {reason}")]
pub struct SchemaViolation {
    pub schema: String,
    pub reason: String,
    pub raw_text: String,
}

pub type Result<T> = std::result::Result<T, GatewayError>;
