use thiserror::Error;

/// Errors produced by the bulk data endpoint client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// Upstream signalled request throttling (HTTP 429-class).
    ///
    /// Never retried directly - the [`RateLimitGovernor`](crate::fetch::RateLimitGovernor)
    /// suspends issuance and resumes on its own schedule.
    #[error("throttled by upstream (http {code})")]
    RateLimited { code: u16 },

    #[error("upstream returned http {code}")]
    Status { code: u16 },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("failed to parse response: {0}")]
    Parse(String),
}

impl ApiError {
    /// Whether the request may be retried with a bounded backoff.
    ///
    /// Transport failures and 5xx responses are retryable; other 4xx
    /// responses are not, and throttling is handled by the governor instead.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Transport(_) => true,
            ApiError::Status { code } => *code >= 500,
            ApiError::RateLimited { .. } | ApiError::Parse(_) => false,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(value.to_string())
    }
}

/// Errors produced by the multiplexed streaming connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("connection closed by peer")]
    Closed,

    #[error("liveness deadline exceeded: no inbound message for {0:?}")]
    Liveness(std::time::Duration),

    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl StreamError {
    /// Whether the error means the connection is gone and the manager must
    /// re-enter its reconnect cycle.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            StreamError::Connect(_)
                | StreamError::Transport(_)
                | StreamError::Closed
                | StreamError::Liveness(_)
        )
    }
}

/// Top-level engine errors surfaced across the orchestrator boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Fatal: the engine cannot operate without an instrument universe.
    #[error("universe discovery failed: {0}")]
    UniverseDiscovery(ApiError),

    #[error("api error: {0}")]
    Api(#[from] ApiError),

    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    /// The stream manager exhausted its reconnect attempts.
    #[error("stream failed terminally after {attempts} reconnect attempts")]
    StreamFailed { attempts: u32 },

    /// The engine task is no longer running.
    #[error("engine terminated")]
    Terminated,
}

/// Failure to parse a [`Timeframe`](crate::market::Timeframe) from its wire form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown timeframe: {0}")]
pub struct ParseTimeframeError(pub String);
