pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("metrics registry error: {0}")]
    Metrics(#[from] volley_metrics::Error),

    #[error("`vus` must be a positive integer")]
    InvalidVus,

    #[error("`iterations` must be a positive integer")]
    InvalidIterations,

    #[error("`duration` must be a positive duration")]
    InvalidDuration,

    #[error("`rps` must be a positive integer")]
    InvalidRate,

    #[error("`burst` must be a positive integer")]
    InvalidBurst,

    #[error("invalid threshold for `{metric}`: {reason}")]
    InvalidThreshold { metric: String, reason: String },

    #[error("invalid template `{template}`: {reason}")]
    InvalidTemplate { template: String, reason: String },

    #[error("invalid status pattern `{0}` (expected a code such as `401` or a class such as `2xx`)")]
    InvalidStatus(String),

    #[error("invalid step `{step}`: {reason}")]
    InvalidStep { step: String, reason: String },

    #[error("invalid credentials at line {line}: {reason}")]
    InvalidCredentials { line: usize, reason: String },

    #[error("setup step `{step}` failed: {reason}")]
    Setup { step: String, reason: String },

    #[error("run aborted before load started")]
    Aborted,
}
