use thiserror::Error;

#[derive(Debug, Error)]
pub enum CpError {
    #[error("unknown language cluster: {0}")]
    UnknownLanguageCluster(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("provider error ({status}): {message}")]
    Provider { status: u16, message: String },

    #[error("transient provider failure: {0}")]
    Transient(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),
}

impl CpError {
    /// Whether a failed generation call may succeed if attempted again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient(_) => true,
            Self::Provider { status, .. } => is_transient_status(*status),
            _ => false,
        }
    }
}

/// 408, 429 and every 5xx are worth retrying; other statuses are caller errors.
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 429) || (500..600).contains(&status)
}

pub type CpResult<T> = Result<T, CpError>;
