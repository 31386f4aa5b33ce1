use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FinderError {
    #[error("Authentication failed: {reason}")]
    Auth { reason: String },

    #[error("YouTube API quota exceeded")]
    QuotaExceeded,

    #[error("{resource} {id} not found")]
    NotFound { resource: &'static str, id: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("YouTube API request failed with status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Timed out: {what}")]
    Timeout { what: String },

    #[error("Export to {} failed: {source}", path.display())]
    Export {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("Invalid video ID or URL: {input}")]
    InvalidVideoId { input: String },

    #[error("Missing API key: pass --api-key, set api_key in the config file or set {env_var}")]
    MissingApiKey { env_var: String },
}

impl FinderError {
    /// Errors worth another attempt at the API client boundary.
    pub fn is_transient(&self) -> bool {
        match self {
            FinderError::Network(_) => true,
            FinderError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Errors that end the whole run rather than a single strategy.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FinderError::Auth { .. })
    }
}

pub type Result<T> = std::result::Result<T, FinderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limits_and_server_errors_are_transient() {
        assert!(FinderError::Api { status: 429, message: String::new() }.is_transient());
        assert!(FinderError::Api { status: 503, message: String::new() }.is_transient());
        assert!(!FinderError::Api { status: 400, message: String::new() }.is_transient());
        assert!(!FinderError::QuotaExceeded.is_transient());
    }

    #[test]
    fn only_auth_is_fatal() {
        assert!(FinderError::Auth { reason: "keyInvalid".into() }.is_fatal());
        assert!(!FinderError::QuotaExceeded.is_fatal());
    }
}
