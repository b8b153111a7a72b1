use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("engine returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("engine payload error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("engine response invalid: {0}")]
    InvalidResponse(String),
    #[error("engine base URL is not configured")]
    MissingBaseUrl,
}

impl EngineError {
    /// Transient failures worth another attempt: transport errors, rate
    /// limits, and server-side 5xx.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Http(error) => {
                error.is_timeout() || error.is_connect() || error.is_request()
            }
            EngineError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
