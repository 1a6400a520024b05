use thiserror::Error;

/// Failures talking to the forecasting backend.
///
/// For `POST /run` every variant is a hard failure. For the persisted summary
/// they are logged and the run response is used instead.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}: {body}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("invalid JSON from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{url} did not return a JSON object")]
    NotAnObject { url: String },
}

impl BackendError {
    pub fn url(&self) -> &str {
        match self {
            BackendError::Transport { url, .. }
            | BackendError::Status { url, .. }
            | BackendError::Decode { url, .. }
            | BackendError::NotAnObject { url } => url,
        }
    }
}
