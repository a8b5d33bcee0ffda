use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Errors raised at the HTTP boundary with the generation backend.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

/// FastAPI error body: `{"detail": "..."}` or `{"detail": [...]}` for validation errors.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Value,
}

impl ApiError {
    /// Builds an error from a non-success response, preferring the server's `detail`.
    pub async fn from_response(response: reqwest::Response) -> ApiError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|e| match e.detail {
                Value::String(s) => s,
                other => other.to_string(),
            })
            .unwrap_or(body);

        match status {
            401 => ApiError::Unauthorized,
            404 => ApiError::NotFound(message),
            _ => ApiError::Api { status, message },
        }
    }

    /// Message suitable for the tracker's error field.
    pub fn detail(&self) -> String {
        match self {
            ApiError::Api { message, .. } if !message.is_empty() => message.clone(),
            ApiError::NotFound(message) if !message.is_empty() => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Errors from the durable state store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Failed to persist file: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// Error taxonomy of the generation tracker.
///
/// Inside the polling loop these are never propagated: they are rendered into
/// the tracker's `error` field and logged.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Failed to start generation: {0}")]
    Submission(String),

    #[error("Failed to get status: {0}")]
    Status(String),

    #[error("Generation job not found or expired")]
    JobExpired,

    #[error("Generation result not found or expired")]
    ResultExpired,

    #[error("Failed to get result: {0}")]
    ResultFetch(String),

    #[error("Failed to update credits: {0}")]
    CreditRefresh(String),

    #[error("Failed to save resume content: {0}")]
    ContentUpdate(String),

    #[error("No active generation job")]
    NoActiveJob,

    #[error("Generation job was superseded")]
    Superseded,

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl TrackerError {
    /// Errors after which the tracker no longer polls.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TrackerError::JobExpired
                | TrackerError::ResultExpired
                | TrackerError::NoActiveJob
                | TrackerError::Superseded
        )
    }
}
