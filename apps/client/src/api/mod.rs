//! Job API: the generation backend as seen by the tracker.
//!
//! The tracker only talks to the backend through `JobApi`, so tests and
//! alternative transports can be swapped in without touching tracker code.
use async_trait::async_trait;

use crate::errors::ApiError;
use crate::models::{GenerationInput, GenerationResult, StatusPayload, Template};

pub mod http;

pub use http::HttpJobApi;

/// Outcome of a result fetch. `Pending` maps the backend's 202.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultFetch {
    Ready(GenerationResult),
    Pending,
}

#[async_trait]
pub trait JobApi: Send + Sync {
    /// POST /start-generation: returns the server-assigned job id.
    async fn create(&self, input: &GenerationInput) -> Result<String, ApiError>;

    /// GET /generation-status/{id}. A 404 is `ApiError::NotFound`.
    async fn get_status(&self, job_id: &str) -> Result<StatusPayload, ApiError>;

    /// GET /generation-result/{id}. A 404 is `ApiError::NotFound`.
    async fn get_result(&self, job_id: &str) -> Result<ResultFetch, ApiError>;

    /// PUT /resume/{id} with edited content.
    async fn update_content(&self, resume_id: &str, content: &str) -> Result<(), ApiError>;

    /// GET /templates.
    async fn list_templates(&self) -> Result<Vec<Template>, ApiError>;
}
