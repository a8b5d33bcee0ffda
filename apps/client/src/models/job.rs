use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ApiError, TrackerError};

/// Step label shown before the backend has reported anything.
pub const INITIAL_STEP: &str = "Initializing...";

// ────────────────────────────────────────────────────────────────────────────
// Job status
// ────────────────────────────────────────────────────────────────────────────

/// Lifecycle of a generation job as reported by the backend.
///
/// `Idle` is set locally on submission; every other transition comes from a
/// status response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Idle,
    Parsing,
    Analyzing,
    Optimizing,
    Constructing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// True while the backend is working on the job.
    pub fn is_generating(self) -> bool {
        !matches!(
            self,
            JobStatus::Idle | JobStatus::Completed | JobStatus::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Idle => "idle",
            JobStatus::Parsing => "parsing",
            JobStatus::Analyzing => "analyzing",
            JobStatus::Optimizing => "optimizing",
            JobStatus::Constructing => "constructing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Wire payloads
// ────────────────────────────────────────────────────────────────────────────

/// Response body of `POST /start-generation`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateJobResponse {
    pub job_id: String,
}

/// Response body of `GET /generation-status/{id}`.
///
/// Only `status` is required. The server's own `elapsed_time` is accepted but
/// never displayed; elapsed time is measured locally.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatusPayload {
    pub status: JobStatus,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub current_step: Option<String>,
    #[serde(default)]
    pub estimated_time_remaining: Option<f64>,
    #[serde(default)]
    pub elapsed_time: Option<f64>,
}

impl StatusPayload {
    pub fn new(status: JobStatus, progress: f64) -> Self {
        Self {
            status,
            progress,
            current_step: None,
            estimated_time_remaining: None,
            elapsed_time: None,
        }
    }

    pub fn with_step(mut self, step: &str) -> Self {
        self.current_step = Some(step.to_string());
        self
    }

    /// Rejects payloads whose numbers cannot be shown as-is.
    pub fn validate(self) -> Result<Self, ApiError> {
        if !self.progress.is_finite() || !(0.0..=100.0).contains(&self.progress) {
            return Err(ApiError::InvalidPayload(format!(
                "progress out of range: {}",
                self.progress
            )));
        }
        if let Some(eta) = self.estimated_time_remaining {
            if !eta.is_finite() || eta < 0.0 {
                return Err(ApiError::InvalidPayload(format!(
                    "estimated_time_remaining out of range: {eta}"
                )));
            }
        }
        Ok(self)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Local job state
// ────────────────────────────────────────────────────────────────────────────

/// The tracked job's status as held by the client.
///
/// `start_time` (epoch milliseconds) is recorded locally on submission and is
/// never overwritten by server responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationStatus {
    pub status: JobStatus,
    pub progress: f64,
    pub current_step: String,
    pub estimated_time_remaining: Option<f64>,
    pub start_time: i64,
}

impl GenerationStatus {
    pub fn initial(start_time: i64) -> Self {
        Self {
            status: JobStatus::Idle,
            progress: 0.0,
            current_step: INITIAL_STEP.to_string(),
            estimated_time_remaining: None,
            start_time,
        }
    }

    /// Merges a status response. Progress never moves backwards.
    pub fn merge(&mut self, payload: StatusPayload) {
        self.status = payload.status;
        self.progress = self.progress.max(payload.progress);
        if let Some(step) = payload.current_step.filter(|s| !s.trim().is_empty()) {
            self.current_step = step;
        }
        self.estimated_time_remaining = payload.estimated_time_remaining;
    }
}

/// Generated resume returned by `GET /generation-result/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub job_id: String,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
    pub content: String,
    #[serde(default)]
    pub agent_outputs: Option<Value>,
    #[serde(default)]
    pub analysis_summary: Option<String>,
    #[serde(default)]
    pub token_usage: Option<Value>,
    #[serde(default)]
    pub total_usage: Option<Value>,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Everything needed to start a generation job.
#[derive(Debug, Clone)]
pub struct GenerationInput {
    /// Raw job description document (PDF, DOCX or text).
    pub document: Bytes,
    pub file_name: String,
    pub company_name: String,
    pub job_title: String,
    pub skills: Vec<String>,
    pub template_id: Option<String>,
}

impl GenerationInput {
    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.document.is_empty() {
            return Err(TrackerError::Submission(
                "job description document cannot be empty".to_string(),
            ));
        }
        if self.job_title.trim().is_empty() {
            return Err(TrackerError::Submission(
                "job_title cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}
