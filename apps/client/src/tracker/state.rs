use serde::{Deserialize, Serialize};

use crate::models::job::INITIAL_STEP;
use crate::models::{GenerationResult, GenerationStatus, JobStatus};
use crate::tracker::format::format_elapsed;

/// Schema version of the persisted snapshot.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Tracker state. Everything except the runtime counters is persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackerState {
    #[serde(default)]
    pub version: u32,
    pub job_id: Option<String>,
    pub status: Option<GenerationStatus>,
    pub result: Option<GenerationResult>,
    pub error: Option<String>,
    /// Set when tracking stopped on a persistent error (expiry, give-up).
    #[serde(default)]
    pub halted: bool,
    #[serde(default)]
    pub elapsed_time: f64,
    pub company_name: Option<String>,
    pub job_title: Option<String>,

    #[serde(skip)]
    pub(crate) is_polling: bool,
    #[serde(skip)]
    pub(crate) consecutive_failures: u32,
    /// Bumped whenever tracking is stopped or replaced; timer tasks carrying
    /// an older epoch may not touch the state.
    #[serde(skip)]
    pub(crate) epoch: u64,
}

impl TrackerState {
    /// Clears every job field and invalidates running timers.
    pub(crate) fn clear(&mut self) {
        let epoch = self.epoch + 1;
        *self = TrackerState {
            epoch,
            ..TrackerState::default()
        };
    }

    /// Replaces the job fields with a persisted snapshot.
    pub(crate) fn load(&mut self, snapshot: TrackerState) {
        let epoch = self.epoch + 1;
        *self = TrackerState {
            epoch,
            is_polling: false,
            consecutive_failures: 0,
            ..snapshot
        };
    }

    pub(crate) fn snapshot(&self) -> TrackerState {
        TrackerState {
            version: SNAPSHOT_VERSION,
            ..self.clone()
        }
    }

    pub fn job_status(&self) -> Option<JobStatus> {
        self.status.as_ref().map(|s| s.status)
    }

    pub fn is_terminal(&self) -> bool {
        self.job_status().is_some_and(JobStatus::is_terminal)
    }

    /// Recomputes elapsed seconds from the recorded start time.
    pub(crate) fn refresh_elapsed(&mut self, now_ms: i64) {
        if let Some(status) = &self.status {
            let elapsed = (now_ms - status.start_time).max(0) as f64 / 1000.0;
            self.elapsed_time = self.elapsed_time.max(elapsed);
        }
    }

    pub fn view(&self) -> TrackerView {
        let job_status = self.job_status();
        TrackerView {
            job_id: self.job_id.clone(),
            status: job_status,
            is_generating: job_status.is_some_and(JobStatus::is_generating) && !self.halted,
            is_completed: job_status == Some(JobStatus::Completed),
            is_failed: job_status == Some(JobStatus::Failed) || self.halted,
            is_polling: self.is_polling,
            progress_percentage: self.status.as_ref().map_or(0.0, |s| s.progress),
            current_step_label: self
                .status
                .as_ref()
                .map_or_else(|| INITIAL_STEP.to_string(), |s| s.current_step.clone()),
            estimated_time_remaining: self
                .status
                .as_ref()
                .and_then(|s| s.estimated_time_remaining),
            elapsed_time: self.elapsed_time,
            formatted_elapsed_time: format_elapsed(self.elapsed_time),
            error: self.error.clone(),
            has_result: self.result.is_some(),
        }
    }
}

/// Read-only view handed to the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackerView {
    pub job_id: Option<String>,
    pub status: Option<JobStatus>,
    pub is_generating: bool,
    pub is_completed: bool,
    pub is_failed: bool,
    pub is_polling: bool,
    pub progress_percentage: f64,
    pub current_step_label: String,
    pub estimated_time_remaining: Option<f64>,
    pub elapsed_time: f64,
    pub formatted_elapsed_time: String,
    pub error: Option<String>,
    pub has_result: bool,
}
