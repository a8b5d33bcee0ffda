//! Client-side state for resume generation: submits generation jobs to the
//! backend, tracks them to completion and survives restarts.

pub mod api;
pub mod clock;
pub mod config;
pub mod errors;
pub mod models;
pub mod session;
pub mod store;
pub mod templates;
pub mod tracker;

pub use errors::{ApiError, StoreError, TrackerError};
pub use tracker::{GenerationTracker, PollPolicy, TrackerDeps, TrackerView};
