pub mod job;
pub mod template;
pub mod user;

pub use job::{
    CreateJobResponse, GenerationInput, GenerationResult, GenerationStatus, JobStatus,
    StatusPayload,
};
pub use template::Template;
pub use user::UserSummary;
