//! Job tracking for individual video analyses.

mod progress;
mod registry;

pub use progress::{ProgressReporter, ProgressSnapshot, Stage};
pub use registry::{Job, JobRegistry, JobStatus};
