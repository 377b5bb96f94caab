//! Batches of videos processed one at a time.

mod coordinator;
mod model;

pub use coordinator::BatchCoordinator;
pub use model::{BatchJob, BatchStatus, BatchSummary, FailedVideo};
