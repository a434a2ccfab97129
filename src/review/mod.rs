//! Review module - request types, image loading, orchestration and callbacks

pub mod callback;
pub mod image;
pub mod orchestrator;
pub mod types;

pub use orchestrator::ReviewOrchestrator;
pub use types::{CheckOptions, CheckOutcome, CheckType, ImageSource, ReviewRequest, ReviewResult};
