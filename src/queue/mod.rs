//! Queue module - bounded check pool and batch coordination

pub mod batch;
pub mod worker_pool;

pub use batch::{BatchConfig, BatchCoordinator, BatchRequest, BatchScope};
pub use worker_pool::{PoolConfig, WorkerPool};
