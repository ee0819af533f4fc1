//! Deferred image generation: bounded queue plus a single background worker.

pub mod queue;
pub mod worker;

pub use queue::{Job, JobQueue, JobReceiver};
pub use worker::{Worker, WorkerDeps, WorkerHandle};
