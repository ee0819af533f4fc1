//! Future viewings: the record model and the service request handlers call.

pub mod model;
pub mod service;

pub use model::{FutureViewing, FutureViewingInput, ProcessingStatus};
pub use service::{Pagination, ViewingService};
