//! Future Viewings: accepts "how I imagine the future" submissions and
//! generates an illustration for each one in the background.

pub mod api;
pub mod artifacts;
pub mod config;
pub mod error;
pub mod generation;
pub mod jobs;
pub mod store;
pub mod viewings;
