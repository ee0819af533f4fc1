//! HTTP surface.

pub mod routes;

pub use routes::{AppState, viewing_routes};
