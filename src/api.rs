//! HTTP trigger surface

pub mod routes;

pub use routes::{router, ApiState};
