//! Shared types for the planogram service
//!
//! Error system, wire models and small utilities used by the server and
//! by anything that talks to its HTTP API.

pub mod error;
pub mod models;
pub mod util;

// Re-exports
pub use axum::Json;
pub use serde::{Deserialize, Serialize};
