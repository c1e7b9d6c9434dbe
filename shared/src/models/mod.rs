//! Data models
//!
//! Shared between the planogram server and its clients (via API).
//! Timestamps are Unix milliseconds, row ids are `i64` (Postgres BIGSERIAL).

pub mod change_log;
pub mod pog;
pub mod product;
pub mod shelf;

// Re-exports
pub use change_log::*;
pub use pog::*;
pub use product::*;
pub use shelf::*;
