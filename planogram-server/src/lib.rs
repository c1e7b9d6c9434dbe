//! planogram-server: retail shelf layout back office
//!
//! - Shelf layouts per branch with contiguous 1-based slot indices
//! - Serialized layout mutations under per-shelf advisory locks
//! - Change log and update flags for branches to acknowledge
//! - POG (planogram) change requests with admin review and bulk approve

pub mod api;
pub mod changelog;
pub mod config;
pub mod error;
pub mod logger;
pub mod pog;
pub mod shelf;
pub mod state;
pub mod store;

pub use config::Config;
pub use state::AppState;
