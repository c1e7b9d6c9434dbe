//! Per-shelf advisory locks
//!
//! Every mutation of a `(branch, shelf)` layout runs while holding that
//! shelf's lock. Locks belong to a unit of work and are released when it
//! commits, rolls back or is dropped, so no code path can leak one.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::store::StoreResult;

/// How a `(branch, shelf)` pair is turned into a 64-bit lock key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LockKeyScheme {
    /// SHA-256 of the two codes, distinct codes never share a key in practice
    #[default]
    Hashed,
    /// `digits(branch) * 10000 + digits(shelf)`, shared with older tooling
    Legacy,
}

impl FromStr for LockKeyScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hashed" => Ok(Self::Hashed),
            "legacy" => Ok(Self::Legacy),
            other => Err(format!("unknown lock key scheme: {other}")),
        }
    }
}

/// Advisory lock key for one shelf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LockKey(i64);

impl LockKey {
    pub fn derive(scheme: LockKeyScheme, branch_code: &str, shelf_code: &str) -> Self {
        match scheme {
            LockKeyScheme::Hashed => Self::hashed(branch_code, shelf_code),
            LockKeyScheme::Legacy => Self::legacy(branch_code, shelf_code),
        }
    }

    fn hashed(branch_code: &str, shelf_code: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(branch_code.as_bytes());
        // unit separator keeps ("AB", "C") apart from ("A", "BC")
        hasher.update([0x1f]);
        hasher.update(shelf_code.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        Self(i64::from_be_bytes(bytes))
    }

    fn legacy(branch_code: &str, shelf_code: &str) -> Self {
        let branch = digits(branch_code);
        let shelf = digits(shelf_code);
        Self(branch.saturating_mul(10_000).saturating_add(shelf))
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Numeric value of the ASCII digits in `code`; 0 when there are none.
fn digits(code: &str) -> i64 {
    code.chars()
        .filter_map(|c| c.to_digit(10))
        .fold(0i64, |acc, d| {
            acc.saturating_mul(10).saturating_add(i64::from(d))
        })
}

/// Acquisition order for a set of keys: ascending, without duplicates.
///
/// Two actions that need the same pair of shelves always lock them in the
/// same order and therefore cannot deadlock each other.
pub fn lock_order(keys: impl IntoIterator<Item = LockKey>) -> Vec<LockKey> {
    let mut keys: Vec<LockKey> = keys.into_iter().collect();
    keys.sort_unstable();
    keys.dedup();
    keys
}

/// Exclusive lock acquisition bound to a unit of work.
#[async_trait]
pub trait ShelfLock: Send {
    /// Block until the key is held by this unit of work, or fail with
    /// [`StoreError::LockTimeout`](crate::store::StoreError::LockTimeout).
    ///
    /// Re-acquiring a key already held by the same unit of work succeeds.
    async fn acquire(&mut self, key: LockKey) -> StoreResult<()>;
}
