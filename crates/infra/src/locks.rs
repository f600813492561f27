//! Per-stock-key mutual exclusion for the transactional path.
//!
//! Confirm and delete claim every key they touch before reading snapshots.
//! A caller claims its whole key set at once, in sorted order, so two
//! overlapping callers can never hold one key each and wait on the other.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use stockledger_core::LedgerError;
use stockledger_inventory::StockKey;

#[derive(Debug, Default)]
pub struct KeyedLocks {
    held: Mutex<HashSet<StockKey>>,
    released: Condvar,
}

/// Releases its keys on drop.
#[derive(Debug)]
pub struct KeyGuard<'a> {
    locks: &'a KeyedLocks,
    keys: Vec<StockKey>,
}

impl KeyGuard<'_> {
    pub fn keys(&self) -> &[StockKey] {
        &self.keys
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.locks.held.lock().unwrap_or_else(PoisonError::into_inner);
        for key in &self.keys {
            held.remove(key);
        }
        drop(held);
        self.locks.released.notify_all();
    }
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until every key in `keys` is free, then hold them all.
    ///
    /// Fails with a conflict if `timeout` elapses first; nothing is held then.
    pub fn lock_all(&self, keys: &BTreeSet<StockKey>, timeout: Duration) -> Result<KeyGuard<'_>, LedgerError> {
        let deadline = Instant::now() + timeout;
        let mut held = self
            .held
            .lock()
            .map_err(|_| LedgerError::conflict("stock lock table poisoned"))?;

        while let Some(busy) = keys.iter().find(|k| held.contains(*k)) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::warn!(key = %busy, ?timeout, "timed out waiting for stock key");
                return Err(LedgerError::conflict(format!("timed out waiting for stock key {busy}")));
            }
            held = self
                .released
                .wait_timeout(held, remaining)
                .map_err(|_| LedgerError::conflict("stock lock table poisoned"))?
                .0;
        }

        held.extend(keys.iter().copied());
        Ok(KeyGuard {
            locks: self,
            keys: keys.iter().copied().collect(),
        })
    }

    pub fn is_held(&self, key: &StockKey) -> bool {
        self.held
            .lock()
            .map(|held| held.contains(key))
            .unwrap_or(false)
    }
}
