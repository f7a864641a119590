//! Credential rotation for quota-limited providers
//!
//! A `KeyPool` is shared by every concurrent unit that talks to the same
//! provider. The cursor is a monotonically increasing ticket; the active key
//! is `ticket % len`. Advancing uses compare-and-swap on the ticket the caller
//! observed, so several units that hit quota on the same key at once move the
//! cursor exactly one step.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

/// Ordered list of API keys with a rotating cursor
pub struct KeyPool {
    keys: Vec<String>,
    cursor: AtomicUsize,
}

/// A key checked out from the pool together with the ticket that selected it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLease {
    /// Cursor value observed when the key was selected
    pub ticket: usize,
    /// Index of the key in the pool
    pub index: usize,
    /// The credential itself
    pub key: String,
}

impl KeyPool {
    /// Create a pool from the given keys; blank entries are dropped
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys = keys
            .into_iter()
            .map(Into::into)
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        Self {
            keys,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Parse a comma-separated key list (as stored in an env var)
    pub fn from_list(list: &str) -> Self {
        Self::new(list.split(','))
    }

    /// Read keys from an environment variable; missing var gives an empty pool
    pub fn from_env(var: &str) -> Self {
        match std::env::var(var) {
            Ok(value) => Self::from_list(&value),
            Err(_) => {
                debug!(env = %var, "API key variable not set");
                Self::new(Vec::<String>::new())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Current cursor ticket
    pub fn ticket(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    /// Check out the currently active key
    pub fn current(&self) -> Option<KeyLease> {
        if self.keys.is_empty() {
            return None;
        }
        let ticket = self.ticket();
        let index = ticket % self.keys.len();
        Some(KeyLease {
            ticket,
            index,
            key: self.keys[index].clone(),
        })
    }

    /// Move past the key selected by `ticket`
    ///
    /// Returns `true` if this call advanced the cursor, `false` if another
    /// caller already moved it past `ticket`.
    pub fn advance(&self, ticket: usize) -> bool {
        if self.keys.len() <= 1 {
            return false;
        }
        let advanced = self
            .cursor
            .compare_exchange(
                ticket,
                ticket.wrapping_add(1),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if advanced {
            info!(
                from = ticket % self.keys.len(),
                to = ticket.wrapping_add(1) % self.keys.len(),
                "Rotated API key"
            );
        }
        advanced
    }
}

impl fmt::Debug for KeyPool {
    // Never print the keys themselves
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPool")
            .field("keys", &self.keys.len())
            .field("cursor", &self.ticket())
            .finish()
    }
}
