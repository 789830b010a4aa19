//! Striped per-application locks.
//!
//! A fixed pool of mutexes addressed by hashing the application id. Two
//! ids may land on the same stripe; they then serialize against each other,
//! which keeps the number of live locks bounded regardless of how many apps
//! are scaled.

use tokio::sync::Mutex;

/// Fixed-size pool of async mutexes keyed by application id.
pub struct StripedLock {
    stripes: Vec<Mutex<()>>,
}

impl StripedLock {
    /// Create a pool with `capacity` stripes.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "striped lock capacity must be greater than 0");
        Self {
            stripes: (0..capacity).map(|_| Mutex::new(())).collect(),
        }
    }

    /// The mutex guarding `key`. The same key always maps to the same mutex.
    pub fn get_lock(&self, key: &str) -> &Mutex<()> {
        let index = fnv1a_32(key) as usize % self.stripes.len();
        &self.stripes[index]
    }

    /// Number of stripes in the pool.
    pub fn capacity(&self) -> usize {
        self.stripes.len()
    }
}

/// FNV-1a 32-bit.
fn fnv1a_32(s: &str) -> u32 {
    let mut hash: u32 = 0x811c9dc5;
    for byte in s.bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x01000193);
    }
    hash
}
