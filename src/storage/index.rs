//! Global identity index shared by the crawl and the writer.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Set of every identity known to the store.
///
/// Rebuilt from the shards on every start and never persisted. All
/// mutation goes through one mutex so that check-then-insert is atomic.
#[derive(Debug, Default)]
pub struct IdentityIndex {
    seen: Mutex<HashSet<String>>,
}

impl IdentityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.lock().contains(identity)
    }

    /// Record `identity` as stored. Returns false if it was already known.
    pub fn claim(&self, identity: &str) -> bool {
        let mut seen = self.lock();
        if seen.contains(identity) {
            return false;
        }
        seen.insert(identity.to_string())
    }

    /// Undo a claim whose write failed.
    pub fn release(&self, identity: &str) {
        self.lock().remove(identity);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: Into<String>> FromIterator<S> for IdentityIndex {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            seen: Mutex::new(iter.into_iter().map(Into::into).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_claim_is_first_wins() {
        let index = IdentityIndex::new();
        assert!(index.claim("u1"));
        assert!(!index.claim("u1"));
        assert!(index.contains("u1"));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_release_allows_reclaim() {
        let index: IdentityIndex = ["u1"].into_iter().collect();
        index.release("u1");
        assert!(index.is_empty());
        assert!(index.claim("u1"));
    }

    #[test]
    fn test_concurrent_claims_admit_one_winner() {
        let index = Arc::new(IdentityIndex::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let index = Arc::clone(&index);
                std::thread::spawn(move || index.claim("same"))
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
