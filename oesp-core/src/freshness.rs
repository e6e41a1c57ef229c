//! Replay protection: which `(sender DID, message id)` pairs have been consumed.

use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;

use crate::error::OespError;

pub trait FreshnessGuard: Send + Sync {
    fn seen(&self, sid: &str, mid: &str) -> Result<bool, OespError>;

    fn mark_seen(&self, sid: &str, mid: &str) -> Result<(), OespError>;

    /// Returns `true` if the pair was fresh and is now marked. Implementations shared between
    /// threads must make this atomic; the default composes `seen` and `mark_seen` and is not.
    fn check_and_mark(&self, sid: &str, mid: &str) -> Result<bool, OespError> {
        if self.seen(sid, mid)? {
            return Ok(false);
        }
        self.mark_seen(sid, mid)?;
        Ok(true)
    }
}

#[derive(Debug, Default)]
struct SeenSet {
    keys: HashSet<(String, String)>,
    order: VecDeque<(String, String)>,
}

/// In-memory guard. With a capacity, the oldest entries are evicted first.
#[derive(Debug, Default)]
pub struct MemoryFreshnessGuard {
    inner: Mutex<SeenSet>,
    capacity: Option<usize>,
}

impl MemoryFreshnessGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(SeenSet::default()),
            capacity: Some(capacity.max(1)),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert_locked(&self, set: &mut SeenSet, key: (String, String)) {
        if !set.keys.insert(key.clone()) {
            return;
        }
        set.order.push_back(key);
        if let Some(cap) = self.capacity {
            while set.keys.len() > cap {
                match set.order.pop_front() {
                    Some(old) => {
                        set.keys.remove(&old);
                    }
                    None => break,
                }
            }
        }
    }
}

impl FreshnessGuard for MemoryFreshnessGuard {
    fn seen(&self, sid: &str, mid: &str) -> Result<bool, OespError> {
        Ok(self
            .inner
            .lock()
            .keys
            .contains(&(sid.to_string(), mid.to_string())))
    }

    fn mark_seen(&self, sid: &str, mid: &str) -> Result<(), OespError> {
        let mut set = self.inner.lock();
        self.insert_locked(&mut set, (sid.to_string(), mid.to_string()));
        Ok(())
    }

    fn check_and_mark(&self, sid: &str, mid: &str) -> Result<bool, OespError> {
        let key = (sid.to_string(), mid.to_string());
        let mut set = self.inner.lock();
        if set.keys.contains(&key) {
            return Ok(false);
        }
        self.insert_locked(&mut set, key);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn first_use_fresh_then_replay() {
        let guard = MemoryFreshnessGuard::new();
        assert!(guard.check_and_mark("did:a", "m1").unwrap());
        assert!(!guard.check_and_mark("did:a", "m1").unwrap());
        assert!(guard.seen("did:a", "m1").unwrap());
    }

    #[test]
    fn keyed_by_sender_and_mid() {
        let guard = MemoryFreshnessGuard::new();
        guard.mark_seen("did:a", "m1").unwrap();
        assert!(!guard.seen("did:b", "m1").unwrap());
        assert!(!guard.seen("did:a", "m2").unwrap());
    }

    #[test]
    fn capacity_evicts_oldest() {
        let guard = MemoryFreshnessGuard::with_capacity(2);
        guard.mark_seen("s", "1").unwrap();
        guard.mark_seen("s", "2").unwrap();
        guard.mark_seen("s", "3").unwrap();
        assert_eq!(guard.len(), 2);
        assert!(!guard.seen("s", "1").unwrap());
        assert!(guard.seen("s", "3").unwrap());
    }

    #[test]
    fn concurrent_check_and_mark_admits_one() {
        let guard = Arc::new(MemoryFreshnessGuard::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let g = guard.clone();
                std::thread::spawn(move || g.check_and_mark("s", "same").unwrap())
            })
            .collect();
        let fresh = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&fresh| fresh)
            .count();
        assert_eq!(fresh, 1);
    }
}
