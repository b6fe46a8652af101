use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

/// Set of names held exclusively, e.g. attached hooks or perf event arrays
/// with a live reader. Clones share the same set.
#[derive(Clone, Debug, Default)]
pub struct Claims {
    held: Arc<Mutex<HashSet<String>>>,
}

impl Claims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes `key`, or returns `None` while someone else holds it.
    pub fn claim(&self, key: &str) -> Option<Claim> {
        if !lock(&self.held).insert(key.to_string()) {
            return None;
        }
        Some(Claim {
            key: key.to_string(),
            held: self.held.clone(),
        })
    }

    pub fn is_held(&self, key: &str) -> bool {
        lock(&self.held).contains(key)
    }
}

/// A held name. Released on drop.
#[derive(Debug)]
pub struct Claim {
    key: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl Claim {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        lock(&self.held).remove(&self.key);
    }
}

fn lock(m: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_is_exclusive_until_dropped() {
        let claims = Claims::new();
        let first = claims.claim("signal/signal_deliver").unwrap();
        assert_eq!(first.key(), "signal/signal_deliver");
        assert!(claims.claim("signal/signal_deliver").is_none());
        assert!(claims.claim("syscalls/sys_enter_execve").is_some());

        drop(first);
        assert!(!claims.is_held("signal/signal_deliver"));
        assert!(claims.claim("signal/signal_deliver").is_some());
    }

    #[test]
    fn clones_share_one_set() {
        let claims = Claims::new();
        let other = claims.clone();
        let held = other.claim("signal_events").unwrap();
        assert!(claims.claim("signal_events").is_none());
        drop(held);
        assert!(claims.claim("signal_events").is_some());
    }
}
