//! Hostname routing table
//!
//! Keys are normalized (ASCII lowercase, trailing dot removed) before every
//! access, so `Alice.Example.com.` and `alice.example.com` are the same
//! route. The last writer wins; removal can be made conditional on the
//! entry still being the one the caller registered.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::trace;

/// Normalize a hostname for use as a routing key.
pub fn normalize_hostname(hostname: &str) -> String {
    hostname.trim_end_matches('.').to_ascii_lowercase()
}

/// Concurrent hostname → target map
pub struct RouteRegistry<T> {
    routes: Arc<DashMap<String, T>>,
}

impl<T: Clone> RouteRegistry<T> {
    pub fn new() -> Self {
        Self {
            routes: Arc::new(DashMap::new()),
        }
    }

    /// Insert a route, returning the target it replaced.
    pub fn insert(&self, hostname: &str, target: T) -> Option<T> {
        let key = normalize_hostname(hostname);
        trace!("Registering route for {}", key);
        self.routes.insert(key, target)
    }

    pub fn lookup(&self, hostname: &str) -> Option<T> {
        self.routes
            .get(&normalize_hostname(hostname))
            .map(|entry| entry.value().clone())
    }

    pub fn remove(&self, hostname: &str) -> Option<T> {
        self.routes
            .remove(&normalize_hostname(hostname))
            .map(|(_, target)| target)
    }

    /// Remove the route only while `predicate` holds for the current target.
    ///
    /// The check and the removal happen under the same shard lock, so a
    /// concurrent `insert` of a newer target is never undone.
    pub fn remove_if(&self, hostname: &str, predicate: impl FnOnce(&T) -> bool) -> Option<T> {
        self.routes
            .remove_if(&normalize_hostname(hostname), |_, target| predicate(target))
            .map(|(_, target)| target)
    }

    pub fn contains(&self, hostname: &str) -> bool {
        self.routes.contains_key(&normalize_hostname(hostname))
    }

    pub fn count(&self) -> usize {
        self.routes.len()
    }
}

impl<T: Clone> Default for RouteRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for RouteRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            routes: Arc::clone(&self.routes),
        }
    }
}
