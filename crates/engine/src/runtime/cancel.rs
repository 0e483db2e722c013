//! Per-session cancellation with parent→child fan-out.
//!
//! Every running pool task registers a token keyed by its session id.
//! Cancelling a session also cancels all children registered in its
//! group, which is how ending a parent cascades to sub-agents. Tokens
//! are `tokio_util` cancellation tokens so an in-flight HTTP call is
//! aborted at the next await point.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub struct CancelMap {
    tokens: Mutex<HashMap<Uuid, CancellationToken>>,
    /// parent session → child sessions.
    groups: Mutex<HashMap<Uuid, HashSet<Uuid>>>,
}

impl Default for CancelMap {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelMap {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
            groups: Mutex::new(HashMap::new()),
        }
    }

    /// Create and register a token for a session's running task.
    pub fn register(&self, session_id: Uuid) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.lock().insert(session_id, token.clone());
        token
    }

    /// Cancel a session's running task and every child in its group.
    /// Returns true if the session itself had a registered token.
    pub fn cancel(&self, session_id: Uuid) -> bool {
        let found = if let Some(token) = self.tokens.lock().get(&session_id) {
            token.cancel();
            true
        } else {
            false
        };

        if let Some(children) = self.groups.lock().get(&session_id) {
            let tokens = self.tokens.lock();
            for child in children {
                if let Some(token) = tokens.get(child) {
                    token.cancel();
                }
            }
        }

        found
    }

    /// Cancel only the children of a session (task finished normally,
    /// orphaned sub-agents must stop).
    pub fn cancel_children(&self, session_id: Uuid) -> usize {
        let mut n = 0;
        if let Some(children) = self.groups.lock().get(&session_id) {
            let tokens = self.tokens.lock();
            for child in children {
                if let Some(token) = tokens.get(child) {
                    token.cancel();
                    n += 1;
                }
            }
        }
        n
    }

    /// Remove the token when a task completes, along with any group the
    /// session owned.
    pub fn remove(&self, session_id: Uuid) {
        self.tokens.lock().remove(&session_id);
        self.groups.lock().remove(&session_id);
    }

    pub fn is_running(&self, session_id: Uuid) -> bool {
        self.tokens.lock().contains_key(&session_id)
    }

    pub fn running_count(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn add_to_group(&self, parent: Uuid, child: Uuid) {
        self.groups.lock().entry(parent).or_default().insert(child);
    }

    pub fn remove_from_group(&self, parent: Uuid, child: Uuid) {
        let mut groups = self.groups.lock();
        if let Some(children) = groups.get_mut(&parent) {
            children.remove(&child);
            if children.is_empty() {
                groups.remove(&parent);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_cancel() {
        let map = CancelMap::new();
        let sid = Uuid::new_v4();
        let token = map.register(sid);
        assert!(map.is_running(sid));
        assert!(!token.is_cancelled());

        assert!(map.cancel(sid));
        assert!(token.is_cancelled());

        map.remove(sid);
        assert!(!map.is_running(sid));
        assert!(!map.cancel(sid));
    }

    #[test]
    fn cancel_cascades_to_group() {
        let map = CancelMap::new();
        let parent = Uuid::new_v4();
        let child1 = Uuid::new_v4();
        let child2 = Uuid::new_v4();

        let pt = map.register(parent);
        let c1 = map.register(child1);
        let c2 = map.register(child2);
        map.add_to_group(parent, child1);
        map.add_to_group(parent, child2);

        map.cancel(parent);
        assert!(pt.is_cancelled());
        assert!(c1.is_cancelled());
        assert!(c2.is_cancelled());
    }

    #[test]
    fn cancel_children_leaves_parent_running() {
        let map = CancelMap::new();
        let parent = Uuid::new_v4();
        let child = Uuid::new_v4();

        let pt = map.register(parent);
        let ct = map.register(child);
        map.add_to_group(parent, child);

        assert_eq!(map.cancel_children(parent), 1);
        assert!(!pt.is_cancelled());
        assert!(ct.is_cancelled());
    }

    #[test]
    fn removed_child_is_not_cancelled() {
        let map = CancelMap::new();
        let parent = Uuid::new_v4();
        let child = Uuid::new_v4();

        map.register(parent);
        let ct = map.register(child);
        map.add_to_group(parent, child);
        map.remove_from_group(parent, child);

        map.cancel(parent);
        assert!(!ct.is_cancelled());
    }

    #[test]
    fn remove_clears_owned_group() {
        let map = CancelMap::new();
        let parent = Uuid::new_v4();
        let child = Uuid::new_v4();

        map.register(parent);
        let ct = map.register(child);
        map.add_to_group(parent, child);
        map.remove(parent);

        // The group is gone with the parent; the child keeps running.
        assert!(map.is_running(child));
        assert_eq!(map.cancel_children(parent), 0);
        assert!(!ct.is_cancelled());
    }

    #[tokio::test]
    async fn token_wakes_awaiters() {
        let map = CancelMap::new();
        let sid = Uuid::new_v4();
        let token = map.register(sid);

        let waiter = tokio::spawn(async move {
            token.cancelled().await;
            true
        });
        map.cancel(sid);
        assert!(waiter.await.unwrap());
    }
}
