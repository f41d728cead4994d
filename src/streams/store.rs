//! Per-stream session store
//!
//! Lookups from audio callbacks take the shared lock and proceed in
//! parallel; inserts and removals take the exclusive lock. The lock is held
//! only for the map operation itself. Sessions are handed out as `Arc`s and
//! carry their own sample lock, so nothing here waits on audio appends.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::StoreError;
use crate::streams::session::{CallId, Session};
use crate::streams::subscription::Subscription;

/// Result of a call-start insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Created,
    /// Repeated call-start for a call already being tracked
    AlreadyExists,
}

/// Sessions for one subscription
#[derive(Debug)]
pub struct SessionStore {
    subscription: Arc<Subscription>,
    sessions: RwLock<HashMap<CallId, Arc<Session>>>,
}

impl SessionStore {
    pub fn new(subscription: Arc<Subscription>) -> Self {
        Self {
            subscription,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn subscription(&self) -> &Arc<Subscription> {
        &self.subscription
    }

    /// Insert a fresh session unless one already exists for `id`
    pub fn insert_if_absent(&self, id: CallId) -> Result<InsertOutcome, StoreError> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&id) {
            return Ok(InsertOutcome::AlreadyExists);
        }
        sessions
            .try_reserve(1)
            .map_err(|_| StoreError::InsertionFailure(id.to_string()))?;
        let session = Arc::new(Session::new(id.clone(), self.subscription.clone()));
        sessions.insert(id, session);
        Ok(InsertOutcome::Created)
    }

    pub fn get(&self, id: &CallId) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    /// Remove a session; removing an absent id is a no-op
    pub fn remove(&self, id: &CallId) -> Option<Arc<Session>> {
        self.sessions.write().remove(id)
    }

    pub fn contains(&self, id: &CallId) -> bool {
        self.sessions.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
