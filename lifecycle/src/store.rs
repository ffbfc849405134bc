//! Incident storage and the per-incident execution guard.
//!
//! The store is an explicit abstraction handed to the orchestrator —
//! never an ambient module-level map. The bundled [`MemoryStore`] is
//! process-scoped; a durable backend plugs in behind the same trait.
//!
//! Whole-record `put` keeps reads consistent: the orchestrator is the only
//! writer for a given incident (enforced by [`ExecutionGuard`]), and each
//! commit replaces the record atomically under the write lock, so a
//! concurrent status read sees either the state before a transition or the
//! state after it — never a torn mix.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::LifecycleError;
use crate::incident::Incident;

#[async_trait]
pub trait IncidentStore: Send + Sync {
    async fn insert(&self, incident: Incident) -> Result<(), LifecycleError>;

    async fn get(&self, id: Uuid) -> Result<Incident, LifecycleError>;

    /// Replace the stored record. The caller must hold the incident's
    /// execution permit for pipeline writes.
    async fn put(&self, incident: Incident) -> Result<(), LifecycleError>;

    /// All incidents, newest first.
    async fn list(&self) -> Result<Vec<Incident>, LifecycleError>;
}

/// In-memory store backed by a `tokio` read-write lock.
#[derive(Default)]
pub struct MemoryStore {
    incidents: RwLock<HashMap<Uuid, Incident>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IncidentStore for MemoryStore {
    async fn insert(&self, incident: Incident) -> Result<(), LifecycleError> {
        let mut incidents = self.incidents.write().await;
        if incidents.contains_key(&incident.id) {
            return Err(LifecycleError::AlreadyExists(incident.id));
        }
        incidents.insert(incident.id, incident);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Incident, LifecycleError> {
        self.incidents
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(LifecycleError::NotFound(id))
    }

    async fn put(&self, incident: Incident) -> Result<(), LifecycleError> {
        let mut incidents = self.incidents.write().await;
        if !incidents.contains_key(&incident.id) {
            return Err(LifecycleError::NotFound(incident.id));
        }
        incidents.insert(incident.id, incident);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Incident>, LifecycleError> {
        let mut all: Vec<Incident> = self.incidents.read().await.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }
}

/// Enforces at-most-one active pipeline execution per incident id.
///
/// `acquire` either returns an RAII permit or fails fast with
/// [`LifecycleError::ExecutionActive`]; losers of a concurrent start race
/// never touch the incident record.
#[derive(Default)]
pub struct ExecutionGuard {
    active: Mutex<HashSet<Uuid>>,
}

impl ExecutionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(self: &Arc<Self>, id: Uuid) -> Result<ExecutionPermit, LifecycleError> {
        let mut active = self.active.lock().expect("execution guard poisoned");
        if !active.insert(id) {
            return Err(LifecycleError::ExecutionActive(id));
        }
        Ok(ExecutionPermit {
            id,
            guard: Arc::clone(self),
        })
    }

    pub fn is_active(&self, id: Uuid) -> bool {
        self.active.lock().expect("execution guard poisoned").contains(&id)
    }

    fn release(&self, id: Uuid) {
        self.active.lock().expect("execution guard poisoned").remove(&id);
    }
}

/// Held for the duration of one pipeline execution; released on drop, even
/// if the execution panics or is aborted.
pub struct ExecutionPermit {
    id: Uuid,
    guard: Arc<ExecutionGuard>,
}

impl ExecutionPermit {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for ExecutionPermit {
    fn drop(&mut self) {
        self.guard.release(self.id);
    }
}
