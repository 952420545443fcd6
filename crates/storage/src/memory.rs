//! In-memory `UserStateStore` backend.
//!
//! The default backend for tests, the CLI simulator, and single-process
//! deployments. All state lives behind one mutex; critical sections are
//! short and never await.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::error::StorageError;
use crate::record::{UserFsmRecord, UserOverlayRecord};
use crate::traits::UserStateStore;

#[derive(Default)]
struct Inner {
    /// user_id -> FSM record
    fsm: HashMap<String, UserFsmRecord>,
    /// (user_id, overlay_type) -> active instance
    overlays: HashMap<(String, String), UserOverlayRecord>,
    /// (user_id, overlay_code) -> last release time
    releases: HashMap<(String, String), OffsetDateTime>,
}

/// In-memory store with CAS semantics matching the trait contract.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StorageError> {
        self.inner
            .lock()
            .map_err(|_| StorageError::Backend("memory store mutex poisoned".to_string()))
    }
}

#[async_trait]
impl UserStateStore for MemoryStore {
    async fn fsm_state(&self, user_id: &str) -> Result<Option<UserFsmRecord>, StorageError> {
        Ok(self.lock()?.fsm.get(user_id).cloned())
    }

    async fn init_fsm_state(&self, record: UserFsmRecord) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        if inner.fsm.contains_key(&record.user_id) {
            return Err(StorageError::AlreadyInitialized {
                user_id: record.user_id,
            });
        }
        inner.fsm.insert(record.user_id.clone(), record);
        Ok(())
    }

    async fn update_fsm_state(
        &self,
        user_id: &str,
        expected_revision: i64,
        state: &str,
        entered_at: OffsetDateTime,
    ) -> Result<i64, StorageError> {
        let mut inner = self.lock()?;
        let record = inner
            .fsm
            .get_mut(user_id)
            .ok_or_else(|| StorageError::FsmStateNotFound {
                user_id: user_id.to_string(),
            })?;
        if record.revision != expected_revision {
            return Err(StorageError::ConcurrentConflict {
                user_id: user_id.to_string(),
                expected_revision,
            });
        }
        record.state = state.to_string();
        record.entered_at = entered_at;
        record.revision += 1;
        Ok(record.revision)
    }

    async fn overlay(
        &self,
        user_id: &str,
        overlay_type: &str,
    ) -> Result<Option<UserOverlayRecord>, StorageError> {
        let key = (user_id.to_string(), overlay_type.to_string());
        Ok(self.lock()?.overlays.get(&key).cloned())
    }

    async fn overlays(&self, user_id: &str) -> Result<Vec<UserOverlayRecord>, StorageError> {
        let inner = self.lock()?;
        let mut records: Vec<UserOverlayRecord> = inner
            .overlays
            .iter()
            .filter(|((uid, _), _)| uid == user_id)
            .map(|(_, r)| r.clone())
            .collect();
        records.sort_by(|a, b| a.overlay_type.cmp(&b.overlay_type));
        Ok(records)
    }

    async fn put_overlay(&self, record: UserOverlayRecord) -> Result<(), StorageError> {
        let key = (record.user_id.clone(), record.overlay_type.clone());
        self.lock()?.overlays.insert(key, record);
        Ok(())
    }

    async fn remove_overlay(
        &self,
        user_id: &str,
        overlay_type: &str,
        released_at: OffsetDateTime,
    ) -> Result<Option<UserOverlayRecord>, StorageError> {
        let mut inner = self.lock()?;
        let key = (user_id.to_string(), overlay_type.to_string());
        let removed = inner.overlays.remove(&key);
        if let Some(record) = &removed {
            inner.releases.insert(
                (user_id.to_string(), record.overlay_code.clone()),
                released_at,
            );
        }
        Ok(removed)
    }

    async fn last_release(
        &self,
        user_id: &str,
        overlay_code: &str,
    ) -> Result<Option<OffsetDateTime>, StorageError> {
        let key = (user_id.to_string(), overlay_code.to_string());
        Ok(self.lock()?.releases.get(&key).copied())
    }

    async fn user_ids(&self) -> Result<Vec<String>, StorageError> {
        let inner = self.lock()?;
        let mut ids: Vec<String> = inner
            .fsm
            .keys()
            .cloned()
            .chain(inner.overlays.keys().map(|(uid, _)| uid.clone()))
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance;

    #[tokio::test]
    async fn memory_store_passes_conformance() {
        let results = conformance::run(&|| async { MemoryStore::new() }).await;
        let failures: Vec<_> = results.iter().filter(|r| !r.passed).collect();
        assert!(failures.is_empty(), "conformance failures: {:?}", failures);
    }
}
