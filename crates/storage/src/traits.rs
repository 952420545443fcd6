use async_trait::async_trait;
use time::OffsetDateTime;

use crate::error::StorageError;
use crate::record::{UserFsmRecord, UserOverlayRecord};

/// The storage trait for cadence per-user state backends.
///
/// A `UserStateStore` holds exactly the mutable per-user records the engine
/// owns: the FSM position and the active overlay instances. Configuration
/// never lives here.
///
/// ## CAS Semantics
///
/// `update_fsm_state` performs an optimistic concurrency check: the update
/// applies only if the stored revision equals `expected_revision`. On
/// mismatch the method returns `Err(StorageError::ConcurrentConflict)` and
/// the caller re-reads fresh state before retrying.
///
/// ## Overlay Records
///
/// Overlay instances are keyed by `(user_id, overlay_type)` -- at most one
/// instance per type per user. `remove_overlay` additionally records a
/// release timestamp per overlay *code*, which backs the cooldown window.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` to be shared across the
/// engine's per-user tasks and the scheduler.
#[async_trait]
pub trait UserStateStore: Send + Sync + 'static {
    // ── FSM position ─────────────────────────────────────────────────────

    /// Read a user's FSM record, if one exists.
    async fn fsm_state(&self, user_id: &str) -> Result<Option<UserFsmRecord>, StorageError>;

    /// Insert a fresh FSM record (revision as given, conventionally 0).
    ///
    /// Returns `Err(StorageError::AlreadyInitialized)` if a record exists.
    async fn init_fsm_state(&self, record: UserFsmRecord) -> Result<(), StorageError>;

    /// Apply a revision-validated update to a user's FSM position.
    ///
    /// Returns the new revision on success, `ConcurrentConflict` when the
    /// stored revision differs from `expected_revision`, `FsmStateNotFound`
    /// when no record exists.
    async fn update_fsm_state(
        &self,
        user_id: &str,
        expected_revision: i64,
        state: &str,
        entered_at: OffsetDateTime,
    ) -> Result<i64, StorageError>;

    // ── Overlay instances ────────────────────────────────────────────────

    /// Read the instance of `overlay_type` for a user, if present.
    async fn overlay(
        &self,
        user_id: &str,
        overlay_type: &str,
    ) -> Result<Option<UserOverlayRecord>, StorageError>;

    /// All overlay instances for a user, ordered by overlay type.
    async fn overlays(&self, user_id: &str) -> Result<Vec<UserOverlayRecord>, StorageError>;

    /// Upsert the instance keyed by `(record.user_id, record.overlay_type)`.
    async fn put_overlay(&self, record: UserOverlayRecord) -> Result<(), StorageError>;

    /// Remove the instance of `overlay_type`, recording `released_at`
    /// against its code for cooldown tracking. Returns the removed record.
    async fn remove_overlay(
        &self,
        user_id: &str,
        overlay_type: &str,
        released_at: OffsetDateTime,
    ) -> Result<Option<UserOverlayRecord>, StorageError>;

    /// The most recent release (deactivation or expiry) of an overlay code
    /// for a user, if any.
    async fn last_release(
        &self,
        user_id: &str,
        overlay_code: &str,
    ) -> Result<Option<OffsetDateTime>, StorageError>;

    // ── Enumeration ──────────────────────────────────────────────────────

    /// All user ids with any stored state, for the periodic sweep.
    async fn user_ids(&self) -> Result<Vec<String>, StorageError>;
}
