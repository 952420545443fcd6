//! Conformance suite for `UserStateStore` backends.
//!
//! Any backend can validate itself against the trait contract:
//!
//! ```ignore
//! let results = conformance::run(&|| async { MyStore::new() }).await;
//! assert!(results.iter().all(|r| r.passed));
//! ```
//!
//! The factory must return a FRESH, empty store on every call -- tests do
//! not share state.

use std::future::Future;

use time::macros::datetime;
use time::OffsetDateTime;

use crate::error::StorageError;
use crate::record::{UserFsmRecord, UserOverlayRecord};
use crate::traits::UserStateStore;

/// Outcome of a single conformance check.
#[derive(Debug)]
pub struct TestResult {
    pub name: &'static str,
    pub passed: bool,
    pub detail: Option<String>,
}

impl TestResult {
    fn from_result(name: &'static str, result: Result<(), String>) -> TestResult {
        match result {
            Ok(()) => TestResult {
                name,
                passed: true,
                detail: None,
            },
            Err(detail) => TestResult {
                name,
                passed: false,
                detail: Some(detail),
            },
        }
    }
}

fn t0() -> OffsetDateTime {
    datetime!(2026-01-01 00:00 UTC)
}

fn fsm_record(user_id: &str) -> UserFsmRecord {
    UserFsmRecord {
        user_id: user_id.to_string(),
        version_id: 1,
        state: "NEW".to_string(),
        entered_at: t0(),
        revision: 0,
    }
}

fn overlay_record(user_id: &str, overlay_type: &str, code: &str) -> UserOverlayRecord {
    UserOverlayRecord {
        user_id: user_id.to_string(),
        overlay_code: code.to_string(),
        overlay_type: overlay_type.to_string(),
        activated_at: t0(),
        expires_at: None,
        impressions: 0,
        max_impressions: None,
        last_shown_at: None,
        params: serde_json::Value::Null,
    }
}

/// Run the full suite against fresh stores from `factory`.
pub async fn run<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: UserStateStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result("init_then_read", init_then_read(factory().await).await),
        TestResult::from_result("double_init_rejected", double_init_rejected(factory().await).await),
        TestResult::from_result("cas_update_increments_revision", cas_update(factory().await).await),
        TestResult::from_result("cas_stale_revision_conflicts", cas_conflict(factory().await).await),
        TestResult::from_result("update_unknown_user_not_found", update_missing(factory().await).await),
        TestResult::from_result("overlay_upsert_and_read", overlay_upsert(factory().await).await),
        TestResult::from_result("overlay_remove_records_release", overlay_release(factory().await).await),
        TestResult::from_result("user_ids_enumerates_all", enumerate_users(factory().await).await),
    ]
}

async fn init_then_read<S: UserStateStore>(store: S) -> Result<(), String> {
    store
        .init_fsm_state(fsm_record("u1"))
        .await
        .map_err(|e| e.to_string())?;
    let record = store
        .fsm_state("u1")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("record missing after init")?;
    if record.state != "NEW" || record.revision != 0 {
        return Err(format!("unexpected record: {:?}", record));
    }
    Ok(())
}

async fn double_init_rejected<S: UserStateStore>(store: S) -> Result<(), String> {
    store
        .init_fsm_state(fsm_record("u1"))
        .await
        .map_err(|e| e.to_string())?;
    match store.init_fsm_state(fsm_record("u1")).await {
        Err(StorageError::AlreadyInitialized { .. }) => Ok(()),
        other => Err(format!("expected AlreadyInitialized, got {:?}", other.err())),
    }
}

async fn cas_update<S: UserStateStore>(store: S) -> Result<(), String> {
    store
        .init_fsm_state(fsm_record("u1"))
        .await
        .map_err(|e| e.to_string())?;
    let rev = store
        .update_fsm_state("u1", 0, "ACTIVATING", t0())
        .await
        .map_err(|e| e.to_string())?;
    if rev != 1 {
        return Err(format!("expected revision 1, got {}", rev));
    }
    let record = store
        .fsm_state("u1")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("record missing")?;
    if record.state != "ACTIVATING" || record.revision != 1 {
        return Err(format!("unexpected record: {:?}", record));
    }
    Ok(())
}

async fn cas_conflict<S: UserStateStore>(store: S) -> Result<(), String> {
    store
        .init_fsm_state(fsm_record("u1"))
        .await
        .map_err(|e| e.to_string())?;
    store
        .update_fsm_state("u1", 0, "ACTIVATING", t0())
        .await
        .map_err(|e| e.to_string())?;
    // Writing with the stale revision 0 must conflict, not clobber.
    match store.update_fsm_state("u1", 0, "PAYWALL", t0()).await {
        Err(StorageError::ConcurrentConflict { .. }) => {}
        other => return Err(format!("expected ConcurrentConflict, got {:?}", other)),
    }
    let record = store
        .fsm_state("u1")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("record missing")?;
    if record.state != "ACTIVATING" {
        return Err(format!("conflict clobbered state: {:?}", record));
    }
    Ok(())
}

async fn update_missing<S: UserStateStore>(store: S) -> Result<(), String> {
    match store.update_fsm_state("ghost", 0, "NEW", t0()).await {
        Err(StorageError::FsmStateNotFound { .. }) => Ok(()),
        other => Err(format!("expected FsmStateNotFound, got {:?}", other)),
    }
}

async fn overlay_upsert<S: UserStateStore>(store: S) -> Result<(), String> {
    store
        .put_overlay(overlay_record("u1", "TRIPWIRE", "TRIPWIRE_DEFAULT"))
        .await
        .map_err(|e| e.to_string())?;
    let mut updated = overlay_record("u1", "TRIPWIRE", "TRIPWIRE_DEFAULT");
    updated.impressions = 3;
    store.put_overlay(updated).await.map_err(|e| e.to_string())?;

    let record = store
        .overlay("u1", "TRIPWIRE")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("overlay missing")?;
    if record.impressions != 3 {
        return Err(format!("upsert did not replace: {:?}", record));
    }
    let all = store.overlays("u1").await.map_err(|e| e.to_string())?;
    if all.len() != 1 {
        return Err(format!("expected one instance, got {}", all.len()));
    }
    Ok(())
}

async fn overlay_release<S: UserStateStore>(store: S) -> Result<(), String> {
    store
        .put_overlay(overlay_record("u1", "TRIPWIRE", "TRIPWIRE_DEFAULT"))
        .await
        .map_err(|e| e.to_string())?;
    let released_at = datetime!(2026-01-01 06:00 UTC);
    let removed = store
        .remove_overlay("u1", "TRIPWIRE", released_at)
        .await
        .map_err(|e| e.to_string())?;
    if removed.is_none() {
        return Err("remove returned nothing".to_string());
    }
    if store
        .overlay("u1", "TRIPWIRE")
        .await
        .map_err(|e| e.to_string())?
        .is_some()
    {
        return Err("instance still present after removal".to_string());
    }
    let release = store
        .last_release("u1", "TRIPWIRE_DEFAULT")
        .await
        .map_err(|e| e.to_string())?;
    if release != Some(released_at) {
        return Err(format!("expected release marker, got {:?}", release));
    }
    Ok(())
}

async fn enumerate_users<S: UserStateStore>(store: S) -> Result<(), String> {
    store
        .init_fsm_state(fsm_record("alice"))
        .await
        .map_err(|e| e.to_string())?;
    store
        .put_overlay(overlay_record("bob", "BONUS", "BONUS_DEFAULT"))
        .await
        .map_err(|e| e.to_string())?;
    let ids = store.user_ids().await.map_err(|e| e.to_string())?;
    if ids != vec!["alice".to_string(), "bob".to_string()] {
        return Err(format!("unexpected ids: {:?}", ids));
    }
    Ok(())
}
