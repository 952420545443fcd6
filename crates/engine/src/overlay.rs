//! Overlay lifecycle: activation, expiry, cooldown, impression caps.
//!
//! Overlays are templated, time-boxed notifications. The registry (in the
//! config snapshot) is static; this module owns the per-user instance
//! lifecycle on top of the store:
//!
//! - at most one active instance per overlay *type* per user;
//! - `ttlSeconds` fixes an absolute expiry at activation;
//! - `cooldownSeconds` locks out re-activation of the same *code* after
//!   deactivation or expiry;
//! - `maxImpressions` expires the instance once exhausted, TTL or not.
//!
//! Expiry is pull-evaluated; `sweep_expired` turns newly-expired instances
//! into `OVERLAY_EXPIRED` triggers for the rule engine. Which overlay is
//! *surfaced* when several types are active is a presentation question
//! answered by `visible` -- it never mutates the losers.

use std::collections::BTreeMap;
use std::sync::Arc;

use cadence_core::Snapshot;
use cadence_storage::{StorageError, UserOverlayRecord, UserStateStore};
use time::{Duration, OffsetDateTime};
use tracing::debug;

use crate::context::Value;

/// Outcome of an activation attempt.
#[derive(Debug)]
pub enum Activation {
    Activated(UserOverlayRecord),
    Rejected(ActivationRejection),
}

/// Why an activation was refused. Rejections are ordinary control flow --
/// rules encode dedup as `NOT_EXISTS` guards, and a rejection never fails
/// the surrounding action batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationRejection {
    /// An unexpired instance of this type is already active.
    AlreadyActive { overlay_type: String },
    /// The code was released recently and is still cooling down.
    CoolingDown {
        overlay_code: String,
        until: OffsetDateTime,
    },
    /// No enabled template matches the requested code or type.
    UnknownTemplate { requested: String },
}

#[derive(Clone)]
pub struct OverlayManager {
    store: Arc<dyn UserStateStore>,
}

impl OverlayManager {
    pub fn new(store: Arc<dyn UserStateStore>) -> OverlayManager {
        OverlayManager { store }
    }

    /// Activate an overlay for a user.
    ///
    /// `params` come from the triggering action: `code` or `type` selects
    /// the template, `ttlSeconds`/`ttlHours` override the template TTL, and
    /// everything is captured on the instance as template metadata.
    pub async fn activate(
        &self,
        snapshot: &Snapshot,
        user_id: &str,
        params: &serde_json::Value,
        now: OffsetDateTime,
    ) -> Result<Activation, StorageError> {
        let template = match params.get("code").and_then(|v| v.as_str()) {
            Some(code) => snapshot.overlay_by_code(code).filter(|o| o.is_active),
            None => params
                .get("type")
                .and_then(|v| v.as_str())
                .and_then(|t| snapshot.overlay_for_type(t)),
        };
        let Some(template) = template else {
            let requested = params
                .get("code")
                .or_else(|| params.get("type"))
                .and_then(|v| v.as_str())
                .unwrap_or("<unspecified>")
                .to_string();
            return Ok(Activation::Rejected(ActivationRejection::UnknownTemplate {
                requested,
            }));
        };

        // Single-active-instance-per-type: an unexpired instance blocks; an
        // expired leftover is released first (its expiry starts the
        // cooldown window).
        if let Some(existing) = self.store.overlay(user_id, &template.overlay_type).await? {
            if !existing.is_expired(now) {
                return Ok(Activation::Rejected(ActivationRejection::AlreadyActive {
                    overlay_type: template.overlay_type.clone(),
                }));
            }
            let released_at = release_moment(&existing, now);
            let _ = self
                .store
                .remove_overlay(user_id, &template.overlay_type, released_at)
                .await?;
        }

        if let Some(cooldown) = template.cooldown_seconds {
            if let Some(released) = self.store.last_release(user_id, &template.code).await? {
                let until = released + Duration::seconds(cooldown as i64);
                if now < until {
                    return Ok(Activation::Rejected(ActivationRejection::CoolingDown {
                        overlay_code: template.code.clone(),
                        until,
                    }));
                }
            }
        }

        let ttl_seconds = ttl_override(params).or(template.ttl_seconds);
        let record = UserOverlayRecord {
            user_id: user_id.to_string(),
            overlay_code: template.code.clone(),
            overlay_type: template.overlay_type.clone(),
            activated_at: now,
            expires_at: ttl_seconds.map(|s| now + Duration::seconds(s as i64)),
            impressions: 0,
            max_impressions: template.max_impressions,
            last_shown_at: None,
            params: params.clone(),
        };
        self.store.put_overlay(record.clone()).await?;
        debug!(user_id, code = %record.overlay_code, "overlay activated");
        Ok(Activation::Activated(record))
    }

    /// Deactivate the instance of `overlay_type`, starting its code's
    /// cooldown window at `now`. Returns the removed instance, if any.
    pub async fn deactivate(
        &self,
        user_id: &str,
        overlay_type: &str,
        now: OffsetDateTime,
    ) -> Result<Option<UserOverlayRecord>, StorageError> {
        let removed = self.store.remove_overlay(user_id, overlay_type, now).await?;
        if let Some(record) = &removed {
            debug!(user_id, code = %record.overlay_code, "overlay deactivated");
        }
        Ok(removed)
    }

    /// The instance of `overlay_type` for a user, swept or not.
    pub async fn query(
        &self,
        user_id: &str,
        overlay_type: &str,
    ) -> Result<Option<UserOverlayRecord>, StorageError> {
        self.store.overlay(user_id, overlay_type).await
    }

    /// Count a surfacing of the instance. Returns the updated record; an
    /// instance at its impression cap reads as expired from then on.
    pub async fn record_impression(
        &self,
        user_id: &str,
        overlay_type: &str,
        now: OffsetDateTime,
    ) -> Result<Option<UserOverlayRecord>, StorageError> {
        let Some(mut record) = self.store.overlay(user_id, overlay_type).await? else {
            return Ok(None);
        };
        record.impressions += 1;
        record.last_shown_at = Some(now);
        self.store.put_overlay(record.clone()).await?;
        Ok(Some(record))
    }

    /// The single overlay surfaced to the user right now: the unexpired
    /// instance whose template has the highest priority (type order breaks
    /// ties). Lower-priority active instances stay active, just not shown.
    pub async fn visible(
        &self,
        snapshot: &Snapshot,
        user_id: &str,
        now: OffsetDateTime,
    ) -> Result<Option<UserOverlayRecord>, StorageError> {
        let records = self.store.overlays(user_id).await?;
        Ok(records
            .into_iter()
            .filter(|r| !r.is_expired(now))
            .min_by(|a, b| {
                let pa = template_priority(snapshot, a);
                let pb = template_priority(snapshot, b);
                pb.cmp(&pa).then(a.overlay_type.cmp(&b.overlay_type))
            }))
    }

    /// Remove every expired instance, returning them so the caller can feed
    /// `OVERLAY_EXPIRED` triggers into the rule engine.
    pub async fn sweep_expired(
        &self,
        user_id: &str,
        now: OffsetDateTime,
    ) -> Result<Vec<UserOverlayRecord>, StorageError> {
        let mut expired = Vec::new();
        for record in self.store.overlays(user_id).await? {
            if record.is_expired(now) {
                let released_at = release_moment(&record, now);
                if let Some(removed) = self
                    .store
                    .remove_overlay(user_id, &record.overlay_type, released_at)
                    .await?
                {
                    expired.push(removed);
                }
            }
        }
        Ok(expired)
    }

    /// The `overlay` context record: one entry per stored instance, keyed by
    /// type, exposing the subfields conditions address
    /// (`overlay.TRIPWIRE.isExpired`, `overlay.ONBOARDING.metadata.step`).
    pub async fn context_value(
        &self,
        user_id: &str,
        now: OffsetDateTime,
    ) -> Result<Value, StorageError> {
        let mut entries = BTreeMap::new();
        for record in self.store.overlays(user_id).await? {
            let expired = record.is_expired(now);
            let mut fields = BTreeMap::new();
            let _ = fields.insert("code".to_string(), Value::Text(record.overlay_code.clone()));
            let _ = fields.insert(
                "state".to_string(),
                Value::Text(if expired { "EXPIRED" } else { "ACTIVE" }.to_string()),
            );
            let _ = fields.insert("isExpired".to_string(), Value::Bool(expired));
            let _ = fields.insert(
                "impressions".to_string(),
                Value::Int(i64::from(record.impressions)),
            );
            let _ = fields.insert("metadata".to_string(), Value::from_json(&record.params));
            let _ = entries.insert(record.overlay_type.clone(), Value::Record(fields));
        }
        Ok(Value::Record(entries))
    }
}

/// When an instance stops counting as held: its TTL deadline if that is
/// what expired it, otherwise now.
fn release_moment(record: &UserOverlayRecord, now: OffsetDateTime) -> OffsetDateTime {
    match record.expires_at {
        Some(expires_at) if expires_at <= now => expires_at,
        _ => now,
    }
}

fn template_priority(snapshot: &Snapshot, record: &UserOverlayRecord) -> i32 {
    snapshot
        .overlay_by_code(&record.overlay_code)
        .map(|o| o.priority)
        .unwrap_or(0)
}

fn ttl_override(params: &serde_json::Value) -> Option<u64> {
    if let Some(seconds) = params.get("ttlSeconds").and_then(|v| v.as_u64()) {
        return Some(seconds);
    }
    params.get("ttlHours").and_then(|v| v.as_u64()).map(|h| h * 3600)
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
