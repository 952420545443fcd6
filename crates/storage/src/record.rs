use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A user's current position in their pinned FSM version.
///
/// `revision` is the compare-and-set token: every successful update
/// increments it, and writers must present the revision they read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserFsmRecord {
    pub user_id: String,
    /// The FSM generation the user entered their current state under. Never
    /// silently reassigned when a newer version activates.
    pub version_id: u32,
    pub state: String,
    /// When the user entered `state`; drives TIME triggers.
    #[serde(with = "time::serde::rfc3339")]
    pub entered_at: OffsetDateTime,
    pub revision: i64,
}

/// An active overlay instance for one user, keyed by overlay *type*
/// (at most one per type per user).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserOverlayRecord {
    pub user_id: String,
    pub overlay_code: String,
    pub overlay_type: String,
    #[serde(with = "time::serde::rfc3339")]
    pub activated_at: OffsetDateTime,
    /// Absolute expiry, fixed at activation from the template TTL (or an
    /// action-level override). `None` means no time-based expiry.
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    pub impressions: u32,
    /// Surfacing cap captured at activation; exhaustion expires the
    /// instance regardless of TTL.
    pub max_impressions: Option<u32>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_shown_at: Option<OffsetDateTime>,
    /// Template parameters captured at activation.
    pub params: serde_json::Value,
}

impl UserOverlayRecord {
    /// Pull-evaluated expiry: TTL elapsed or impressions exhausted.
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        if let Some(expires_at) = self.expires_at {
            if now >= expires_at {
                return true;
            }
        }
        match self.max_impressions {
            Some(cap) => self.impressions >= cap,
            None => false,
        }
    }
}
