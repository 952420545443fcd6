//! Side-effect collaborator traits.
//!
//! The engine resolves *what* should happen; these traits are the seams to
//! the systems that make it happen: the credit ledger, the user-tag store,
//! the notification channel, and the audit log. Every call is dispatched
//! with a bounded timeout and a failure never blocks state progression.
//!
//! The `Recording*` implementations capture calls in memory for tests and
//! the CLI simulator.

use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;

/// Errors raised by a collaborator call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
    #[error("collaborator call failed: {0}")]
    Call(String),
}

/// Grants bonus credits against the external ledger.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    async fn grant(
        &self,
        user_id: &str,
        amount: Decimal,
        reason: &str,
    ) -> Result<(), CollaboratorError>;
}

/// Applies segmentation tags to users.
#[async_trait]
pub trait TagStore: Send + Sync {
    async fn tag(&self, user_id: &str, tag: &str) -> Result<(), CollaboratorError>;
}

/// Delivers messages and offers to the end-user channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(
        &self,
        user_id: &str,
        message: &serde_json::Value,
    ) -> Result<(), CollaboratorError>;

    async fn send_offer(
        &self,
        user_id: &str,
        offer: &serde_json::Value,
    ) -> Result<(), CollaboratorError>;
}

/// Records engine decisions for audit.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(
        &self,
        user_id: &str,
        entry: &serde_json::Value,
    ) -> Result<(), CollaboratorError>;
}

// ──────────────────────────────────────────────
// Recording implementations
// ──────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingLedger {
    grants: Mutex<Vec<(String, Decimal, String)>>,
}

impl RecordingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grants(&self) -> Vec<(String, Decimal, String)> {
        self.grants.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CreditLedger for RecordingLedger {
    async fn grant(
        &self,
        user_id: &str,
        amount: Decimal,
        reason: &str,
    ) -> Result<(), CollaboratorError> {
        if let Ok(mut grants) = self.grants.lock() {
            grants.push((user_id.to_string(), amount, reason.to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingTagStore {
    tags: Mutex<Vec<(String, String)>>,
}

impl RecordingTagStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tags(&self) -> Vec<(String, String)> {
        self.tags.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl TagStore for RecordingTagStore {
    async fn tag(&self, user_id: &str, tag: &str) -> Result<(), CollaboratorError> {
        if let Ok(mut tags) = self.tags.lock() {
            tags.push((user_id.to_string(), tag.to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(String, serde_json::Value)>>,
    offers: Mutex<Vec<(String, serde_json::Value)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(String, serde_json::Value)> {
        self.messages.lock().map(|m| m.clone()).unwrap_or_default()
    }

    pub fn offers(&self) -> Vec<(String, serde_json::Value)> {
        self.offers.lock().map(|o| o.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(
        &self,
        user_id: &str,
        message: &serde_json::Value,
    ) -> Result<(), CollaboratorError> {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push((user_id.to_string(), message.clone()));
        }
        Ok(())
    }

    async fn send_offer(
        &self,
        user_id: &str,
        offer: &serde_json::Value,
    ) -> Result<(), CollaboratorError> {
        if let Ok(mut offers) = self.offers.lock() {
            offers.push((user_id.to_string(), offer.clone()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingAuditLog {
    entries: Mutex<Vec<(String, serde_json::Value)>>,
}

impl RecordingAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(String, serde_json::Value)> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AuditLog for RecordingAuditLog {
    async fn record(
        &self,
        user_id: &str,
        entry: &serde_json::Value,
    ) -> Result<(), CollaboratorError> {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push((user_id.to_string(), entry.clone()));
        }
        Ok(())
    }
}
