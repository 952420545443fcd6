//! Action execution.
//!
//! The executor resolves each action kind to exactly one collaborator call.
//! Actions execute in ascending `order`; a failure (or timeout) is recorded
//! and logged but never aborts the rest of the batch and never unwinds the
//! state transition that triggered it.
//!
//! `params` are template data: strings may carry `{{path}}` placeholders
//! resolved against the evaluation context before dispatch.

use std::sync::Arc;
use std::time::Duration;

use cadence_core::{ActionKind, ActionSpec, Snapshot};
use cadence_storage::UserOverlayRecord;
use rust_decimal::Decimal;
use time::OffsetDateTime;
use tracing::warn;

use crate::collaborators::{AuditLog, CollaboratorError, CreditLedger, Notifier, TagStore};
use crate::context::Context;
use crate::overlay::{Activation, OverlayManager};

/// How one action ended.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub enum ActionStatus {
    Completed,
    /// The action resolved to nothing to do (e.g. an activation rejected by
    /// the single-instance guard, a deactivation with no active instance).
    Skipped { reason: String },
    /// The collaborator call failed or timed out. Recorded for external
    /// retry/alerting; the batch continues.
    Failed { error: String },
}

/// Record of one executed action.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ActionOutcome {
    pub kind: ActionKind,
    pub order: u32,
    pub status: ActionStatus,
    /// The overlay instance this action activated, if any -- the
    /// orchestrator fans these out as `OVERLAY_ACTIVATED` triggers.
    pub activated: Option<UserOverlayRecord>,
}

/// Dispatches actions to collaborators with a bounded timeout.
#[derive(Clone)]
pub struct ActionExecutor {
    overlays: OverlayManager,
    ledger: Arc<dyn CreditLedger>,
    tags: Arc<dyn TagStore>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditLog>,
    timeout: Duration,
}

impl ActionExecutor {
    pub fn new(
        overlays: OverlayManager,
        ledger: Arc<dyn CreditLedger>,
        tags: Arc<dyn TagStore>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditLog>,
        timeout: Duration,
    ) -> ActionExecutor {
        ActionExecutor {
            overlays,
            ledger,
            tags,
            notifier,
            audit,
            timeout,
        }
    }

    /// Execute one action for a user. Never returns an error: every failure
    /// mode collapses into the outcome per the log-and-continue policy.
    pub async fn execute(
        &self,
        snapshot: &Snapshot,
        user_id: &str,
        action: &ActionSpec,
        ctx: &Context,
        now: OffsetDateTime,
    ) -> ActionOutcome {
        let params = render_params(&action.params, ctx);
        let mut activated = None;

        let status = match action.kind {
            ActionKind::NoAction => ActionStatus::Completed,

            ActionKind::ActivateOverlay => {
                match self.overlays.activate(snapshot, user_id, &params, now).await {
                    Ok(Activation::Activated(record)) => {
                        activated = Some(record);
                        ActionStatus::Completed
                    }
                    Ok(Activation::Rejected(rejection)) => ActionStatus::Skipped {
                        reason: format!("{:?}", rejection),
                    },
                    Err(e) => ActionStatus::Failed {
                        error: e.to_string(),
                    },
                }
            }

            ActionKind::DeactivateOverlay => {
                match params.get("type").and_then(|v| v.as_str()) {
                    None => ActionStatus::Failed {
                        error: "DEACTIVATE_OVERLAY requires a 'type' param".to_string(),
                    },
                    Some(overlay_type) => {
                        match self.overlays.deactivate(user_id, overlay_type, now).await {
                            Ok(Some(_)) => ActionStatus::Completed,
                            Ok(None) => ActionStatus::Skipped {
                                reason: format!("no active {} instance", overlay_type),
                            },
                            Err(e) => ActionStatus::Failed {
                                error: e.to_string(),
                            },
                        }
                    }
                }
            }

            ActionKind::GrantBonus => match grant_amount(&params, ctx) {
                None => ActionStatus::Failed {
                    error: "GRANT_BONUS requires a numeric 'amount'".to_string(),
                },
                Some(amount) => {
                    let reason = params
                        .get("reason")
                        .or_else(|| params.get("source"))
                        .and_then(|v| v.as_str())
                        .unwrap_or("rule");
                    self.dispatch(self.ledger.grant(user_id, amount, reason)).await
                }
            },

            ActionKind::TagUser => match params.get("tag").and_then(|v| v.as_str()) {
                None => ActionStatus::Failed {
                    error: "TAG_USER requires a 'tag' param".to_string(),
                },
                Some(tag) => self.dispatch(self.tags.tag(user_id, tag)).await,
            },

            ActionKind::LogEvent => self.dispatch(self.audit.record(user_id, &params)).await,

            ActionKind::SendMessage => self.dispatch(self.notifier.send(user_id, &params)).await,

            ActionKind::SendSpecialOffer => {
                self.dispatch(self.notifier.send_offer(user_id, &params)).await
            }
        };

        if let ActionStatus::Failed { error } = &status {
            warn!(user_id, kind = ?action.kind, error, "action failed");
        }

        ActionOutcome {
            kind: action.kind,
            order: action.order,
            status,
            activated,
        }
    }

    async fn dispatch(
        &self,
        call: impl std::future::Future<Output = Result<(), CollaboratorError>>,
    ) -> ActionStatus {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(())) => ActionStatus::Completed,
            Ok(Err(e)) => ActionStatus::Failed {
                error: e.to_string(),
            },
            Err(_) => ActionStatus::Failed {
                error: format!("timed out after {:?}", self.timeout),
            },
        }
    }
}

fn grant_amount(params: &serde_json::Value, ctx: &Context) -> Option<Decimal> {
    if let Some(value) = params.get("amount") {
        return json_decimal(value);
    }
    ctx.lookup("amount")
        .or_else(|| ctx.lookup("event.amount"))
        .and_then(|v| v.as_decimal())
}

fn json_decimal(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::Number(n) => n.to_string().parse().ok(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Resolve `{{path}}` placeholders in every string of a params tree against
/// the context. Unresolvable placeholders are left verbatim.
pub fn render_params(params: &serde_json::Value, ctx: &Context) -> serde_json::Value {
    match params {
        serde_json::Value::String(s) => serde_json::Value::String(render_str(s, ctx)),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(|v| render_params(v, ctx)).collect())
        }
        serde_json::Value::Object(fields) => serde_json::Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), render_params(v, ctx)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn render_str(template: &str, ctx: &Context) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let path = after[..end].trim();
                match ctx.lookup(path) {
                    Some(value) if !value.is_composite() => out.push_str(&value.render()),
                    _ => {
                        out.push_str("{{");
                        out.push_str(&after[..end]);
                        out.push_str("}}");
                    }
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str("{{");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
