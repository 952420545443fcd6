//! The orchestrator: per-user event processing with mutual exclusion.
//!
//! `Engine` wires the pure evaluation pieces (condition evaluator, FSM
//! selection, rule matching) to the mutable world (user state store, overlay
//! manager, collaborators). One event for one user runs the whole
//! read-evaluate-apply-act sequence under that user's async lock; events for
//! distinct users proceed in parallel.
//!
//! Configuration is an `Arc<Snapshot>` swapped atomically: a newly installed
//! snapshot affects only evaluations that start after it, never in-flight
//! ones.
//!
//! State changes commit before side effects. The CAS apply retries once
//! against fresh state on a concurrent conflict, then surfaces the conflict
//! as a transient failure. Action failures are recorded and logged, never
//! unwound.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex, RwLock};

use cadence_core::{EventTag, FsmTransition, RuleTrigger, Snapshot};
use cadence_storage::{StorageError, UserFsmRecord, UserOverlayRecord, UserStateStore};
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::actions::{ActionExecutor, ActionOutcome};
use crate::clock::Clock;
use crate::collaborators::{AuditLog, CreditLedger, Notifier, TagStore};
use crate::context::{Context, Value};
use crate::fsm;
use crate::overlay::OverlayManager;
use crate::rules;

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bound on every collaborator dispatch.
    pub action_timeout: std::time::Duration,
    /// Cap on triggers processed per event, bounding overlay-activation
    /// cascades.
    pub max_trigger_rounds: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            action_timeout: std::time::Duration::from_secs(5),
            max_trigger_rounds: 16,
        }
    }
}

/// Errors surfaced to callers of the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The per-user CAS failed twice; the caller may retry the event.
    #[error("user {user_id}: concurrent update conflict")]
    Conflict { user_id: String },

    /// The installed snapshot is unusable for this operation. Load-time
    /// validation makes this unreachable in practice.
    #[error("configuration error: {0}")]
    Config(String),
}

/// The applied transition of one event, if any.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionRecord {
    pub from_state: String,
    pub to_state: String,
    pub trigger_event: String,
    pub actions: Vec<ActionOutcome>,
}

/// One fired rule and its action results.
#[derive(Debug, Clone, Serialize)]
pub struct RuleOutcome {
    pub rule_code: String,
    pub trigger: RuleTrigger,
    pub actions: Vec<ActionOutcome>,
}

/// Everything one event (or sweep tick) did for a user.
#[derive(Debug, Serialize)]
pub struct EventOutcome {
    pub user_id: String,
    /// The user's state after processing. `None` when a sweep tick touched
    /// a user with overlay records but no FSM record.
    pub state: Option<String>,
    pub transition: Option<TransitionRecord>,
    pub rules: Vec<RuleOutcome>,
    /// Overlay instances the sweep expired (always empty for live events).
    pub expired_overlays: usize,
}

/// Aggregate of one full sweep pass.
#[derive(Debug, Default, Serialize)]
pub struct SweepReport {
    pub users: usize,
    pub transitions: usize,
    pub expired_overlays: usize,
    pub rules_fired: usize,
    pub failures: usize,
}

/// The side-effect collaborators behind the action executor.
pub struct Collaborators {
    pub ledger: Arc<dyn CreditLedger>,
    pub tags: Arc<dyn TagStore>,
    pub notifier: Arc<dyn Notifier>,
    pub audit: Arc<dyn AuditLog>,
}

/// Synthetic fields stamped onto the context for a queued trigger.
enum TriggerContext {
    Plain,
    StateChanged {
        from: String,
        to: String,
        trigger_event: String,
    },
    OverlayActivated {
        overlay_type: String,
        code: String,
    },
    OverlayExpired {
        overlay_type: String,
        code: String,
    },
}

/// On-demand registry of per-user async locks.
#[derive(Default)]
struct UserLocks {
    inner: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl UserLocks {
    fn handle(&self, user_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = match self.inner.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

pub struct Engine {
    snapshot: RwLock<Arc<Snapshot>>,
    store: Arc<dyn UserStateStore>,
    overlays: OverlayManager,
    executor: ActionExecutor,
    clock: Arc<dyn Clock>,
    locks: UserLocks,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        snapshot: Arc<Snapshot>,
        store: Arc<dyn UserStateStore>,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Engine {
        let overlays = OverlayManager::new(store.clone());
        let executor = ActionExecutor::new(
            overlays.clone(),
            collaborators.ledger,
            collaborators.tags,
            collaborators.notifier,
            collaborators.audit,
            config.action_timeout,
        );
        Engine {
            snapshot: RwLock::new(snapshot),
            store,
            overlays,
            executor,
            clock,
            locks: UserLocks::default(),
            config,
        }
    }

    /// The configuration generation new evaluations will use.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        match self.snapshot.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Swap in a new configuration generation. Takes effect for subsequent
    /// evaluations only.
    pub fn install_snapshot(&self, snapshot: Arc<Snapshot>) {
        let mut guard = match self.snapshot.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        info!(version = snapshot.version.id, "snapshot installed");
        *guard = snapshot;
    }

    pub fn overlays(&self) -> &OverlayManager {
        &self.overlays
    }

    // ── Inspection ───────────────────────────────────────────────────────

    pub async fn user_state(&self, user_id: &str) -> Result<Option<UserFsmRecord>, EngineError> {
        Ok(self.store.fsm_state(user_id).await?)
    }

    pub async fn user_overlays(
        &self,
        user_id: &str,
    ) -> Result<Vec<UserOverlayRecord>, EngineError> {
        Ok(self.store.overlays(user_id).await?)
    }

    /// The single overlay currently surfaced to the user, by priority.
    pub async fn visible_overlay(
        &self,
        user_id: &str,
    ) -> Result<Option<UserOverlayRecord>, EngineError> {
        let snapshot = self.snapshot();
        Ok(self
            .overlays
            .visible(&snapshot, user_id, self.clock.now())
            .await?)
    }

    // ── Event processing ─────────────────────────────────────────────────

    /// Process one inbound event for one user: advance the FSM if a
    /// transition matches, then run the rule set on the raw trigger and (if
    /// a transition applied) on `STATE_CHANGED`.
    pub async fn process_event(
        &self,
        user_id: &str,
        event: EventTag,
        payload: &serde_json::Value,
    ) -> Result<EventOutcome, EngineError> {
        let lock = self.locks.handle(user_id);
        let _guard = lock.lock().await;

        let snapshot = self.snapshot();
        let now = self.clock.now();
        let mut record = self.load_or_init(&snapshot, user_id, now).await?;

        let transition = match snapshot.version_by_id(record.version_id) {
            Some(_) => {
                self.try_apply_event(&snapshot, user_id, &mut record, event, payload, now)
                    .await?
            }
            None => {
                warn!(
                    user_id,
                    version_id = record.version_id,
                    "pinned FSM version missing from snapshot; skipping transition"
                );
                None
            }
        };

        let mut queue = VecDeque::new();
        queue.push_back((RuleTrigger::Event(event), TriggerContext::Plain));
        if let Some(t) = &transition {
            queue.push_back((
                RuleTrigger::StateChanged,
                TriggerContext::StateChanged {
                    from: t.from_state.clone(),
                    to: t.to_state.clone(),
                    trigger_event: t.trigger_event.clone(),
                },
            ));
            for outcome in &t.actions {
                if let Some(activated) = &outcome.activated {
                    queue.push_back((
                        RuleTrigger::OverlayActivated,
                        TriggerContext::OverlayActivated {
                            overlay_type: activated.overlay_type.clone(),
                            code: activated.overlay_code.clone(),
                        },
                    ));
                }
            }
        }

        let rules = self
            .run_trigger_queue(
                &snapshot,
                user_id,
                Some(&record.state),
                payload,
                Some(event),
                queue,
                now,
            )
            .await?;

        Ok(EventOutcome {
            user_id: user_id.to_string(),
            state: Some(record.state),
            transition,
            rules,
            expired_overlays: 0,
        })
    }

    /// One scheduler pass for one user: due TIME transitions, TIME rules,
    /// then the overlay expiry sweep feeding `OVERLAY_EXPIRED` rules.
    pub async fn tick_user(&self, user_id: &str) -> Result<EventOutcome, EngineError> {
        let lock = self.locks.handle(user_id);
        let _guard = lock.lock().await;

        let snapshot = self.snapshot();
        let now = self.clock.now();
        let empty_payload = serde_json::Value::Object(serde_json::Map::new());

        let mut record = self.store.fsm_state(user_id).await?;
        let mut transition = None;
        if let Some(rec) = record.as_mut() {
            match snapshot.version_by_id(rec.version_id) {
                Some(_) => {
                    transition = self
                        .try_apply_time(&snapshot, user_id, rec, &empty_payload, now)
                        .await?;
                }
                None => warn!(
                    user_id,
                    version_id = rec.version_id,
                    "pinned FSM version missing from snapshot; skipping TIME transition"
                ),
            }
        }
        let state = record.map(|r| r.state);

        // TIME rules see expired-but-unswept overlays (isExpired = true), so
        // expiry-guard rules get their chance before the sweep removes them.
        let mut queue = VecDeque::new();
        if let Some(t) = &transition {
            queue.push_back((
                RuleTrigger::StateChanged,
                TriggerContext::StateChanged {
                    from: t.from_state.clone(),
                    to: t.to_state.clone(),
                    trigger_event: t.trigger_event.clone(),
                },
            ));
            for outcome in &t.actions {
                if let Some(activated) = &outcome.activated {
                    queue.push_back((
                        RuleTrigger::OverlayActivated,
                        TriggerContext::OverlayActivated {
                            overlay_type: activated.overlay_type.clone(),
                            code: activated.overlay_code.clone(),
                        },
                    ));
                }
            }
        }
        queue.push_back((RuleTrigger::Time, TriggerContext::Plain));
        let mut rules = self
            .run_trigger_queue(
                &snapshot,
                user_id,
                state.as_deref(),
                &empty_payload,
                None,
                queue,
                now,
            )
            .await?;

        let expired = self.overlays.sweep_expired(user_id, now).await?;
        let expired_count = expired.len();
        let mut queue = VecDeque::new();
        for record in expired {
            queue.push_back((
                RuleTrigger::OverlayExpired,
                TriggerContext::OverlayExpired {
                    overlay_type: record.overlay_type,
                    code: record.overlay_code,
                },
            ));
        }
        rules.extend(
            self.run_trigger_queue(
                &snapshot,
                user_id,
                state.as_deref(),
                &empty_payload,
                None,
                queue,
                now,
            )
            .await?,
        );

        Ok(EventOutcome {
            user_id: user_id.to_string(),
            state,
            transition,
            rules,
            expired_overlays: expired_count,
        })
    }

    /// Sweep every known user. Per-user failures are logged and counted,
    /// never aborting the pass.
    pub async fn sweep(&self) -> Result<SweepReport, EngineError> {
        let mut report = SweepReport::default();
        for user_id in self.store.user_ids().await? {
            match self.tick_user(&user_id).await {
                Ok(outcome) => {
                    report.users += 1;
                    if outcome.transition.is_some() {
                        report.transitions += 1;
                    }
                    report.expired_overlays += outcome.expired_overlays;
                    report.rules_fired += outcome.rules.len();
                }
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "sweep tick failed");
                    report.failures += 1;
                }
            }
        }
        Ok(report)
    }

    // ── Internals ────────────────────────────────────────────────────────

    async fn load_or_init(
        &self,
        snapshot: &Snapshot,
        user_id: &str,
        now: OffsetDateTime,
    ) -> Result<UserFsmRecord, EngineError> {
        if let Some(record) = self.store.fsm_state(user_id).await? {
            return Ok(record);
        }
        let initial = snapshot.version.initial_state().ok_or_else(|| {
            EngineError::Config(format!(
                "version {} has no initial state",
                snapshot.version.id
            ))
        })?;
        let record = UserFsmRecord {
            user_id: user_id.to_string(),
            version_id: snapshot.version.id,
            state: initial.name.clone(),
            entered_at: now,
            revision: 0,
        };
        match self.store.init_fsm_state(record.clone()).await {
            Ok(()) => {
                debug!(user_id, state = %record.state, "user pinned to active version");
                Ok(record)
            }
            // Lost an init race outside our lock scope; the stored record wins.
            Err(StorageError::AlreadyInitialized { .. }) => self.require_fsm_state(user_id).await,
            Err(e) => Err(e.into()),
        }
    }

    async fn require_fsm_state(&self, user_id: &str) -> Result<UserFsmRecord, EngineError> {
        self.store
            .fsm_state(user_id)
            .await?
            .ok_or_else(|| {
                EngineError::Storage(StorageError::FsmStateNotFound {
                    user_id: user_id.to_string(),
                })
            })
    }

    async fn try_apply_event(
        &self,
        snapshot: &Snapshot,
        user_id: &str,
        record: &mut UserFsmRecord,
        event: EventTag,
        payload: &serde_json::Value,
        now: OffsetDateTime,
    ) -> Result<Option<TransitionRecord>, EngineError> {
        for attempt in 0..2 {
            // Re-resolve the pinned version each attempt; a conflicting
            // writer cannot change the pin, only the state.
            let Some(version) = snapshot.version_by_id(record.version_id) else {
                return Ok(None);
            };
            let ctx = self
                .assemble_context(user_id, Some(&record.state), payload, Some(event), now)
                .await?;
            let Some(selected) =
                fsm::select_event_transition(version, &record.state, event, &ctx)
            else {
                return Ok(None);
            };
            let selected = selected.clone();
            match self
                .apply_transition(user_id, record, &selected, event.as_str(), attempt, now)
                .await?
            {
                ApplyResult::Applied(mut transition) => {
                    // Actions run against the post-transition context and
                    // never unwind the committed state change.
                    let ctx = self
                        .assemble_context(user_id, Some(&record.state), payload, Some(event), now)
                        .await?;
                    transition.actions = self
                        .execute_action_list(snapshot, user_id, &selected.actions, &ctx, now)
                        .await;
                    return Ok(Some(transition));
                }
                ApplyResult::Retry => {
                    *record = self.require_fsm_state(user_id).await?;
                }
            }
        }
        Err(EngineError::Conflict {
            user_id: user_id.to_string(),
        })
    }

    async fn try_apply_time(
        &self,
        snapshot: &Snapshot,
        user_id: &str,
        record: &mut UserFsmRecord,
        payload: &serde_json::Value,
        now: OffsetDateTime,
    ) -> Result<Option<TransitionRecord>, EngineError> {
        for attempt in 0..2 {
            let Some(version) = snapshot.version_by_id(record.version_id) else {
                return Ok(None);
            };
            let minutes = minutes_between(record.entered_at, now);
            let ctx = self
                .assemble_context(user_id, Some(&record.state), payload, None, now)
                .await?;
            let Some(selected) =
                fsm::select_time_transition(version, &record.state, minutes, &ctx)
            else {
                return Ok(None);
            };
            let selected = selected.clone();
            match self
                .apply_transition(user_id, record, &selected, "TIME", attempt, now)
                .await?
            {
                ApplyResult::Applied(mut transition) => {
                    let ctx = self
                        .assemble_context(user_id, Some(&record.state), payload, None, now)
                        .await?;
                    transition.actions = self
                        .execute_action_list(snapshot, user_id, &selected.actions, &ctx, now)
                        .await;
                    return Ok(Some(transition));
                }
                ApplyResult::Retry => {
                    *record = self.require_fsm_state(user_id).await?;
                }
            }
        }
        Err(EngineError::Conflict {
            user_id: user_id.to_string(),
        })
    }

    /// CAS the state update. The state change commits here, before any
    /// action runs.
    async fn apply_transition(
        &self,
        user_id: &str,
        record: &mut UserFsmRecord,
        selected: &FsmTransition,
        trigger_event: &str,
        attempt: usize,
        now: OffsetDateTime,
    ) -> Result<ApplyResult, EngineError> {
        match self
            .store
            .update_fsm_state(user_id, record.revision, &selected.to, now)
            .await
        {
            Ok(new_revision) => {
                let from = std::mem::replace(&mut record.state, selected.to.clone());
                record.revision = new_revision;
                record.entered_at = now;
                info!(
                    user_id,
                    from = %from,
                    to = %selected.to,
                    trigger = trigger_event,
                    "transition applied"
                );
                Ok(ApplyResult::Applied(TransitionRecord {
                    from_state: from,
                    to_state: selected.to.clone(),
                    trigger_event: trigger_event.to_string(),
                    actions: Vec::new(),
                }))
            }
            Err(StorageError::ConcurrentConflict { .. }) if attempt == 0 => Ok(ApplyResult::Retry),
            Err(e) => Err(e.into()),
        }
    }

    /// Execute an action list in ascending `order`. Failures are already
    /// collapsed into outcomes by the executor.
    async fn execute_action_list(
        &self,
        snapshot: &Snapshot,
        user_id: &str,
        actions: &[cadence_core::ActionSpec],
        ctx: &Context,
        now: OffsetDateTime,
    ) -> Vec<ActionOutcome> {
        let mut ordered: Vec<_> = actions.iter().collect();
        ordered.sort_by_key(|a| a.order);
        let mut outcomes = Vec::with_capacity(ordered.len());
        for action in ordered {
            outcomes.push(self.executor.execute(snapshot, user_id, action, ctx, now).await);
        }
        outcomes
    }

    async fn run_trigger_queue(
        &self,
        snapshot: &Snapshot,
        user_id: &str,
        lifecycle: Option<&str>,
        payload: &serde_json::Value,
        event: Option<EventTag>,
        mut queue: VecDeque<(RuleTrigger, TriggerContext)>,
        now: OffsetDateTime,
    ) -> Result<Vec<RuleOutcome>, EngineError> {
        let mut outcomes = Vec::new();
        let mut rounds = 0;
        while let Some((trigger, trigger_ctx)) = queue.pop_front() {
            rounds += 1;
            if rounds > self.config.max_trigger_rounds {
                warn!(
                    user_id,
                    rounds, "trigger cascade exceeded round cap; dropping remainder"
                );
                break;
            }

            let mut ctx = self
                .assemble_context(user_id, lifecycle, payload, event, now)
                .await?;
            apply_trigger_context(&mut ctx, &trigger_ctx);

            // Matching is frozen per trigger: select all rules first, then
            // execute, so one rule's side effects cannot un-match another
            // mid-trigger.
            let matched: Vec<_> = rules::match_rules(snapshot, trigger, &ctx)
                .into_iter()
                .cloned()
                .collect();
            for rule in matched {
                debug!(user_id, rule = %rule.code, trigger = %trigger, "rule fired");
                let action_outcomes = self
                    .execute_action_list(snapshot, user_id, &rule.actions, &ctx, now)
                    .await;
                for outcome in &action_outcomes {
                    if let Some(activated) = &outcome.activated {
                        queue.push_back((
                            RuleTrigger::OverlayActivated,
                            TriggerContext::OverlayActivated {
                                overlay_type: activated.overlay_type.clone(),
                                code: activated.overlay_code.clone(),
                            },
                        ));
                    }
                }
                outcomes.push(RuleOutcome {
                    rule_code: rule.code.clone(),
                    trigger,
                    actions: action_outcomes,
                });
            }
        }
        Ok(outcomes)
    }

    /// Build the evaluation context: payload fields at the top level, the
    /// same fields under `event` (plus the tag), the lifecycle state, and
    /// the overlay snapshot.
    async fn assemble_context(
        &self,
        user_id: &str,
        lifecycle: Option<&str>,
        payload: &serde_json::Value,
        event: Option<EventTag>,
        now: OffsetDateTime,
    ) -> Result<Context, EngineError> {
        let mut ctx = Context::new();
        ctx.merge_object(payload);

        let mut event_record = match Value::from_json(payload) {
            Value::Record(fields) => fields,
            _ => BTreeMap::new(),
        };
        if let Some(tag) = event {
            let _ = event_record.insert("tag".to_string(), Value::Text(tag.as_str().to_string()));
        }
        ctx.insert("event", Value::Record(event_record));

        if let Some(state) = lifecycle {
            ctx.insert("lifecycle", Value::Text(state.to_string()));
        }
        ctx.insert("overlay", self.overlays.context_value(user_id, now).await?);
        Ok(ctx)
    }
}

enum ApplyResult {
    Applied(TransitionRecord),
    Retry,
}

fn apply_trigger_context(ctx: &mut Context, trigger_ctx: &TriggerContext) {
    match trigger_ctx {
        TriggerContext::Plain => {}
        TriggerContext::StateChanged {
            from,
            to,
            trigger_event,
        } => {
            ctx.insert("from_state_name", Value::Text(from.clone()));
            ctx.insert("to_state_name", Value::Text(to.clone()));
            ctx.insert("trigger_event", Value::Text(trigger_event.clone()));
        }
        TriggerContext::OverlayActivated { overlay_type, code } => {
            ctx.insert_at("overlay", "type", Value::Text(overlay_type.clone()));
            ctx.insert_at("overlay", "code", Value::Text(code.clone()));
        }
        TriggerContext::OverlayExpired { overlay_type, code } => {
            ctx.insert("overlayType", Value::Text(overlay_type.clone()));
            ctx.insert("overlayCode", Value::Text(code.clone()));
        }
    }
}

fn minutes_between(entered_at: OffsetDateTime, now: OffsetDateTime) -> u64 {
    let minutes = (now - entered_at).whole_minutes();
    if minutes < 0 {
        0
    } else {
        minutes as u64
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
