//! Configuration entities for the cadence decision engine.
//!
//! All types here are immutable value objects deserialized from the snapshot
//! JSON document. Field names follow the camelCase wire format of the
//! configuration store; enum variants use the SCREAMING_SNAKE vocabulary the
//! rest of the product speaks.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ──────────────────────────────────────────────
// Event and trigger vocabulary
// ──────────────────────────────────────────────

/// Event-domain tags produced by external collaborators (bot handler,
/// payment webhook, admin console, referral handler) and by the activity
/// tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventTag {
    BotStart,
    GenerationRequested,
    GenerationCompleted,
    CreditsChanged,
    CreditsZero,
    InsufficientCredits,
    PaymentCompleted,
    PaymentFailed,
    LastActivity,
    ReferralInvite,
    AdminEvent,
}

impl EventTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventTag::BotStart => "BOT_START",
            EventTag::GenerationRequested => "GENERATION_REQUESTED",
            EventTag::GenerationCompleted => "GENERATION_COMPLETED",
            EventTag::CreditsChanged => "CREDITS_CHANGED",
            EventTag::CreditsZero => "CREDITS_ZERO",
            EventTag::InsufficientCredits => "INSUFFICIENT_CREDITS",
            EventTag::PaymentCompleted => "PAYMENT_COMPLETED",
            EventTag::PaymentFailed => "PAYMENT_FAILED",
            EventTag::LastActivity => "LAST_ACTIVITY",
            EventTag::ReferralInvite => "REFERRAL_INVITE",
            EventTag::AdminEvent => "ADMIN_EVENT",
        }
    }

    /// Parse a SCREAMING_SNAKE tag. Returns `None` for anything outside the
    /// fixed vocabulary.
    pub fn parse(s: &str) -> Option<EventTag> {
        Some(match s {
            "BOT_START" => EventTag::BotStart,
            "GENERATION_REQUESTED" => EventTag::GenerationRequested,
            "GENERATION_COMPLETED" => EventTag::GenerationCompleted,
            "CREDITS_CHANGED" => EventTag::CreditsChanged,
            "CREDITS_ZERO" => EventTag::CreditsZero,
            "INSUFFICIENT_CREDITS" => EventTag::InsufficientCredits,
            "PAYMENT_COMPLETED" => EventTag::PaymentCompleted,
            "PAYMENT_FAILED" => EventTag::PaymentFailed,
            "LAST_ACTIVITY" => EventTag::LastActivity,
            "REFERRAL_INVITE" => EventTag::ReferralInvite,
            "ADMIN_EVENT" => EventTag::AdminEvent,
            _ => return None,
        })
    }
}

impl fmt::Display for EventTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What makes a rule eligible for evaluation.
///
/// Rules listen on the event-domain vocabulary plus three synthetic
/// triggers the engine emits itself (`STATE_CHANGED`, `OVERLAY_ACTIVATED`,
/// `OVERLAY_EXPIRED`) and the periodic `TIME` sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleTrigger {
    Event(EventTag),
    StateChanged,
    OverlayActivated,
    OverlayExpired,
    Time,
}

impl RuleTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleTrigger::Event(tag) => tag.as_str(),
            RuleTrigger::StateChanged => "STATE_CHANGED",
            RuleTrigger::OverlayActivated => "OVERLAY_ACTIVATED",
            RuleTrigger::OverlayExpired => "OVERLAY_EXPIRED",
            RuleTrigger::Time => "TIME",
        }
    }

    pub fn parse(s: &str) -> Option<RuleTrigger> {
        Some(match s {
            "STATE_CHANGED" => RuleTrigger::StateChanged,
            "OVERLAY_ACTIVATED" => RuleTrigger::OverlayActivated,
            "OVERLAY_EXPIRED" => RuleTrigger::OverlayExpired,
            "TIME" => RuleTrigger::Time,
            other => RuleTrigger::Event(EventTag::parse(other)?),
        })
    }
}

impl fmt::Display for RuleTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<EventTag> for RuleTrigger {
    fn from(tag: EventTag) -> Self {
        RuleTrigger::Event(tag)
    }
}

impl Serialize for RuleTrigger {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RuleTrigger {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        RuleTrigger::parse(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown rule trigger '{}'", s)))
    }
}

// ──────────────────────────────────────────────
// Conditions
// ──────────────────────────────────────────────

/// Comparison operators available to conditions.
///
/// `GT`/`GTE`/`LT`/`LTE` coerce both operands numerically; `IN`/`NOT_IN`
/// treat the config value as a comma-separated set; `EXISTS`/`NOT_EXISTS`
/// test path presence and ignore the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Exists,
    NotExists,
}

/// One boolean condition over the evaluation context.
///
/// Conditions sharing a `groupId` are ANDed; distinct groups are ORed. A
/// transition or rule with an empty condition set matches unconditionally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Dotted path resolved against the evaluation context, e.g.
    /// `total_generations`, `event.subType`, `overlay.TRIPWIRE.isExpired`.
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub group_id: u32,
}

// ──────────────────────────────────────────────
// Actions
// ──────────────────────────────────────────────

/// The fixed action vocabulary. Each kind maps to exactly one collaborator
/// call in the action executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    ActivateOverlay,
    DeactivateOverlay,
    GrantBonus,
    TagUser,
    LogEvent,
    SendMessage,
    SendSpecialOffer,
    /// Deliberate marker flagging a policy for a collaborator to consult.
    /// Always a no-op for the executor; never fails.
    NoAction,
}

/// An ordered, config-parameterized action attached to a transition or rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    /// Template parameters only -- never mutable engine state.
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub order: u32,
}

// ──────────────────────────────────────────────
// FSM entities
// ──────────────────────────────────────────────

/// A lifecycle state within one FSM version. Names are unique per version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsmState {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_initial: bool,
    /// Terminal states are excluded from `ANY` expansion by default and are
    /// expected (not enforced) to have no outgoing transitions.
    #[serde(default)]
    pub is_terminal: bool,
}

/// Trigger of a transition: an inbound event tag, or time-in-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "triggerType")]
pub enum TransitionTrigger {
    #[serde(rename = "EVENT")]
    Event {
        #[serde(rename = "triggerEvent")]
        event: EventTag,
    },
    #[serde(rename = "TIME")]
    Time {
        /// Minutes a user must have been in the source state before the
        /// transition becomes eligible.
        #[serde(rename = "timeoutMinutes")]
        minutes: u32,
    },
}

/// A directed edge of the lifecycle graph.
///
/// The configured source may be the `ANY` macro, which the loader expands
/// into one concrete transition per non-excluded state; at runtime `from`
/// is always a real state name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsmTransition {
    pub from: String,
    pub to: String,
    #[serde(flatten)]
    pub trigger: TransitionTrigger,
    /// Higher wins among simultaneous matches; ties break by load order.
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
    /// Load order, assigned by the snapshot loader after `ANY` expansion.
    /// The deterministic tie-breaker for equal priorities.
    #[serde(skip)]
    pub index: usize,
}

/// One immutable generation of the lifecycle graph.
///
/// Exactly one version per snapshot is active; inactive versions are
/// retained for users still pinned to them, never evaluated for new users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsmVersion {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub is_active: bool,
    pub states: Vec<FsmState>,
    #[serde(default)]
    pub transitions: Vec<FsmTransition>,
}

impl FsmVersion {
    pub fn state(&self, name: &str) -> Option<&FsmState> {
        self.states.iter().find(|s| s.name == name)
    }

    /// The unique initial state. Guaranteed present by snapshot validation.
    pub fn initial_state(&self) -> Option<&FsmState> {
        self.states.iter().find(|s| s.is_initial)
    }

    /// Transitions leaving `from`, in load order.
    pub fn transitions_from<'a>(
        &'a self,
        from: &'a str,
    ) -> impl Iterator<Item = &'a FsmTransition> + 'a {
        self.transitions.iter().filter(move |t| t.from == from)
    }
}

// ──────────────────────────────────────────────
// Rules
// ──────────────────────────────────────────────

/// A prioritized business rule, independent of FSM state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Unique code; the deterministic tie-breaker for equal priorities.
    pub code: String,
    pub trigger: RuleTrigger,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
}

// ──────────────────────────────────────────────
// Overlay registry
// ──────────────────────────────────────────────

/// A registered overlay template. Static configuration; per-user instance
/// state lives in the overlay manager's store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Overlay {
    /// Unique code; cooldown windows are tracked per code.
    pub code: String,
    /// At most one instance per type is active per user at a time.
    #[serde(rename = "type")]
    pub overlay_type: String,
    /// Resolves which active overlay is surfaced when several types are
    /// active at once. Presentation only.
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Message template with `{{placeholder}}` parameters.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Absolute expiry from activation time.
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
    /// Re-activation lockout for this code after deactivation or expiry.
    #[serde(default)]
    pub cooldown_seconds: Option<u64>,
    /// Surfacing cap; exhaustion expires the instance regardless of TTL.
    #[serde(default)]
    pub max_impressions: Option<u32>,
}

// ──────────────────────────────────────────────
// Snapshot policy
// ──────────────────────────────────────────────

/// Snapshot-wide evaluation policy knobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// States the `ANY` source macro must not expand from. `None` defaults
    /// to every terminal state; an explicit empty list opts every non-self
    /// state in.
    #[serde(default)]
    pub any_source_excludes: Option<Vec<String>>,
}

fn default_true() -> bool {
    true
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_tag_round_trip() {
        for tag in [
            EventTag::BotStart,
            EventTag::GenerationCompleted,
            EventTag::CreditsChanged,
            EventTag::PaymentCompleted,
            EventTag::AdminEvent,
        ] {
            assert_eq!(EventTag::parse(tag.as_str()), Some(tag));
        }
        assert_eq!(EventTag::parse("NOT_A_TAG"), None);
    }

    #[test]
    fn rule_trigger_parses_event_and_synthetic() {
        assert_eq!(
            RuleTrigger::parse("PAYMENT_COMPLETED"),
            Some(RuleTrigger::Event(EventTag::PaymentCompleted))
        );
        assert_eq!(RuleTrigger::parse("STATE_CHANGED"), Some(RuleTrigger::StateChanged));
        assert_eq!(RuleTrigger::parse("TIME"), Some(RuleTrigger::Time));
        assert_eq!(RuleTrigger::parse("bogus"), None);
    }

    #[test]
    fn rule_trigger_serde_round_trip() {
        let json = serde_json::to_string(&RuleTrigger::OverlayExpired).unwrap();
        assert_eq!(json, "\"OVERLAY_EXPIRED\"");
        let back: RuleTrigger = serde_json::from_str(&json).unwrap();
        assert_eq!(back, RuleTrigger::OverlayExpired);
    }

    #[test]
    fn transition_deserializes_event_trigger() {
        let t: FsmTransition = serde_json::from_value(serde_json::json!({
            "from": "NEW",
            "to": "ACTIVATING",
            "triggerType": "EVENT",
            "triggerEvent": "GENERATION_COMPLETED",
            "priority": 10,
            "conditions": [
                { "field": "total_generations", "operator": "GTE", "value": "1" }
            ]
        }))
        .unwrap();
        assert_eq!(
            t.trigger,
            TransitionTrigger::Event {
                event: EventTag::GenerationCompleted
            }
        );
        assert_eq!(t.priority, 10);
        assert_eq!(t.conditions[0].operator, ConditionOperator::Gte);
        assert_eq!(t.conditions[0].group_id, 0);
    }

    #[test]
    fn transition_deserializes_time_trigger() {
        let t: FsmTransition = serde_json::from_value(serde_json::json!({
            "from": "INACTIVE",
            "to": "CHURNED",
            "triggerType": "TIME",
            "timeoutMinutes": 43200
        }))
        .unwrap();
        assert_eq!(t.trigger, TransitionTrigger::Time { minutes: 43200 });
        assert!(t.conditions.is_empty());
    }

    #[test]
    fn rule_defaults() {
        let r: Rule = serde_json::from_value(serde_json::json!({
            "code": "TW-4",
            "trigger": "PAYMENT_COMPLETED"
        }))
        .unwrap();
        assert!(r.enabled);
        assert_eq!(r.priority, 0);
        assert!(r.conditions.is_empty());
    }

    #[test]
    fn overlay_defaults() {
        let o: Overlay = serde_json::from_value(serde_json::json!({
            "code": "TRIPWIRE_DEFAULT",
            "type": "TRIPWIRE",
            "priority": 10,
            "ttlSeconds": 86400,
            "cooldownSeconds": 3600
        }))
        .unwrap();
        assert!(o.is_active);
        assert_eq!(o.ttl_seconds, Some(86400));
        assert_eq!(o.max_impressions, None);
    }

    #[test]
    fn action_spec_kind_field_is_type() {
        let a: ActionSpec = serde_json::from_value(serde_json::json!({
            "type": "ACTIVATE_OVERLAY",
            "params": { "type": "BONUS", "amount": 10, "hours": 24 },
            "order": 1
        }))
        .unwrap();
        assert_eq!(a.kind, ActionKind::ActivateOverlay);
        assert_eq!(a.params["amount"], 10);
    }
}
