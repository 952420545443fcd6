//! Transition selection for the lifecycle FSM.
//!
//! Selection is pure: given the user's version, current state, and an
//! assembled context, pick the winning outgoing transition. The orchestrator
//! owns the apply step (CAS update, actions, `STATE_CHANGED` fan-out).
//!
//! Among matching transitions the strictly highest priority wins; equal
//! priorities break by load order, which the snapshot loader stamped as
//! `index`. Selection is deterministic and repeatable across runs.

use cadence_core::{EventTag, FsmTransition, FsmVersion, TransitionTrigger};

use crate::condition;
use crate::context::Context;

/// Pick the winning transition for an inbound event, if any.
pub fn select_event_transition<'a>(
    version: &'a FsmVersion,
    from_state: &'a str,
    event: EventTag,
    ctx: &Context,
) -> Option<&'a FsmTransition> {
    select(
        version.transitions_from(from_state).filter(|t| {
            matches!(t.trigger, TransitionTrigger::Event { event: e } if e == event)
        }),
        ctx,
    )
}

/// Pick the winning TIME transition for a user who has spent
/// `minutes_in_state` in their current state, if any is due.
pub fn select_time_transition<'a>(
    version: &'a FsmVersion,
    from_state: &'a str,
    minutes_in_state: u64,
    ctx: &Context,
) -> Option<&'a FsmTransition> {
    select(
        version.transitions_from(from_state).filter(|t| {
            matches!(t.trigger, TransitionTrigger::Time { minutes } if u64::from(minutes) <= minutes_in_state)
        }),
        ctx,
    )
}

/// Filter candidates by their conditions and keep the best. Candidates
/// arrive in load order, so keeping only strict improvements makes the
/// earliest transition win priority ties.
fn select<'a>(
    candidates: impl Iterator<Item = &'a FsmTransition>,
    ctx: &Context,
) -> Option<&'a FsmTransition> {
    let mut best: Option<&FsmTransition> = None;
    for transition in candidates {
        if !condition::evaluate(&transition.conditions, ctx) {
            continue;
        }
        match best {
            Some(current) if transition.priority <= current.priority => {}
            _ => best = Some(transition),
        }
    }
    best
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::Snapshot;

    fn version_with(transitions: serde_json::Value) -> FsmVersion {
        let snap = Snapshot::from_json(serde_json::json!({
            "fsm": {
                "versions": [{
                    "id": 1,
                    "name": "test",
                    "isActive": true,
                    "states": [
                        { "name": "NEW", "isInitial": true },
                        { "name": "ACTIVATING" },
                        { "name": "ACTIVE_FREE" },
                        { "name": "PAYWALL" }
                    ],
                    "transitions": transitions
                }]
            }
        }))
        .unwrap();
        snap.version
    }

    fn ctx(payload: serde_json::Value) -> Context {
        let mut ctx = Context::new();
        ctx.merge_object(&payload);
        ctx
    }

    #[test]
    fn highest_priority_wins() {
        let version = version_with(serde_json::json!([
            {
                "from": "NEW", "to": "ACTIVATING",
                "triggerType": "EVENT", "triggerEvent": "GENERATION_COMPLETED",
                "priority": 0
            },
            {
                "from": "NEW", "to": "PAYWALL",
                "triggerType": "EVENT", "triggerEvent": "GENERATION_COMPLETED",
                "priority": 10
            }
        ]));
        let winner = select_event_transition(
            &version,
            "NEW",
            EventTag::GenerationCompleted,
            &Context::new(),
        )
        .unwrap();
        assert_eq!(winner.to, "PAYWALL");
    }

    #[test]
    fn equal_priority_breaks_by_load_order() {
        let version = version_with(serde_json::json!([
            {
                "from": "NEW", "to": "ACTIVATING",
                "triggerType": "EVENT", "triggerEvent": "GENERATION_COMPLETED"
            },
            {
                "from": "NEW", "to": "ACTIVE_FREE",
                "triggerType": "EVENT", "triggerEvent": "GENERATION_COMPLETED"
            }
        ]));
        // Repeat to confirm the choice is stable, not incidental.
        for _ in 0..10 {
            let winner = select_event_transition(
                &version,
                "NEW",
                EventTag::GenerationCompleted,
                &Context::new(),
            )
            .unwrap();
            assert_eq!(winner.to, "ACTIVATING");
        }
    }

    #[test]
    fn empty_condition_set_always_matches() {
        let version = version_with(serde_json::json!([
            {
                "from": "NEW", "to": "ACTIVATING",
                "triggerType": "EVENT", "triggerEvent": "BOT_START"
            }
        ]));
        assert!(
            select_event_transition(&version, "NEW", EventTag::BotStart, &Context::new()).is_some()
        );
    }

    #[test]
    fn conditions_filter_candidates() {
        let version = version_with(serde_json::json!([
            {
                "from": "NEW", "to": "ACTIVATING",
                "triggerType": "EVENT", "triggerEvent": "GENERATION_COMPLETED",
                "conditions": [
                    { "field": "total_generations", "operator": "GTE", "value": "1" }
                ]
            }
        ]));
        assert!(select_event_transition(
            &version,
            "NEW",
            EventTag::GenerationCompleted,
            &ctx(serde_json::json!({ "total_generations": 0 }))
        )
        .is_none());
        assert!(select_event_transition(
            &version,
            "NEW",
            EventTag::GenerationCompleted,
            &ctx(serde_json::json!({ "total_generations": 1 }))
        )
        .is_some());
    }

    #[test]
    fn wrong_event_or_state_never_matches() {
        let version = version_with(serde_json::json!([
            {
                "from": "NEW", "to": "ACTIVATING",
                "triggerType": "EVENT", "triggerEvent": "BOT_START"
            }
        ]));
        assert!(
            select_event_transition(&version, "NEW", EventTag::PaymentCompleted, &Context::new())
                .is_none()
        );
        assert!(
            select_event_transition(&version, "PAYWALL", EventTag::BotStart, &Context::new())
                .is_none()
        );
    }

    #[test]
    fn time_transition_requires_elapsed_minutes() {
        let version = version_with(serde_json::json!([
            {
                "from": "NEW", "to": "PAYWALL",
                "triggerType": "TIME", "timeoutMinutes": 60
            }
        ]));
        assert!(select_time_transition(&version, "NEW", 59, &Context::new()).is_none());
        assert!(select_time_transition(&version, "NEW", 60, &Context::new()).is_some());
        assert!(select_time_transition(&version, "NEW", 600, &Context::new()).is_some());
    }

    #[test]
    fn time_selection_ignores_event_transitions() {
        let version = version_with(serde_json::json!([
            {
                "from": "NEW", "to": "ACTIVATING",
                "triggerType": "EVENT", "triggerEvent": "BOT_START"
            }
        ]));
        assert!(select_time_transition(&version, "NEW", 10_000, &Context::new()).is_none());
    }
}
