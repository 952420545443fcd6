//! Rule matching.
//!
//! Rules are independent of FSM state: any enabled rule whose trigger equals
//! the incoming trigger and whose conditions hold against the full context
//! is matched. Execution order is priority descending, then code ascending --
//! the snapshot provides that ordering, this module applies the condition
//! filter.
//!
//! Matching is frozen per trigger: all rules for one trigger are selected
//! against the same context snapshot before any of their actions run, so an
//! earlier rule's side effects cannot un-match a later rule mid-trigger.

use cadence_core::{Rule, RuleTrigger, Snapshot};

use crate::condition;
use crate::context::Context;

/// Enabled rules listening on `trigger` whose conditions hold, in execution
/// order.
pub fn match_rules<'a>(snapshot: &'a Snapshot, trigger: RuleTrigger, ctx: &Context) -> Vec<&'a Rule> {
    snapshot
        .rules_for_trigger(trigger)
        .into_iter()
        .filter(|rule| condition::evaluate(&rule.conditions, ctx))
        .collect()
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
