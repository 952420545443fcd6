//! Grouped condition evaluation.
//!
//! The single evaluation primitive shared by the FSM engine and the rule
//! engine. Conditions with the same `groupId` are ANDed; distinct groups are
//! ORed: a set matches iff at least one group's conditions all hold. The
//! empty set matches unconditionally.
//!
//! A missing context path makes a condition false -- it never raises -- except
//! for `EXISTS`/`NOT_EXISTS`, which test presence directly. Relational
//! operators coerce both operands through `rust_decimal`; a value that has
//! no numeric reading fails the comparison.

use std::collections::BTreeMap;

use cadence_core::{Condition, ConditionOperator};
use rust_decimal::Decimal;

use crate::context::{Context, Value};

/// Evaluate a grouped condition set against a context.
pub fn evaluate(conditions: &[Condition], ctx: &Context) -> bool {
    if conditions.is_empty() {
        return true;
    }
    let mut groups: BTreeMap<u32, bool> = BTreeMap::new();
    for condition in conditions {
        let satisfied = eval_condition(condition, ctx);
        groups
            .entry(condition.group_id)
            .and_modify(|g| *g &= satisfied)
            .or_insert(satisfied);
    }
    groups.values().any(|g| *g)
}

fn eval_condition(condition: &Condition, ctx: &Context) -> bool {
    match condition.operator {
        ConditionOperator::Exists => ctx.contains(&condition.field),
        ConditionOperator::NotExists => !ctx.contains(&condition.field),
        op => {
            let Some(actual) = ctx.lookup(&condition.field) else {
                return false;
            };
            let Some(expected) = condition.value.as_deref() else {
                return false;
            };
            match op {
                ConditionOperator::Equals => values_equal(actual, expected),
                ConditionOperator::NotEquals => !values_equal(actual, expected),
                ConditionOperator::Gt => compare(actual, expected, |o| o.is_gt()),
                ConditionOperator::Gte => compare(actual, expected, |o| o.is_ge()),
                ConditionOperator::Lt => compare(actual, expected, |o| o.is_lt()),
                ConditionOperator::Lte => compare(actual, expected, |o| o.is_le()),
                ConditionOperator::In => in_set(actual, expected),
                ConditionOperator::NotIn => !in_set(actual, expected),
                ConditionOperator::Exists | ConditionOperator::NotExists => unreachable!(),
            }
        }
    }
}

/// Numeric-aware equality: when both sides have a numeric reading they
/// compare as decimals (`"3.0"` equals `3`), otherwise by canonical text.
fn values_equal(actual: &Value, expected: &str) -> bool {
    if let (Some(l), Some(r)) = (actual.as_decimal(), parse_decimal(expected)) {
        return l == r;
    }
    if actual.is_composite() {
        return false;
    }
    actual.render() == expected
}

fn compare(actual: &Value, expected: &str, accept: impl Fn(std::cmp::Ordering) -> bool) -> bool {
    match (actual.as_decimal(), parse_decimal(expected)) {
        (Some(l), Some(r)) => accept(l.cmp(&r)),
        _ => false,
    }
}

/// Membership in a comma-separated set, each element trimmed.
fn in_set(actual: &Value, expected: &str) -> bool {
    expected
        .split(',')
        .map(str::trim)
        .any(|item| values_equal(actual, item))
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    s.trim().parse().ok()
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
