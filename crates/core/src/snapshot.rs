//! Snapshot loading and validation.
//!
//! A snapshot is one versioned, swappable configuration generation: the FSM
//! versions (exactly one active), the full rule set, and the overlay
//! registry. Loading is all-or-nothing -- any validation failure rejects the
//! whole document.
//!
//! The `ANY` transition source is a load-time macro, never a runtime
//! wildcard: it expands into one concrete transition per state, always
//! excluding self-loops and additionally excluding the policy's exclusion
//! set (defaulting to terminal states).

use std::collections::{BTreeSet, HashSet};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::model::{FsmVersion, Overlay, Policy, Rule, RuleTrigger};

/// The wildcard transition source recognized by the loader.
pub const ANY_SOURCE: &str = "ANY";

/// Raw document shape, before validation.
#[derive(Debug, Default, Deserialize)]
struct SnapshotDoc {
    #[serde(default)]
    fsm: FsmDoc,
    #[serde(default)]
    rules: Vec<Rule>,
    #[serde(default)]
    overlays: Vec<Overlay>,
    #[serde(default)]
    policy: Policy,
}

#[derive(Debug, Default, Deserialize)]
struct FsmDoc {
    #[serde(default)]
    versions: Vec<FsmVersion>,
}

/// A validated configuration generation.
///
/// Immutable once built; the engine swaps whole `Arc<Snapshot>` values and
/// in-flight evaluations keep the generation they started with.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// The single active FSM version, `ANY`-expanded and index-stamped.
    pub version: FsmVersion,
    /// Inactive versions, retained for users still pinned to them.
    pub retained: Vec<FsmVersion>,
    pub rules: Vec<Rule>,
    pub overlays: Vec<Overlay>,
    pub policy: Policy,
}

impl Snapshot {
    /// Parse and validate a snapshot from JSON text.
    pub fn from_str(text: &str) -> Result<Snapshot, ConfigError> {
        let doc: SnapshotDoc =
            serde_json::from_str(text).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        Snapshot::build(doc)
    }

    /// Parse and validate a snapshot from an already-parsed JSON value.
    pub fn from_json(value: serde_json::Value) -> Result<Snapshot, ConfigError> {
        let doc: SnapshotDoc =
            serde_json::from_value(value).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        Snapshot::build(doc)
    }

    fn build(doc: SnapshotDoc) -> Result<Snapshot, ConfigError> {
        let active_ids: Vec<u32> = doc
            .fsm
            .versions
            .iter()
            .filter(|v| v.is_active)
            .map(|v| v.id)
            .collect();
        let active_id = match active_ids.as_slice() {
            [] => return Err(ConfigError::NoActiveVersion),
            [id] => *id,
            _ => return Err(ConfigError::MultipleActiveVersions { ids: active_ids }),
        };

        let mut active = None;
        let mut retained = Vec::new();
        for mut version in doc.fsm.versions {
            let is_active = version.id == active_id;
            validate_version(&mut version, &doc.policy, is_active)?;
            if version.id == active_id {
                active = Some(version);
            } else {
                retained.push(version);
            }
        }
        // Guaranteed by the active_id match above.
        let version = active.ok_or(ConfigError::NoActiveVersion)?;

        let mut rule_codes = HashSet::new();
        for rule in &doc.rules {
            if !rule_codes.insert(rule.code.as_str()) {
                return Err(ConfigError::DuplicateRuleCode {
                    code: rule.code.clone(),
                });
            }
        }

        let mut overlay_codes = HashSet::new();
        for overlay in &doc.overlays {
            if !overlay_codes.insert(overlay.code.as_str()) {
                return Err(ConfigError::DuplicateOverlayCode {
                    code: overlay.code.clone(),
                });
            }
        }

        Ok(Snapshot {
            version,
            retained,
            rules: doc.rules,
            overlays: doc.overlays,
            policy: doc.policy,
        })
    }

    /// Look up a version by id: the active one or a retained generation.
    pub fn version_by_id(&self, id: u32) -> Option<&FsmVersion> {
        if self.version.id == id {
            return Some(&self.version);
        }
        self.retained.iter().find(|v| v.id == id)
    }

    pub fn overlay_by_code(&self, code: &str) -> Option<&Overlay> {
        self.overlays.iter().find(|o| o.code == code)
    }

    /// The enabled template activation resolves to when an action names only
    /// an overlay type: highest priority, then code order for determinism.
    pub fn overlay_for_type(&self, overlay_type: &str) -> Option<&Overlay> {
        self.overlays
            .iter()
            .filter(|o| o.is_active && o.overlay_type == overlay_type)
            .min_by(|a, b| b.priority.cmp(&a.priority).then(a.code.cmp(&b.code)))
    }

    /// Enabled rules listening on `trigger`, in execution order: priority
    /// descending, then code ascending.
    pub fn rules_for_trigger(&self, trigger: RuleTrigger) -> Vec<&Rule> {
        let mut matched: Vec<&Rule> = self
            .rules
            .iter()
            .filter(|r| r.enabled && r.trigger == trigger)
            .collect();
        matched.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.code.cmp(&b.code)));
        matched
    }
}

/// Validate one version in place: state uniqueness, the single-initial
/// invariant, `ANY` expansion, dangling references, index stamping.
fn validate_version(
    version: &mut FsmVersion,
    policy: &Policy,
    is_active: bool,
) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for state in &version.states {
        if !names.insert(state.name.as_str()) {
            return Err(ConfigError::DuplicateState {
                version_id: version.id,
                name: state.name.clone(),
            });
        }
    }

    let initial: Vec<&str> = version
        .states
        .iter()
        .filter(|s| s.is_initial)
        .map(|s| s.name.as_str())
        .collect();
    match initial.len() {
        0 => {
            return Err(ConfigError::MissingInitialState {
                version_id: version.id,
            })
        }
        1 => {}
        _ => {
            return Err(ConfigError::MultipleInitialStates {
                version_id: version.id,
                names: initial.iter().map(|s| s.to_string()).collect(),
            })
        }
    }

    let excludes = wildcard_excludes(version, policy, is_active)?;
    expand_wildcards(version, &excludes)?;

    for transition in &version.transitions {
        for name in [transition.from.as_str(), transition.to.as_str()] {
            if version.state(name).is_none() {
                return Err(ConfigError::UnknownState {
                    version_id: version.id,
                    name: name.to_string(),
                });
            }
        }
    }

    for (index, transition) in version.transitions.iter_mut().enumerate() {
        transition.index = index;
    }
    Ok(())
}

/// Resolve the `ANY` exclusion set for a version.
///
/// The policy list is validated against the active version only; retained
/// generations ignore names they no longer have.
fn wildcard_excludes(
    version: &FsmVersion,
    policy: &Policy,
    is_active: bool,
) -> Result<BTreeSet<String>, ConfigError> {
    match &policy.any_source_excludes {
        Some(names) => {
            let mut excludes = BTreeSet::new();
            for name in names {
                if version.state(name).is_none() {
                    if is_active {
                        return Err(ConfigError::UnknownExcludedState { name: name.clone() });
                    }
                    continue;
                }
                excludes.insert(name.clone());
            }
            Ok(excludes)
        }
        None => Ok(version
            .states
            .iter()
            .filter(|s| s.is_terminal)
            .map(|s| s.name.clone())
            .collect()),
    }
}

/// Expand every `from: "ANY"` transition into explicit per-state edges.
/// Self-loops are always excluded; the exclusion set removes further
/// sources. Relative order of the expansion follows state declaration
/// order, keeping selection deterministic.
fn expand_wildcards(
    version: &mut FsmVersion,
    excludes: &BTreeSet<String>,
) -> Result<(), ConfigError> {
    let has_wildcard = version.transitions.iter().any(|t| t.from == ANY_SOURCE);
    if version.transitions.iter().any(|t| t.to == ANY_SOURCE) {
        return Err(ConfigError::WildcardTarget {
            version_id: version.id,
        });
    }
    if !has_wildcard {
        return Ok(());
    }

    let state_names: Vec<String> = version.states.iter().map(|s| s.name.clone()).collect();
    let mut expanded = Vec::with_capacity(version.transitions.len());
    for transition in version.transitions.drain(..) {
        if transition.from != ANY_SOURCE {
            expanded.push(transition);
            continue;
        }
        for name in &state_names {
            if *name == transition.to || excludes.contains(name) {
                continue;
            }
            let mut edge = transition.clone();
            edge.from = name.clone();
            expanded.push(edge);
        }
    }
    version.transitions = expanded;
    Ok(())
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal_doc() -> serde_json::Value {
        json!({
            "fsm": {
                "versions": [{
                    "id": 1,
                    "name": "v1",
                    "isActive": true,
                    "states": [
                        { "name": "NEW", "isInitial": true },
                        { "name": "ACTIVE_FREE" },
                        { "name": "BLOCKED", "isTerminal": true }
                    ],
                    "transitions": [
                        {
                            "from": "NEW", "to": "ACTIVE_FREE",
                            "triggerType": "EVENT", "triggerEvent": "BOT_START"
                        }
                    ]
                }]
            },
            "rules": [],
            "overlays": []
        })
    }

    #[test]
    fn loads_minimal_snapshot() {
        let snap = Snapshot::from_json(minimal_doc()).unwrap();
        assert_eq!(snap.version.id, 1);
        assert_eq!(snap.version.initial_state().unwrap().name, "NEW");
        assert_eq!(snap.version.transitions.len(), 1);
        assert_eq!(snap.version.transitions[0].index, 0);
    }

    #[test]
    fn rejects_no_active_version() {
        let mut doc = minimal_doc();
        doc["fsm"]["versions"][0]["isActive"] = json!(false);
        assert_eq!(
            Snapshot::from_json(doc).unwrap_err(),
            ConfigError::NoActiveVersion
        );
    }

    #[test]
    fn rejects_multiple_active_versions() {
        let mut doc = minimal_doc();
        let mut second = doc["fsm"]["versions"][0].clone();
        second["id"] = json!(2);
        doc["fsm"]["versions"].as_array_mut().unwrap().push(second);
        assert_eq!(
            Snapshot::from_json(doc).unwrap_err(),
            ConfigError::MultipleActiveVersions { ids: vec![1, 2] }
        );
    }

    #[test]
    fn rejects_duplicate_state() {
        let mut doc = minimal_doc();
        doc["fsm"]["versions"][0]["states"]
            .as_array_mut()
            .unwrap()
            .push(json!({ "name": "NEW" }));
        assert_eq!(
            Snapshot::from_json(doc).unwrap_err(),
            ConfigError::DuplicateState {
                version_id: 1,
                name: "NEW".into()
            }
        );
    }

    #[test]
    fn rejects_missing_initial_state() {
        let mut doc = minimal_doc();
        doc["fsm"]["versions"][0]["states"][0]["isInitial"] = json!(false);
        assert_eq!(
            Snapshot::from_json(doc).unwrap_err(),
            ConfigError::MissingInitialState { version_id: 1 }
        );
    }

    #[test]
    fn rejects_dangling_transition_target() {
        let mut doc = minimal_doc();
        doc["fsm"]["versions"][0]["transitions"][0]["to"] = json!("NOWHERE");
        assert_eq!(
            Snapshot::from_json(doc).unwrap_err(),
            ConfigError::UnknownState {
                version_id: 1,
                name: "NOWHERE".into()
            }
        );
    }

    #[test]
    fn rejects_duplicate_rule_code() {
        let mut doc = minimal_doc();
        doc["rules"] = json!([
            { "code": "R-1", "trigger": "TIME" },
            { "code": "R-1", "trigger": "TIME" }
        ]);
        assert_eq!(
            Snapshot::from_json(doc).unwrap_err(),
            ConfigError::DuplicateRuleCode { code: "R-1".into() }
        );
    }

    #[test]
    fn rejects_wildcard_target() {
        let mut doc = minimal_doc();
        doc["fsm"]["versions"][0]["transitions"]
            .as_array_mut()
            .unwrap()
            .push(json!({
                "from": "NEW", "to": "ANY",
                "triggerType": "EVENT", "triggerEvent": "BOT_START"
            }));
        assert_eq!(
            Snapshot::from_json(doc).unwrap_err(),
            ConfigError::WildcardTarget { version_id: 1 }
        );
    }

    #[test]
    fn wildcard_expands_excluding_self_and_terminal() {
        let mut doc = minimal_doc();
        doc["fsm"]["versions"][0]["transitions"]
            .as_array_mut()
            .unwrap()
            .push(json!({
                "from": "ANY", "to": "ACTIVE_FREE",
                "triggerType": "EVENT", "triggerEvent": "PAYMENT_COMPLETED",
                "priority": 100
            }));
        let snap = Snapshot::from_json(doc).unwrap();
        let expanded: Vec<&str> = snap
            .version
            .transitions
            .iter()
            .filter(|t| t.priority == 100)
            .map(|t| t.from.as_str())
            .collect();
        // Self-loop (ACTIVE_FREE) and the terminal BLOCKED state are skipped.
        assert_eq!(expanded, vec!["NEW"]);
    }

    #[test]
    fn wildcard_exclusion_policy_overrides_terminal_default() {
        let mut doc = minimal_doc();
        doc["fsm"]["versions"][0]["transitions"]
            .as_array_mut()
            .unwrap()
            .push(json!({
                "from": "ANY", "to": "ACTIVE_FREE",
                "triggerType": "EVENT", "triggerEvent": "PAYMENT_COMPLETED",
                "priority": 100
            }));
        doc["policy"] = json!({ "anySourceExcludes": [] });
        let snap = Snapshot::from_json(doc).unwrap();
        let expanded: Vec<&str> = snap
            .version
            .transitions
            .iter()
            .filter(|t| t.priority == 100)
            .map(|t| t.from.as_str())
            .collect();
        // Empty exclusion list opts every non-self state in, BLOCKED included.
        assert_eq!(expanded, vec!["NEW", "BLOCKED"]);
    }

    #[test]
    fn wildcard_exclusion_policy_unknown_state_rejected() {
        let mut doc = minimal_doc();
        doc["policy"] = json!({ "anySourceExcludes": ["GHOST"] });
        assert_eq!(
            Snapshot::from_json(doc).unwrap_err(),
            ConfigError::UnknownExcludedState {
                name: "GHOST".into()
            }
        );
    }

    #[test]
    fn transition_indices_are_stable_load_order() {
        let mut doc = minimal_doc();
        doc["fsm"]["versions"][0]["transitions"]
            .as_array_mut()
            .unwrap()
            .push(json!({
                "from": "ACTIVE_FREE", "to": "NEW",
                "triggerType": "EVENT", "triggerEvent": "BOT_START"
            }));
        let snap = Snapshot::from_json(doc).unwrap();
        let indices: Vec<usize> = snap.version.transitions.iter().map(|t| t.index).collect();
        assert_eq!(indices, vec![0, 1]);
    }

    #[test]
    fn rules_for_trigger_orders_by_priority_then_code() {
        let mut doc = minimal_doc();
        doc["rules"] = json!([
            { "code": "B", "trigger": "TIME", "priority": 50 },
            { "code": "A", "trigger": "TIME", "priority": 50 },
            { "code": "C", "trigger": "TIME", "priority": 200 },
            { "code": "D", "trigger": "TIME", "priority": 100, "enabled": false },
            { "code": "E", "trigger": "STATE_CHANGED", "priority": 999 }
        ]);
        let snap = Snapshot::from_json(doc).unwrap();
        let codes: Vec<&str> = snap
            .rules_for_trigger(RuleTrigger::Time)
            .iter()
            .map(|r| r.code.as_str())
            .collect();
        assert_eq!(codes, vec!["C", "A", "B"]);
    }

    #[test]
    fn overlay_for_type_prefers_priority_then_code() {
        let mut doc = minimal_doc();
        doc["overlays"] = json!([
            { "code": "ONBOARDING_STEP_1", "type": "ONBOARDING", "priority": 20 },
            { "code": "ONBOARDING_OFFER", "type": "ONBOARDING", "priority": 20 },
            { "code": "OLD", "type": "ONBOARDING", "priority": 5 },
            { "code": "DISABLED", "type": "ONBOARDING", "priority": 99, "isActive": false }
        ]);
        let snap = Snapshot::from_json(doc).unwrap();
        assert_eq!(
            snap.overlay_for_type("ONBOARDING").unwrap().code,
            "ONBOARDING_OFFER"
        );
        assert!(snap.overlay_for_type("TRIPWIRE").is_none());
    }

    #[test]
    fn version_by_id_finds_retained_generation() {
        let mut doc = minimal_doc();
        let mut old = doc["fsm"]["versions"][0].clone();
        old["id"] = json!(0);
        old["isActive"] = json!(false);
        doc["fsm"]["versions"].as_array_mut().unwrap().push(old);
        let snap = Snapshot::from_json(doc).unwrap();
        assert_eq!(snap.version_by_id(0).unwrap().id, 0);
        assert_eq!(snap.version_by_id(1).unwrap().id, 1);
        assert!(snap.version_by_id(7).is_none());
    }
}
