//! Loads a production-shaped snapshot document end to end: a two-version
//! lifecycle FSM, the tripwire/bonus/referral rule set, and the overlay
//! registry.

use cadence_core::{
    ActionKind, ConditionOperator, EventTag, RuleTrigger, Snapshot, TransitionTrigger,
};

fn product_snapshot() -> serde_json::Value {
    serde_json::json!({
        "fsm": {
            "versions": [
                {
                    "id": 1,
                    "name": "v1.0.0 Lifecycle FSM",
                    "isActive": false,
                    "states": [
                        { "name": "NEW", "isInitial": true },
                        { "name": "ACTIVE_FREE" },
                        { "name": "CHURNED", "isTerminal": true }
                    ],
                    "transitions": [
                        {
                            "from": "NEW", "to": "ACTIVE_FREE",
                            "triggerType": "EVENT", "triggerEvent": "BOT_START"
                        }
                    ]
                },
                {
                    "id": 2,
                    "name": "v2.0.0 Lifecycle FSM",
                    "isActive": true,
                    "states": [
                        { "name": "NEW", "isInitial": true, "description": "User just started" },
                        { "name": "ACTIVATING", "description": "Made 1 generation" },
                        { "name": "ACTIVE_FREE", "description": "Made 2+ generations" },
                        { "name": "PAYWALL", "description": "Out of free credits" },
                        { "name": "PAID_ACTIVE", "description": "Bought credits" },
                        { "name": "INACTIVE", "description": "Silent for > 48h" },
                        { "name": "CHURNED", "isTerminal": true },
                        { "name": "BLOCKED", "isTerminal": true }
                    ],
                    "transitions": [
                        {
                            "from": "NEW", "to": "ACTIVATING",
                            "triggerType": "EVENT", "triggerEvent": "GENERATION_COMPLETED",
                            "conditions": [
                                { "field": "total_generations", "operator": "GTE", "value": "1" }
                            ],
                            "actions": [
                                { "type": "TAG_USER", "params": { "tag": "first_gen" }, "order": 0 }
                            ]
                        },
                        {
                            "from": "ACTIVATING", "to": "ACTIVE_FREE",
                            "triggerType": "EVENT", "triggerEvent": "GENERATION_COMPLETED",
                            "conditions": [
                                { "field": "total_generations", "operator": "GTE", "value": "2" }
                            ]
                        },
                        {
                            "from": "ACTIVE_FREE", "to": "PAYWALL",
                            "triggerType": "EVENT", "triggerEvent": "INSUFFICIENT_CREDITS",
                            "priority": 10
                        },
                        {
                            "from": "ANY", "to": "PAID_ACTIVE",
                            "triggerType": "EVENT", "triggerEvent": "PAYMENT_COMPLETED",
                            "priority": 100
                        },
                        {
                            "from": "INACTIVE", "to": "CHURNED",
                            "triggerType": "TIME", "timeoutMinutes": 43200
                        }
                    ]
                }
            ]
        },
        "rules": [
            {
                "code": "TW-1",
                "trigger": "CREDITS_CHANGED",
                "priority": 100,
                "description": "Tripwire eligibility check",
                "conditions": [
                    { "field": "lifecycle", "operator": "EQUALS", "value": "PAYWALL" },
                    { "field": "totalPayments", "operator": "EQUALS", "value": "0" },
                    { "field": "overlay.TRIPWIRE", "operator": "NOT_EXISTS" }
                ],
                "actions": [
                    {
                        "type": "ACTIVATE_OVERLAY",
                        "params": { "type": "TRIPWIRE", "ttlHours": 24 }
                    }
                ]
            },
            {
                "code": "TW-4",
                "trigger": "PAYMENT_COMPLETED",
                "priority": 100,
                "description": "Tripwire consumption",
                "conditions": [
                    { "field": "overlay.TRIPWIRE", "operator": "EXISTS" }
                ],
                "actions": [
                    { "type": "DEACTIVATE_OVERLAY", "params": { "type": "TRIPWIRE" } }
                ]
            },
            {
                "code": "B-3",
                "trigger": "GENERATION_REQUESTED",
                "priority": 100,
                "description": "Burn bonus credits first",
                "conditions": [
                    { "field": "bonusCredits", "operator": "GT", "value": "0" }
                ],
                "actions": [
                    { "type": "NO_ACTION", "params": { "strategy": "burn_first" } }
                ]
            },
            {
                "code": "SO-1",
                "trigger": "ADMIN_EVENT",
                "priority": 50,
                "description": "Admin push offer",
                "conditions": [
                    { "field": "event.subType", "operator": "EQUALS", "value": "PUSH_OFFER" },
                    { "field": "lifecycle", "operator": "IN", "value": "PAYWALL,INACTIVE" }
                ],
                "actions": [
                    { "type": "ACTIVATE_OVERLAY", "params": { "type": "SPECIAL_OFFER" } }
                ]
            }
        ],
        "overlays": [
            {
                "code": "TRIPWIRE_DEFAULT",
                "type": "TRIPWIRE",
                "priority": 10,
                "payload": {
                    "message": { "text": "{{packageName}}: {{credits}} credits for {{price}}" },
                    "buttons": [ { "text": "Buy now", "action": "PAY" } ]
                },
                "ttlSeconds": 86400,
                "cooldownSeconds": 3600
            },
            {
                "code": "BONUS_DEFAULT",
                "type": "BONUS",
                "priority": 5,
                "payload": {
                    "message": { "text": "You received {{amount}} credits for {{hours}} hours" }
                },
                "ttlSeconds": 21600
            },
            {
                "code": "PAYMENT_RETRY",
                "type": "INFO",
                "priority": 100,
                "payload": { "message": { "text": "Payment failed, try again" } },
                "ttlSeconds": 3600,
                "maxImpressions": 1
            }
        ],
        "policy": { "anySourceExcludes": ["BLOCKED", "CHURNED"] }
    })
}

#[test]
fn loads_product_shaped_snapshot() {
    let snap = Snapshot::from_json(product_snapshot()).unwrap();

    assert_eq!(snap.version.id, 2);
    assert_eq!(snap.retained.len(), 1);
    assert_eq!(snap.retained[0].id, 1);
    assert_eq!(snap.version.states.len(), 8);
    assert_eq!(snap.rules.len(), 4);
    assert_eq!(snap.overlays.len(), 3);
}

#[test]
fn payment_wildcard_expands_to_non_excluded_states() {
    let snap = Snapshot::from_json(product_snapshot()).unwrap();
    let payment_sources: Vec<&str> = snap
        .version
        .transitions
        .iter()
        .filter(|t| {
            t.trigger
                == TransitionTrigger::Event {
                    event: EventTag::PaymentCompleted,
                }
        })
        .map(|t| t.from.as_str())
        .collect();
    // PAID_ACTIVE itself, BLOCKED and CHURNED are excluded.
    assert_eq!(
        payment_sources,
        vec!["NEW", "ACTIVATING", "ACTIVE_FREE", "PAYWALL", "INACTIVE"]
    );
}

#[test]
fn retained_version_stays_evaluable() {
    let snap = Snapshot::from_json(product_snapshot()).unwrap();
    let v1 = snap.version_by_id(1).unwrap();
    assert_eq!(v1.initial_state().unwrap().name, "NEW");
    assert_eq!(v1.transitions.len(), 1);
}

#[test]
fn rule_set_round_trips_operators_and_actions() {
    let snap = Snapshot::from_json(product_snapshot()).unwrap();
    let tw1 = snap.rules.iter().find(|r| r.code == "TW-1").unwrap();
    assert_eq!(tw1.trigger, RuleTrigger::Event(EventTag::CreditsChanged));
    assert_eq!(tw1.conditions[2].operator, ConditionOperator::NotExists);
    assert_eq!(tw1.actions[0].kind, ActionKind::ActivateOverlay);
    assert_eq!(tw1.actions[0].params["ttlHours"], 24);

    let so1 = snap.rules.iter().find(|r| r.code == "SO-1").unwrap();
    assert_eq!(so1.conditions[1].operator, ConditionOperator::In);
}

#[test]
fn time_transition_survives_load() {
    let snap = Snapshot::from_json(product_snapshot()).unwrap();
    let churn = snap
        .version
        .transitions
        .iter()
        .find(|t| t.to == "CHURNED")
        .unwrap();
    assert_eq!(churn.trigger, TransitionTrigger::Time { minutes: 43200 });
}
