//! cadence-core: configuration model for the cadence decision engine.
//!
//! The engine is entirely config-driven: lifecycle state machines, the rule
//! set, and the overlay registry are immutable value objects loaded from a
//! single JSON snapshot document. This crate owns those types, the snapshot
//! loader, and load-time validation.
//!
//! # Public API
//!
//! - [`Snapshot`] -- a validated configuration generation
//! - [`Snapshot::from_str`] / [`Snapshot::from_json`] -- all-or-nothing load
//! - [`ConfigError`] -- load-time validation failures
//! - Entity types: [`FsmVersion`], [`FsmState`], [`FsmTransition`],
//!   [`Condition`], [`ActionSpec`], [`Rule`], [`Overlay`]
//! - Vocabulary: [`EventTag`], [`RuleTrigger`], [`ConditionOperator`],
//!   [`ActionKind`]

pub mod error;
pub mod model;
pub mod snapshot;

pub use error::ConfigError;
pub use model::{
    ActionKind, ActionSpec, Condition, ConditionOperator, EventTag, FsmState, FsmTransition,
    FsmVersion, Policy, Rule, RuleTrigger, TransitionTrigger,
};
pub use snapshot::{Snapshot, ANY_SOURCE};
