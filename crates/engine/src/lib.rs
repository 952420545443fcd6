//! cadence-engine: the decision engine behind the lifecycle product.
//!
//! Three cooperating pieces share one evaluation primitive (grouped boolean
//! conditions over a context map):
//!
//! - the **FSM engine** advances a per-user lifecycle state machine on
//!   incoming events (and time-in-state, via the scheduler);
//! - the **rule engine** matches an independent, prioritized rule set on the
//!   same trigger vocabulary plus synthetic triggers (`STATE_CHANGED`,
//!   `OVERLAY_ACTIVATED`, `OVERLAY_EXPIRED`, `TIME`);
//! - the **overlay manager** owns activation, expiry, cooldown, and
//!   impression caps for transient in-product notifications.
//!
//! [`Engine`] orchestrates them under per-user mutual exclusion; the
//! [`scheduler`] drives periodic TIME evaluation and expiry sweeps.

pub mod actions;
pub mod clock;
pub mod collaborators;
pub mod condition;
pub mod context;
pub mod engine;
pub mod fsm;
pub mod overlay;
pub mod rules;
pub mod scheduler;

pub use actions::{ActionExecutor, ActionOutcome, ActionStatus};
pub use clock::{Clock, ManualClock, SystemClock};
pub use collaborators::{
    AuditLog, CollaboratorError, CreditLedger, Notifier, RecordingAuditLog, RecordingLedger,
    RecordingNotifier, RecordingTagStore, TagStore,
};
pub use context::{Context, Value};
pub use engine::{
    Collaborators, Engine, EngineConfig, EngineError, EventOutcome, RuleOutcome, SweepReport,
    TransitionRecord,
};
pub use overlay::{Activation, ActivationRejection, OverlayManager};
