/// All errors that can be raised while loading a configuration snapshot.
///
/// Configuration is rejected wholesale: the first validation failure aborts
/// the load and no partially-validated snapshot is ever handed to the
/// engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The snapshot document is not valid JSON or does not match the
    /// expected document shape.
    #[error("malformed snapshot document: {0}")]
    Malformed(String),

    /// No FSM version in the snapshot is flagged active.
    #[error("no active FSM version in snapshot")]
    NoActiveVersion,

    /// More than one FSM version is flagged active.
    #[error("multiple active FSM versions: {ids:?}")]
    MultipleActiveVersions { ids: Vec<u32> },

    /// Two states in the same version share a name.
    #[error("version {version_id}: duplicate state '{name}'")]
    DuplicateState { version_id: u32, name: String },

    /// A version declares no initial state.
    #[error("version {version_id}: no initial state declared")]
    MissingInitialState { version_id: u32 },

    /// A version declares more than one initial state.
    #[error("version {version_id}: multiple initial states: {names:?}")]
    MultipleInitialStates { version_id: u32, names: Vec<String> },

    /// A transition references a state name that does not exist in its
    /// version.
    #[error("version {version_id}: transition references unknown state '{name}'")]
    UnknownState { version_id: u32, name: String },

    /// The `ANY` wildcard is only legal as a transition source.
    #[error("version {version_id}: 'ANY' is not a valid transition target")]
    WildcardTarget { version_id: u32 },

    /// Two rules share a code.
    #[error("duplicate rule code '{code}'")]
    DuplicateRuleCode { code: String },

    /// Two overlay templates share a code.
    #[error("duplicate overlay code '{code}'")]
    DuplicateOverlayCode { code: String },

    /// The wildcard-exclusion policy names a state the active version does
    /// not have.
    #[error("policy excludes unknown state '{name}'")]
    UnknownExcludedState { name: String },
}
