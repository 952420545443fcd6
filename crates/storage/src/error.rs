/// All errors that can be returned by a UserStateStore implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Compare-and-set conflict -- another writer updated the user's FSM
    /// record concurrently. The expected revision was not found.
    #[error("concurrent conflict on user {user_id}: expected revision {expected_revision}")]
    ConcurrentConflict {
        user_id: String,
        expected_revision: i64,
    },

    /// No FSM record exists for the given user.
    #[error("no FSM state for user {user_id}")]
    FsmStateNotFound { user_id: String },

    /// An FSM record for this user already exists.
    #[error("FSM state already initialized for user {user_id}")]
    AlreadyInitialized { user_id: String },

    /// A backend-specific storage error (connection, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}
