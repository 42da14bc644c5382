use thiserror::Error;

/// Failures surfaced by the interaction engine.
///
/// Commands return these as values; background event processing logs them
/// and keeps going. Nothing here is allowed to take the process down.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A command was invoked before [`Character::initialize`] succeeded.
    ///
    /// [`Character::initialize`]: crate::Character::initialize
    #[error("character has not been initialized")]
    NotInitialized,

    /// A conversation is already active and the request did not ask for
    /// restart semantics.
    #[error("conversation {0} is already active")]
    AlreadyActive(String),

    /// An id did not resolve to loadable content or a known asset.
    #[error("unknown {kind}: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A raw event could not be normalized into a trigger. Logged and
    /// dropped by callers, never fatal.
    #[error("malformed {source_kind} event: {reason}")]
    Normalization {
        source_kind: &'static str,
        reason: String,
    },

    /// A collaborator (speech, audio, storage) reported a failure.
    #[error("{operation} failed: {cause}")]
    Collaborator {
        operation: &'static str,
        cause: anyhow::Error,
    },

    /// The command's cancellation token fired at a honored suspension point.
    #[error("operation cancelled")]
    Cancelled,

    /// Any command after [`Character::dispose`] fails fast with this.
    ///
    /// [`Character::dispose`]: crate::Character::dispose
    #[error("character has been disposed")]
    Disposed,
}

impl EngineError {
    pub(crate) fn collaborator(operation: &'static str, cause: anyhow::Error) -> Self {
        Self::Collaborator { operation, cause }
    }
}
