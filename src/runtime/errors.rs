//! Error types for the resolution runtime

use super::property::PropKey;

/// Error type for property registry operations
#[derive(Debug, thiserror::Error)]
pub enum PropError {
    #[error("Property {key:?}@{chan} is already registered")]
    Duplicate { key: PropKey, chan: usize },

    #[error("Property {key:?}@{chan} is not registered")]
    NotFound { key: PropKey, chan: usize },

    #[error("Property {key:?}@{chan} holds {stored}, accessed as {requested}")]
    TypeMismatch {
        key: PropKey,
        chan: usize,
        stored: &'static str,
        requested: &'static str,
    },
}

/// Error type for the convergence loop
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// Round cap exceeded: the resolver graph is cyclic or non-idempotent.
    /// The engine's property state is unreliable after this error; callers
    /// should tear down or reset, not continue.
    #[error("Resolution did not converge after {rounds} rounds")]
    Divergence { rounds: usize },

    #[error(transparent)]
    Prop(#[from] PropError),
}

/// Error type for streaming-node operations
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Channel {chan} out of range (node has {num_chans} channels)")]
    OutOfRange { chan: usize, num_chans: usize },

    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

impl From<PropError> for StreamError {
    fn from(e: PropError) -> Self {
        StreamError::Resolve(ResolveError::Prop(e))
    }
}
