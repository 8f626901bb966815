//! Error kinds shared across the event store and the subscription broker.
use thiserror::Error;

/// Errors raised by [`crate::EventStore`] and the subscription broker components.
#[derive(Debug, Error)]
pub enum Error {
    /// A [`crate::WriteCondition`] did not hold against the stream's current tip.
    #[error("unmet write condition on stream {category}/{stream}")]
    UnmetWriteCondition { category: String, stream: String },

    /// A query constraint was passed to a backend that does not know how to apply it.
    #[error("unsupported query constraint: {0}")]
    UnsupportedQuery(String),

    /// A [`crate::SubscriptionStateChange`] inside a changeset conflicted with current state.
    #[error("conflicting subscription state change for key ({0}, {1})")]
    ConflictingChange(String, String),

    /// A transient failure talking to the backing store; safe to retry.
    #[error("transient storage error: {0}")]
    TransientStorage(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),

    /// The operation was cancelled before completing.
    #[error("operation cancelled")]
    Cancelled,

    /// A named lock could not be acquired.
    #[error("failed to acquire lock {0:?}")]
    Lock(String),

    /// An operation referenced a subscriber key that isn't registered.
    #[error("no subscriber registered for key ({group}, {id})")]
    UnknownSubscriber { group: String, id: String },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
