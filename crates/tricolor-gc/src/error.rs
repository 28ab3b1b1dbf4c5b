//! Error types returned by the collector.

use thiserror::Error;

use crate::gc::CyclePhase;
use crate::object::ObjectId;

/// Failure reported by an embedder's root enumeration callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("root enumeration failed: {message}")]
pub struct RootError {
    message: String,
}

impl RootError {
    /// Create a root error with a human readable reason.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The reason given by the embedder.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors produced by heap and collector operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GcError {
    /// A Black object was found referencing a White object when marking
    /// finished. Some mutation bypassed the write barrier. The cycle was
    /// aborted and nothing was swept.
    #[error("tri-color invariant violated: black {from} references white {to}")]
    InvariantViolation {
        /// The Black holder.
        from: ObjectId,
        /// The White target.
        to: ObjectId,
    },

    /// The heap is at capacity even after a full collection.
    #[error("heap exhausted: {capacity} objects live after collection")]
    OutOfMemory {
        /// Configured object capacity.
        capacity: usize,
    },

    /// The root enumeration callback failed; the cycle was abandoned.
    #[error(transparent)]
    RootEnumeration(#[from] RootError),

    /// The handle refers to an object that has been reclaimed (or never
    /// existed).
    #[error("dangling reference to {0}")]
    DanglingReference(ObjectId),

    /// A field index past the object's field count.
    #[error("field {field} out of bounds for {object} with {len} fields")]
    FieldOutOfBounds {
        /// Object being accessed.
        object: ObjectId,
        /// Requested field.
        field: usize,
        /// Number of fields the object has.
        len: usize,
    },

    /// A step of the cycle was driven while the collector was in another phase.
    #[error("collector is in phase {actual:?}, expected {expected:?}")]
    InvalidPhase {
        /// Phase the operation requires.
        expected: CyclePhase,
        /// Phase the collector was in.
        actual: CyclePhase,
    },

    /// An asynchronous collection was requested but no background collector
    /// thread is running.
    #[error("no background collector thread is running")]
    CollectorNotRunning,

    /// The operating system refused to start the background collector thread.
    #[error("failed to spawn collector thread: {0}")]
    SpawnFailed(String),

    /// The configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Result alias used throughout the crate.
pub type Result<T, E = GcError> = std::result::Result<T, E>;
