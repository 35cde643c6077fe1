//! Error types for the modus runtime
//!
//! Every failure is a recoverable value. The only conditions that abort
//! are internal invariant violations (a slot count going negative), which
//! indicate a defect in the runtime itself.

use modus_types::{Address, ArenaId, ValueShape};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level runtime error
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    /// Dereference of a tombstoned, torn-down or foreign-arena slot
    #[error("dangling address {address}")]
    DanglingAddress { address: Address },

    /// A strong address copied into an uncounted location
    #[error("uncounted alias of {address}: use a scope reference or a weak reference")]
    UncountedAlias { address: Address },

    /// A weak reference pointing outside the holder's arena
    #[error("address {address} cannot be referenced from {arena}")]
    CrossArenaReference { address: Address, arena: ArenaId },

    /// State does not satisfy a declared shape
    #[error("{capability} expects `{key}` to be {expected}, found {}", describe_found(.found))]
    ConceptShapeMismatch {
        capability: String,
        key: String,
        expected: ValueShape,
        found: Option<ValueShape>,
    },

    /// The same name is provided by two active capabilities
    #[error("`{name}` is provided by both {first} and {second}")]
    AmbiguousCapability {
        name: String,
        first: String,
        second: String,
    },

    #[error("capability {0} is already present")]
    AlreadyPresent(String),

    #[error("capability {0} is not present")]
    NotPresent(String),

    #[error("illegal transition from {from} to {to}")]
    IllegalTransition { from: String, to: String },

    #[error("capability {capability} denied by {context}")]
    PermissionDenied { capability: String, context: String },

    #[error("negotiation rejected: {reason}")]
    NegotiationRejected { reason: String },

    /// An atomic group operation was rolled back
    #[error("group {group} rolled back at {member}: {source}")]
    GroupApplicationFailed {
        group: String,
        member: String,
        #[source]
        source: Box<RuntimeError>,
    },

    #[error("unknown arena {0}")]
    UnknownArena(ArenaId),

    #[error("{0} has no active scope")]
    NoActiveScope(ArenaId),

    #[error("scope mismatch in {arena}: innermost is {innermost}, asked to exit {requested}")]
    ScopeMismatch {
        arena: ArenaId,
        innermost: String,
        requested: String,
    },

    #[error("slot {0} does not hold an entity")]
    NotAnEntity(Address),

    #[error("slot {0} holds an entity, not a plain value")]
    NotAValue(Address),

    #[error("unknown capability {0}")]
    UnknownCapability(String),

    #[error("unknown group {0}")]
    UnknownGroup(String),

    #[error("no active capability provides method {0}")]
    UnknownMethod(String),

    #[error("unknown state machine {0}")]
    UnknownStateMachine(String),

    #[error("entity has no state machine")]
    NoStateMachine,

    #[error("{capability} hook failed: {reason}")]
    HookFailed { capability: String, reason: String },

    #[error("method {method} failed: {reason}")]
    MethodFailed { method: String, reason: String },

    #[error("{arena} is full ({limit} slots)")]
    ArenaExhausted { arena: ArenaId, limit: usize },

    #[error("no arena ids left")]
    ArenaIdsExhausted,

    #[error("context stack deeper than {limit}")]
    ContextDepthExceeded { limit: usize },

    #[error("invalid definition: {0}")]
    InvalidDefinition(String),

    #[error("invalid capability expression: {0}")]
    InvalidExpression(String),
}

/// Flat error taxonomy for the surface layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    DanglingAddress,
    UncountedAlias,
    ConceptShapeMismatch,
    AmbiguousCapability,
    AlreadyPresent,
    NotPresent,
    IllegalTransition,
    PermissionDenied,
    NegotiationRejected,
    GroupApplicationFailed,
    Lookup,
    Hook,
    Limit,
    Definition,
}

impl RuntimeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RuntimeError::DanglingAddress { .. } => ErrorKind::DanglingAddress,
            RuntimeError::UncountedAlias { .. } | RuntimeError::CrossArenaReference { .. } => {
                ErrorKind::UncountedAlias
            }
            RuntimeError::ConceptShapeMismatch { .. } => ErrorKind::ConceptShapeMismatch,
            RuntimeError::AmbiguousCapability { .. } => ErrorKind::AmbiguousCapability,
            RuntimeError::AlreadyPresent(_) => ErrorKind::AlreadyPresent,
            RuntimeError::NotPresent(_) => ErrorKind::NotPresent,
            RuntimeError::IllegalTransition { .. } => ErrorKind::IllegalTransition,
            RuntimeError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            RuntimeError::NegotiationRejected { .. } => ErrorKind::NegotiationRejected,
            RuntimeError::GroupApplicationFailed { .. } => ErrorKind::GroupApplicationFailed,
            RuntimeError::UnknownArena(_)
            | RuntimeError::NoActiveScope(_)
            | RuntimeError::ScopeMismatch { .. }
            | RuntimeError::NotAnEntity(_)
            | RuntimeError::NotAValue(_)
            | RuntimeError::UnknownCapability(_)
            | RuntimeError::UnknownGroup(_)
            | RuntimeError::UnknownMethod(_)
            | RuntimeError::UnknownStateMachine(_)
            | RuntimeError::NoStateMachine => ErrorKind::Lookup,
            RuntimeError::HookFailed { .. } | RuntimeError::MethodFailed { .. } => ErrorKind::Hook,
            RuntimeError::ArenaExhausted { .. }
            | RuntimeError::ArenaIdsExhausted
            | RuntimeError::ContextDepthExceeded { .. } => ErrorKind::Limit,
            RuntimeError::InvalidDefinition(_) | RuntimeError::InvalidExpression(_) => {
                ErrorKind::Definition
            }
        }
    }

    /// The innermost cause, looking through group rollbacks
    pub fn root_cause(&self) -> &RuntimeError {
        match self {
            RuntimeError::GroupApplicationFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

fn describe_found(found: &Option<ValueShape>) -> String {
    match found {
        Some(shape) => shape.to_string(),
        None => "nothing".to_string(),
    }
}

/// Result type using RuntimeError
pub type Result<T> = std::result::Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_unwraps_groups() {
        let inner = RuntimeError::PermissionDenied {
            capability: "Premium".into(),
            context: "sandbox".into(),
        };
        let outer = RuntimeError::GroupApplicationFailed {
            group: "Pro".into(),
            member: "Premium".into(),
            source: Box::new(inner.clone()),
        };
        assert_eq!(outer.kind(), ErrorKind::GroupApplicationFailed);
        assert_eq!(outer.root_cause(), &inner);
    }

    #[test]
    fn test_shape_mismatch_message() {
        let err = RuntimeError::ConceptShapeMismatch {
            capability: "Counter".into(),
            key: "count".into(),
            expected: ValueShape::Int,
            found: None,
        };
        assert_eq!(err.to_string(), "Counter expects `count` to be int, found nothing");
    }
}
