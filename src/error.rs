//! Error types shared by the diagram model, the interaction controller and
//! the routing engine.

use std::fmt;
use thiserror::Error;

/// The kind of graph entity an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Node,
    Port,
    Link,
    Point,
    Label,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Node => "node",
            Self::Port => "port",
            Self::Link => "link",
            Self::Point => "point",
            Self::Label => "label",
        };
        f.write_str(name)
    }
}

/// Result of a connection check between two ports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// The connection is allowed
    Valid,
    /// The connection is refused for the given reason
    Invalid(ValidationError),
}

impl ValidationResult {
    /// Check if the result is valid
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }

    /// Combine two results (AND logic): returns first error if any
    pub fn and(self, other: ValidationResult) -> ValidationResult {
        match self {
            ValidationResult::Valid => other,
            invalid => invalid,
        }
    }

    /// Convert into a `Result`, mapping refusals to [`DiagramError::CapabilityRejected`].
    pub fn into_result(self) -> Result<()> {
        match self {
            ValidationResult::Valid => Ok(()),
            ValidationResult::Invalid(reason) => Err(DiagramError::CapabilityRejected(reason)),
        }
    }
}

/// Reasons why a port refuses a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Cannot link a port to itself
    SamePort,
    /// Cannot link ports on the same node
    SameNode,
    /// Both ports are inputs or both are outputs
    IncompatibleDirection,
    /// A link between these ports already exists
    DuplicateLink,
    /// Port has reached its maximum number of links
    MaxLinksReached { port: String, max: usize },
    /// Port type tags are incompatible
    TypeMismatch { expected: String, found: String },
    /// Custom rule failure
    Custom(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SamePort => write!(f, "Cannot link port to itself"),
            Self::SameNode => write!(f, "Cannot link ports on same node"),
            Self::IncompatibleDirection => write!(f, "Must connect input to output"),
            Self::DuplicateLink => write!(f, "Link already exists"),
            Self::MaxLinksReached { port, max } => {
                write!(f, "Port {} has reached max {} links", port, max)
            }
            Self::TypeMismatch { expected, found } => {
                write!(f, "Type mismatch: expected {}, found {}", expected, found)
            }
            Self::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

/// Errors surfaced by the engine.
///
/// `NotFound` is what the interaction layer sees for stale element references
/// and answers by aborting the gesture. `CapabilityRejected` and
/// `DuplicateLink` are normally absorbed by gesture commit (the offending link
/// is discarded). `InvalidFactory` is a configuration bug and is always
/// propagated.
#[derive(Debug, Error)]
pub enum DiagramError {
    #[error("{kind} `{id}` not found")]
    NotFound { kind: EntityKind, id: String },

    #[error("connection rejected: {0}")]
    CapabilityRejected(ValidationError),

    #[error("a link between `{from}` and `{to}` already exists")]
    DuplicateLink { from: String, to: String },

    #[error("no factory registered for {kind} type `{type_tag}`")]
    InvalidFactory { kind: EntityKind, type_tag: String },

    #[error("route computation was superseded by a newer request")]
    RouteCancelled,

    #[error("no route between the link endpoints")]
    NoRoute,
}

pub(crate) fn not_found(kind: EntityKind, id: impl fmt::Display) -> DiagramError {
    DiagramError::NotFound {
        kind,
        id: id.to_string(),
    }
}

impl DiagramError {
    /// True for lookup misses, which callers treat as stale references.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, DiagramError>;
