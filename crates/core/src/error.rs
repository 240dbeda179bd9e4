//! Error types for arbor.

use crate::tree::NodeId;
use crate::types::ResultType;
use alloc::string::String;
use core::fmt;

/// Result type alias for arbor operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Error types raised while evaluating or binding expressions.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// An evaluation entry point did not match the declared result type.
    TypeMismatch {
        expected: ResultType,
        got: ResultType,
    },
    /// A subexpression failed while being evaluated.
    ExpressionFault {
        message: String,
    },
    /// A notification or unbind arrived for a context that was never bound.
    UnboundContext {
        expression: String,
    },
    /// A required argument is missing or out of range.
    ArityOrConfiguration {
        message: String,
    },
    /// A node handle does not name a node of the tree.
    NodeNotFound {
        node: NodeId,
    },
    /// Invalid operation (double bind, nested revert, mutation while reverted).
    InvalidOperation {
        message: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::TypeMismatch { expected, got } => {
                write!(f, "Type mismatch: expected {:?}, got {:?}", expected, got)
            }
            Error::ExpressionFault { message } => {
                write!(f, "Expression fault: {}", message)
            }
            Error::UnboundContext { expression } => {
                write!(f, "Context not bound for expression: {}", expression)
            }
            Error::ArityOrConfiguration { message } => {
                write!(f, "Invalid argument: {}", message)
            }
            Error::NodeNotFound { node } => {
                write!(f, "Node not found: {}", node)
            }
            Error::InvalidOperation { message } => {
                write!(f, "Invalid operation: {}", message)
            }
        }
    }
}

impl Error {
    /// Creates a type mismatch error.
    pub fn type_mismatch(expected: ResultType, got: ResultType) -> Self {
        Error::TypeMismatch { expected, got }
    }

    /// Creates an expression fault.
    pub fn fault(message: impl Into<String>) -> Self {
        Error::ExpressionFault {
            message: message.into(),
        }
    }

    /// Creates an unbound context error.
    pub fn unbound(expression: impl Into<String>) -> Self {
        Error::UnboundContext {
            expression: expression.into(),
        }
    }

    /// Creates an arity or configuration error.
    pub fn arity(message: impl Into<String>) -> Self {
        Error::ArityOrConfiguration {
            message: message.into(),
        }
    }

    /// Creates a node not found error.
    pub fn node_not_found(node: NodeId) -> Self {
        Error::NodeNotFound { node }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Error::InvalidOperation {
            message: message.into(),
        }
    }
}
