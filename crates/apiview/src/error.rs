use thiserror::Error;

use crate::node::NodeId;

/// Errors raised while building a [`ClassesDatabase`](crate::ClassesDatabase).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DatabaseError {
    #[error("Node {id} does not exist")]
    UnknownNode { id: NodeId },

    #[error("Node {id} is a {kind} and cannot own children")]
    NotAContainer { id: NodeId, kind: &'static str },
}

/// Result type for database operations
pub type Result<T> = std::result::Result<T, DatabaseError>;
