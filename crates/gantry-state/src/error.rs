//! Error types for the gantry stores.

use thiserror::Error;

/// Result type alias for store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("stack exists")]
    StackExists,

    #[error("stack does not exist")]
    StackMissing,

    #[error("parent stack {0} does not exist")]
    ParentMissing(String),

    #[error("stack parent cycle through {0}")]
    ParentCycle(String),

    #[error("there are stacks depending on {stack}; remove them first or force deletion:\n{children}")]
    DependantStacks { stack: String, children: String },

    #[error("stack state does not exist")]
    StackStateMissing,

    #[error("orphan stack {0}")]
    OrphanStack(String),

    #[error("user '{0}' already exists")]
    UserExists(String),

    #[error("user '{0}' does not exist")]
    UserMissing(String),

    #[error("unsupported storage {0}")]
    UnsupportedStorage(String),

    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stack document error: {0}")]
    Document(String),

    #[error(transparent)]
    Model(#[from] gantry_core::CoreError),
}
