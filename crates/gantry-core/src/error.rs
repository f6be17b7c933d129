//! Error types for the stack and application model.

use thiserror::Error;

/// Result type alias for model operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by validation, merging and variable resolution.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("no type")]
    NoType,

    #[error("no ID")]
    NoId,

    #[error("invalid CPU")]
    InvalidCpu,

    #[error("invalid mem")]
    InvalidMem,

    #[error("no launch command")]
    NoLaunchCommand,

    #[error("no task runner for {0}")]
    NoTaskRunner(String),

    #[error("invalid instances: supported are numbers greater than zero and 'all'")]
    InvalidInstances,

    #[error(transparent)]
    Constraint(#[from] gantry_constraints::ConstraintError),

    #[error("invalid application {id}: {source}")]
    InvalidApplication {
        id: String,
        #[source]
        source: Box<CoreError>,
    },

    #[error("can't merge layer level {parent} with level {child}")]
    IllegalLayerMerge { parent: u8, child: u8 },

    #[error("invalid layer: {0}")]
    InvalidLayer(String),

    #[error("Unresolved variable {token}. Available variables:\n{context}")]
    UnresolvedVariable { token: String, context: String },

    #[error("stack document error: {0}")]
    Document(#[from] serde_yaml::Error),
}
