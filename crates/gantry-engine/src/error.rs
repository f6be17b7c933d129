//! Engine error types.

use thiserror::Error;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised while running applications and stacks.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Model(#[from] gantry_core::CoreError),

    #[error(transparent)]
    State(#[from] gantry_state::StateError),

    #[error("manager error: {0}")]
    Manager(String),

    #[error("task not running")]
    TaskNotRunning,

    #[error("healthcheck not passing")]
    HealthcheckNotPassing,

    #[error("failed to await until the application is running and healthy within {retries} retries")]
    HealthTimeout { retries: u32 },

    #[error("hook {file} exited with status {status}")]
    HookFailed { file: String, status: i32 },

    #[error("invalid skip pattern: {0}")]
    SkipPattern(#[from] regex::Error),

    #[error("{0}")]
    Application(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
