pub mod commands;
pub mod config;
pub mod crypto;
pub mod error;
pub mod records;
pub mod recovery;
pub mod storage;
pub mod traits;
pub mod vault;

pub use error::{RecoveryError, Result};
pub use recovery::{RecoveryCoordinator, RecoveryState};

/// Result from a command, separating the explanation from the machine-readable result
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Human-readable summary of what happened
    pub output: String,
    /// JSON result for piping into the next command
    pub result: String,
}
