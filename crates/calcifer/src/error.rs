// ── Daemon error type ──

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Config(#[from] calcifer_config::ConfigError),

    #[error(transparent)]
    Core(#[from] calcifer_core::CoreError),
}

impl DaemonError {
    /// Process exit code: configuration problems are the operator's to
    /// fix (78, EX_CONFIG-style), everything else is a generic failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 78,
            Self::Core(_) => 1,
        }
    }
}
