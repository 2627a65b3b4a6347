//! Error taxonomy for the crash-test orchestrator.
//!
//! Fatal conditions map onto the orchestrator's documented exit codes:
//! configuration and exit-status mismatches exit with 1, early exits and
//! stderr anomalies exit with 2. Snapshot-capture failures are best-effort
//! and never surface here.

/// Errors that can terminate a crash-test run.
#[derive(Debug, thiserror::Error)]
pub enum CrashTestError {
    /// Irreconcilable or over-budget options. Raised before any subprocess
    /// launch.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The subprocess exit status contradicts what the current mode
    /// predicted (wrong code, unexpected timeout, or a deadly signal).
    #[error("unexpected exit status {status}: {reason}")]
    UnexpectedExit {
        /// Unified status: exit code, or negated signal number.
        status: i32,
        /// One-line diagnosis.
        reason: String,
    },

    /// Blackbox mode: the subprocess exited on its own before the kill
    /// deadline.
    #[error("subprocess exited before kill (status {status})")]
    EarlyExit {
        /// Unified status of the early exit.
        status: i32,
    },

    /// The subprocess stderr contained an error/fail marker even though the
    /// exit status matched the prediction.
    #[error("stderr anomaly: {0}")]
    OutputAnomaly(String),

    /// Filesystem or spawn failure in the orchestrator's own plumbing.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CrashTestError {
    /// Maps the error onto the orchestrator's process exit code.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) | Self::UnexpectedExit { .. } | Self::Io(_) => 1,
            Self::EarlyExit { .. } | Self::OutputAnomaly(_) => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_mapping() {
        assert_eq!(CrashTestError::Configuration("x".into()).exit_code(), 1);
        assert_eq!(
            CrashTestError::UnexpectedExit {
                status: 1,
                reason: "x".into()
            }
            .exit_code(),
            1
        );
        assert_eq!(CrashTestError::EarlyExit { status: 0 }.exit_code(), 2);
        assert_eq!(CrashTestError::OutputAnomaly("fail".into()).exit_code(), 2);
    }
}
