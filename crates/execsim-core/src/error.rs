// SPDX-License-Identifier: MIT OR Apache-2.0
//! Error taxonomy for command resolution, lifecycle misuse, and runtime failure.

use crate::cancel::CancelReason;
use thiserror::Error;

/// Errors produced by the simulated exec runtime.
///
/// Resolution errors are recorded at command-build time and surfaced by
/// `start`. Misuse errors are returned synchronously from the offending
/// call. Exit-status and cancellation failures are only observable through
/// `wait` (or the helpers that call it). Nothing here is retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    /// A separator-qualified name did not match any registered binary.
    #[error("exec: {name:?}: no such file or directory")]
    NoSuchFile {
        /// The requested name, kept for diagnostics.
        name: String,
    },

    /// A bare name did not resolve against the registered binaries.
    #[error("exec: {name:?}: executable file not found")]
    NotFound {
        /// The requested name, kept for diagnostics.
        name: String,
    },

    /// Start was called on a command with an empty path.
    #[error("exec: no command")]
    NoCommand,

    /// Start was called a second time.
    #[error("exec: already started")]
    AlreadyStarted,

    /// Wait was called before start.
    #[error("exec: not started")]
    NotStarted,

    /// Wait was called a second time.
    #[error("exec: wait was already called")]
    WaitAlreadyCalled,

    /// Stdin was already attached.
    #[error("exec: stdin already set")]
    StdinAlreadySet,

    /// Stdout was already attached.
    #[error("exec: stdout already set")]
    StdoutAlreadySet,

    /// Stderr was already attached.
    #[error("exec: stderr already set")]
    StderrAlreadySet,

    /// A pipe was requested after the command started.
    #[error("exec: {pipe} pipe after process started")]
    PipeAfterStart {
        /// Which pipe was requested.
        pipe: &'static str,
    },

    /// A handler task dropped its hand-off slot without reporting.
    #[error("exec: handler task exited without reporting a status")]
    HandoffClosed,

    /// The handler returned a nonzero status.
    #[error("exit status {code}")]
    ExitStatus {
        /// The handler's returned status.
        code: i32,
        /// Captured stderr bytes, populated only by `output`.
        stderr: Option<Vec<u8>>,
    },

    /// The command's cancel token fired before the handler completed.
    #[error("{}", .reason.description())]
    Canceled {
        /// Why the token fired.
        reason: CancelReason,
    },
}

impl ExecError {
    /// A generic exit-status failure with no captured stderr.
    #[must_use]
    pub fn exit_status(code: i32) -> Self {
        Self::ExitStatus { code, stderr: None }
    }

    /// Returns `true` for the two resolution-error variants.
    #[must_use]
    pub fn is_resolution(&self) -> bool {
        matches!(self, Self::NoSuchFile { .. } | Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::ExecError;
    use crate::cancel::CancelReason;

    #[test]
    fn exit_status_renders_generically() {
        assert_eq!(ExecError::exit_status(3).to_string(), "exit status 3");
    }

    #[test]
    fn resolution_errors_carry_the_requested_name() {
        let err = ExecError::NotFound {
            name: "frobnicate".into(),
        };
        assert!(err.to_string().contains("frobnicate"));
        assert!(err.is_resolution());

        let err = ExecError::NoSuchFile {
            name: "/usr/bin/missing".into(),
        };
        assert!(err.to_string().contains("/usr/bin/missing"));
        assert!(err.is_resolution());
    }

    #[test]
    fn misuse_errors_are_not_resolution_errors() {
        assert!(!ExecError::AlreadyStarted.is_resolution());
        assert!(!ExecError::NotStarted.is_resolution());
    }

    #[test]
    fn canceled_surfaces_the_reason_text() {
        let err = ExecError::Canceled {
            reason: CancelReason::DeadlineExceeded,
        };
        assert_eq!(err.to_string(), CancelReason::DeadlineExceeded.description());
    }
}
