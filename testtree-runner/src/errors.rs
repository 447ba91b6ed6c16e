// Copyright (c) The testtree Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by testtree.

use camino::Utf8PathBuf;
use std::{fmt, io};
use thiserror::Error;

/// An error that occurred while invoking the build tool or a test binary.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CommandError {
    /// The process could not be launched at all.
    Launch {
        /// The program that failed to launch.
        program: Utf8PathBuf,
        /// The underlying spawn error.
        #[source]
        error: io::Error,
    },

    /// Reading from the process's output streams failed.
    Read {
        /// The program whose output could not be read.
        program: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        error: io::Error,
    },

    /// Waiting for the process to exit failed.
    Wait {
        /// The program that could not be awaited.
        program: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        error: io::Error,
    },

    /// The process ran but exited with a non-zero status.
    ExitStatus {
        /// The program that failed.
        program: Utf8PathBuf,
        /// The exit code, if the process exited normally.
        code: Option<i32>,
    },
}

impl CommandError {
    /// Returns the exit code if this error represents a non-zero exit.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::ExitStatus { code, .. } => *code,
            _ => None,
        }
    }

    /// Returns true if this error represents a launch failure rather than a
    /// failure of the launched process.
    pub fn is_launch_failure(&self) -> bool {
        matches!(self, Self::Launch { .. })
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Launch { program, .. } => write!(f, "failed to launch `{program}`"),
            Self::Read { program, .. } => write!(f, "failed to read output from `{program}`"),
            Self::Wait { program, .. } => write!(f, "failed to wait for `{program}` to exit"),
            Self::ExitStatus { program, code } => match code {
                Some(code) => write!(f, "`{program}` exited with exit code {code}"),
                // A process without an exit code was terminated by a signal.
                None => write!(f, "`{program}` exited with an unknown exit status"),
            },
        }
    }
}

/// An error that occurred while discovering tests.
///
/// Discovery degrades gracefully: build failures produce partial or empty
/// trees rather than errors. Only a build tool that cannot be launched at
/// all is surfaced.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DiscoveryError {
    /// The build tool could not be launched for test discovery.
    #[error("unable to launch the build tool for test discovery")]
    Launch(#[source] CommandError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_status_display() {
        let error = CommandError::ExitStatus {
            program: "cargo".into(),
            code: Some(101),
        };
        assert_eq!(error.to_string(), "`cargo` exited with exit code 101");
        assert_eq!(error.exit_code(), Some(101));

        let error = CommandError::ExitStatus {
            program: "cargo".into(),
            code: None,
        };
        assert_eq!(error.to_string(), "`cargo` exited with an unknown exit status");
    }

    #[test]
    fn launch_failure_classification() {
        let error = CommandError::Launch {
            program: "no-such-tool".into(),
            error: io::Error::new(io::ErrorKind::NotFound, "not found"),
        };
        assert!(error.is_launch_failure());
        assert_eq!(error.exit_code(), None);
    }
}
