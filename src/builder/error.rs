//! Build failures.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Every way a build can fail. None of them are retried; the first one
/// aborts the build and the staged image is discarded.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("base environment not found: {reference}")]
    BaseEnvironmentNotFound { reference: String },

    #[error("base environment {reference} resolved to sha256:{actual}, which does not match its pinned digest")]
    BaseDigestMismatch { reference: String, actual: String },

    #[error("failed to create directory {}", path.display())]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to copy {}", path.display())]
    Copy {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("verification command failed with exit code {exit_code}")]
    VerificationCommandFailed { exit_code: i32 },

    #[error("failed to start verification command `{command}`: {message}")]
    VerificationSpawn { command: String, message: String },

    #[error("{message}")]
    Backend { message: String },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl BuildError {
    /// Process exit code to report for this failure.
    ///
    /// A failed verification surfaces the command's own code; everything else
    /// is a builder failure and exits with 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            BuildError::VerificationCommandFailed { exit_code } => *exit_code,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_passes_verification_code_through() {
        assert_eq!(
            BuildError::VerificationCommandFailed { exit_code: 101 }.exit_code(),
            101
        );
        assert_eq!(
            BuildError::BaseEnvironmentNotFound {
                reference: "x:latest".into()
            }
            .exit_code(),
            1
        );
    }

    #[test]
    fn test_io_source_is_chained() {
        let err = BuildError::Copy {
            path: PathBuf::from("/src/secret"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        let chained = format!("{:#}", anyhow::Error::from(err));
        assert!(chained.contains("/src/secret"));
        assert!(chained.contains("denied"));
    }
}
