//! Error taxonomy shared by the job store, chain registry and scheduler.

use std::path::PathBuf;
use thiserror::Error;

use crate::models::{ChainNumber, Sid};

/// Errors that can occur while loading state or running scheduler operations.
#[derive(Error, Debug)]
pub enum PostboxError {
    /// Missing or unusable configuration, template, or exhausted SID space.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Job and chain bookkeeping disagree; mutating operations are refused.
    #[error("Integrity violation ({} problem(s)): {}", .0.len(), .0.join("; "))]
    Integrity(Vec<String>),

    /// A single job could not be staged. Recoverable: the job is skipped.
    #[error("Job SID {sid:06} could not be staged: {reason}")]
    Staging { sid: Sid, reason: String },

    #[error("Job not found: SID {0:06}")]
    JobNotFound(Sid),

    #[error("Chain not found: {0}")]
    ChainNotFound(ChainNumber),

    #[error("Malformed ledger line {line}: {reason}")]
    MalformedLedger { line: usize, reason: String },

    #[error("Malformed status line {line:?}: {reason}")]
    MalformedStatus { line: String, reason: String },

    #[error("Malformed request line {line:?}: {reason}")]
    MalformedRequest { line: String, reason: String },

    /// A job field holds text the ledger format cannot store.
    #[error("Invalid {field} {value:?}: {reason}")]
    InvalidField {
        field: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An external toolchain executable could not be run at all.
    #[error("Failed to run {command}: {source}")]
    Tool {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, PostboxError>;

impl PostboxError {
    /// Wrap an I/O error together with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PostboxError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn staging(sid: Sid, reason: impl Into<String>) -> Self {
        PostboxError::Staging {
            sid,
            reason: reason.into(),
        }
    }
}
