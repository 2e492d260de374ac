//! Error types shared by the services and the [`Unit`](crate::unit::Unit) aggregate.
//!
//! [`DiagnosticError`] covers failures that abort a single operation. Every one of
//! them is also written to the unit's state transcript, so callers that only look at
//! the state still see the fault. [`UnitError`] is what the `Unit` methods return.

use crate::models::{Severity, UnitStatus};
use crate::store::StoreError;
use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

/// A fatal-to-operation failure. The operation produced no partial artifact.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticError {
    #[error("bin not set")]
    BinNotSet,

    #[error("unknown module \"{0}\"")]
    UnknownModule(String),

    #[error("invalid environment binding \"{0}\", expected NAME=value")]
    InvalidEnv(String),

    #[error("protocol file not found: {0}")]
    ProtocolFileMissing(String),

    #[error("invalid file copy entry \"{entry}\": {reason}")]
    InvalidFileCopy { entry: String, reason: String },

    #[error("load directive invalid: file not found \"{0}\"")]
    LoadFileNotFound(String),

    #[error("load directive invalid: \"{line}\": {reason}")]
    InvalidLoad { line: String, reason: String },

    #[error("load directive empty")]
    EmptyLoad,

    #[error("template file not found: {0}")]
    TemplateMissing(Utf8PathBuf),

    #[error("source directory not found: {0}")]
    SourceDirNotFound(Utf8PathBuf),

    #[error("export requires state normal, current state is {0}")]
    ExportStateNotNormal(Severity),

    #[error("export requires a generated unit, current status is {0}")]
    ExportNotGenerated(UnitStatus),

    #[error("I/O failure on {path}: {message}")]
    Io { path: Utf8PathBuf, message: String },
}

impl DiagnosticError {
    pub fn io(path: &Utf8Path, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}

/// Errors returned by [`Unit`](crate::unit::Unit) and
/// [`Repository`](crate::repository::Repository).
#[derive(Error, Debug)]
pub enum UnitError {
    #[error("unit \"{0}\" not found")]
    NotFound(String),

    #[error("unit \"{0}\" already exists")]
    AlreadyExists(String),

    #[error("invalid unit name \"{0}\"")]
    InvalidName(String),

    #[error("unit \"{0}\" is locked by another writer")]
    Locked(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Diagnostic(#[from] DiagnosticError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UnitError {
    /// The diagnostic behind this error, when there is one.
    pub fn diagnostic(&self) -> Option<&DiagnosticError> {
        match self {
            UnitError::Diagnostic(err) => Some(err),
            _ => None,
        }
    }
}
