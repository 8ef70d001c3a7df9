//! Store errors and their retry classification.
//!
//! Every redb failure is classified into one of three classes:
//! lock conflicts are retried, input errors surface immediately, and
//! everything else is an environment failure.

use std::io::ErrorKind;

use snafu::{Location, Snafu};
use tagindex_types::{IndexError, NamespaceId, codec::CodecError};

/// Result type for store operations.
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Retry class of a store error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry with backoff.
    LockConflict,
    /// Caller error; never retried.
    InvalidInput,
    /// Fatal store failure; never retried.
    Environment,
}

/// Errors from the embedded store layer.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    /// Opening a namespace environment failed.
    #[snafu(display("Failed to open environment at {path}: {source}"))]
    Open {
        /// Environment file path, or `:memory:`.
        path: String,
        /// Underlying redb error.
        source: redb::DatabaseError,
    },

    /// Creating the data directory failed.
    #[snafu(display("Failed to create data directory {path}: {source}"))]
    DataDir {
        /// Directory path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Beginning a transaction failed.
    #[snafu(display("Transaction error: {source}"))]
    Transaction {
        /// Underlying redb error.
        source: redb::TransactionError,
    },

    /// Opening a table failed.
    #[snafu(display("Table error: {source}"))]
    Table {
        /// Underlying redb error.
        source: redb::TableError,
    },

    /// A table read or write failed.
    #[snafu(display("Storage error: {source}"))]
    Storage {
        /// Underlying redb error.
        source: redb::StorageError,
    },

    /// Committing a transaction failed.
    #[snafu(display("Commit error: {source}"))]
    Commit {
        /// Underlying redb error.
        source: redb::CommitError,
    },

    /// A stored value could not be encoded or decoded.
    #[snafu(display("Codec error: {source}"))]
    Codec {
        /// Underlying codec error.
        source: CodecError,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// A stored key or token is malformed.
    #[snafu(display("Corrupt data at {location}: {message}"))]
    Corrupt {
        /// Error description.
        message: String,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// A key component or scan argument is invalid.
    #[snafu(display("Invalid key: {message}"))]
    InvalidKey {
        /// Error description.
        message: String,
    },
}

impl StoreError {
    /// Returns the retry class of this error.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Open { source, .. } => match source {
                redb::DatabaseError::DatabaseAlreadyOpen => ErrorClass::LockConflict,
                redb::DatabaseError::Storage(e) => classify_storage(e),
                _ => ErrorClass::Environment,
            },
            Self::Transaction { source } => match source {
                redb::TransactionError::Storage(e) => classify_storage(e),
                _ => ErrorClass::Environment,
            },
            Self::Table { source } => match source {
                redb::TableError::Storage(e) => classify_storage(e),
                _ => ErrorClass::Environment,
            },
            Self::Storage { source } => classify_storage(source),
            Self::Commit { source } => match source {
                redb::CommitError::Storage(e) => classify_storage(e),
                _ => ErrorClass::Environment,
            },
            Self::InvalidKey { .. } => ErrorClass::InvalidInput,
            Self::DataDir { .. } | Self::Codec { .. } | Self::Corrupt { .. } => {
                ErrorClass::Environment
            },
        }
    }

    /// Whether this error should be retried.
    #[must_use]
    pub fn is_lock_conflict(&self) -> bool {
        self.class() == ErrorClass::LockConflict
    }

    /// Converts into the service-wide taxonomy for `namespace`.
    #[must_use]
    pub fn into_index_error(self, namespace: &NamespaceId) -> IndexError {
        match (&self, self.class()) {
            (Self::Corrupt { .. } | Self::Codec { .. }, _) => {
                IndexError::Corruption { message: self.to_string(), location: snafu::location!() }
            },
            (_, ErrorClass::LockConflict) => {
                IndexError::LockConflict { namespace: namespace.clone(), message: self.to_string() }
            },
            (_, ErrorClass::InvalidInput) => IndexError::InvalidInput { message: self.to_string() },
            (_, ErrorClass::Environment) => IndexError::Environment {
                message: format!("namespace {namespace}: {self}"),
                location: snafu::location!(),
            },
        }
    }
}

/// Classifies a redb error.
#[must_use]
pub fn classify(err: &redb::Error) -> ErrorClass {
    match err {
        redb::Error::DatabaseAlreadyOpen => ErrorClass::LockConflict,
        redb::Error::Io(io) => classify_io(io.kind()),
        redb::Error::ValueTooLarge(_) => ErrorClass::InvalidInput,
        _ => ErrorClass::Environment,
    }
}

fn classify_storage(err: &redb::StorageError) -> ErrorClass {
    match err {
        redb::StorageError::Io(io) => classify_io(io.kind()),
        redb::StorageError::ValueTooLarge(_) => ErrorClass::InvalidInput,
        _ => ErrorClass::Environment,
    }
}

fn classify_io(kind: ErrorKind) -> ErrorClass {
    match kind {
        ErrorKind::WouldBlock | ErrorKind::Interrupted | ErrorKind::TimedOut => {
            ErrorClass::LockConflict
        },
        _ => ErrorClass::Environment,
    }
}
