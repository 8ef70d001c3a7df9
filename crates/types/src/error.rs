//! Error types for tagindex using snafu.
//!
//! Defines the service-wide error taxonomy:
//! - Input errors (malformed keys, conditions, oversized entries)
//! - Lock conflicts, absorbed by retry loops and surfaced only as `RetryExceeded`
//! - Environment failures (store corruption or unavailability)
//! - Shard resolution and transport failures
//!
//! Each error variant maps to an [`ErrorCode`] with a unique numeric identifier,
//! retryability classification, and suggested recovery action.
//!
//! A scan that runs out of fetch budget is *not* an error: it returns a partial
//! `FetchResult` with `fetch_exceeded` set.

use core::fmt;

use snafu::{Location, Snafu};

use crate::types::NamespaceId;

/// Unified result type for index operations.
pub type Result<T, E = IndexError> = std::result::Result<T, E>;

/// Machine-readable error codes for programmatic error handling.
///
/// | Range       | Domain      | Examples                                    |
/// |-------------|-------------|---------------------------------------------|
/// | 1000–1099   | Storage     | Lock conflict, retry exhaustion             |
/// | 1100–1199   | Storage     | Environment failure, corruption             |
/// | 2000–2099   | Routing     | Shard unresolved, transport                 |
/// | 3000–3099   | Request     | Invalid input, serialization, config        |
///
/// Error codes are transmitted as the string representation of their numeric
/// value (e.g., `"1000"`) in shard responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    /// A write lock or transaction slot could not be acquired.
    StorageLockConflict = 1000,
    /// Lock conflicts persisted through every configured retry.
    StorageRetryExceeded = 1001,
    /// The embedded store is unavailable or failed.
    StorageEnvironment = 1100,
    /// Stored bytes could not be decoded.
    StorageCorruption = 1101,
    /// No shard node is configured for the assignment.
    RoutingShardUnresolved = 2000,
    /// A shard network call failed.
    RoutingTransport = 2001,
    /// Invalid request argument.
    RequestInvalidInput = 3000,
    /// Serialization or deserialization error.
    RequestSerialization = 3001,
    /// Configuration error.
    RequestConfig = 3002,
}

impl ErrorCode {
    /// Returns the numeric code value.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Converts a numeric code to an `ErrorCode`, returning `None` for unknown values.
    #[must_use]
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            1000 => Some(Self::StorageLockConflict),
            1001 => Some(Self::StorageRetryExceeded),
            1100 => Some(Self::StorageEnvironment),
            1101 => Some(Self::StorageCorruption),
            2000 => Some(Self::RoutingShardUnresolved),
            2001 => Some(Self::RoutingTransport),
            3000 => Some(Self::RequestInvalidInput),
            3001 => Some(Self::RequestSerialization),
            3002 => Some(Self::RequestConfig),
            _ => None,
        }
    }

    /// Whether this error is retryable.
    ///
    /// Only lock conflicts and transport failures may succeed on a later attempt.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::StorageLockConflict | Self::RoutingTransport)
    }

    /// Suggested recovery action for this error code.
    #[must_use]
    pub const fn suggested_action(self) -> &'static str {
        match self {
            Self::StorageLockConflict => "Retry the operation with backoff.",
            Self::StorageRetryExceeded => {
                "Contention persisted through all retries. Reduce concurrent writers or raise retry_count."
            },
            Self::StorageEnvironment => {
                "Check disk space, permissions and the namespace environment file. Service is unavailable for this namespace."
            },
            Self::StorageCorruption => {
                "Stored key or value is not decodable. Rebuild the namespace index from the primary store."
            },
            Self::RoutingShardUnresolved => {
                "Configure index, full-text or manifest node URLs for the namespace."
            },
            Self::RoutingTransport => "Check connectivity to the shard node and retry.",
            Self::RequestInvalidInput => "Fix the request parameters and resubmit.",
            Self::RequestSerialization => {
                "Codec bug or incompatible peer version. Report with the payload context."
            },
            Self::RequestConfig => "Fix the configuration value and restart the server.",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// Top-level error type for index operations.
///
/// # Recovery Guide
///
/// | Variant           | Retryable | Recovery Action                                   |
/// | ----------------- | --------- | ------------------------------------------------- |
/// | `InvalidInput`    | No        | Fix the request                                   |
/// | `LockConflict`    | Yes       | Absorbed by retry loops                           |
/// | `RetryExceeded`   | No        | Reduce contention or raise retry count            |
/// | `Environment`     | No        | Store unavailable; investigate, logged critical   |
/// | `Corruption`      | No        | Rebuild the namespace index                       |
/// | `ShardUnresolved` | No        | Configure node URLs                               |
/// | `Transport`       | Yes       | Retry the shard call                              |
/// | `Serialization`   | No        | Codec bug; report                                 |
/// | `Config`          | No        | Fix configuration and restart                     |
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum IndexError {
    /// Malformed key, condition or payload supplied by the caller.
    #[snafu(display("Invalid input: {message}"))]
    InvalidInput {
        /// Error description.
        message: String,
    },

    /// A store lock could not be acquired. Never observed outside a retry loop.
    #[snafu(display("Lock conflict in namespace {namespace}: {message}"))]
    LockConflict {
        /// Namespace whose environment was contended.
        namespace: NamespaceId,
        /// Error description.
        message: String,
    },

    /// Lock conflicts persisted through every configured retry.
    #[snafu(display("Retry exceeded after {attempts} attempts in namespace {namespace}: {message}"))]
    RetryExceeded {
        /// Namespace whose environment was contended.
        namespace: NamespaceId,
        /// Number of attempts made.
        attempts: u32,
        /// Last error description.
        message: String,
    },

    /// The embedded store failed or is unavailable.
    #[snafu(display("Environment failure at {location}: {message}"))]
    Environment {
        /// Error description.
        message: String,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// Stored data could not be decoded.
    #[snafu(display("Data corruption at {location}: {message}"))]
    Corruption {
        /// Error description.
        message: String,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// No shard node is configured for an assignment key.
    #[snafu(display("No shard configured for {assignment_key} in namespace {namespace}"))]
    ShardUnresolved {
        /// Namespace being routed.
        namespace: NamespaceId,
        /// Assignment key that could not be resolved.
        assignment_key: String,
    },

    /// A shard network call failed.
    #[snafu(display("Transport error calling {node}: {message}"))]
    Transport {
        /// Node URL that was called.
        node: String,
        /// Error description.
        message: String,
    },

    /// Serialization or deserialization error.
    #[snafu(display("Serialization error at {location}: {message}"))]
    Serialization {
        /// Error description.
        message: String,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// Configuration error.
    #[snafu(display("Configuration error: {message}"))]
    Config {
        /// Error description.
        message: String,
    },
}

impl IndexError {
    /// Returns the machine-readable error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidInput { .. } => ErrorCode::RequestInvalidInput,
            Self::LockConflict { .. } => ErrorCode::StorageLockConflict,
            Self::RetryExceeded { .. } => ErrorCode::StorageRetryExceeded,
            Self::Environment { .. } => ErrorCode::StorageEnvironment,
            Self::Corruption { .. } => ErrorCode::StorageCorruption,
            Self::ShardUnresolved { .. } => ErrorCode::RoutingShardUnresolved,
            Self::Transport { .. } => ErrorCode::RoutingTransport,
            Self::Serialization { .. } => ErrorCode::RequestSerialization,
            Self::Config { .. } => ErrorCode::RequestConfig,
        }
    }

    /// Whether this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }

    /// Suggested recovery action for this error.
    #[must_use]
    pub const fn suggested_action(&self) -> &'static str {
        self.code().suggested_action()
    }

    /// Shorthand for an [`IndexError::InvalidInput`].
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput { message: message.into() }
    }
}
