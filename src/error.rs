//! Error types, numeric error codes, and CLI exit codes.

use std::path::PathBuf;

use serde::Serialize;

use crate::cache::CacheError;
use crate::hashing::DecodeError;

/// Stable numeric error codes, shared by [`HashError::code`] and the C ABI.
pub mod code {
    /// Success.
    pub const OK: i32 = 0;
    /// An argument was malformed (e.g. NULL or non-UTF-8 path).
    pub const INVALID_ARGUMENT: i32 = 1;
    /// The image file does not exist.
    pub const NOT_FOUND: i32 = 2;
    /// The image file could not be read due to permissions.
    pub const PERMISSION_DENIED: i32 = 3;
    /// The file is not in a supported image format.
    pub const UNSUPPORTED: i32 = 4;
    /// The image data is corrupt or truncated.
    pub const CORRUPT: i32 = 5;
    /// Any other I/O failure.
    pub const IO: i32 = 6;
    /// A context could not be created.
    pub const INIT: i32 = 7;
    /// The caller broke the lifecycle contract (e.g. NULL context).
    pub const CONTRACT_VIOLATION: i32 = 8;
    /// A panic was caught at the C boundary.
    pub const INTERNAL: i32 = 9;
}

/// Errors that prevent a [`HashContext`](crate::HashContext) from being created.
#[derive(thiserror::Error, Debug)]
pub enum InitError {
    /// The cache directory could not be created.
    #[error("Cannot create cache directory {path}: {source}")]
    CacheDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The cache database could not be opened or initialised.
    #[error("Cannot open hash cache {path}: {source}")]
    CacheOpen {
        path: PathBuf,
        #[source]
        source: CacheError,
    },

    /// Configuration sources could not be merged or parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// A configuration value is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Errors returned by hash requests.
#[derive(thiserror::Error, Debug)]
pub enum HashError {
    /// The image could not be read or decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Context creation failed.
    #[error(transparent)]
    Init(#[from] InitError),

    /// An argument was malformed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The caller used the API outside its lifecycle.
    #[error("Contract violation: {0}")]
    ContractViolation(&'static str),
}

impl HashError {
    /// Stable numeric code, see [`code`].
    pub fn code(&self) -> i32 {
        match self {
            Self::Decode(e) => e.code(),
            Self::Init(_) => code::INIT,
            Self::InvalidArgument(_) => code::INVALID_ARGUMENT,
            Self::ContractViolation(_) => code::CONTRACT_VIOLATION,
        }
    }
}

/// Exit codes for the pihash command line.
///
/// - 0: Success (hashes printed, or similar images found)
/// - 1: General error (unexpected failure)
/// - 2: No similar images (comparison completed, nothing within threshold)
/// - 3: Partial success (some inputs could not be hashed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// Success: the requested hashes were computed.
    Success = 0,
    /// General error: An unexpected error occurred.
    GeneralError = 1,
    /// No similar images: every comparison was outside the threshold.
    NoMatches = 2,
    /// Partial success: some inputs failed to hash.
    PartialSuccess = 3,
}

impl ExitCode {
    /// Get the numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Get the machine-readable code prefix.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "PH000",
            Self::GeneralError => "PH001",
            Self::NoMatches => "PH002",
            Self::PartialSuccess => "PH003",
        }
    }
}

/// Structured error information for JSON output.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// The error code (e.g., "PH001")
    pub code: String,
    /// The exit code number
    pub exit_code: i32,
    /// Human-readable error message
    pub message: String,
    /// Library error code of the root cause, if it was a hashing error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i32>,
}

impl StructuredError {
    /// Create a new structured error from an anyhow error and an exit code.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            message: format!("{err:#}"),
            error_code: err
                .chain()
                .find_map(|cause| cause.downcast_ref::<HashError>())
                .map(HashError::code),
        }
    }
}
