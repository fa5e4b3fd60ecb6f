//! Unified error system for Secsync.
//!
//! Protocol failures carry stable tagged codes (`SECSYNC_ERROR_<n>`) that are
//! preserved across implementations; everything else is an ambient failure
//! class with a human-readable message.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable protocol error codes.
///
/// Codes in the 1xx range cover snapshot verification and decryption, 2x
/// covers the ephemeral sub-protocol, 36/38 are ephemeral handling faults,
/// and 21x covers update verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Snapshot parent-proof does not match the recomputed chain value.
    SnapshotProofMismatch,
    /// Snapshot `docId` does not match the current document.
    SnapshotDocIdMismatch,
    /// Snapshot records a parent update clock below one already applied locally.
    SnapshotMissedUpdates,
    /// Snapshot signature invalid.
    SnapshotSignatureInvalid,
    /// Snapshot AEAD decryption failed.
    SnapshotDecryptionFailed,
    /// Snapshot author rejected by the host's client validation.
    SnapshotAuthorRejected,
    /// Ephemeral message decryption failed.
    EphemeralDecryptionFailed,
    /// No verified session exists for the sender.
    EphemeralNoValidSession,
    /// Ephemeral session counter not strictly greater than the stored one.
    EphemeralReplay,
    /// Ephemeral author rejected by the host's client validation.
    EphemeralAuthorRejected,
    /// Unknown ephemeral message type discriminant.
    EphemeralUnknownMessageType,
    /// Ephemeral `docId` does not match the current document.
    EphemeralDocIdMismatch,
    /// Unexpected failure while handling an ephemeral message.
    EphemeralUnexpected,
    /// Ephemeral signature invalid.
    EphemeralSignatureInvalid,
    /// Update signature or AEAD verification failed.
    UpdateIntegrityFailed,
    /// Update references a snapshot that is not the active one.
    UpdateWrongSnapshot,
    /// Update clock is not exactly the expected successor.
    UpdateClockMismatch,
}

impl ErrorCode {
    /// Numeric value of the code as it appears on the wire and in logs.
    pub fn value(&self) -> u16 {
        match self {
            Self::SnapshotProofMismatch => 101,
            Self::SnapshotDocIdMismatch => 102,
            Self::SnapshotMissedUpdates => 103,
            Self::SnapshotSignatureInvalid => 104,
            Self::SnapshotDecryptionFailed => 105,
            Self::SnapshotAuthorRejected => 111,
            Self::EphemeralDecryptionFailed => 21,
            Self::EphemeralNoValidSession => 22,
            Self::EphemeralReplay => 23,
            Self::EphemeralAuthorRejected => 24,
            Self::EphemeralUnknownMessageType => 25,
            Self::EphemeralDocIdMismatch => 26,
            Self::EphemeralUnexpected => 36,
            Self::EphemeralSignatureInvalid => 38,
            Self::UpdateIntegrityFailed => 212,
            Self::UpdateWrongSnapshot => 213,
            Self::UpdateClockMismatch => 214,
        }
    }

    /// Whether this code belongs to the snapshot verification family.
    pub fn is_snapshot_error(&self) -> bool {
        (100..200).contains(&self.value())
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SECSYNC_ERROR_{}", self.value())
    }
}

/// Unified error type for all Secsync operations.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum SecsyncError {
    /// Protocol failure with a stable tagged code
    #[error("{code}")]
    Protocol {
        /// The stable protocol error code
        code: ErrorCode,
    },

    /// Invalid input or configuration
    #[error("Invalid: {message}")]
    Invalid {
        /// Error message describing the invalid input
        message: String,
    },

    /// Cryptographic operation failed
    #[error("Crypto error: {message}")]
    Crypto {
        /// Error message describing the cryptographic failure
        message: String,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message describing the serialization failure
        message: String,
    },

    /// Network or transport error
    #[error("Transport error: {message}")]
    Transport {
        /// Error message describing the transport issue
        message: String,
    },

    /// Storage operation failed
    #[error("Storage error: {message}")]
    Storage {
        /// Error message describing the storage failure
        message: String,
    },

    /// Host callback failed
    #[error("Host error: {message}")]
    Host {
        /// Error message describing the host callback failure
        message: String,
    },
}

impl SecsyncError {
    /// Create a protocol error from a stable code
    pub fn protocol(code: ErrorCode) -> Self {
        Self::Protocol { code }
    }

    /// Create an invalid input error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a crypto error
    pub fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a host callback error
    pub fn host(message: impl Into<String>) -> Self {
        Self::Host {
            message: message.into(),
        }
    }

    /// The protocol code carried by this error, if any.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Protocol { code } => Some(*code),
            _ => None,
        }
    }
}

impl From<ErrorCode> for SecsyncError {
    fn from(code: ErrorCode) -> Self {
        Self::Protocol { code }
    }
}

/// Result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, SecsyncError>;
