//! Error types for the transfer engine.

use mirror_proto::{ProtoError, Status};
use thiserror::Error;

/// Errors raised by the server and client session engines
#[derive(Debug, Error)]
pub enum TransferError {
    /// Socket or file I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire protocol violation; the connection is closed
    #[error("protocol error: {0}")]
    Proto(#[from] ProtoError),

    /// Peer answered the handshake with something else
    #[error("handshake failed: {0}")]
    Handshake(&'static str),

    /// A frame arrived that the current state cannot accept
    #[error("unexpected {0} frame")]
    UnexpectedMessage(&'static str),

    /// Error frame received from the peer
    #[error("peer error ({code:?}): {message}")]
    Remote {
        /// Status code carried by the Error frame
        code: Status,
        /// Message carried by the Error frame
        message: String,
    },

    /// Frame carried a session id the receiver does not own
    #[error("session mismatch: expected {expected}, got {got}")]
    SessionMismatch {
        /// Session id this download runs under
        expected: u32,
        /// Session id the frame carried
        got: u32,
    },

    /// FileData offsets were not contiguous
    #[error("data offset gap: expected {expected}, got {got}")]
    OffsetGap {
        /// Next offset the receiver expected
        expected: u64,
        /// Offset the frame carried
        got: u64,
    },

    /// Post-transfer digest disagreement; the artifact was discarded
    #[error("hash mismatch: expected {expected}, computed {actual}")]
    HashMismatch {
        /// Digest announced by the sender (hex)
        expected: String,
        /// Digest computed over the received bytes (hex)
        actual: String,
    },

    /// Peer went silent past the idle deadline
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
}

impl TransferError {
    /// True when the peer reported the file as missing
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            TransferError::Remote {
                code: Status::NotFound,
                ..
            }
        )
    }

    /// True when the peer refused the request by policy
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        matches!(
            self,
            TransferError::Remote {
                code: Status::Reject,
                ..
            }
        )
    }

    /// True when the connection itself is unusable and must be dropped
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransferError::Remote { .. })
    }
}

/// Result type for transfer operations
pub type Result<T> = std::result::Result<T, TransferError>;
