//! Error types for the mirror wire protocol.

use thiserror::Error;

/// Protocol-level errors
///
/// Decoding fails on bad magic, unknown message types, short or oversize
/// bodies. Encoding fails only when a length field cannot represent its
/// payload ([`ProtoError::OversizedField`]).
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Frame did not start with the protocol magic
    #[error("invalid magic number: 0x{0:08X}")]
    BadMagic(u32),

    /// Unrecognized message type
    #[error("unknown message type: 0x{0:04X}")]
    UnknownType(u16),

    /// Unrecognized status code
    #[error("unknown status code: 0x{0:04X}")]
    UnknownStatus(u16),

    /// Body shorter than its fixed fields require
    #[error("body too short: expected at least {expected} bytes, got {actual}")]
    ShortBody {
        /// Minimum bytes the variant requires
        expected: usize,
        /// Bytes actually present
        actual: usize,
    },

    /// Declared body length exceeds the configured maximum
    #[error("body length {len} exceeds maximum {max}")]
    BodyTooLarge {
        /// Declared body length
        len: usize,
        /// Configured maximum
        max: usize,
    },

    /// A value does not fit the wire field that carries it
    #[error("field too large for wire encoding: {0}")]
    OversizedField(&'static str),

    /// Path or error message was not valid UTF-8
    #[error("invalid UTF-8 in {field}")]
    InvalidUtf8 {
        /// Which textual field failed to decode
        field: &'static str,
    },

    /// Underlying transport failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtoError {
    /// True when this error is a clean end-of-stream at a frame boundary,
    /// i.e. the peer closed the connection between frames.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            ProtoError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof
        )
    }
}
