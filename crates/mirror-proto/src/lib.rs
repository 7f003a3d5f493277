//! # mirror-proto
//!
//! Wire protocol for the mirror file-transfer system.
//!
//! This crate provides:
//! - **Frame codec**: the fixed 12-byte header and every message body
//! - **Message types**: handshake, file request/response, data, completion,
//!   error and acknowledge frames
//! - **Async framing I/O**: [`FrameReader`] / [`FrameWriter`] over any
//!   tokio byte stream
//!
//! Every multi-byte integer on the wire is big-endian. A frame is
//! `header || body`; the header carries a magic number, the message type
//! and the body length. Bodies have no padding or alignment between
//! fields.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod frame;

pub use codec::{FrameReader, FrameWriter};
pub use error::ProtoError;
pub use frame::{Header, Message, MessageType, Status};

/// Protocol magic number, first four bytes of every frame
pub const MAGIC: u32 = 0xF1E2_D3C4;

/// Fixed frame header size in bytes
pub const HEADER_SIZE: usize = 12;

/// Protocol version carried in Handshake frames
pub const PROTOCOL_VERSION: u16 = 0x0001;

/// BLAKE3 digest size carried in FileResponse and FileComplete frames
pub const HASH_SIZE: usize = 32;

/// Default upper bound on a frame body (64 MiB)
pub const DEFAULT_MAX_BODY_LEN: usize = 64 * 1024 * 1024;
