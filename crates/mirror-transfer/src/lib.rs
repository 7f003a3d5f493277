//! # mirror-transfer
//!
//! File transfer engine for the mirror system.
//!
//! This crate provides:
//! - **Server session engine**: accept loop, handshake gate, command
//!   loop and one streaming task per active download
//! - **Client session engine**: dial, request, receive loop with a
//!   buffered small-file path and a direct-to-disk large-file path
//! - **Session table**: concurrent map of in-progress sends
//! - **Hasher**: streaming BLAKE3 digests for end-to-end verification
//!
//! Frames travel over plain TCP; the wire format lives in
//! [`mirror_proto`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod error;
pub mod hasher;
pub mod server;
pub mod session;

pub use client::{FileClient, TransferReport};
pub use config::{ClientConfig, ServerConfig, TransferConfig};
pub use error::{Result, TransferError};
pub use server::FileServer;
pub use session::{Session, SessionTable};

/// Default file read/send chunk size (64 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Default threshold below which a download is buffered in memory (5 MiB)
pub const DEFAULT_MEM_FILE_THRESHOLD: u64 = 5 * 1024 * 1024;

/// Default TCP port of the source peer
pub const DEFAULT_PORT: u16 = 52345;
