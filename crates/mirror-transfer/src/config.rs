//! Transfer engine configuration.

use crate::{DEFAULT_CHUNK_SIZE, DEFAULT_MEM_FILE_THRESHOLD, DEFAULT_PORT};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Tunables shared by both peers
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// File read/send chunk size in bytes
    pub chunk_size: usize,

    /// Downloads at or below this size are buffered in memory and
    /// written in one pass after verification
    pub mem_file_threshold: u64,

    /// Maximum accepted frame body length
    pub max_frame_body: usize,

    /// Idle deadline for a single socket read
    pub io_timeout: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            mem_file_threshold: DEFAULT_MEM_FILE_THRESHOLD,
            max_frame_body: mirror_proto::DEFAULT_MAX_BODY_LEN,
            io_timeout: Duration::from_secs(30),
        }
    }
}

/// Source-peer configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the listener binds
    pub listen_addr: SocketAddr,

    /// Directory under which requested paths are resolved
    pub serving_root: PathBuf,

    /// Instance id sent in handshake replies
    pub instance_id: u32,

    /// Shared tunables
    pub transfer: TransferConfig,
}

impl ServerConfig {
    /// Configuration serving `root` on the default port, all interfaces
    #[must_use]
    pub fn for_root(root: impl Into<PathBuf>, instance_id: u32) -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            serving_root: root.into(),
            instance_id,
            transfer: TransferConfig::default(),
        }
    }
}

/// Mirror-peer configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Address of the source peer
    pub peer_addr: SocketAddr,

    /// Directory downloaded files are written into
    pub mirror_root: PathBuf,

    /// Instance id sent in the handshake
    pub instance_id: u32,

    /// Shared tunables
    pub transfer: TransferConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = TransferConfig::default();
        assert_eq!(cfg.chunk_size, 64 * 1024);
        assert_eq!(cfg.mem_file_threshold, 5 * 1024 * 1024);
        assert_eq!(cfg.max_frame_body, 64 * 1024 * 1024);
        assert_eq!(cfg.io_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_server_for_root() {
        let cfg = ServerConfig::for_root("/srv/data", 7);
        assert_eq!(cfg.listen_addr.port(), DEFAULT_PORT);
        assert_eq!(cfg.serving_root, PathBuf::from("/srv/data"));
        assert_eq!(cfg.instance_id, 7);
    }
}
