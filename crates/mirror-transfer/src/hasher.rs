//! Streaming BLAKE3 digests for whole files.

use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// Digest a file from byte 0 to EOF.
///
/// # Errors
///
/// Fails only on I/O error while reading.
pub fn hash_file(path: &Path) -> io::Result<[u8; 32]> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(*hasher.finalize().as_bytes())
}

/// [`hash_file`] off the async runtime's worker threads.
///
/// Hashing is CPU-bound, so callers inside the runtime go through
/// `spawn_blocking`.
///
/// # Errors
///
/// Fails only on I/O error while reading.
pub async fn hash_file_async(path: impl Into<PathBuf>) -> io::Result<[u8; 32]> {
    let path = path.into();
    tokio::task::spawn_blocking(move || hash_file(&path))
        .await
        .map_err(|e| io::Error::other(e.to_string()))?
}

/// Digest an in-memory buffer
#[must_use]
pub fn hash_bytes(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_file_and_buffer_digests_agree() {
        let mut temp = NamedTempFile::new().unwrap();
        let data = vec![0x5A; 300 * 1024];
        temp.write_all(&data).unwrap();
        temp.flush().unwrap();

        assert_eq!(hash_file(temp.path()).unwrap(), hash_bytes(&data));
    }

    #[test]
    fn test_empty_file_digest() {
        let temp = NamedTempFile::new().unwrap();
        assert_eq!(hash_file(temp.path()).unwrap(), hash_bytes(&[]));
    }

    #[test]
    fn test_missing_file_fails() {
        assert!(hash_file(Path::new("/definitely/not/here")).is_err());
    }

    #[tokio::test]
    async fn test_async_matches_sync() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(b"async hashing").unwrap();
        temp.flush().unwrap();

        let sync = hash_file(temp.path()).unwrap();
        let async_ = hash_file_async(temp.path()).await.unwrap();
        assert_eq!(sync, async_);
    }
}
