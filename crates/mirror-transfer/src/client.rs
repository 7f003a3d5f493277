//! Client session engine.
//!
//! The mirror peer dials the source, performs the handshake and pulls
//! files one at a time. Small downloads are buffered in memory and only
//! written once the digest matches, so a failed transfer leaves no
//! partial artifact; large downloads stream straight to disk with an
//! acknowledgment after every chunk and are deleted on digest mismatch.
//! A resumed download receives only the tail of the file, which the
//! announced whole-file digest cannot be checked against, so digest
//! verification applies to downloads that start at byte 0.

use crate::config::ClientConfig;
use crate::error::{Result, TransferError};
use crate::hasher;
use mirror_proto::{FrameReader, FrameWriter, Message, PROTOCOL_VERSION, Status};
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;

/// Outcome of one successful download
#[derive(Debug, Clone)]
pub struct TransferReport {
    /// Requested path, relative to the serving root
    pub path: String,
    /// Bytes received this session (size minus resume offset)
    pub bytes: u64,
    /// Total file size announced by the server
    pub size: u64,
    /// Wall-clock duration of the transfer
    pub elapsed: Duration,
    /// Whole-file BLAKE3 digest; checked against the received bytes for
    /// downloads that started at byte 0, announced-only on resume
    pub hash: [u8; 32],
}

impl TransferReport {
    /// Average receive rate in bytes per second
    #[must_use]
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes as f64 / secs
        } else {
            0.0
        }
    }
}

/// Mirror-peer client
pub struct FileClient {
    config: ClientConfig,
}

impl FileClient {
    /// Create a client for the given configuration
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Dial the source peer and perform the handshake
    ///
    /// # Errors
    ///
    /// Fails on connect errors, on a non-Handshake reply or when the
    /// peer goes silent past the idle deadline.
    pub async fn connect(&self) -> Result<Connection> {
        let stream = TcpStream::connect(self.config.peer_addr).await?;
        let (rd, wr) = stream.into_split();
        let mut reader = FrameReader::with_max_body(rd, self.config.transfer.max_frame_body);
        let mut writer = FrameWriter::new(wr);

        writer
            .write_message(&Message::Handshake {
                version: PROTOCOL_VERSION,
                server_id: 0,
                client_id: self.config.instance_id,
            })
            .await?;

        let reply = timeout(self.config.transfer.io_timeout, reader.read_message())
            .await
            .map_err(|_| TransferError::Timeout("handshake reply"))??;
        let Message::Handshake {
            version, server_id, ..
        } = reply
        else {
            return Err(TransferError::Handshake("reply was not a handshake"));
        };

        if version != PROTOCOL_VERSION {
            tracing::warn!(ours = PROTOCOL_VERSION, theirs = version, "protocol version skew");
        }
        tracing::debug!(
            peer = %self.config.peer_addr,
            server_id = format_args!("{server_id:08x}"),
            "connected"
        );

        Ok(Connection {
            reader,
            writer,
            config: self.config.clone(),
            server_id,
        })
    }
}

/// One established connection to the source peer
pub struct Connection {
    reader: FrameReader<OwnedReadHalf>,
    writer: FrameWriter<OwnedWriteHalf>,
    config: ClientConfig,
    server_id: u32,
}

impl Connection {
    /// Instance id the server announced in its handshake
    #[must_use]
    pub fn server_id(&self) -> u32 {
        self.server_id
    }

    /// Download a file from byte 0
    ///
    /// # Errors
    ///
    /// See [`Connection::download_with`].
    pub async fn download(&mut self, path: &str) -> Result<TransferReport> {
        self.download_with(path, 0, |_| {}).await
    }

    /// Resume a download from `offset`.
    ///
    /// The destination receives only the bytes from `offset` onward; the
    /// caller prepends the already-held prefix and checks the whole-file
    /// digest after reassembly.
    ///
    /// # Errors
    ///
    /// See [`Connection::download_with`].
    pub async fn download_from(&mut self, path: &str, offset: u64) -> Result<TransferReport> {
        self.download_with(path, offset, |_| {}).await
    }

    /// Download `path` starting at `offset`, reporting cumulative bytes
    /// received through `progress`.
    ///
    /// Downloads from byte 0 are digest-verified before they count as
    /// complete. For `offset > 0` the destination holds only the tail,
    /// so the whole-file digest cannot be recomputed locally and the
    /// check is skipped.
    ///
    /// # Errors
    ///
    /// Surfaces server Error frames as [`TransferError::Remote`] (the
    /// connection stays usable), and fails the connection on protocol
    /// violations, session or offset mismatches, digest disagreement,
    /// timeouts and I/O errors.
    pub async fn download_with(
        &mut self,
        path: &str,
        offset: u64,
        mut progress: impl FnMut(u64),
    ) -> Result<TransferReport> {
        self.writer
            .write_message(&Message::FileRequest {
                path: path.to_string(),
                offset,
            })
            .await?;

        let (session_id, size, response_hash) = match self.read_frame("file response").await? {
            Message::FileResponse {
                status: Status::Ok,
                session_id,
                file_size,
                file_hash,
            } => (session_id, file_size, file_hash),
            Message::FileResponse { status, .. } => {
                return Err(TransferError::Remote {
                    code: status,
                    message: "transfer refused".to_string(),
                });
            }
            Message::Error { code, message } => {
                return Err(TransferError::Remote { code, message });
            }
            other => return Err(unexpected(&other)),
        };

        let start = Instant::now();
        let resumed = offset > 0;
        let dest = self.config.mirror_root.join(path);
        if let Some(parent) = dest.parent() {
            create_parents(parent).await?;
        }

        // Small files are held in memory and written only after the
        // digest matches; large files stream to disk with per-chunk acks
        let buffered = size <= self.config.transfer.mem_file_threshold;
        let mut buffer: Vec<u8> = Vec::new();
        let mut file: Option<File> = None;
        if buffered {
            buffer.reserve(size.saturating_sub(offset) as usize);
        } else {
            file = Some(File::create(&dest).await?);
        }

        let mut next_offset = offset;
        let mut received: u64 = 0;

        loop {
            match self.read_frame("file data").await? {
                Message::FileData {
                    session_id: sid,
                    offset: data_offset,
                    data,
                } => {
                    if sid != session_id {
                        return Err(TransferError::SessionMismatch {
                            expected: session_id,
                            got: sid,
                        });
                    }
                    if data_offset != next_offset {
                        return Err(TransferError::OffsetGap {
                            expected: next_offset,
                            got: data_offset,
                        });
                    }
                    next_offset += data.len() as u64;
                    received += data.len() as u64;

                    if let Some(file) = file.as_mut() {
                        file.write_all(&data).await?;
                        self.writer
                            .write_message(&Message::Acknowledge {
                                session_id,
                                offset: received,
                                status: Status::Ok,
                            })
                            .await?;
                    } else {
                        buffer.extend_from_slice(&data);
                    }
                    progress(received);
                }

                Message::FileComplete {
                    session_id: sid,
                    file_hash,
                } => {
                    if sid != session_id {
                        return Err(TransferError::SessionMismatch {
                            expected: session_id,
                            got: sid,
                        });
                    }
                    if file_hash != response_hash {
                        tracing::warn!(
                            session = session_id,
                            "completion digest differs from response digest"
                        );
                    }

                    // The announced digest covers the whole file. A
                    // resumed download only holds the tail, so it cannot
                    // be checked here; the caller reassembles the file
                    // before any whole-file comparison.
                    let hash = match file.take() {
                        // Direct path: sync, digest the artifact, discard
                        // it on mismatch
                        Some(f) => {
                            f.sync_all().await?;
                            drop(f);
                            if resumed {
                                tracing::debug!(
                                    session = session_id,
                                    offset,
                                    "resumed download, digest check deferred to reassembly"
                                );
                                file_hash
                            } else {
                                let actual = hasher::hash_file_async(&dest).await?;
                                if actual != file_hash {
                                    let _ = tokio::fs::remove_file(&dest).await;
                                    return Err(hash_mismatch(file_hash, actual));
                                }
                                actual
                            }
                        }
                        // Buffered path: verify before anything touches
                        // the filesystem
                        None => {
                            if resumed {
                                tracing::debug!(
                                    session = session_id,
                                    offset,
                                    "resumed download, digest check deferred to reassembly"
                                );
                            } else {
                                let actual = hasher::hash_bytes(&buffer);
                                if actual != file_hash {
                                    return Err(hash_mismatch(file_hash, actual));
                                }
                            }
                            let mut f = File::create(&dest).await?;
                            f.write_all(&buffer).await?;
                            f.sync_all().await?;
                            file_hash
                        }
                    };

                    // Tell the server we finalized so it can retire the
                    // session
                    self.writer
                        .write_message(&Message::FileComplete {
                            session_id,
                            file_hash: hash,
                        })
                        .await?;

                    let report = TransferReport {
                        path: path.to_string(),
                        bytes: received,
                        size,
                        elapsed: start.elapsed(),
                        hash,
                    };
                    tracing::info!(
                        path,
                        size,
                        bytes = received,
                        verified = !resumed,
                        throughput = format_args!("{:.1} MiB/s", report.throughput() / (1024.0 * 1024.0)),
                        "download complete"
                    );
                    return Ok(report);
                }

                Message::Error { code, message } => {
                    return Err(TransferError::Remote { code, message });
                }

                other => return Err(unexpected(&other)),
            }
        }
    }

    async fn read_frame(&mut self, what: &'static str) -> Result<Message> {
        timeout(self.config.transfer.io_timeout, self.reader.read_message())
            .await
            .map_err(|_| TransferError::Timeout(what))?
            .map_err(TransferError::from)
    }
}

fn unexpected(msg: &Message) -> TransferError {
    TransferError::UnexpectedMessage(match msg.msg_type() {
        mirror_proto::MessageType::Handshake => "handshake",
        mirror_proto::MessageType::FileRequest => "file request",
        mirror_proto::MessageType::FileResponse => "file response",
        mirror_proto::MessageType::FileData => "file data",
        mirror_proto::MessageType::FileComplete => "file complete",
        mirror_proto::MessageType::Error => "error",
        mirror_proto::MessageType::Acknowledge => "acknowledge",
    })
}

fn hash_mismatch(expected: [u8; 32], actual: [u8; 32]) -> TransferError {
    TransferError::HashMismatch {
        expected: hex::encode(expected),
        actual: hex::encode(actual),
    }
}

async fn create_parents(parent: &std::path::Path) -> Result<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o755);
    builder.create(parent).await?;
    Ok(())
}
