//! Server session engine.
//!
//! The listener accepts indefinitely and spawns one task per connection.
//! A connection must open with a Handshake; afterwards the command loop
//! serves FileRequest, Acknowledge and FileComplete frames. Each honored
//! request gets a session and a dedicated streaming task that owns the
//! file handle; command-loop replies and streamed data share one writer
//! behind an async mutex so frames never interleave on the wire.

use crate::config::ServerConfig;
use crate::error::{Result, TransferError};
use crate::hasher;
use crate::session::{Session, SessionTable};
use mirror_proto::{FrameReader, FrameWriter, Message, PROTOCOL_VERSION, Status};
use std::io::SeekFrom;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time::timeout;

type SharedWriter = Arc<Mutex<FrameWriter<OwnedWriteHalf>>>;

/// Source-peer server: accepts mirror connections and streams files
pub struct FileServer {
    config: ServerConfig,
    sessions: Arc<SessionTable>,
}

impl FileServer {
    /// Create a server for the given configuration
    #[must_use]
    pub fn new(config: ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            sessions: Arc::new(SessionTable::new()),
        })
    }

    /// Session table, exposed for introspection
    #[must_use]
    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    /// Bind the configured address and serve until the task is dropped
    ///
    /// # Errors
    ///
    /// Fails when the listener cannot bind. Accept errors are logged and
    /// the loop continues.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener
    ///
    /// # Errors
    ///
    /// Fails only when the listener's local address cannot be read;
    /// per-connection failures never escape their task.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        tracing::info!(
            addr = %listener.local_addr()?,
            root = %self.config.serving_root.display(),
            "serving"
        );

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(err) = server.handle_connection(stream, peer).await {
                            tracing::debug!(%peer, %err, "connection closed with error");
                        }
                    });
                }
                Err(err) => {
                    tracing::warn!(%err, "accept failed");
                }
            }
        }
    }

    async fn handle_connection(
        self: Arc<Self>,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<()> {
        let (rd, wr) = stream.into_split();
        let mut reader = FrameReader::with_max_body(rd, self.config.transfer.max_frame_body);
        let writer: SharedWriter = Arc::new(Mutex::new(FrameWriter::new(wr)));

        // First frame must be a handshake; anything else closes without reply
        let first = match self.read_frame(&mut reader).await {
            Ok(msg) => msg,
            Err(TransferError::Proto(e)) if e.is_disconnect() => return Ok(()),
            Err(err) => return Err(err),
        };
        let Message::Handshake {
            version, client_id, ..
        } = first
        else {
            tracing::warn!(%peer, "first frame was not a handshake, closing");
            return Ok(());
        };
        tracing::debug!(%peer, version, client_id = format_args!("{client_id:08x}"), "handshake");

        // Reply agrees on version; client id is echoed as zero
        writer
            .lock()
            .await
            .write_message(&Message::Handshake {
                version: PROTOCOL_VERSION,
                server_id: self.config.instance_id,
                client_id: 0,
            })
            .await?;

        let mut conn_sessions: Vec<u32> = Vec::new();
        let result = self
            .command_loop(&mut reader, &writer, &mut conn_sessions, peer)
            .await;

        // Sessions never outlive their connection
        for id in conn_sessions {
            if self.sessions.remove(id).is_some() {
                tracing::debug!(session = id, "session dropped with connection");
            }
        }

        result
    }

    async fn command_loop(
        &self,
        reader: &mut FrameReader<OwnedReadHalf>,
        writer: &SharedWriter,
        conn_sessions: &mut Vec<u32>,
        peer: SocketAddr,
    ) -> Result<()> {
        loop {
            let msg = match self.read_frame(reader).await {
                Ok(msg) => msg,
                Err(TransferError::Proto(e)) if e.is_disconnect() => {
                    tracing::debug!(%peer, "peer disconnected");
                    return Ok(());
                }
                Err(err) => return Err(err),
            };

            match msg {
                Message::FileRequest { path, offset } => {
                    self.handle_file_request(writer, conn_sessions, &path, offset)
                        .await?;
                }
                Message::Acknowledge {
                    session_id, offset, ..
                } => match self.sessions.get(session_id) {
                    Some(session) => {
                        session.record_ack(offset);
                        tracing::trace!(session = session_id, offset, "ack");
                    }
                    None => tracing::trace!(session = session_id, "ack for unknown session"),
                },
                Message::FileComplete { session_id, .. } => {
                    if self.sessions.remove(session_id).is_some() {
                        tracing::debug!(session = session_id, "client finalized");
                    }
                    conn_sessions.retain(|id| *id != session_id);
                }
                other => {
                    tracing::warn!(%peer, msg_type = ?other.msg_type(), "unexpected frame, ignoring");
                }
            }
        }
    }

    async fn handle_file_request(
        &self,
        writer: &SharedWriter,
        conn_sessions: &mut Vec<u32>,
        path: &str,
        offset: u64,
    ) -> Result<()> {
        let Some(abs) = resolve_request_path(&self.config.serving_root, path) else {
            tracing::warn!(path, "rejected path escaping serving root");
            return self
                .send_error(writer, Status::Reject, "path escapes serving root")
                .await;
        };

        let meta = match tokio::fs::metadata(&abs).await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => {
                return self
                    .send_error(writer, Status::Reject, &format!("not a regular file: {path}"))
                    .await;
            }
            Err(_) => {
                return self
                    .send_error(writer, Status::NotFound, &format!("no such file: {path}"))
                    .await;
            }
        };

        let size = meta.len();
        if offset > size {
            return self
                .send_error(writer, Status::Reject, "offset beyond end of file")
                .await;
        }

        // Digest computed eagerly so both FileResponse and FileComplete
        // carry it
        let hash = match hasher::hash_file_async(&abs).await {
            Ok(hash) => hash,
            Err(err) => {
                tracing::error!(path, %err, "hashing failed");
                return self
                    .send_error(writer, Status::InternalError, "cannot hash file")
                    .await;
            }
        };

        let mut file = match File::open(&abs).await {
            Ok(file) => file,
            Err(err) => {
                tracing::error!(path, %err, "open failed");
                return self
                    .send_error(writer, Status::InternalError, "cannot open file")
                    .await;
            }
        };
        file.seek(SeekFrom::Start(offset)).await?;

        let id = self.sessions.next_id();
        let session = Arc::new(Session::new(id, abs, size, hash));
        self.sessions.insert(Arc::clone(&session));
        conn_sessions.push(id);

        writer
            .lock()
            .await
            .write_message(&Message::FileResponse {
                status: Status::Ok,
                session_id: id,
                file_size: size,
                file_hash: hash,
            })
            .await?;
        tracing::info!(
            session = id,
            path,
            size,
            offset,
            hash = %hex::encode(hash),
            "session opened"
        );

        let sessions = Arc::clone(&self.sessions);
        let writer = Arc::clone(writer);
        let chunk_size = self.config.transfer.chunk_size;
        tokio::spawn(stream_file(file, offset, session, sessions, writer, chunk_size));

        Ok(())
    }

    async fn send_error(&self, writer: &SharedWriter, code: Status, message: &str) -> Result<()> {
        writer
            .lock()
            .await
            .write_message(&Message::Error {
                code,
                message: message.to_string(),
            })
            .await?;
        Ok(())
    }

    async fn read_frame(&self, reader: &mut FrameReader<OwnedReadHalf>) -> Result<Message> {
        timeout(self.config.transfer.io_timeout, reader.read_message())
            .await
            .map_err(|_| TransferError::Timeout("next frame"))?
            .map_err(TransferError::from)
    }
}

/// Stream one file as FileData frames followed by FileComplete.
///
/// The task owns the handle; nothing else reads it. Offsets are emitted
/// strictly increasing and contiguous from the requested start.
async fn stream_file(
    mut file: File,
    start: u64,
    session: Arc<Session>,
    sessions: Arc<SessionTable>,
    writer: SharedWriter,
    chunk_size: usize,
) {
    let mut offset = start;
    let mut buf = vec![0u8; chunk_size];

    loop {
        let n = match file.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                tracing::error!(session = session.id, %err, "read failed mid-stream");
                let _ = writer
                    .lock()
                    .await
                    .write_message(&Message::Error {
                        code: Status::InternalError,
                        message: "read failed while streaming".to_string(),
                    })
                    .await;
                sessions.remove(session.id);
                return;
            }
        };

        let frame = Message::FileData {
            session_id: session.id,
            offset,
            data: buf[..n].to_vec(),
        };
        if let Err(err) = writer.lock().await.write_message(&frame).await {
            tracing::debug!(session = session.id, %err, "connection lost mid-stream");
            sessions.remove(session.id);
            return;
        }
        offset += n as u64;
    }

    let done = Message::FileComplete {
        session_id: session.id,
        file_hash: session.hash,
    };
    if let Err(err) = writer.lock().await.write_message(&done).await {
        tracing::debug!(session = session.id, %err, "connection lost at completion");
        sessions.remove(session.id);
        return;
    }

    tracing::debug!(session = session.id, bytes = offset - start, "streamed to EOF");
    // The session stays in the table until the client's FileComplete or
    // connection teardown removes it
}

/// Resolve a requested path against the serving root.
///
/// Absolute paths and any non-normal component (`..`, `.`, prefixes) are
/// refused so a request can never escape the root.
fn resolve_request_path(root: &Path, requested: &str) -> Option<PathBuf> {
    let rel = Path::new(requested);
    if rel.is_absolute() {
        return None;
    }

    let mut clean = PathBuf::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            _ => return None,
        }
    }
    if clean.as_os_str().is_empty() {
        return None;
    }

    Some(root.join(clean))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_plain_paths() {
        let root = Path::new("/srv/data");
        assert_eq!(
            resolve_request_path(root, "a.bin"),
            Some(PathBuf::from("/srv/data/a.bin"))
        );
        assert_eq!(
            resolve_request_path(root, "sub/dir/b.bin"),
            Some(PathBuf::from("/srv/data/sub/dir/b.bin"))
        );
    }

    #[test]
    fn test_resolve_rejects_escapes() {
        let root = Path::new("/srv/data");
        assert_eq!(resolve_request_path(root, "../etc/passwd"), None);
        assert_eq!(resolve_request_path(root, "sub/../../etc/passwd"), None);
        assert_eq!(resolve_request_path(root, "/etc/passwd"), None);
        assert_eq!(resolve_request_path(root, "./x"), None);
        assert_eq!(resolve_request_path(root, ""), None);
    }
}
