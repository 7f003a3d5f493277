//! Async framing over a reliable byte stream.
//!
//! [`FrameReader`] and [`FrameWriter`] wrap the two halves of a TCP
//! connection and speak whole [`Message`]s. The reader enforces the
//! configured maximum body length before allocating a body buffer.

use crate::error::ProtoError;
use crate::frame::{Header, Message};
use crate::{DEFAULT_MAX_BODY_LEN, HEADER_SIZE};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Reads whole frames from an async byte stream
pub struct FrameReader<R> {
    inner: R,
    max_body: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a stream with the default body-length limit
    pub fn new(inner: R) -> Self {
        Self::with_max_body(inner, DEFAULT_MAX_BODY_LEN)
    }

    /// Wrap a stream with a custom body-length limit
    pub fn with_max_body(inner: R, max_body: usize) -> Self {
        Self { inner, max_body }
    }

    /// Read the next complete message
    ///
    /// # Errors
    ///
    /// Returns decoding errors from [`Header::decode`] and
    /// [`Message::decode_body`], or `ProtoError::Io` on transport failure.
    /// A peer that closes the stream between frames surfaces as an `Io`
    /// error for which [`ProtoError::is_disconnect`] is true.
    pub async fn read_message(&mut self) -> Result<Message, ProtoError> {
        let mut header_bytes = [0u8; HEADER_SIZE];
        self.inner.read_exact(&mut header_bytes).await?;
        let header = Header::decode(&header_bytes, self.max_body)?;

        let mut body = vec![0u8; header.body_len as usize];
        self.inner.read_exact(&mut body).await?;

        Message::decode_body(header.msg_type, &body)
    }
}

/// Writes whole frames to an async byte stream
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wrap a stream
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Encode and send one message, flushing the stream
    ///
    /// # Errors
    ///
    /// Returns `ProtoError::OversizedField` from encoding or
    /// `ProtoError::Io` on transport failure.
    pub async fn write_message(&mut self, msg: &Message) -> Result<(), ProtoError> {
        let frame = msg.encode()?;
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Shut down the write half of the stream
    ///
    /// # Errors
    ///
    /// Returns `ProtoError::Io` on transport failure.
    pub async fn shutdown(&mut self) -> Result<(), ProtoError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Status;
    use crate::HASH_SIZE;

    #[tokio::test]
    async fn test_stream_roundtrip() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server);

        let messages = vec![
            Message::Handshake {
                version: 1,
                server_id: 0,
                client_id: 42,
            },
            Message::FileRequest {
                path: "a/b.bin".to_string(),
                offset: 0,
            },
            Message::FileData {
                session_id: 1,
                offset: 0,
                data: vec![0xAA; 1024],
            },
            Message::FileComplete {
                session_id: 1,
                file_hash: [0x55; HASH_SIZE],
            },
        ];

        for msg in &messages {
            writer.write_message(msg).await.unwrap();
        }

        for expected in &messages {
            let got = reader.read_message().await.unwrap();
            assert_eq!(&got, expected);
        }
    }

    #[tokio::test]
    async fn test_reader_enforces_max_body() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::with_max_body(server, 256);

        writer
            .write_message(&Message::FileData {
                session_id: 1,
                offset: 0,
                data: vec![0u8; 1024],
            })
            .await
            .unwrap();

        assert!(matches!(
            reader.read_message().await,
            Err(ProtoError::BodyTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_clean_disconnect_detected() {
        let (client, server) = tokio::io::duplex(1024);
        let mut reader = FrameReader::new(server);
        drop(client);

        let err = reader.read_message().await.unwrap_err();
        assert!(err.is_disconnect());
    }

    #[tokio::test]
    async fn test_mid_frame_disconnect_is_error() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut reader = FrameReader::new(server);

        // Header promising a 14-byte body, then hang up
        let frame = Message::Acknowledge {
            session_id: 1,
            offset: 0,
            status: Status::Ok,
        }
        .encode()
        .unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut client, &frame[..HEADER_SIZE + 4])
            .await
            .unwrap();
        drop(client);

        assert!(reader.read_message().await.is_err());
    }
}
