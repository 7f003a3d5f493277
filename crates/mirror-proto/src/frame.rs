//! Frame encoding and decoding for the mirror wire protocol.
//!
//! Each frame is a fixed 12-byte header followed by one body. The header
//! layout is magic (u32), message type (u16), body length (u32) and a
//! reserved word (u16) that MUST be zero on send and is ignored on
//! receive. Body length counts the body only, never the header.

use crate::error::ProtoError;
use crate::{HASH_SIZE, HEADER_SIZE, MAGIC};

/// Message types as defined by the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    /// Handshake request/response
    Handshake = 0x0001,
    /// File transfer request
    FileRequest = 0x0002,
    /// File transfer response
    FileResponse = 0x0003,
    /// File data chunk
    FileData = 0x0004,
    /// File transfer completion
    FileComplete = 0x0005,
    /// Error report
    Error = 0x0006,
    /// Receiver acknowledgment
    Acknowledge = 0x0007,
}

impl TryFrom<u16> for MessageType {
    type Error = ProtoError;

    fn try_from(value: u16) -> Result<Self, ProtoError> {
        match value {
            0x0001 => Ok(Self::Handshake),
            0x0002 => Ok(Self::FileRequest),
            0x0003 => Ok(Self::FileResponse),
            0x0004 => Ok(Self::FileData),
            0x0005 => Ok(Self::FileComplete),
            0x0006 => Ok(Self::Error),
            0x0007 => Ok(Self::Acknowledge),
            other => Err(ProtoError::UnknownType(other)),
        }
    }
}

/// Status codes carried by FileResponse, Error and Acknowledge frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Status {
    /// Success
    Ok = 0x0000,
    /// Transfer refused by policy
    Reject = 0x0001,
    /// Requested file does not exist
    NotFound = 0x0002,
    /// Failure on the sending side
    InternalError = 0x0003,
}

impl TryFrom<u16> for Status {
    type Error = ProtoError;

    fn try_from(value: u16) -> Result<Self, ProtoError> {
        match value {
            0x0000 => Ok(Self::Ok),
            0x0001 => Ok(Self::Reject),
            0x0002 => Ok(Self::NotFound),
            0x0003 => Ok(Self::InternalError),
            other => Err(ProtoError::UnknownStatus(other)),
        }
    }
}

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Message type of the body that follows
    pub msg_type: MessageType,
    /// Body length in bytes
    pub body_len: u32,
}

impl Header {
    /// Encode the header into its 12-byte wire form
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&MAGIC.to_be_bytes());
        buf[4..6].copy_from_slice(&(self.msg_type as u16).to_be_bytes());
        buf[6..10].copy_from_slice(&self.body_len.to_be_bytes());
        // bytes 10..12 reserved, already zero
        buf
    }

    /// Decode a header from exactly 12 bytes
    ///
    /// The reserved word is ignored. `max_body` bounds the declared body
    /// length; a larger value is rejected before any body is read.
    ///
    /// # Errors
    ///
    /// Returns `ProtoError::BadMagic` if the magic number is wrong,
    /// `ProtoError::UnknownType` for an unrecognized type and
    /// `ProtoError::BodyTooLarge` when the declared length exceeds
    /// `max_body`.
    pub fn decode(bytes: &[u8; HEADER_SIZE], max_body: usize) -> Result<Self, ProtoError> {
        let magic = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if magic != MAGIC {
            return Err(ProtoError::BadMagic(magic));
        }

        let msg_type = MessageType::try_from(u16::from_be_bytes([bytes[4], bytes[5]]))?;
        let body_len = u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);

        if body_len as usize > max_body {
            return Err(ProtoError::BodyTooLarge {
                len: body_len as usize,
                max: max_body,
            });
        }

        Ok(Self { msg_type, body_len })
    }
}

/// One protocol message, header plus decoded body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Connection-opening exchange of version and instance identifiers
    Handshake {
        /// Protocol version of the sender
        version: u16,
        /// Server instance id (zero when sent by a client)
        server_id: u32,
        /// Client instance id (zero in server replies)
        client_id: u32,
    },
    /// Request one file, starting at `offset` for resume
    FileRequest {
        /// Path relative to the peer's serving root
        path: String,
        /// Starting byte offset
        offset: u64,
    },
    /// Reply to a FileRequest
    FileResponse {
        /// Outcome of the request
        status: Status,
        /// Session id assigned by the server
        session_id: u32,
        /// Total file size in bytes
        file_size: u64,
        /// BLAKE3 digest of the whole file
        file_hash: [u8; HASH_SIZE],
    },
    /// One chunk of file content
    FileData {
        /// Session the chunk belongs to
        session_id: u32,
        /// Byte offset of this chunk within the file
        offset: u64,
        /// Chunk payload
        data: Vec<u8>,
    },
    /// Final frame of a session
    FileComplete {
        /// Session being completed
        session_id: u32,
        /// BLAKE3 digest of the whole file
        file_hash: [u8; HASH_SIZE],
    },
    /// Error report; the connection stays open
    Error {
        /// Error status code
        code: Status,
        /// Human-readable detail
        message: String,
    },
    /// Receiver progress report
    Acknowledge {
        /// Session being acknowledged
        session_id: u32,
        /// Bytes received so far
        offset: u64,
        /// Receiver-side status
        status: Status,
    },
}

impl Message {
    /// Wire type of this message
    #[must_use]
    pub fn msg_type(&self) -> MessageType {
        match self {
            Message::Handshake { .. } => MessageType::Handshake,
            Message::FileRequest { .. } => MessageType::FileRequest,
            Message::FileResponse { .. } => MessageType::FileResponse,
            Message::FileData { .. } => MessageType::FileData,
            Message::FileComplete { .. } => MessageType::FileComplete,
            Message::Error { .. } => MessageType::Error,
            Message::Acknowledge { .. } => MessageType::Acknowledge,
        }
    }

    /// Encode the message into a complete frame (header and body)
    ///
    /// # Errors
    ///
    /// Returns `ProtoError::OversizedField` when a path or error message
    /// exceeds `u16::MAX` bytes or a data chunk exceeds `u32::MAX` bytes.
    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        let body = self.encode_body()?;
        let header = Header {
            msg_type: self.msg_type(),
            body_len: body.len() as u32,
        };

        let mut frame = Vec::with_capacity(HEADER_SIZE + body.len());
        frame.extend_from_slice(&header.encode());
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    fn encode_body(&self) -> Result<Vec<u8>, ProtoError> {
        match self {
            Message::Handshake {
                version,
                server_id,
                client_id,
            } => {
                let mut buf = Vec::with_capacity(10);
                buf.extend_from_slice(&version.to_be_bytes());
                buf.extend_from_slice(&server_id.to_be_bytes());
                buf.extend_from_slice(&client_id.to_be_bytes());
                Ok(buf)
            }
            Message::FileRequest { path, offset } => {
                let path_bytes = path.as_bytes();
                if path_bytes.len() > u16::MAX as usize {
                    return Err(ProtoError::OversizedField("file request path"));
                }
                let mut buf = Vec::with_capacity(2 + path_bytes.len() + 8);
                buf.extend_from_slice(&(path_bytes.len() as u16).to_be_bytes());
                buf.extend_from_slice(path_bytes);
                buf.extend_from_slice(&offset.to_be_bytes());
                Ok(buf)
            }
            Message::FileResponse {
                status,
                session_id,
                file_size,
                file_hash,
            } => {
                let mut buf = Vec::with_capacity(46);
                buf.extend_from_slice(&(*status as u16).to_be_bytes());
                buf.extend_from_slice(&session_id.to_be_bytes());
                buf.extend_from_slice(&file_size.to_be_bytes());
                buf.extend_from_slice(file_hash);
                Ok(buf)
            }
            Message::FileData {
                session_id,
                offset,
                data,
            } => {
                if data.len() > u32::MAX as usize {
                    return Err(ProtoError::OversizedField("file data chunk"));
                }
                let mut buf = Vec::with_capacity(16 + data.len());
                buf.extend_from_slice(&session_id.to_be_bytes());
                buf.extend_from_slice(&offset.to_be_bytes());
                buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
                buf.extend_from_slice(data);
                Ok(buf)
            }
            Message::FileComplete {
                session_id,
                file_hash,
            } => {
                let mut buf = Vec::with_capacity(36);
                buf.extend_from_slice(&session_id.to_be_bytes());
                buf.extend_from_slice(file_hash);
                Ok(buf)
            }
            Message::Error { code, message } => {
                let msg_bytes = message.as_bytes();
                if msg_bytes.len() > u16::MAX as usize {
                    return Err(ProtoError::OversizedField("error message"));
                }
                let mut buf = Vec::with_capacity(4 + msg_bytes.len());
                buf.extend_from_slice(&(*code as u16).to_be_bytes());
                buf.extend_from_slice(&(msg_bytes.len() as u16).to_be_bytes());
                buf.extend_from_slice(msg_bytes);
                Ok(buf)
            }
            Message::Acknowledge {
                session_id,
                offset,
                status,
            } => {
                let mut buf = Vec::with_capacity(14);
                buf.extend_from_slice(&session_id.to_be_bytes());
                buf.extend_from_slice(&offset.to_be_bytes());
                buf.extend_from_slice(&(*status as u16).to_be_bytes());
                Ok(buf)
            }
        }
    }

    /// Decode one complete frame from a byte slice
    ///
    /// # Errors
    ///
    /// Fails with the same errors as [`Header::decode`] and
    /// [`Message::decode_body`], plus `ProtoError::ShortBody` when the
    /// slice does not contain the declared body.
    pub fn decode(buf: &[u8], max_body: usize) -> Result<Self, ProtoError> {
        if buf.len() < HEADER_SIZE {
            return Err(ProtoError::ShortBody {
                expected: HEADER_SIZE,
                actual: buf.len(),
            });
        }

        let mut header_bytes = [0u8; HEADER_SIZE];
        header_bytes.copy_from_slice(&buf[..HEADER_SIZE]);
        let header = Header::decode(&header_bytes, max_body)?;

        let body = &buf[HEADER_SIZE..];
        if body.len() < header.body_len as usize {
            return Err(ProtoError::ShortBody {
                expected: header.body_len as usize,
                actual: body.len(),
            });
        }

        Self::decode_body(header.msg_type, &body[..header.body_len as usize])
    }

    /// Decode a message body of a known type
    ///
    /// Trailing bytes after a well-formed body are ignored.
    ///
    /// # Errors
    ///
    /// Returns `ProtoError::ShortBody` when the body is smaller than the
    /// variant's fixed fields require, `ProtoError::UnknownStatus` for an
    /// unrecognized status code and `ProtoError::InvalidUtf8` for a
    /// non-UTF-8 path or error message.
    pub fn decode_body(msg_type: MessageType, body: &[u8]) -> Result<Self, ProtoError> {
        match msg_type {
            MessageType::Handshake => {
                ensure_len(body, 10)?;
                Ok(Message::Handshake {
                    version: read_u16(body, 0),
                    server_id: read_u32(body, 2),
                    client_id: read_u32(body, 6),
                })
            }
            MessageType::FileRequest => {
                ensure_len(body, 10)?;
                let path_len = read_u16(body, 0) as usize;
                ensure_len(body, 2 + path_len + 8)?;
                let path = std::str::from_utf8(&body[2..2 + path_len])
                    .map_err(|_| ProtoError::InvalidUtf8 { field: "path" })?
                    .to_string();
                Ok(Message::FileRequest {
                    path,
                    offset: read_u64(body, 2 + path_len),
                })
            }
            MessageType::FileResponse => {
                ensure_len(body, 46)?;
                let mut file_hash = [0u8; HASH_SIZE];
                file_hash.copy_from_slice(&body[14..14 + HASH_SIZE]);
                Ok(Message::FileResponse {
                    status: Status::try_from(read_u16(body, 0))?,
                    session_id: read_u32(body, 2),
                    file_size: read_u64(body, 6),
                    file_hash,
                })
            }
            MessageType::FileData => {
                ensure_len(body, 16)?;
                let data_len = read_u32(body, 12) as usize;
                ensure_len(body, 16 + data_len)?;
                Ok(Message::FileData {
                    session_id: read_u32(body, 0),
                    offset: read_u64(body, 4),
                    data: body[16..16 + data_len].to_vec(),
                })
            }
            MessageType::FileComplete => {
                ensure_len(body, 36)?;
                let mut file_hash = [0u8; HASH_SIZE];
                file_hash.copy_from_slice(&body[4..4 + HASH_SIZE]);
                Ok(Message::FileComplete {
                    session_id: read_u32(body, 0),
                    file_hash,
                })
            }
            MessageType::Error => {
                ensure_len(body, 4)?;
                let msg_len = read_u16(body, 2) as usize;
                ensure_len(body, 4 + msg_len)?;
                let message = std::str::from_utf8(&body[4..4 + msg_len])
                    .map_err(|_| ProtoError::InvalidUtf8 {
                        field: "error message",
                    })?
                    .to_string();
                Ok(Message::Error {
                    code: Status::try_from(read_u16(body, 0))?,
                    message,
                })
            }
            MessageType::Acknowledge => {
                ensure_len(body, 14)?;
                Ok(Message::Acknowledge {
                    session_id: read_u32(body, 0),
                    offset: read_u64(body, 4),
                    status: Status::try_from(read_u16(body, 12))?,
                })
            }
        }
    }
}

fn ensure_len(body: &[u8], expected: usize) -> Result<(), ProtoError> {
    if body.len() < expected {
        return Err(ProtoError::ShortBody {
            expected,
            actual: body.len(),
        });
    }
    Ok(())
}

fn read_u16(body: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([body[offset], body[offset + 1]])
}

fn read_u32(body: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        body[offset],
        body[offset + 1],
        body[offset + 2],
        body[offset + 3],
    ])
}

fn read_u64(body: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&body[offset..offset + 8]);
    u64::from_be_bytes(bytes)
}
