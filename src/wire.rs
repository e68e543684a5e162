//! Message transport underneath the command codec
//!
//! Two framings share one vocabulary:
//! - `Legacy` (v1): a message is whatever a single bounded read returns.
//!   Nothing separates messages, so replies, notices and data are
//!   indistinguishable on the receiving side.
//! - `Framed` (v2): every message carries an 11 byte header
//!   `MAGIC (4) | VERSION (2) | TYPE (1) | LENGTH (4)` followed by the payload.

use crate::error::{DepotError, DepotResult};
use crate::protocol::{frame, END_MARKER, HEADER_LEN, MAGIC, MAX_FRAME_SIZE, MESSAGE_READ_SIZE, VERSION};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// Protocol v1: unframed messages, one read per message
    Legacy,
    /// Protocol v2: length-prefixed, tagged frames
    #[default]
    Framed,
}

/// One inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Notice(String),
    Data(Vec<u8>),
    End,
    /// Legacy read of unknown kind
    Raw(Vec<u8>),
}

impl Frame {
    /// Text view of a message; data is decoded lossily.
    pub fn into_text(self) -> String {
        match self {
            Frame::Text(s) | Frame::Notice(s) => s,
            Frame::Data(b) | Frame::Raw(b) => String::from_utf8_lossy(&b).into_owned(),
            Frame::End => END_MARKER.to_string(),
        }
    }
}

/// Validate frame payload size against MAX_FRAME_SIZE
pub fn validate_frame_size(size: usize) -> DepotResult<()> {
    if size > MAX_FRAME_SIZE {
        return Err(DepotError::Protocol(format!(
            "frame payload too large: {} bytes (max: {})",
            size, MAX_FRAME_SIZE
        )));
    }
    Ok(())
}

/// Build frame header (11 bytes)
pub fn build_frame_header(frame_type: u8, payload_len: u32) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(MAGIC);
    header[4..6].copy_from_slice(&VERSION.to_le_bytes());
    header[6] = frame_type;
    header[7..11].copy_from_slice(&payload_len.to_le_bytes());
    header
}

/// Parse frame header
/// Returns: (frame_type, payload_length)
pub fn parse_frame_header(header: &[u8; HEADER_LEN]) -> DepotResult<(u8, u32)> {
    if &header[0..4] != MAGIC {
        return Err(DepotError::Protocol("invalid magic in frame header".into()));
    }
    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != VERSION {
        return Err(DepotError::Protocol(format!(
            "protocol version mismatch: got {}, expected {}",
            version, VERSION
        )));
    }
    let frame_type = header[6];
    let payload_len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]);
    Ok((frame_type, payload_len))
}

pub struct FrameReader<R> {
    inner: R,
    framing: Framing,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, framing: Framing) -> Self {
        Self { inner, framing }
    }

    /// Next message, or `None` once the peer has closed.
    pub async fn read_message(&mut self) -> DepotResult<Option<Frame>> {
        match self.framing {
            Framing::Legacy => Ok(self.read_raw(MESSAGE_READ_SIZE).await?.map(Frame::Raw)),
            Framing::Framed => self.read_frame().await,
        }
    }

    /// Next text message. Legacy reads are decoded lossily.
    pub async fn read_text(&mut self) -> DepotResult<Option<String>> {
        match self.read_message().await? {
            None => Ok(None),
            Some(Frame::Data(_)) => Err(DepotError::Protocol("expected text, got data frame".into())),
            Some(f) => Ok(Some(f.into_text())),
        }
    }

    /// Next chunk of bulk data, at most `max` bytes.
    pub async fn read_chunk(&mut self, max: usize) -> DepotResult<Option<Vec<u8>>> {
        match self.framing {
            Framing::Legacy => self.read_raw(max).await,
            Framing::Framed => match self.read_frame().await? {
                None => Ok(None),
                Some(Frame::Data(bytes)) if bytes.len() <= max => Ok(Some(bytes)),
                Some(Frame::Data(bytes)) => Err(DepotError::Protocol(format!(
                    "data frame of {} bytes exceeds remaining {}",
                    bytes.len(),
                    max
                ))),
                Some(other) => Err(DepotError::Protocol(format!("expected data frame, got {:?}", other))),
            },
        }
    }

    async fn read_raw(&mut self, max: usize) -> DepotResult<Option<Vec<u8>>> {
        let mut buf = vec![0u8; max.max(1)];
        let n = self.inner.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(buf))
    }

    async fn read_frame(&mut self) -> DepotResult<Option<Frame>> {
        let mut hdr = [0u8; HEADER_LEN];
        // A clean close only counts between frames
        let first = self.inner.read(&mut hdr[..1]).await?;
        if first == 0 {
            return Ok(None);
        }
        self.inner.read_exact(&mut hdr[1..]).await?;
        let (typ, len) = parse_frame_header(&hdr)?;
        let len = len as usize;
        validate_frame_size(len)?;
        let mut payload = vec![0u8; len];
        if len > 0 {
            self.inner.read_exact(&mut payload).await?;
        }
        let text = |p: Vec<u8>| String::from_utf8(p).map_err(|_| DepotError::Protocol("text frame is not UTF-8".into()));
        match typ {
            frame::TEXT => Ok(Some(Frame::Text(text(payload)?))),
            frame::NOTICE => Ok(Some(Frame::Notice(text(payload)?))),
            frame::DATA => Ok(Some(Frame::Data(payload))),
            frame::END => Ok(Some(Frame::End)),
            other => Err(DepotError::Protocol(format!("unknown frame type {}", other))),
        }
    }
}

pub struct FrameWriter<W> {
    inner: W,
    framing: Framing,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W, framing: Framing) -> Self {
        Self { inner, framing }
    }

    pub async fn write_text(&mut self, text: &str) -> DepotResult<()> {
        self.write(frame::TEXT, text.as_bytes()).await
    }

    pub async fn write_notice(&mut self, text: &str) -> DepotResult<()> {
        self.write(frame::NOTICE, text.as_bytes()).await
    }

    pub async fn write_data(&mut self, chunk: &[u8]) -> DepotResult<()> {
        self.write(frame::DATA, chunk).await
    }

    pub async fn write_end(&mut self) -> DepotResult<()> {
        match self.framing {
            Framing::Legacy => self.write(frame::END, END_MARKER.as_bytes()).await,
            Framing::Framed => self.write(frame::END, &[]).await,
        }
    }

    pub async fn shutdown(&mut self) -> DepotResult<()> {
        self.inner.shutdown().await?;
        Ok(())
    }

    async fn write(&mut self, t: u8, payload: &[u8]) -> DepotResult<()> {
        match self.framing {
            Framing::Legacy => {
                // An empty legacy message is indistinguishable from no message
                if !payload.is_empty() {
                    self.inner.write_all(payload).await?;
                }
            }
            Framing::Framed => {
                validate_frame_size(payload.len())?;
                let hdr = build_frame_header(t, payload.len() as u32);
                self.inner.write_all(&hdr).await?;
                if !payload.is_empty() {
                    self.inner.write_all(payload).await?;
                }
            }
        }
        self.inner.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[test]
    fn header_rejects_wrong_magic_and_version() {
        let mut header = build_frame_header(frame::TEXT, 100);
        assert_eq!(parse_frame_header(&header).unwrap(), (frame::TEXT, 100));

        header[0..4].copy_from_slice(b"WRNG");
        assert!(parse_frame_header(&header).is_err());

        let mut header = build_frame_header(frame::TEXT, 100);
        header[4..6].copy_from_slice(&999u16.to_le_bytes());
        assert!(parse_frame_header(&header).is_err());
    }

    #[test]
    fn frame_size_limit() {
        assert!(validate_frame_size(0).is_ok());
        assert!(validate_frame_size(MAX_FRAME_SIZE).is_ok());
        assert!(validate_frame_size(MAX_FRAME_SIZE + 1).is_err());
    }

    #[tokio::test]
    async fn framed_messages_keep_boundaries_and_kinds() {
        let (a, b) = duplex(4096);
        let mut w = FrameWriter::new(a, Framing::Framed);
        let mut r = FrameReader::new(b, Framing::Framed);

        w.write_text("UPLOAD notes.txt").await.unwrap();
        w.write_text("12").await.unwrap();
        w.write_notice("Your file 'x' was downloaded by bob.").await.unwrap();
        w.write_text("").await.unwrap();
        w.write_data(b"hello").await.unwrap();
        w.write_end().await.unwrap();
        drop(w);

        assert_eq!(r.read_message().await.unwrap(), Some(Frame::Text("UPLOAD notes.txt".into())));
        assert_eq!(r.read_text().await.unwrap().as_deref(), Some("12"));
        assert!(matches!(r.read_message().await.unwrap(), Some(Frame::Notice(_))));
        assert_eq!(r.read_text().await.unwrap().as_deref(), Some(""));
        assert_eq!(r.read_chunk(1024).await.unwrap(), Some(b"hello".to_vec()));
        assert_eq!(r.read_message().await.unwrap(), Some(Frame::End));
        assert_eq!(r.read_message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn framed_data_larger_than_remaining_is_a_protocol_error() {
        let (a, b) = duplex(4096);
        let mut w = FrameWriter::new(a, Framing::Framed);
        let mut r = FrameReader::new(b, Framing::Framed);
        w.write_data(&[7u8; 10]).await.unwrap();
        let err = r.read_chunk(4).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn legacy_reads_are_bounded_and_untagged() {
        let (a, b) = duplex(4096);
        let mut w = FrameWriter::new(a, Framing::Legacy);
        let mut r = FrameReader::new(b, Framing::Legacy);
        w.write_data(b"abcdef").await.unwrap();
        w.write_end().await.unwrap();
        drop(w);

        assert_eq!(r.read_chunk(4).await.unwrap(), Some(b"abcd".to_vec()));
        assert_eq!(r.read_chunk(2).await.unwrap(), Some(b"ef".to_vec()));
        let rest = r.read_message().await.unwrap().unwrap();
        assert_eq!(rest.into_text(), END_MARKER);
        assert_eq!(r.read_message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn truncated_header_is_an_io_error() {
        let (mut a, b) = duplex(64);
        a.write_all(&MAGIC[..]).await.unwrap();
        drop(a);
        let mut r = FrameReader::new(b, Framing::Framed);
        assert!(matches!(r.read_message().await, Err(DepotError::Io(_))));
    }
}
