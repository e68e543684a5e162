//! Client session: one connection, one background receive loop
//!
//! Every server message is read by the receive loop. Notices go straight to
//! the event channel; everything else is queued for the command currently in
//! flight. Whatever is still queued when a new command starts was never
//! claimed by a command and is handed to the event channel as unsolicited.
//!
//! With `Framing::Legacy` the server cannot tag notices, so a push that lands
//! between a command and its reply can be taken for that reply. That
//! ambiguity is inherent to protocol v1.

use crate::catalog::{parse_listing, validate_display_name, validate_identity, ListEntry};
use crate::codec::{is_error_reply, parse_size, Command};
use crate::error::{DepotError, DepotResult};
use crate::protocol::{timeouts, END_MARKER, OWNER_VALID};
use crate::transfer::{receive_to_file, send_stream, Endpoint};
use crate::wire::{Frame, FrameReader, FrameWriter, Framing};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// What the display side of a client gets to see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Reply consumed by a command
    Reply(String),
    /// Tagged server push (framed protocol only)
    Notice(String),
    /// Message no command claimed
    Unsolicited(String),
    /// Local progress, e.g. where a download was written
    Status(String),
    Error(String),
    Disconnected,
}

enum Inbound {
    Message(Frame),
    Closed(Option<String>),
}

struct InboundQueue {
    rx: UnboundedReceiver<Inbound>,
    backlog: VecDeque<Frame>,
    closed: bool,
}

impl InboundQueue {
    async fn next(&mut self) -> DepotResult<Option<Frame>> {
        if let Some(f) = self.backlog.pop_front() {
            return Ok(Some(f));
        }
        if self.closed {
            return Ok(None);
        }
        match self.rx.recv().await {
            Some(Inbound::Message(f)) => Ok(Some(f)),
            Some(Inbound::Closed(err)) => {
                self.closed = true;
                match err {
                    Some(e) => Err(DepotError::Io(std::io::Error::new(std::io::ErrorKind::ConnectionAborted, e))),
                    None => Ok(None),
                }
            }
            None => {
                self.closed = true;
                Ok(None)
            }
        }
    }

    /// Messages already received, without waiting.
    fn take_ready(&mut self) -> Vec<Frame> {
        let mut out: Vec<Frame> = self.backlog.drain(..).collect();
        while let Ok(inbound) = self.rx.try_recv() {
            match inbound {
                Inbound::Message(f) => out.push(f),
                Inbound::Closed(_) => self.closed = true,
            }
        }
        out
    }
}

struct SessionLink<'a> {
    writer: &'a mut FrameWriter<OwnedWriteHalf>,
    inbound: &'a mut InboundQueue,
}

impl Endpoint for SessionLink<'_> {
    async fn send_text(&mut self, text: &str) -> DepotResult<()> {
        self.writer.write_text(text).await
    }
    async fn send_chunk(&mut self, chunk: &[u8]) -> DepotResult<()> {
        self.writer.write_data(chunk).await
    }
    async fn recv_text(&mut self) -> DepotResult<Option<String>> {
        match self.inbound.next().await? {
            None => Ok(None),
            Some(Frame::Data(_)) => Err(DepotError::Protocol("expected a reply, got data".into())),
            Some(f) => Ok(Some(f.into_text())),
        }
    }
    async fn recv_chunk(&mut self, _max: usize) -> DepotResult<Option<Vec<u8>>> {
        match self.inbound.next().await? {
            None => Ok(None),
            Some(Frame::Data(b)) | Some(Frame::Raw(b)) => Ok(Some(b)),
            Some(other) => Err(DepotError::Protocol(format!("expected data, got {:?}", other))),
        }
    }
}

pub struct ClientSession {
    identity: String,
    framing: Framing,
    writer: FrameWriter<OwnedWriteHalf>,
    inbound: InboundQueue,
    events: UnboundedSender<SessionEvent>,
    reader_task: JoinHandle<()>,
}

impl ClientSession {
    /// Connect, announce `identity`, and start the receive loop.
    pub async fn connect(
        addr: &str,
        identity: &str,
        framing: Framing,
    ) -> DepotResult<(ClientSession, UnboundedReceiver<SessionEvent>)> {
        validate_identity(identity)?;
        let stream = match timeout(Duration::from_millis(timeouts::CONNECT_MS), TcpStream::connect(addr)).await {
            Ok(res) => res?,
            Err(_) => {
                return Err(DepotError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect {} timed out", addr),
                )))
            }
        };
        let _ = stream.set_nodelay(true);
        let (rd, wr) = stream.into_split();
        let mut reader = FrameReader::new(rd, framing);
        let mut writer = FrameWriter::new(wr, framing);
        writer.write_text(identity).await?;

        // The server only speaks up here to refuse us
        let mut early = None;
        match timeout(Duration::from_millis(timeouts::IDENTITY_REPLY_MS), reader.read_message()).await {
            Err(_) => {}
            Ok(Ok(Some(frame))) => {
                let text = frame.into_text();
                if is_error_reply(&text) {
                    return Err(classify_error_reply(&text));
                }
                early = Some(text);
            }
            Ok(Ok(None)) => {
                return Err(DepotError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionAborted,
                    "server closed the connection during handshake",
                )))
            }
            Ok(Err(e)) => return Err(e),
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        if let Some(text) = early {
            let _ = events_tx.send(SessionEvent::Unsolicited(text));
        }
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let reader_task = tokio::spawn(receive_loop(reader, inbound_tx, events_tx.clone()));

        let session = ClientSession {
            identity: identity.to_string(),
            framing,
            writer,
            inbound: InboundQueue { rx: inbound_rx, backlog: VecDeque::new(), closed: false },
            events: events_tx,
            reader_task,
        };
        Ok((session, events_rx))
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Upload a local file under its own file name.
    pub async fn upload(&mut self, path: &Path) -> DepotResult<String> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| DepotError::MalformedRequest(format!("no usable file name in {}", path.display())))?
            .to_string();
        validate_display_name(&name)?;
        let meta = tokio::fs::metadata(path).await.map_err(DepotError::Storage)?;
        if !meta.is_file() {
            return Err(DepotError::MalformedRequest(format!("{} is not a regular file", path.display())));
        }
        let mut file = tokio::fs::File::open(path).await.map_err(DepotError::Storage)?;

        self.begin(&Command::Upload { name: name.clone() }).await?;
        self.legacy_settle().await;
        let mut link = SessionLink { writer: &mut self.writer, inbound: &mut self.inbound };
        if let Err(e) = send_stream(&mut link, &mut file, meta.len()).await {
            if e.is_fatal() {
                // The server is still counting bytes; only hanging up ends the upload
                self.writer.shutdown().await.ok();
            }
            return Err(e);
        }
        self.expect_reply().await
    }

    pub async fn list(&mut self) -> DepotResult<Vec<ListEntry>> {
        self.begin(&Command::List).await?;
        let reply = match self.framing {
            Framing::Framed => self.expect_reply().await?,
            // v1 cannot carry an empty reply; silence means an empty catalog
            Framing::Legacy => match timeout(Duration::from_millis(timeouts::LEGACY_EMPTY_REPLY_MS), self.expect_reply()).await {
                Ok(res) => res?,
                Err(_) => String::new(),
            },
        };
        Ok(parse_listing(&reply))
    }

    /// Download `owner`'s file into `dest_dir`, returning the written path.
    pub async fn download(&mut self, owner: &str, name: &str, dest_dir: &Path) -> DepotResult<PathBuf> {
        validate_display_name(name)?;
        if !self.check_owner(owner).await? {
            return Err(DepotError::NotFound(format!("Owner '{}' not found.", owner)));
        }

        self.begin(&Command::Download { owner: owner.to_string(), name: name.to_string() }).await?;
        let first = self.expect_reply().await?;
        let size = parse_size(&first)
            .map_err(|_| DepotError::Protocol(format!("expected a file size, got '{}'", first)))?;

        let dest = dest_dir.join(name);
        let mut link = SessionLink { writer: &mut self.writer, inbound: &mut self.inbound };
        receive_to_file(&mut link, &dest, size).await?;
        if self.framing == Framing::Legacy {
            self.consume_legacy_marker().await;
        }
        self.emit(SessionEvent::Status(format!(
            "File '{}' downloaded successfully to {}",
            name,
            dest_dir.display()
        )));
        Ok(dest)
    }

    pub async fn delete(&mut self, name: &str) -> DepotResult<String> {
        validate_display_name(name)?;
        self.begin(&Command::Delete { name: name.to_string() }).await?;
        self.expect_reply().await
    }

    /// True when `owner` has at least one stored file.
    pub async fn check_owner(&mut self, owner: &str) -> DepotResult<bool> {
        self.begin(&Command::CheckOwner { owner: owner.to_string() }).await?;
        match self.expect_reply().await {
            Ok(reply) => Ok(reply == OWNER_VALID),
            Err(DepotError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Close the write side and wait for the receive loop to see the server hang up.
    pub async fn close(mut self) -> DepotResult<()> {
        self.writer.shutdown().await.ok();
        if timeout(Duration::from_secs(2), &mut self.reader_task).await.is_err() {
            self.reader_task.abort();
        }
        Ok(())
    }

    /// Forward anything unclaimed, then send `cmd`.
    async fn begin(&mut self, cmd: &Command) -> DepotResult<()> {
        for frame in self.inbound.take_ready() {
            let text = frame.into_text();
            if text != END_MARKER {
                self.emit(SessionEvent::Unsolicited(text));
            }
        }
        self.writer.write_text(&cmd.encode()).await
    }

    /// Next reply; `ERROR:` replies become errors.
    async fn expect_reply(&mut self) -> DepotResult<String> {
        let mut link = SessionLink { writer: &mut self.writer, inbound: &mut self.inbound };
        let reply = link.recv_text().await?.ok_or_else(|| {
            DepotError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "server closed the connection",
            ))
        })?;
        self.emit(SessionEvent::Reply(reply.clone()));
        if is_error_reply(&reply) {
            return Err(classify_error_reply(&reply));
        }
        Ok(reply)
    }

    // v1 messages are not delimited; give the server a moment so a command
    // and the size announcement that follows it arrive as separate reads
    async fn legacy_settle(&self) {
        if self.framing == Framing::Legacy {
            tokio::time::sleep(Duration::from_millis(timeouts::LEGACY_SETTLE_MS)).await;
        }
    }

    async fn consume_legacy_marker(&mut self) {
        if let Ok(Ok(Some(frame))) =
            timeout(Duration::from_millis(timeouts::LEGACY_SETTLE_MS), self.inbound.next()).await
        {
            if frame.clone().into_text() != END_MARKER {
                self.inbound.backlog.push_front(frame);
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

async fn receive_loop(
    mut reader: FrameReader<OwnedReadHalf>,
    inbound: UnboundedSender<Inbound>,
    events: UnboundedSender<SessionEvent>,
) {
    loop {
        match reader.read_message().await {
            Ok(Some(Frame::Notice(text))) => {
                let _ = events.send(SessionEvent::Notice(text));
            }
            Ok(Some(Frame::End)) => {}
            Ok(Some(frame)) => {
                // Nobody left to claim replies
                if inbound.send(Inbound::Message(frame)).is_err() {
                    break;
                }
            }
            Ok(None) => {
                let _ = inbound.send(Inbound::Closed(None));
                let _ = events.send(SessionEvent::Disconnected);
                break;
            }
            Err(e) => {
                let _ = inbound.send(Inbound::Closed(Some(e.to_string())));
                let _ = events.send(SessionEvent::Error(e.to_string()));
                let _ = events.send(SessionEvent::Disconnected);
                break;
            }
        }
    }
}

/// Map an `ERROR:` reply onto the error taxonomy by its wording.
pub fn classify_error_reply(reply: &str) -> DepotError {
    let lower = reply.to_ascii_lowercase();
    if lower.contains("already in use") {
        DepotError::NameInUse(reply.to_string())
    } else if lower.contains("invalid client name") {
        DepotError::InvalidName(reply.to_string())
    } else if lower.contains("not found") {
        DepotError::NotFound(reply.to_string())
    } else {
        DepotError::Server(reply.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_replies_map_to_taxonomy() {
        assert!(matches!(
            classify_error_reply("ERROR: Client name already in use."),
            DepotError::NameInUse(_)
        ));
        assert!(matches!(
            classify_error_reply("ERROR: File not found or not owned by you."),
            DepotError::NotFound(_)
        ));
        assert!(matches!(classify_error_reply("ERROR: Owner 'carol' not found."), DepotError::NotFound(_)));
        assert!(matches!(
            classify_error_reply("ERROR: Invalid client name: name contains '_'"),
            DepotError::InvalidName(_)
        ));
        assert!(matches!(classify_error_reply("ERROR: Unknown command."), DepotError::Server(_)));
    }

    #[tokio::test]
    async fn queued_messages_are_drained_in_order() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut queue = InboundQueue { rx, backlog: VecDeque::new(), closed: false };
        tx.send(Inbound::Message(Frame::Text("one".into()))).unwrap();
        tx.send(Inbound::Message(Frame::Raw(b"two".to_vec()))).unwrap();
        let ready = queue.take_ready();
        assert_eq!(ready.len(), 2);
        assert_eq!(ready[1].clone().into_text(), "two");

        tx.send(Inbound::Closed(None)).unwrap();
        assert!(queue.next().await.unwrap().is_none());
        assert!(queue.closed);
    }
}
