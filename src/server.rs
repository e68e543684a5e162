//! depot server: acceptor plus one session worker per connection
//!
//! A worker moves through three phases. `AwaitingIdentity` reads the client
//! name and registers it; `Active` reads and dispatches commands strictly in
//! order; `Terminated` releases the name (only if this connection still owns
//! it) and closes the socket.

use crate::catalog::{render_listing, validate_identity, Catalog, StorageKey};
use crate::codec::{parse_size, Command};
use crate::config::ServerConfig;
use crate::error::{DepotError, DepotResult};
use crate::journal::{JournalEntry, TransferJournal, TransferKind};
use crate::logger::Logger;
use crate::protocol::OWNER_VALID;
use crate::registry::{BoxedWrite, ConnectionHandle, Registration, Registry, SharedWriter};
use crate::transfer::{receive_to_file, send_stream, Endpoint};
use crate::wire::{FrameReader, FrameWriter, Framing};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::net::{TcpListener, TcpStream};

// Sync: a worker is borrowed across awaits inside its spawned task
pub type BoxedRead = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// Everything the workers share.
pub struct ServerState {
    pub catalog: Catalog,
    pub registry: Registry,
    framing: Framing,
    idle_timeout: Option<Duration>,
    logger: Arc<dyn Logger>,
    journal: Option<TransferJournal>,
    next_connection: AtomicU64,
}

impl ServerState {
    pub fn new(config: &ServerConfig, logger: Arc<dyn Logger>) -> Result<Self> {
        let dir = config
            .upload_dir
            .as_ref()
            .context("upload directory not set (use --upload-dir or upload_dir in the config file)")?;
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create upload directory {}", dir.display()))?;
        let dir = std::fs::canonicalize(dir)
            .with_context(|| format!("Failed to canonicalize upload directory: {}", dir.display()))?;
        let catalog = if config.restore {
            Catalog::restore(&dir).with_context(|| format!("restore catalog from {}", dir.display()))?
        } else {
            Catalog::new(&dir)
        };
        Ok(Self {
            catalog,
            registry: Registry::new(),
            framing: config.framing,
            idle_timeout: config.idle_timeout(),
            logger,
            journal: config.journal.as_ref().map(TransferJournal::new),
            next_connection: AtomicU64::new(1),
        })
    }

    pub fn upload_dir(&self) -> &Path {
        self.catalog.root()
    }
}

pub async fn serve(config: &ServerConfig, logger: Arc<dyn Logger>) -> Result<()> {
    let state = Arc::new(ServerState::new(config, logger)?);
    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("bind {}", config.bind))?;
    serve_listener(listener, state).await
}

/// Accept loop over an already bound listener.
pub async fn serve_listener(listener: TcpListener, state: Arc<ServerState>) -> Result<()> {
    let local = listener.local_addr()?;
    state.logger.listening(&local.to_string(), state.upload_dir());
    loop {
        let (stream, peer) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            handle_connection(stream, peer, state).await;
        });
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, state: Arc<ServerState>) {
    let _ = stream.set_nodelay(true);
    let (rd, wr) = stream.into_split();
    let reader: BoxedRead = Box::new(rd);
    let writer: BoxedWrite = Box::new(wr);
    let framing = state.framing;
    let worker = Worker {
        id: state.next_connection.fetch_add(1, Ordering::Relaxed),
        identity: String::new(),
        peer: peer.to_string(),
        reader: FrameReader::new(reader, framing),
        writer: Arc::new(tokio::sync::Mutex::new(FrameWriter::new(writer, framing))),
        state,
    };
    worker.run().await;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingIdentity,
    Active,
    Terminated { registered: bool },
}

struct Worker {
    id: u64,
    identity: String,
    peer: String,
    reader: FrameReader<BoxedRead>,
    writer: SharedWriter,
    state: Arc<ServerState>,
}

/// The worker's connection as seen by the transfer engine.
struct WorkerLink<'a> {
    reader: &'a mut FrameReader<BoxedRead>,
    writer: &'a SharedWriter,
}

impl Endpoint for WorkerLink<'_> {
    async fn send_text(&mut self, text: &str) -> DepotResult<()> {
        self.writer.lock().await.write_text(text).await
    }
    async fn send_chunk(&mut self, chunk: &[u8]) -> DepotResult<()> {
        self.writer.lock().await.write_data(chunk).await
    }
    async fn recv_text(&mut self) -> DepotResult<Option<String>> {
        self.reader.read_text().await
    }
    async fn recv_chunk(&mut self, max: usize) -> DepotResult<Option<Vec<u8>>> {
        self.reader.read_chunk(max).await
    }
}

impl Worker {
    async fn run(mut self) {
        let mut phase = Phase::AwaitingIdentity;
        loop {
            phase = match phase {
                Phase::AwaitingIdentity => self.await_identity().await,
                Phase::Active => self.next_command().await,
                Phase::Terminated { registered } => {
                    self.terminate(registered).await;
                    break;
                }
            };
        }
    }

    async fn await_identity(&mut self) -> Phase {
        let identity = match self.read_idle().await {
            Ok(Some(text)) => text.trim_end().to_string(),
            Ok(None) => return Phase::Terminated { registered: false },
            Err(e) => {
                self.state.logger.error("-", "identity", &e.to_string());
                return Phase::Terminated { registered: false };
            }
        };

        if let Err(e) = validate_identity(&identity) {
            self.state.logger.rejected(&identity, &self.peer, &e.to_string());
            self.reply(&e.reply()).await.ok();
            return Phase::Terminated { registered: false };
        }

        let handle = ConnectionHandle::new(self.id, &self.writer);
        match self.state.registry.register_if_absent(&identity, handle) {
            Registration::NameInUse => {
                let err = DepotError::NameInUse(identity.clone());
                self.state.logger.rejected(&identity, &self.peer, &err.to_string());
                self.reply(&err.reply()).await.ok();
                Phase::Terminated { registered: false }
            }
            Registration::Registered => {
                self.identity = identity;
                self.state.logger.connected(&self.identity, &self.peer);
                Phase::Active
            }
        }
    }

    async fn next_command(&mut self) -> Phase {
        let line = match self.read_idle().await {
            Ok(Some(line)) => line,
            Ok(None) => return Phase::Terminated { registered: true },
            Err(e) => {
                self.state.logger.error(&self.identity, "read", &e.to_string());
                return Phase::Terminated { registered: true };
            }
        };

        let outcome = match Command::parse(&line) {
            Ok(cmd) => self.dispatch(cmd).await,
            Err(e) => Err(e),
        };
        let sent = match outcome {
            Ok(Some(reply)) => self.reply(&reply).await,
            Ok(None) => Ok(()),
            Err(e) if e.is_fatal() => {
                self.state.logger.error(&self.identity, "command", &e.to_string());
                return Phase::Terminated { registered: true };
            }
            Err(e) => {
                self.state.logger.error(&self.identity, "command", &e.to_string());
                self.reply(&e.reply()).await
            }
        };
        match sent {
            Ok(()) => Phase::Active,
            Err(e) => {
                self.state.logger.error(&self.identity, "reply", &e.to_string());
                Phase::Terminated { registered: true }
            }
        }
    }

    async fn dispatch(&mut self, cmd: Command) -> DepotResult<Option<String>> {
        match cmd {
            Command::Upload { name } => self.upload(&name).await.map(Some),
            Command::List => Ok(Some(self.list())),
            Command::Delete { name } => self.delete(&name).await.map(Some),
            Command::Download { owner, name } => self.download(&owner, &name).await.map(|_| None),
            Command::CheckOwner { owner } => self.check_owner(&owner).map(Some),
        }
    }

    async fn upload(&mut self, name: &str) -> DepotResult<String> {
        let key = StorageKey::new(&self.identity, name);
        let size_text = self
            .reader
            .read_text()
            .await?
            .ok_or_else(|| DepotError::Io(std::io::ErrorKind::UnexpectedEof.into()))?;
        let expected = parse_size(&size_text)?;

        let partial = self.state.catalog.partial_path(&key);
        let final_path = self.state.catalog.storage_path(&key);
        let entry = JournalEntry::new(TransferKind::Upload, &self.identity, name, &self.identity);
        let mut link = WorkerLink { reader: &mut self.reader, writer: &self.writer };
        let result = async {
            let received = receive_to_file(&mut link, &partial, expected).await?;
            if let Err(e) = tokio::fs::rename(&partial, &final_path).await {
                tokio::fs::remove_file(&partial).await.ok();
                return Err(DepotError::Storage(e));
            }
            Ok::<u64, DepotError>(received)
        }
        .await;

        match result {
            Ok(received) => {
                let stored = self.state.catalog.stored_file(&self.identity, name, received);
                self.state.catalog.insert(stored);
                self.state.logger.uploaded(&self.identity, name, received);
                self.journal(entry.completed(received));
                Ok(format!("File {} uploaded successfully.", name))
            }
            Err(e) => {
                self.journal(entry.failed(&e));
                Err(e)
            }
        }
    }

    fn list(&self) -> String {
        let entries = self.state.catalog.list_all();
        self.state.logger.listed(&self.identity, entries.len());
        render_listing(&entries)
    }

    async fn delete(&mut self, name: &str) -> DepotResult<String> {
        let key = StorageKey::new(&self.identity, name);
        let stored = self
            .state
            .catalog
            .lookup(&key)
            .map_err(|_| DepotError::NotFound("File not found or not owned by you.".into()))?;
        // Bytes first: if they cannot be removed the entry stays
        match tokio::fs::remove_file(&stored.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(DepotError::Storage(e)),
        }
        self.state.catalog.remove_by_key(&key)?;
        self.state.logger.deleted(&self.identity, name);
        self.journal(
            JournalEntry::new(TransferKind::Delete, &self.identity, name, &self.identity)
                .completed(stored.byte_length),
        );
        Ok(format!("File {} deleted successfully.", name))
    }

    async fn download(&mut self, owner: &str, name: &str) -> DepotResult<()> {
        let key = StorageKey::new(owner, name);
        let stored = self.state.catalog.lookup(&key).map_err(|_| {
            DepotError::NotFound(format!("File '{}' not found for owner '{}'.", name, owner))
        })?;
        let mut file = tokio::fs::File::open(&stored.path).await.map_err(DepotError::Storage)?;

        let entry = JournalEntry::new(TransferKind::Download, owner, name, &self.identity);
        let mut link = WorkerLink { reader: &mut self.reader, writer: &self.writer };
        let sent = match send_stream(&mut link, &mut file, stored.byte_length).await {
            Ok(n) => n,
            Err(e) => {
                self.journal(entry.failed(&e));
                return Err(e);
            }
        };
        // Receivers count bytes; the marker is informational
        self.writer.lock().await.write_end().await?;
        self.state.logger.downloaded(&self.identity, owner, name, sent);
        self.journal(entry.completed(sent));
        self.notify_owner(owner, name);
        Ok(())
    }

    /// Best effort: never fails or delays the download itself.
    fn notify_owner(&self, owner: &str, name: &str) {
        let handle = match self.state.registry.lookup(owner) {
            Ok(h) => h,
            Err(_) => return,
        };
        let message = format!("Your file '{}' was downloaded by {}.", name, self.identity);
        let logger = self.state.logger.clone();
        let (owner, name) = (owner.to_string(), name.to_string());
        tokio::spawn(async move {
            match handle.notify(&message).await {
                Ok(()) => logger.notified(&owner, &name),
                Err(e) => logger.error(&owner, "notify", &e.to_string()),
            }
        });
    }

    fn check_owner(&self, owner: &str) -> DepotResult<String> {
        if self.state.catalog.exists_owner(owner) {
            Ok(OWNER_VALID.to_string())
        } else {
            Err(DepotError::NotFound(format!("Owner '{}' not found.", owner)))
        }
    }

    async fn terminate(&mut self, registered: bool) {
        if registered {
            self.state.registry.unregister(&self.identity, self.id);
            self.state.logger.disconnected(&self.identity);
        }
        self.writer.lock().await.shutdown().await.ok();
    }

    async fn reply(&self, text: &str) -> DepotResult<()> {
        self.writer.lock().await.write_text(text).await
    }

    /// Read the next message, giving up after the configured idle time.
    async fn read_idle(&mut self) -> DepotResult<Option<String>> {
        match self.state.idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.reader.read_text()).await {
                Ok(res) => res,
                Err(_) => {
                    self.state.logger.error(&self.identity, "idle", "idle timeout");
                    Ok(None)
                }
            },
            None => self.reader.read_text().await,
        }
    }

    fn journal(&self, entry: JournalEntry) {
        if let Some(j) = &self.state.journal {
            if let Err(e) = j.add_entry(&entry) {
                self.state.logger.error(&self.identity, "journal", &e.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::NoopLogger;

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn connection_task_is_send() {
        let root = tempfile::tempdir().unwrap();
        let config = ServerConfig { upload_dir: Some(root.path().to_path_buf()), ..ServerConfig::default() };
        let state = Arc::new(ServerState::new(&config, Arc::new(NoopLogger)).unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (stream, peer) = listener.accept().await.unwrap();

        let task = handle_connection(stream, peer, state.clone());
        assert_send(&task);
        drop(client);
        task.await;
        assert!(state.registry.is_empty());
    }
}
