//! Connection registry: client name -> live connection
//!
//! The registry never owns a connection. Each worker owns its writer behind an
//! `Arc` and the registry keeps a `Weak`, used only to push notifications.

use crate::error::{DepotError, DepotResult};
use crate::wire::FrameWriter;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::io::AsyncWrite;

pub type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;
pub type SharedWriter = Arc<tokio::sync::Mutex<FrameWriter<BoxedWrite>>>;

#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    id: u64,
    writer: Weak<tokio::sync::Mutex<FrameWriter<BoxedWrite>>>,
}

impl ConnectionHandle {
    pub fn new(id: u64, writer: &SharedWriter) -> Self {
        Self { id, writer: Arc::downgrade(writer) }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_live(&self) -> bool {
        self.writer.strong_count() > 0
    }

    /// Push an unsolicited message to this client.
    pub async fn notify(&self, text: &str) -> DepotResult<()> {
        let writer = self
            .writer
            .upgrade()
            .ok_or_else(|| DepotError::NotFound("connection already closed".into()))?;
        let mut w = writer.lock().await;
        w.write_notice(text).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Registered,
    NameInUse,
}

#[derive(Default)]
pub struct Registry {
    clients: Mutex<HashMap<String, ConnectionHandle>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomic check-and-insert. A record whose connection is gone does not
    /// block the name.
    pub fn register_if_absent(&self, identity: &str, handle: ConnectionHandle) -> Registration {
        let mut clients = self.clients.lock();
        if let Some(existing) = clients.get(identity) {
            if existing.is_live() {
                return Registration::NameInUse;
            }
        }
        clients.insert(identity.to_string(), handle);
        Registration::Registered
    }

    /// Remove `identity` only while `connection_id` is still the one on record.
    pub fn unregister(&self, identity: &str, connection_id: u64) -> bool {
        let mut clients = self.clients.lock();
        match clients.get(identity) {
            Some(h) if h.id == connection_id => {
                clients.remove(identity);
                true
            }
            _ => false,
        }
    }

    pub fn lookup(&self, identity: &str) -> DepotResult<ConnectionHandle> {
        self.clients
            .lock()
            .get(identity)
            .cloned()
            .ok_or_else(|| DepotError::NotFound(format!("client '{}' is not connected", identity)))
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.clients.lock().contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{Frame, FrameReader, Framing};
    use tokio::io::duplex;

    fn writer() -> (SharedWriter, tokio::io::DuplexStream) {
        let (a, b) = duplex(1024);
        let boxed: BoxedWrite = Box::new(a);
        (Arc::new(tokio::sync::Mutex::new(FrameWriter::new(boxed, Framing::Framed))), b)
    }

    #[test]
    fn second_registration_is_refused() {
        let reg = Registry::new();
        let (w1, _r1) = writer();
        let (w2, _r2) = writer();
        assert_eq!(reg.register_if_absent("alice", ConnectionHandle::new(1, &w1)), Registration::Registered);
        assert_eq!(reg.register_if_absent("alice", ConnectionHandle::new(2, &w2)), Registration::NameInUse);
        assert_eq!(reg.lookup("alice").unwrap().id(), 1);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn stale_unregister_leaves_new_owner_alone() {
        let reg = Registry::new();
        let (w1, _r1) = writer();
        reg.register_if_absent("alice", ConnectionHandle::new(1, &w1));
        assert!(reg.unregister("alice", 1));
        let (w2, _r2) = writer();
        reg.register_if_absent("alice", ConnectionHandle::new(2, &w2));
        assert!(!reg.unregister("alice", 1));
        assert_eq!(reg.lookup("alice").unwrap().id(), 2);
    }

    #[test]
    fn dead_connection_frees_the_name() {
        let reg = Registry::new();
        let (w1, _r1) = writer();
        reg.register_if_absent("alice", ConnectionHandle::new(1, &w1));
        drop(w1);
        let (w2, _r2) = writer();
        assert_eq!(reg.register_if_absent("alice", ConnectionHandle::new(2, &w2)), Registration::Registered);
    }

    #[test]
    fn concurrent_registration_admits_exactly_one() {
        let reg = Arc::new(Registry::new());
        let writers: Vec<_> = (0..8).map(|_| writer()).collect();
        let handles: Vec<_> = writers
            .iter()
            .enumerate()
            .map(|(i, (w, _))| ConnectionHandle::new(i as u64, w))
            .collect();
        let threads: Vec<_> = handles
            .into_iter()
            .map(|h| {
                let reg = reg.clone();
                std::thread::spawn(move || reg.register_if_absent("alice", h))
            })
            .collect();
        let wins = threads
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|r| *r == Registration::Registered)
            .count();
        assert_eq!(wins, 1);
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test]
    async fn notify_reaches_live_connection_only() {
        let reg = Registry::new();
        let (w, peer) = writer();
        reg.register_if_absent("alice", ConnectionHandle::new(7, &w));
        reg.lookup("alice").unwrap().notify("Your file 'a' was downloaded by bob.").await.unwrap();
        let mut r = FrameReader::new(peer, Framing::Framed);
        assert_eq!(
            r.read_message().await.unwrap(),
            Some(Frame::Notice("Your file 'a' was downloaded by bob.".into()))
        );

        let handle = reg.lookup("alice").unwrap();
        drop(w);
        assert!(matches!(handle.notify("late").await, Err(DepotError::NotFound(_))));
        assert!(matches!(reg.lookup("bob"), Err(DepotError::NotFound(_))));
    }
}
