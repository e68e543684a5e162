use anyhow::Result;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;

/// Server activity log. Every event has a no-op default.
pub trait Logger: Send + Sync {
    fn listening(&self, _bind: &str, _upload_dir: &Path) {}
    fn connected(&self, _client: &str, _peer: &str) {}
    fn rejected(&self, _client: &str, _peer: &str, _reason: &str) {}
    fn uploaded(&self, _client: &str, _name: &str, _bytes: u64) {}
    fn listed(&self, _client: &str, _entries: usize) {}
    fn deleted(&self, _client: &str, _name: &str) {}
    fn downloaded(&self, _client: &str, _owner: &str, _name: &str, _bytes: u64) {}
    fn notified(&self, _owner: &str, _name: &str) {}
    fn error(&self, _client: &str, _context: &str, _msg: &str) {}
    fn disconnected(&self, _client: &str) {}
}

/// Destination for rendered log lines.
pub trait LineSink: Send + Sync {
    fn line(&self, s: &str);
}

pub struct NoopLogger;
impl LineSink for NoopLogger {
    fn line(&self, _s: &str) {}
}

impl<T: LineSink> Logger for T {
    fn listening(&self, bind: &str, upload_dir: &Path) {
        self.line(&format!("LISTEN bind={} dir={}", bind, upload_dir.display()));
    }
    fn connected(&self, client: &str, peer: &str) {
        self.line(&format!("CONNECT client={} peer={}", client, peer));
    }
    fn rejected(&self, client: &str, peer: &str, reason: &str) {
        self.line(&format!("REJECT client={} peer={} reason={}", client, peer, reason));
    }
    fn uploaded(&self, client: &str, name: &str, bytes: u64) {
        self.line(&format!("UPLOAD client={} name={} bytes={}", client, name, bytes));
    }
    fn listed(&self, client: &str, entries: usize) {
        self.line(&format!("LIST client={} entries={}", client, entries));
    }
    fn deleted(&self, client: &str, name: &str) {
        self.line(&format!("DELETE client={} name={}", client, name));
    }
    fn downloaded(&self, client: &str, owner: &str, name: &str, bytes: u64) {
        self.line(&format!(
            "DOWNLOAD client={} owner={} name={} bytes={}",
            client, owner, name, bytes
        ));
    }
    fn notified(&self, owner: &str, name: &str) {
        self.line(&format!("NOTIFY owner={} name={}", owner, name));
    }
    fn error(&self, client: &str, context: &str, msg: &str) {
        self.line(&format!("ERROR client={} ctx={} msg={}", client, context, msg));
    }
    fn disconnected(&self, client: &str) {
        self.line(&format!("DISCONNECT client={}", client));
    }
}

pub struct StderrLogger;

impl LineSink for StderrLogger {
    fn line(&self, s: &str) {
        eprintln!("[{}] {}", Utc::now().to_rfc3339(), s);
    }
}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }
}

impl LineSink for TextLogger {
    fn line(&self, s: &str) {
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
        }
    }
}

/// Hands each line to a display front end over a channel.
pub struct ChannelLogger {
    tx: UnboundedSender<String>,
}

impl ChannelLogger {
    pub fn new(tx: UnboundedSender<String>) -> Self {
        Self { tx }
    }
}

impl LineSink for ChannelLogger {
    fn line(&self, s: &str) {
        // A closed display is not the server's problem
        let _ = self.tx.send(s.to_string());
    }
}

pub struct Tee<A, B>(pub A, pub B);

impl<A: LineSink, B: LineSink> LineSink for Tee<A, B> {
    fn line(&self, s: &str) {
        self.0.line(s);
        self.1.line(s);
    }
}
