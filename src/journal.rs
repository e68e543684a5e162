//! Append-only JSONL journal of completed and failed transfers

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    Upload,
    Download,
    Delete,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Completed,
    Failed,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct JournalEntry {
    pub timestamp: String,
    pub transfer_id: String,
    pub kind: TransferKind,
    pub owner: String,
    pub name: String,
    /// Client that issued the request
    pub peer: String,
    pub status: TransferStatus,
    pub bytes: u64,
    pub error: Option<String>,
}

impl JournalEntry {
    pub fn new(kind: TransferKind, owner: &str, name: &str, peer: &str) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            transfer_id: uuid::Uuid::new_v4().to_string(),
            kind,
            owner: owner.to_string(),
            name: name.to_string(),
            peer: peer.to_string(),
            status: TransferStatus::Completed,
            bytes: 0,
            error: None,
        }
    }

    pub fn completed(mut self, bytes: u64) -> Self {
        self.status = TransferStatus::Completed;
        self.bytes = bytes;
        self
    }

    pub fn failed(mut self, error: impl ToString) -> Self {
        self.status = TransferStatus::Failed;
        self.error = Some(error.to_string());
        self
    }
}

pub struct TransferJournal {
    path: PathBuf,
    // Workers append concurrently; one line per entry must stay intact
    write_lock: Mutex<()>,
}

impl TransferJournal {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        TransferJournal { path: path.into(), write_lock: Mutex::new(()) }
    }

    pub fn add_entry(&self, entry: &JournalEntry) -> Result<()> {
        let _guard = self.write_lock.lock();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context("Failed to open transfer journal")?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, entry)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_log(&self) -> Result<Vec<JournalEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path).context("Failed to open transfer journal for reading")?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: JournalEntry = serde_json::from_str(&line)?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_survive_a_round_through_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let journal = TransferJournal::new(tmp.path().join("journal.jsonl"));
        assert!(journal.read_log().unwrap().is_empty());

        journal
            .add_entry(&JournalEntry::new(TransferKind::Upload, "alice", "notes.txt", "alice").completed(12))
            .unwrap();
        journal
            .add_entry(
                &JournalEntry::new(TransferKind::Upload, "alice", "big.iso", "alice")
                    .failed("incomplete transfer: received 10 of 20 bytes"),
            )
            .unwrap();

        let entries = journal.read_log().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].status, TransferStatus::Completed);
        assert_eq!(entries[0].bytes, 12);
        assert_eq!(entries[1].status, TransferStatus::Failed);
        assert!(entries[1].error.as_deref().unwrap().contains("incomplete"));
        assert_ne!(entries[0].transfer_id, entries[1].transfer_id);
    }

    #[test]
    fn kinds_serialize_lowercase() {
        let entry = JournalEntry::new(TransferKind::Download, "alice", "a", "bob").completed(1);
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"kind\":\"download\""));
        assert!(json.contains("\"status\":\"completed\""));
    }
}
