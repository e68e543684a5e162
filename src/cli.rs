//! Clap option structs shared by the depot binaries

use crate::wire::Framing;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// depotd: serve an upload directory to named clients
#[derive(Clone, Debug, Default, Parser)]
#[command(name = "depotd", version, about = "Depot file drop server")]
pub struct ServerOpts {
    /// Bind address (host:port) [default: 0.0.0.0:9040]
    #[arg(long)]
    pub bind: Option<String>,

    /// Directory holding uploaded files
    #[arg(long)]
    pub upload_dir: Option<PathBuf>,

    /// Message framing on the wire
    #[arg(long, value_enum)]
    pub framing: Option<Framing>,

    /// Append server events to this file as well as stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Record transfers in a JSONL journal
    #[arg(long)]
    pub journal: Option<PathBuf>,

    /// Rebuild the catalog from files already in the upload directory
    #[arg(long)]
    pub restore: bool,

    /// Drop clients that stay silent this long
    #[arg(long)]
    pub idle_timeout_secs: Option<u64>,

    /// TOML config file; flags override its values
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// depot: talk to a depot server
#[derive(Clone, Debug, Parser)]
#[command(name = "depot", version, about = "Depot file drop client")]
pub struct ClientOpts {
    /// Server address (host:port) [default: 127.0.0.1:9040]
    #[arg(long, short)]
    pub server: Option<String>,

    /// Client name, unique among connected clients
    #[arg(long, short)]
    pub name: Option<String>,

    /// Message framing on the wire
    #[arg(long, value_enum)]
    pub framing: Option<Framing>,

    /// Where downloads are written [default: .]
    #[arg(long)]
    pub download_dir: Option<PathBuf>,

    /// TOML config file; flags override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: ClientCommand,
}

#[derive(Clone, Debug, Subcommand)]
pub enum ClientCommand {
    /// Upload a local file
    Upload { path: PathBuf },
    /// List files on the server
    List,
    /// Download a file uploaded by `owner`
    Download { owner: String, name: String },
    /// Delete one of your own files
    Delete { name: String },
    /// Check whether `owner` has uploaded anything
    CheckOwner { owner: String },
    /// Stay connected and read commands from stdin
    Shell,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_flags_parse() {
        let opts = ServerOpts::parse_from([
            "depotd",
            "--bind",
            "127.0.0.1:7000",
            "--upload-dir",
            "/srv/depot",
            "--framing",
            "legacy",
            "--restore",
        ]);
        assert_eq!(opts.bind.as_deref(), Some("127.0.0.1:7000"));
        assert_eq!(opts.framing, Some(Framing::Legacy));
        assert!(opts.restore);
        assert!(opts.journal.is_none());
    }

    #[test]
    fn client_subcommands_parse() {
        let opts = ClientOpts::parse_from(["depot", "-n", "bob", "download", "alice", "notes.txt"]);
        assert_eq!(opts.name.as_deref(), Some("bob"));
        match opts.command {
            ClientCommand::Download { owner, name } => {
                assert_eq!(owner, "alice");
                assert_eq!(name, "notes.txt");
            }
            other => panic!("unexpected {:?}", other),
        }
        let opts = ClientOpts::parse_from(["depot", "check-owner", "carol"]);
        assert!(matches!(opts.command, ClientCommand::CheckOwner { owner } if owner == "carol"));
    }
}
