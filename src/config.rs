//! TOML configuration for depotd and depot
//!
//! Files are optional. Every field has a default and command-line flags win
//! over file values.

use crate::cli::{ClientOpts, ServerOpts};
use crate::wire::Framing;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BIND: &str = "0.0.0.0:9040";
pub const DEFAULT_SERVER: &str = "127.0.0.1:9040";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub upload_dir: Option<PathBuf>,
    pub framing: Framing,
    pub log_file: Option<PathBuf>,
    pub journal: Option<PathBuf>,
    pub restore: bool,
    pub idle_timeout_secs: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            upload_dir: None,
            framing: Framing::default(),
            log_file: None,
            journal: None,
            restore: false,
            idle_timeout_secs: None,
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        toml::from_str(&data).with_context(|| format!("parse config {}", path.display()))
    }

    /// Config file (if any) overlaid with command-line flags.
    pub fn resolve(opts: &ServerOpts) -> Result<Self> {
        let base = match &opts.config {
            Some(p) => Self::load(p)?,
            None => Self::default(),
        };
        Ok(base.apply(opts))
    }

    pub fn apply(mut self, opts: &ServerOpts) -> Self {
        if let Some(b) = &opts.bind {
            self.bind = b.clone();
        }
        if let Some(d) = &opts.upload_dir {
            self.upload_dir = Some(d.clone());
        }
        if let Some(f) = opts.framing {
            self.framing = f;
        }
        if let Some(l) = &opts.log_file {
            self.log_file = Some(l.clone());
        }
        if let Some(j) = &opts.journal {
            self.journal = Some(j.clone());
        }
        if opts.restore {
            self.restore = true;
        }
        if let Some(t) = opts.idle_timeout_secs {
            self.idle_timeout_secs = Some(t);
        }
        self
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.filter(|s| *s > 0).map(Duration::from_secs)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server: String,
    pub name: Option<String>,
    pub framing: Framing,
    pub download_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            name: None,
            framing: Framing::default(),
            download_dir: PathBuf::from("."),
        }
    }
}

impl ClientConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        toml::from_str(&data).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn resolve(opts: &ClientOpts) -> Result<Self> {
        let mut cfg = match &opts.config {
            Some(p) => Self::load(p)?,
            None => Self::default(),
        };
        if let Some(s) = &opts.server {
            cfg.server = s.clone();
        }
        if let Some(n) = &opts.name {
            cfg.name = Some(n.clone());
        }
        if let Some(f) = opts.framing {
            cfg.framing = f;
        }
        if let Some(d) = &opts.download_dir {
            cfg.download_dir = d.clone();
        }
        Ok(cfg)
    }
}
