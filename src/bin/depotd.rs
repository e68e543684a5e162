use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;

use depot::cli::ServerOpts;
use depot::config::ServerConfig;
use depot::logger::{Logger, StderrLogger, Tee, TextLogger};

fn main() -> Result<()> {
    let opts = ServerOpts::parse();
    let config = ServerConfig::resolve(&opts)?;

    let upload_dir = config
        .upload_dir
        .as_ref()
        .context("upload directory not set (use --upload-dir or upload_dir in the config file)")?;
    if upload_dir.exists() && !upload_dir.is_dir() {
        anyhow::bail!("Error: Upload path is not a directory: {}", upload_dir.display());
    }

    println!("Starting depot server:");
    println!("  Upload dir: {}", upload_dir.display());
    println!("  Bind: {}", config.bind);
    println!("  Framing: {:?}", config.framing);
    if let Some(secs) = config.idle_timeout_secs {
        println!("  Idle timeout: {}s", secs);
    }

    if config.bind.starts_with("0.0.0.0") {
        eprintln!("WARNING: Binding to 0.0.0.0 exposes the server to all network interfaces");
        eprintln!("   Clients are identified by name only; there is no authentication or encryption");
        eprintln!("   Only use on trusted networks (LAN)");
        eprintln!();
    }

    let logger: Arc<dyn Logger> = match &config.log_file {
        Some(path) => Arc::new(Tee(
            StderrLogger,
            TextLogger::new(path).with_context(|| format!("open log file {}", path.display()))?,
        )),
        None => Arc::new(StderrLogger),
    };

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    rt.block_on(async {
        tokio::select! {
            res = depot::server::serve(&config, logger) => res,
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Interrupted, shutting down");
                Ok(())
            }
        }
    })
}
