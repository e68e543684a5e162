//! depot - command-line client for a depot server

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;

use depot::cli::{ClientCommand, ClientOpts};
use depot::config::ClientConfig;
use depot::{ClientSession, DepotError, SessionEvent};

fn main() -> Result<()> {
    let opts = ClientOpts::parse();
    let cfg = ClientConfig::resolve(&opts)?;
    let name = cfg
        .name
        .clone()
        .context("client name required (use --name or name in the config file)")?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    rt.block_on(run(opts.command, cfg, name))
}

async fn run(command: ClientCommand, cfg: ClientConfig, name: String) -> Result<()> {
    let (mut session, events) = ClientSession::connect(&cfg.server, &name, cfg.framing)
        .await
        .with_context(|| format!("connect {} as '{}'", cfg.server, name))?;
    let printer = tokio::spawn(print_events(events));

    let result = match command {
        ClientCommand::Shell => shell(&mut session, &cfg).await,
        other => execute(&mut session, &cfg, other).await.map_err(anyhow::Error::from),
    };

    session.close().await.ok();
    printer.await.ok();
    result
}

async fn execute(session: &mut ClientSession, cfg: &ClientConfig, command: ClientCommand) -> Result<(), DepotError> {
    match command {
        ClientCommand::Upload { path } => {
            println!("{}", session.upload(&path).await?);
        }
        ClientCommand::List => {
            let entries = session.list().await?;
            if entries.is_empty() {
                println!("No files on the server.");
            }
            for entry in entries {
                println!("{}", entry);
            }
        }
        ClientCommand::Download { owner, name } => {
            session.download(&owner, &name, &cfg.download_dir).await?;
        }
        ClientCommand::Delete { name } => {
            println!("{}", session.delete(&name).await?);
        }
        ClientCommand::CheckOwner { owner } => {
            if session.check_owner(&owner).await? {
                println!("Owner '{}' is valid.", owner);
            } else {
                println!("Owner '{}' not found.", owner);
            }
        }
        ClientCommand::Shell => {}
    }
    Ok(())
}

const SHELL_HELP: &str = "commands: upload <path> | list | download <owner> <name> | delete <name> | check <owner> | quit";

async fn shell(session: &mut ClientSession, cfg: &ClientConfig) -> Result<()> {
    println!(
        "connected as '{}' ({:?} framing); {}",
        session.identity(),
        session.framing(),
        SHELL_HELP
    );
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
        let command = match verb {
            "" => continue,
            "quit" | "exit" => break,
            "help" => {
                println!("{}", SHELL_HELP);
                continue;
            }
            "upload" => ClientCommand::Upload { path: rest.into() },
            "list" => ClientCommand::List,
            "download" => match rest.split_once(' ') {
                Some((owner, name)) => ClientCommand::Download { owner: owner.into(), name: name.into() },
                None => {
                    println!("usage: download <owner> <name>");
                    continue;
                }
            },
            "delete" => ClientCommand::Delete { name: rest.into() },
            "check" => ClientCommand::CheckOwner { owner: rest.into() },
            other => {
                println!("unknown command '{}'; {}", other, SHELL_HELP);
                continue;
            }
        };
        if let Err(e) = execute(session, cfg, command).await {
            eprintln!("{}", e);
            if e.is_fatal() {
                return Err(e.into());
            }
        }
    }
    Ok(())
}

async fn print_events(mut events: UnboundedReceiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            // Replies are printed by the command that asked for them
            SessionEvent::Reply(_) => {}
            SessionEvent::Notice(text) | SessionEvent::Unsolicited(text) => println!("[server] {}", text),
            SessionEvent::Status(text) => println!("{}", text),
            SessionEvent::Error(text) => eprintln!("ERROR: {}", text),
            SessionEvent::Disconnected => eprintln!("disconnected from server"),
        }
    }
}
