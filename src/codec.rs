//! Textual command codec
//!
//! Commands travel as a single space-separated line: `VERB arg1 arg2...`.
//! Names may contain spaces, so the final argument of every verb takes the
//! remainder of the line. Owners cannot contain whitespace (see
//! [`crate::catalog::validate_identity`]) which keeps `DOWNLOAD` unambiguous.

use crate::catalog::validate_display_name;
use crate::error::{DepotError, DepotResult};
use crate::protocol::verbs;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Upload { name: String },
    List,
    Delete { name: String },
    Download { owner: String, name: String },
    CheckOwner { owner: String },
}

impl Command {
    pub fn parse(line: &str) -> DepotResult<Command> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (verb, rest) = match line.split_once(' ') {
            Some((v, r)) => (v, r),
            None => (line, ""),
        };
        match verb {
            verbs::UPLOAD => Ok(Command::Upload { name: display_name_arg(verbs::UPLOAD, rest)? }),
            verbs::LIST => Ok(Command::List),
            verbs::DELETE => Ok(Command::Delete { name: display_name_arg(verbs::DELETE, rest)? }),
            verbs::DOWNLOAD => {
                let (owner, name) = rest.split_once(' ').unwrap_or((rest, ""));
                if owner.is_empty() {
                    return Err(DepotError::MalformedRequest("DOWNLOAD needs an owner and a file name".into()));
                }
                Ok(Command::Download {
                    owner: owner.to_string(),
                    name: display_name_arg(verbs::DOWNLOAD, name)?,
                })
            }
            verbs::CHECK_OWNER => {
                let owner = rest.split(' ').next().unwrap_or("");
                if owner.is_empty() {
                    return Err(DepotError::MalformedRequest("No owner specified.".into()));
                }
                Ok(Command::CheckOwner { owner: owner.to_string() })
            }
            other => Err(DepotError::UnknownCommand(other.to_string())),
        }
    }

    /// Canonical wire text. Never fails.
    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Upload { name } => write!(f, "{} {}", verbs::UPLOAD, name),
            Command::List => f.write_str(verbs::LIST),
            Command::Delete { name } => write!(f, "{} {}", verbs::DELETE, name),
            Command::Download { owner, name } => write!(f, "{} {} {}", verbs::DOWNLOAD, owner, name),
            Command::CheckOwner { owner } => write!(f, "{} {}", verbs::CHECK_OWNER, owner),
        }
    }
}

fn display_name_arg(verb: &str, rest: &str) -> DepotResult<String> {
    if rest.is_empty() {
        return Err(DepotError::MalformedRequest(format!("{} needs a file name", verb)));
    }
    validate_display_name(rest)?;
    Ok(rest.to_string())
}

pub fn encode_size(len: u64) -> String {
    len.to_string()
}

pub fn parse_size(text: &str) -> DepotResult<u64> {
    text.trim()
        .parse::<u64>()
        .map_err(|_| DepotError::InvalidSize(text.trim().to_string()))
}

/// True for replies following the `ERROR:` convention.
pub fn is_error_reply(text: &str) -> bool {
    text.starts_with(crate::protocol::ERROR_PREFIX)
}
