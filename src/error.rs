//! Error taxonomy shared by server workers, the transfer engine and client sessions

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DepotError {
    #[error("Client name already in use.")]
    NameInUse(String),

    #[error("Invalid client name: {0}")]
    InvalidName(String),

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Invalid file size '{0}'.")]
    InvalidSize(String),

    #[error("Unknown command.")]
    UnknownCommand(String),

    #[error("{0}")]
    NotFound(String),

    #[error("transfer not accepted: {0}")]
    TransferRejected(String),

    /// Sender gave up after the size was acknowledged; the peer is still
    /// waiting for bytes, so the connection cannot carry another message.
    #[error("transfer aborted: {0}")]
    TransferAborted(String),

    #[error("incomplete transfer: received {received} of {expected} bytes")]
    IncompleteTransfer { expected: u64, received: u64 },

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("server replied: {0}")]
    Server(String),

    /// Local file failure; the connection itself is still healthy
    #[error("storage error: {0}")]
    Storage(std::io::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DepotError {
    /// Errors that leave the connection unusable and end its session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DepotError::Io(_) | DepotError::Protocol(_) | DepotError::TransferAborted(_))
    }

    /// Text sent back to a client, always carrying the `ERROR:` prefix.
    pub fn reply(&self) -> String {
        format!("{} {}", crate::protocol::ERROR_PREFIX, self)
    }
}

pub type DepotResult<T> = std::result::Result<T, DepotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_io_and_protocol_are_fatal() {
        let io = DepotError::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"));
        assert!(io.is_fatal());
        assert!(DepotError::Protocol("bad magic".into()).is_fatal());
        assert!(!DepotError::NotFound("x".into()).is_fatal());
        assert!(!DepotError::IncompleteTransfer { expected: 4, received: 2 }.is_fatal());
        assert!(!DepotError::UnknownCommand("FOO".into()).is_fatal());
        let disk = DepotError::Storage(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "ro"));
        assert!(!disk.is_fatal());
        assert!(DepotError::TransferAborted("source ended".into()).is_fatal());
        assert!(!DepotError::InvalidSize("x".into()).is_fatal());
    }

    #[test]
    fn replies_carry_error_prefix() {
        assert_eq!(
            DepotError::NameInUse("alice".into()).reply(),
            "ERROR: Client name already in use."
        );
        assert_eq!(DepotError::UnknownCommand("FOO".into()).reply(), "ERROR: Unknown command.");
        assert_eq!(
            DepotError::MalformedRequest("UPLOAD needs a file name".into()).reply(),
            "ERROR: Malformed request: UPLOAD needs a file name"
        );
        assert_eq!(DepotError::InvalidSize("abc".into()).reply(), "ERROR: Invalid file size 'abc'.");
    }
}
