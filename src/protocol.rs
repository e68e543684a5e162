//! Shared protocol constants for the depot command channel

/// Bulk transfers move in chunks of at most this many bytes.
pub const CHUNK_SIZE: usize = 1024;

/// Upper bound for a single legacy read of a text message.
pub const MESSAGE_READ_SIZE: usize = 1024;

// Literal tokens exchanged on the wire
pub const SIZE_ACK: &str = "SIZE_RECEIVED";
pub const END_MARKER: &str = "EOF";
pub const ERROR_PREFIX: &str = "ERROR:";
pub const OWNER_VALID: &str = "OWNER_VALID";

/// Joins owner and display name into a storage key / on-disk file name.
pub const STORAGE_SEPARATOR: char = '_';

/// Suffix for uploads that have not finished yet.
pub const PARTIAL_SUFFIX: &str = ".part";

pub const MAX_IDENTITY_LEN: usize = 64;

/// Common file-name limit on the upload filesystem.
pub const MAX_FILE_NAME_LEN: usize = 255;

// `<owner>_<name>.part` must fit in one file name
pub const MAX_NAME_LEN: usize = MAX_FILE_NAME_LEN - MAX_IDENTITY_LEN - 1 - PARTIAL_SUFFIX.len();

// Framed transport (protocol v2) header constants
pub const MAGIC: &[u8; 4] = b"DPOT";
pub const VERSION: u16 = 2;
pub const HEADER_LEN: usize = 11;

// Text frames are small; data frames never exceed CHUNK_SIZE. 64KB leaves room
// for long LIST replies while bounding allocation from a hostile header.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

// Frame type IDs (keep numeric stable)
pub mod frame {
    pub const TEXT: u8 = 1;
    pub const NOTICE: u8 = 2;
    pub const DATA: u8 = 3;
    pub const END: u8 = 4;
}

pub mod verbs {
    pub const UPLOAD: &str = "UPLOAD";
    pub const LIST: &str = "LIST";
    pub const DELETE: &str = "DELETE";
    pub const DOWNLOAD: &str = "DOWNLOAD";
    pub const CHECK_OWNER: &str = "CHECK_OWNER";
}

pub mod timeouts {
    // How long a connecting client waits for an identity rejection (ms)
    pub const IDENTITY_REPLY_MS: u64 = 200;

    // Connection establishment timeout (ms)
    pub const CONNECT_MS: u64 = 5_000;

    // Pause between a legacy command and the message that follows it (ms).
    // Legacy messages are not delimited, so back-to-back writes can coalesce.
    pub const LEGACY_SETTLE_MS: u64 = 50;

    // Legacy servers send nothing for an empty LIST; wait this long before
    // concluding the catalog is empty (ms)
    pub const LEGACY_EMPTY_REPLY_MS: u64 = 500;
}
