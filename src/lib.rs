//! Depot: named clients upload, list, download and delete files held by a
//! central server, each file owned by the client that uploaded it.

pub mod catalog;
pub mod cli;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod journal;
pub mod logger;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod transfer;
pub mod wire;

pub use client::{ClientSession, SessionEvent};
pub use error::{DepotError, DepotResult};
pub use wire::Framing;
