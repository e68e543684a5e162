//! Chunked transfer of a byte stream of known length
//!
//! Sender: announce the size, wait for `SIZE_RECEIVED`, then stream chunks of
//! at most CHUNK_SIZE bytes. Receiver: acknowledge, then count bytes until the
//! announced size is reached or the peer stops sending. Both halves run over
//! an [`Endpoint`] so the server worker and the client session share them.

use crate::codec::encode_size;
use crate::error::{DepotError, DepotResult};
use crate::protocol::{CHUNK_SIZE, SIZE_ACK};
use std::future::Future;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// A message-level view of one side of a connection.
pub trait Endpoint: Send {
    fn send_text(&mut self, text: &str) -> impl Future<Output = DepotResult<()>> + Send;
    fn send_chunk(&mut self, chunk: &[u8]) -> impl Future<Output = DepotResult<()>> + Send;
    /// `None` once the peer has closed.
    fn recv_text(&mut self) -> impl Future<Output = DepotResult<Option<String>>> + Send;
    /// At most `max` bytes in framed mode. Legacy peers may hand back more
    /// than asked for; callers must clamp.
    fn recv_chunk(&mut self, max: usize) -> impl Future<Output = DepotResult<Option<Vec<u8>>>> + Send;
}

pub async fn send_stream<E, S>(ep: &mut E, source: &mut S, byte_length: u64) -> DepotResult<u64>
where
    E: Endpoint,
    S: AsyncRead + Unpin + Send,
{
    ep.send_text(&encode_size(byte_length)).await?;
    match ep.recv_text().await? {
        Some(ack) if ack == SIZE_ACK => {}
        Some(other) => return Err(DepotError::TransferRejected(other)),
        None => return Err(DepotError::TransferRejected("connection closed before acknowledgement".into())),
    }

    // Past the ack the receiver only counts bytes. A source failure cannot be
    // reported in band; it aborts the transfer and the connection with it.
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut sent: u64 = 0;
    while sent < byte_length {
        let want = (byte_length - sent).min(CHUNK_SIZE as u64) as usize;
        let n = source
            .read(&mut buf[..want])
            .await
            .map_err(|e| DepotError::TransferAborted(format!("source read failed after {} bytes: {}", sent, e)))?;
        if n == 0 {
            return Err(DepotError::TransferAborted(format!(
                "source ended after {} of {} bytes",
                sent, byte_length
            )));
        }
        ep.send_chunk(&buf[..n]).await?;
        sent += n as u64;
    }
    Ok(sent)
}

/// Receive exactly `expected` bytes into `sink`. Removing a partial sink is
/// the caller's job; see [`receive_to_file`].
pub async fn receive_stream<E, K>(ep: &mut E, sink: &mut K, expected: u64) -> DepotResult<u64>
where
    E: Endpoint,
    K: AsyncWrite + Unpin + Send,
{
    ep.send_text(SIZE_ACK).await?;

    let mut received: u64 = 0;
    let mut sink_error: Option<std::io::Error> = None;
    while received < expected {
        let want = (expected - received).min(CHUNK_SIZE as u64) as usize;
        let Some(mut chunk) = ep.recv_chunk(want).await? else {
            break;
        };
        // Trailing bytes from a coalesced legacy read belong to the next message
        chunk.truncate(want);
        // After a sink failure keep draining so the connection stays in step
        if sink_error.is_none() {
            if let Err(e) = sink.write_all(&chunk).await {
                sink_error = Some(e);
            }
        }
        received += chunk.len() as u64;
    }
    if let Some(e) = sink_error {
        return Err(DepotError::Storage(e));
    }
    sink.flush().await.map_err(DepotError::Storage)?;

    if received != expected {
        return Err(DepotError::IncompleteTransfer { expected, received });
    }
    Ok(received)
}

/// Receive into a newly created file at `path`, synced to disk on success.
/// Any failure removes the file before the error is returned.
pub async fn receive_to_file<E: Endpoint>(ep: &mut E, path: &Path, expected: u64) -> DepotResult<u64> {
    let mut file = match tokio::fs::File::create(path).await {
        Ok(f) => f,
        Err(e) => {
            // Tell the sender no bytes are wanted before bailing out
            let err = DepotError::Storage(e);
            ep.send_text(&err.reply()).await?;
            return Err(err);
        }
    };
    let result = async {
        let n = receive_stream(ep, &mut file, expected).await?;
        file.sync_all().await.map_err(DepotError::Storage)?;
        Ok::<u64, DepotError>(n)
    }
    .await;
    if result.is_err() {
        drop(file);
        tokio::fs::remove_file(path).await.ok();
    }
    result
}
