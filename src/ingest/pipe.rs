//! Producer side of a pipelined copy
//!
//! Rows are formatted on the blocking pool and pushed through a bounded
//! channel in chunks. A full channel blocks the producer; the copy blocks
//! on an empty one.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::table::RowStream;

/// Start formatting `stream` into chunks of `chunk_rows` rows with at most
/// `capacity` chunks in flight.
///
/// The handle resolves to the number of rows sent. Dropping the receiver
/// stops the producer at its next send.
pub fn spawn_producer(
    stream: RowStream,
    chunk_rows: usize,
    capacity: usize,
) -> (mpsc::Receiver<std::io::Result<Bytes>>, JoinHandle<usize>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let handle = tokio::task::spawn_blocking(move || {
        let step = chunk_rows.max(1);
        let mut sent = 0;
        for chunk in stream.chunks(step) {
            if tx.blocking_send(Ok(chunk)).is_err() {
                debug!("Copy closed the pipe after {} rows", sent);
                return sent;
            }
            sent = (sent + step).min(stream.row_count());
        }
        sent
    });
    (rx, handle)
}
