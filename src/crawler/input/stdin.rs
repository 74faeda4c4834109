// SPDX-License-Identifier: Apache-2.0

//! Process stdin as an async reader.
//!
//! Reads happen on a plain thread that is never joined. A read blocked on an
//! idle stdin therefore cannot hold up runtime shutdown the way a blocking
//! pool task would.

use std::io::{self, Read};
use std::thread;

use bytes::Bytes;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tracing::debug;

use crate::bounded_channel::{BoundedSender, bounded};

const CHUNK_SIZE: usize = 16 * 1024;
/// Chunks buffered between the reading thread and the harvester
const CHUNK_QUEUE: usize = 16;

pub fn stdin_reader() -> io::Result<Box<dyn AsyncRead + Unpin + Send>> {
    reader_from(io::stdin())
}

fn reader_from<R>(source: R) -> io::Result<Box<dyn AsyncRead + Unpin + Send>>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = bounded::<io::Result<Bytes>>(CHUNK_QUEUE);

    thread::Builder::new()
        .name("logship-stdin".to_string())
        .spawn(move || pump(source, tx))?;

    Ok(Box::new(StreamReader::new(Box::pin(rx.into_stream()))))
}

fn pump<R: Read>(mut source: R, tx: BoundedSender<io::Result<Bytes>>) {
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let chunk = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => Ok(Bytes::copy_from_slice(&buf[..n])),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => Err(e),
        };

        let failed = chunk.is_err();
        if tx.send_blocking(chunk).is_err() {
            debug!("Stdin reader dropped, stopping stdin thread");
            return;
        }
        if failed {
            return;
        }
    }
    debug!("Stdin reached end of stream");
}
