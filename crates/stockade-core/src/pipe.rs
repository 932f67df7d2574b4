//! Stdin delivery and bounded output capture for execution units

use crate::{Result, StockadeError};
use memfd::{FileSeal, MemfdOptions};
use std::fs::File;
use std::io::{Seek, Write};
use tokio::io::{AsyncRead, AsyncReadExt};

const READ_CHUNK: usize = 8 * 1024;

/// Write `data` into a sealed in-memory file positioned at offset 0.
///
/// The child reads its stdin from this file, so a program that never reads
/// stdin cannot block the orchestrator on a full pipe.
pub fn sealed_stdin(data: &[u8]) -> Result<File> {
    let memfd = MemfdOptions::default()
        .allow_sealing(true)
        .close_on_exec(true)
        .create("stockade-stdin")
        .map_err(|e| StockadeError::Execution(format!("failed to create memfd: {e}")))?;

    memfd.as_file().write_all(data)?;

    for seal in [
        FileSeal::SealShrink,
        FileSeal::SealGrow,
        FileSeal::SealWrite,
        FileSeal::SealSeal,
    ] {
        memfd
            .add_seal(seal)
            .map_err(|e| StockadeError::Execution(format!("failed to seal memfd: {e}")))?;
    }

    let mut file = memfd.into_file();
    file.rewind()?;
    Ok(file)
}

/// Output captured from one stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captured {
    /// The first `cap` bytes written
    pub bytes: Vec<u8>,
    /// More than `cap` bytes were written
    pub truncated: bool,
    /// Total bytes written, kept or not
    pub total: u64,
}

/// Read `reader` to EOF, keeping the first `cap` bytes and discarding the rest.
///
/// The stream is always drained so the writer never blocks on a full pipe.
pub async fn capture<R>(mut reader: R, cap: usize) -> std::io::Result<Captured>
where
    R: AsyncRead + Unpin,
{
    let mut captured = Captured {
        bytes: Vec::with_capacity(cap.min(READ_CHUNK)),
        ..Captured::default()
    };
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        captured.total += n as u64;

        let room = cap.saturating_sub(captured.bytes.len());
        let keep = room.min(n);
        captured.bytes.extend_from_slice(&chunk[..keep]);
        if keep < n {
            captured.truncated = true;
        }
    }

    Ok(captured)
}
