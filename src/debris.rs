//! Per-claim debris files and their final assembly.
//!
//! Every claim writes into its own file named after its start offset. Once all
//! workers are done the files are concatenated in offset order.

use crate::error::Result;
use crate::ledger::Interval;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tracing::debug;

/// Directory holding the debris files of one download
#[derive(Debug)]
pub struct DebrisStore {
    dir: PathBuf,
}

impl DebrisStore {
    /// Create `root/name`, wiping anything left there by an earlier run.
    pub async fn prepare(root: &Path, name: &str) -> Result<Self> {
        let dir = root.join(name);
        if fs::try_exists(&dir).await? {
            fs::remove_dir_all(&dir).await?;
        }
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, offset: u64) -> PathBuf {
        self.dir.join(offset.to_string())
    }

    /// Open (truncating) the sink for a claim starting at `offset`.
    pub async fn create(&self, offset: u64) -> Result<DebrisFile> {
        let file = File::create(self.path_for(offset)).await?;
        Ok(DebrisFile {
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    /// Concatenate the debris of `intervals` into `dest` in ascending start order.
    ///
    /// Empty intervals (sentinels included) have no debris and are skipped.
    /// Returns the number of bytes written.
    pub async fn assemble(&self, intervals: &[Interval], dest: &Path) -> Result<u64> {
        let mut pieces: Vec<&Interval> = intervals.iter().filter(|i| !i.is_empty()).collect();
        pieces.sort_by_key(|i| i.start);

        let mut out = BufWriter::new(File::create(dest).await?);
        let mut total = 0;
        for piece in pieces {
            let file = File::open(self.path_for(piece.start)).await?;
            let mut reader = file.take(piece.len());
            let copied = tokio::io::copy(&mut reader, &mut out).await?;
            debug!(start = piece.start, end = piece.end, copied, "merged debris");
            total += copied;
        }
        out.flush().await?;
        Ok(total)
    }

    pub async fn cleanup(&self) -> Result<()> {
        fs::remove_dir_all(&self.dir).await?;
        Ok(())
    }
}

/// Append-only sink for one claim
#[derive(Debug)]
pub struct DebrisFile {
    writer: BufWriter<File>,
    written: u64,
}

impl DebrisFile {
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data).await?;
        self.written += data.len() as u64;
        Ok(())
    }

    /// Flush and close.
    pub async fn finish(mut self) -> Result<u64> {
        self.writer.flush().await?;
        Ok(self.written)
    }
}
