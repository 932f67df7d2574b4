//! Job journal
//!
//! One msgpack record per accepted job, rewritten with its verdict once the
//! job completes and removed when the verdict expires. After a crash the
//! records without a verdict identify jobs that were accepted but never
//! finished.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use stockade_core::protocol::{self, JournalRecord};
use stockade_core::{Job, JobId, Result, StockadeError, Verdict};

const RECORD_EXT: &str = "rec";
const TEMP_EXT: &str = "tmp";

#[derive(Debug)]
pub struct Journal {
    dir: PathBuf,
}

impl Journal {
    /// Open the journal directory, creating it if needed.
    ///
    /// Fails when the directory cannot be written.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            StockadeError::Config(format!("cannot create state dir {}: {e}", dir.display()))
        })?;

        let probe = dir.join(".write-probe");
        fs::write(&probe, b"")
            .and_then(|()| fs::remove_file(&probe))
            .map_err(|e| {
                StockadeError::Config(format!("state dir {} is not writable: {e}", dir.display()))
            })?;

        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, id: JobId) -> PathBuf {
        self.dir.join(format!("{id}.{RECORD_EXT}"))
    }

    /// Persist a job before it is admitted
    pub fn record_accepted(&self, job: &Job) -> Result<()> {
        self.write(&JournalRecord {
            job: job.clone(),
            verdict: None,
        })
    }

    /// Rewrite a job's record with its verdict
    pub fn record_verdict(&self, job: &Job, verdict: &Verdict) -> Result<()> {
        self.write(&JournalRecord {
            job: job.clone(),
            verdict: Some(verdict.clone()),
        })
    }

    fn write(&self, record: &JournalRecord) -> Result<()> {
        let bytes = protocol::encode(record).map_err(io::Error::other)?;
        let path = self.path(record.job.id);
        let tmp = path.with_extension(TEMP_EXT);
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Drop a job's record. Missing records are not an error.
    pub fn remove(&self, id: JobId) -> Result<()> {
        match fs::remove_file(self.path(id)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Read every record. Unreadable records and leftover temporary files
    /// are deleted with a warning.
    pub fn load(&self) -> Result<Vec<JournalRecord>> {
        let mut records = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            match path.extension().and_then(|e| e.to_str()) {
                Some(RECORD_EXT) => match read_record(&path) {
                    Ok(record) => records.push(record),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "discarding unreadable journal record");
                        discard(&path);
                    }
                },
                Some(TEMP_EXT) => discard(&path),
                _ => {}
            }
        }

        records.sort_by_key(|r| r.job.submitted_at);
        Ok(records)
    }
}

/// Best-effort removal; a leftover entry is retried on the next load
fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove journal entry");
    }
}

fn read_record(path: &Path) -> io::Result<JournalRecord> {
    let bytes = fs::read(path)?;
    protocol::decode(&bytes).map_err(io::Error::other)
}
