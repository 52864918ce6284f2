//! # Summary
//!
//! This module abstracts over stable storage. To recover from a crash, a
//! participant must remember every transaction it was asked to vote on and
//! every decision it learned.
//!
//! Records are appended to a single file using the same length-delimited
//! `bincode` framing as the network layer, and the file is synced to disk
//! before `append` returns. A failed append is cut back off the file, so a
//! partial frame never sits in front of later records.
//!
//! On open, the whole file is read back. Only a final frame cut short by the
//! end of the file is treated as torn and truncated away; a complete frame
//! that does not decode is reported as corruption.

use std::fs;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{KvError, Result};
use crate::socket;

/// Append-only, flush-on-write log of records of type `R`.
#[derive(Debug)]
pub struct Log<R> {
    path: PathBuf,
    file: fs::File,

    /// Length of the file up to the last durable record
    end: u64,

    /// Set when a failed append could not be rolled back
    broken: bool,

    records: Vec<R>,
}

fn storage_error(error: std::io::Error) -> KvError {
    KvError::Storage(error.to_string())
}

/// Length of the frame at the start of `bytes`, or `None` if the file ends
/// before the frame does.
fn frame_len(bytes: &[u8]) -> Option<usize> {
    if bytes.len() < 4 {
        return None
    }
    let length = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let frame = 4usize.checked_add(length)?;
    if frame > bytes.len() { None } else { Some(frame) }
}

impl<R> Log<R>
where R: serde::Serialize + serde::de::DeserializeOwned
{
    /// Opens or creates the log at `path` and loads every complete record.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(storage_error)?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).map_err(storage_error)?;

        let mut records = Vec::new();
        let mut valid = 0;
        while valid < bytes.len() {
            let frame = match frame_len(&bytes[valid..]) {
            | Some(frame) => frame,
            | None => break,
            };
            let record = socket::recv(&mut Cursor::new(&bytes[valid..valid + frame]))
                .map_err(|error| KvError::Storage(format!(
                    "corrupt record at byte {} of {}: {}",
                    valid,
                    path.display(),
                    error,
                )))?;
            records.push(record);
            valid += frame;
        }

        if valid < bytes.len() {
            warn!(
                "truncating {} torn bytes at the end of {}",
                bytes.len() - valid,
                path.display(),
            );
            file.set_len(valid as u64).map_err(storage_error)?;
            file.sync_all().map_err(storage_error)?;
        }

        debug!("loaded {} records from {}", records.len(), path.display());
        Ok(Log { path, file, end: valid as u64, broken: false, records })
    }

    /// Appends `record` and syncs it to disk before returning.
    ///
    /// On failure the file is cut back to its last durable record. If even
    /// that fails, every later append is refused.
    pub fn append(&mut self, record: R) -> Result<()> {
        if self.broken {
            let msg = format!("{} is unusable after a failed append", self.path.display());
            return Err(KvError::Storage(msg))
        }

        let mut frame = Vec::new();
        socket::send(&mut frame, &record)?;

        let end = self.end + frame.len() as u64;
        let written = self.file.seek(SeekFrom::Start(self.end))
            .and_then(|_| self.file.write_all(&frame))
            .and_then(|_| self.file.set_len(end))
            .and_then(|_| self.file.sync_data());

        if let Err(error) = written {
            warn!("append to {} failed: {}", self.path.display(), error);
            if let Err(rollback) = self.file.set_len(self.end).and_then(|_| self.file.sync_data()) {
                error!("could not roll back {}: {}", self.path.display(), rollback);
                self.broken = true;
            }
            return Err(storage_error(error))
        }

        self.end = end;
        self.records.push(record);
        Ok(())
    }
}

impl<R> Log<R> {
    pub fn last(&self) -> Option<&R> {
        self.records.last()
    }

    pub fn records(&self) -> &[R] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
