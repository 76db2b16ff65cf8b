//! Bounded-batch persistence of new version records.
//!
//! [`VersionBatch`] buffers records and writes them through
//! [`VersionStore::save_batch`] every time the buffer reaches the chunk
//! size, so a chart with thousands of versions never sits in memory at once.
//! In parallel mode one batch is shared by all fetch tasks of an application
//! behind a `tokio::sync::Mutex`.

use anyhow::{bail, Result};

use crate::models::NewVersion;
use crate::store::VersionStore;

/// Default number of records buffered before a write.
pub const DEFAULT_CHUNK_SIZE: usize = 20;

#[derive(Debug)]
pub struct VersionBatch {
    chunk_size: usize,
    buffer: Vec<NewVersion>,
    written: u64,
    inserted: u64,
    flushes: usize,
    failed: bool,
}

impl VersionBatch {
    /// A chunk size of zero is treated as one.
    pub fn new(chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            buffer: Vec::with_capacity(chunk_size),
            written: 0,
            inserted: 0,
            flushes: 0,
            failed: false,
        }
    }

    /// Buffer one record, writing the chunk out once it is full.
    pub async fn push(&mut self, store: &dyn VersionStore, version: NewVersion) -> Result<()> {
        if self.failed {
            bail!("version batch abandoned after a failed write");
        }
        self.buffer.push(version);
        if self.buffer.len() >= self.chunk_size {
            self.flush(store).await?;
        }
        Ok(())
    }

    /// Write whatever is buffered. A no-op on an empty buffer.
    pub async fn flush(&mut self, store: &dyn VersionStore) -> Result<()> {
        if self.failed {
            bail!("version batch abandoned after a failed write");
        }
        if self.buffer.is_empty() {
            return Ok(());
        }
        match store.save_batch(&self.buffer).await {
            Ok(inserted) => {
                self.written += self.buffer.len() as u64;
                self.inserted += inserted;
                self.flushes += 1;
                self.buffer.clear();
                Ok(())
            }
            Err(e) => {
                self.failed = true;
                self.buffer.clear();
                Err(e)
            }
        }
    }

    /// Records handed to the store so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Rows the store reported as newly inserted.
    pub fn inserted(&self) -> u64 {
        self.inserted
    }

    pub fn flushes(&self) -> usize {
        self.flushes
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// True once a write has failed; every later push or flush errors.
    pub fn is_abandoned(&self) -> bool {
        self.failed
    }
}
