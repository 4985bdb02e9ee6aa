// Copyright 2025-2026 CEMAXECUTER LLC

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;

use thiserror::Error;

use crate::aggregator::CaptureBatch;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("batch write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("batch encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Persistence collaborator seam: takes one packaged batch and writes
/// it durably. The on-disk format is opaque to the pipeline.
pub trait BatchSink: Send {
    fn write(&mut self, batch: &CaptureBatch) -> Result<(), SinkError>;
}

/// Writes each batch as a single JSON document, one file per flush.
pub struct JsonBatchWriter {
    dir: PathBuf,
    written: usize,
}

impl JsonBatchWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, written: 0 })
    }

    /// Number of batches written so far.
    pub fn written(&self) -> usize {
        self.written
    }
}

impl BatchSink for JsonBatchWriter {
    fn write(&mut self, batch: &CaptureBatch) -> Result<(), SinkError> {
        let path = self.dir.join(format!("capture-{:04}.json", self.written));
        let file = File::create(&path)?;
        serde_json::to_writer(BufWriter::new(file), batch)?;
        self.written += 1;
        log::info!(
            "wrote batch of {} frames to {}",
            batch.meta.frames,
            path.display()
        );
        Ok(())
    }
}
