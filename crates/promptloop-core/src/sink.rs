//! Per-generation telemetry delivery.
//!
//! The optimizer hands one [`GenerationTelemetry`] per generation to every
//! registered [`TelemetrySink`]. Delivery is best-effort: sink errors are
//! counted and logged by the optimizer, never propagated.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{GenerationRecord, PopulationEntry, TelemetryError};

/// The monitoring view of one generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationTelemetry {
    pub run_id: String,
    pub index: usize,
    pub parents: Vec<String>,
    pub offspring: Vec<String>,
    pub scores: Vec<PopulationEntry>,
    pub failed: usize,
    pub emitted_at: DateTime<Utc>,
}

impl GenerationTelemetry {
    pub fn from_record(run_id: &str, record: &GenerationRecord) -> Self {
        Self {
            run_id: run_id.to_string(),
            index: record.index,
            parents: record.parents.clone(),
            offspring: record.offspring.clone(),
            scores: record.population.clone(),
            failed: record.failures.len(),
            emitted_at: Utc::now(),
        }
    }
}

/// External monitoring collaborator.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, record: &GenerationTelemetry) -> Result<(), TelemetryError>;
}

/// Logs each generation as a structured `info!` event.
#[derive(Debug, Clone, Default)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn emit(&self, record: &GenerationTelemetry) -> Result<(), TelemetryError> {
        for (i, entry) in record.scores.iter().enumerate() {
            info!(
                event = "telemetry.generation",
                run_id = %record.run_id,
                generation = record.index,
                member = i,
                exact = entry.aggregate.exact,
                grounding = entry.aggregate.grounding,
                logprob = entry.aggregate.logprob,
            );
        }
        Ok(())
    }
}

/// Appends one JSON object per generation to a file.
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlSink {
    /// Open (creating if needed) `path` for appending.
    pub fn open(path: &Path) -> Result<Self, TelemetryError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TelemetrySink for JsonlSink {
    fn emit(&self, record: &GenerationTelemetry) -> Result<(), TelemetryError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut file = self
            .file
            .lock()
            .map_err(|_| TelemetryError::Unavailable("telemetry file lock poisoned".to_string()))?;
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }
}
