//! Run artifact persistence.
//!
//! Two artifacts come out of a successful run:
//!
//! - the champion prompt, a plain UTF-8 text file with no envelope
//! - a [`RunArtifact`] written to `<dir>/<run_id>/trace.json` with a
//!   companion `<dir>/<run_id>/trace.digest` holding the SHA-256 of the
//!   serialised trace
//!
//! Reading a run artifact recomputes the digest and rejects tampered files.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::RunConfig;
use crate::domain::{ArtifactError, MetricVector, Trace};
use crate::optimizer::RunOutcome;

/// Self-contained, integrity-checked record of a completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunArtifact {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub config: RunConfig,
    pub champion: String,
    pub champion_scores: MetricVector,
    pub trace: Trace,
    /// SHA-256 hex digest of `serde_json::to_vec(&trace)`.
    pub trace_digest: String,
}

impl RunArtifact {
    pub fn from_outcome(outcome: &RunOutcome, config: &RunConfig) -> Result<Self, ArtifactError> {
        Ok(Self {
            run_id: outcome.run_id.clone(),
            started_at: outcome.started_at,
            finished_at: outcome.finished_at,
            config: config.clone(),
            champion: outcome.champion.clone(),
            champion_scores: outcome.champion_scores,
            trace_digest: trace_digest(&outcome.trace)?,
            trace: outcome.trace.clone(),
        })
    }
}

/// SHA-256 hex digest of the compact JSON encoding of `trace`.
pub fn trace_digest(trace: &Trace) -> Result<String, ArtifactError> {
    let bytes = serde_json::to_vec(trace)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Write the champion prompt verbatim to `path`.
pub fn write_champion(champion: &str, path: &Path) -> Result<(), ArtifactError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, champion.as_bytes())?;
    Ok(())
}

pub fn read_champion(path: &Path) -> Result<String, ArtifactError> {
    Ok(std::fs::read_to_string(path)?)
}

/// Write `artifact` to `<dir>/<run_id>/trace.json` plus `trace.digest`.
/// Returns the path to `trace.json`.
pub fn write_run_artifact(artifact: &RunArtifact, dir: &Path) -> Result<PathBuf, ArtifactError> {
    let run_dir = dir.join(&artifact.run_id);
    std::fs::create_dir_all(&run_dir)?;

    let trace_path = run_dir.join("trace.json");
    let json = serde_json::to_vec_pretty(artifact)?;
    std::fs::write(&trace_path, &json)?;
    std::fs::write(run_dir.join("trace.digest"), artifact.trace_digest.as_bytes())?;

    Ok(trace_path)
}

/// Read and verify `<dir>/<run_id>/trace.json`.
pub fn read_run_artifact(run_id: &str, dir: &Path) -> Result<RunArtifact, ArtifactError> {
    let json = std::fs::read(dir.join(run_id).join("trace.json"))?;
    let artifact: RunArtifact = serde_json::from_slice(&json)?;

    let actual = trace_digest(&artifact.trace)?;
    if actual != artifact.trace_digest {
        return Err(ArtifactError::DigestMismatch {
            expected: artifact.trace_digest.clone(),
            actual,
        });
    }
    Ok(artifact)
}
