//! Checkpoint persistence
//!
//! A checkpoint is a directory holding the estimator parameters, the
//! normalizer statistics, and a metadata record, plus a SHA-256 manifest
//! over all three. Files are written to a temp path and renamed so a crash
//! mid-save never leaves a torn checkpoint, and checksums are verified on
//! load. Old checkpoints are pruned beyond a retention limit.

use crate::env::EnvironmentConfig;
use crate::learner::{
    ModelConfig, NetworkParameters, RewardTermStat, StateNormalizer, TrainingConfig,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const PARAMETERS_FILE: &str = "parameters.json";
const NORMALIZER_FILE: &str = "normalizer.json";
const METADATA_FILE: &str = "metadata.json";
const MANIFEST_FILE: &str = "manifest.json";

/// Checkpoint storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Directory holding checkpoint subdirectories
    pub dir: PathBuf,
    /// Number of checkpoints retained on disk
    pub max_keep: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./checkpoints"),
            max_keep: 5,
        }
    }
}

/// Run metadata persisted alongside parameters and normalizer statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub saved_at: i64,
    pub timestep: u64,
    pub epsilon: f64,
    pub last_loss: Option<f64>,
    pub best_loss: Option<f64>,
    pub reward_stats: Vec<RewardTermStat>,
    pub training: TrainingConfig,
    pub model: ModelConfig,
    pub environment: EnvironmentConfig,
}

/// Everything needed to resume a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub parameters: NetworkParameters,
    pub normalizer: StateNormalizer,
    pub metadata: CheckpointMetadata,
}

/// Integrity manifest over the checkpoint's files
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    files: BTreeMap<String, String>,
}

/// Integrity failures detected while loading a checkpoint
#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },
    #[error("manifest missing entry for {file}")]
    MissingManifestEntry { file: String },
}

/// Saves, prunes, and restores checkpoints
pub struct CheckpointManager {
    config: CheckpointConfig,
}

impl CheckpointManager {
    pub fn new(config: CheckpointConfig) -> Result<Self> {
        fs::create_dir_all(&config.dir)
            .with_context(|| format!("Failed to create checkpoint directory {:?}", config.dir))?;
        Ok(Self { config })
    }

    /// Persist a snapshot; returns the checkpoint directory
    pub fn save(&self, snapshot: &AgentSnapshot) -> Result<PathBuf> {
        let dir = self
            .config
            .dir
            .join(format!("checkpoint-{:012}", snapshot.metadata.timestep));
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create checkpoint {:?}", dir))?;

        let mut manifest = Manifest {
            files: BTreeMap::new(),
        };

        for (name, bytes) in [
            (
                PARAMETERS_FILE,
                serde_json::to_vec(&snapshot.parameters)
                    .context("Failed to serialize parameters")?,
            ),
            (
                NORMALIZER_FILE,
                serde_json::to_vec(&snapshot.normalizer)
                    .context("Failed to serialize normalizer")?,
            ),
            (
                METADATA_FILE,
                serde_json::to_vec_pretty(&snapshot.metadata)
                    .context("Failed to serialize metadata")?,
            ),
        ] {
            write_atomic(&dir.join(name), &bytes)?;
            manifest.files.insert(name.to_string(), sha256_hex(&bytes));
        }

        let manifest_bytes =
            serde_json::to_vec_pretty(&manifest).context("Failed to serialize manifest")?;
        write_atomic(&dir.join(MANIFEST_FILE), &manifest_bytes)?;

        self.prune()?;
        info!(path = %dir.display(), timestep = snapshot.metadata.timestep, "Checkpoint saved");
        Ok(dir)
    }

    /// Load the newest checkpoint that passes checksum verification
    ///
    /// Corrupt checkpoints are skipped with a warning; `None` means no
    /// usable checkpoint exists.
    pub fn load_latest(&self) -> Result<Option<AgentSnapshot>> {
        let mut dirs = self.checkpoint_dirs()?;
        dirs.reverse();

        for dir in dirs {
            match Self::load_dir(&dir) {
                Ok(snapshot) => {
                    info!(path = %dir.display(), "Checkpoint loaded");
                    return Ok(Some(snapshot));
                }
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "Skipping unusable checkpoint");
                }
            }
        }
        Ok(None)
    }

    fn load_dir(dir: &Path) -> Result<AgentSnapshot> {
        let manifest_bytes = fs::read(dir.join(MANIFEST_FILE))
            .with_context(|| format!("Failed to read manifest in {:?}", dir))?;
        let manifest: Manifest =
            serde_json::from_slice(&manifest_bytes).context("Failed to parse manifest")?;

        let mut contents: BTreeMap<&str, Vec<u8>> = BTreeMap::new();
        for name in [PARAMETERS_FILE, NORMALIZER_FILE, METADATA_FILE] {
            let bytes = fs::read(dir.join(name))
                .with_context(|| format!("Failed to read {} in {:?}", name, dir))?;
            let expected = manifest.files.get(name).ok_or_else(|| {
                IntegrityError::MissingManifestEntry {
                    file: name.to_string(),
                }
            })?;
            let actual = sha256_hex(&bytes);
            if &actual != expected {
                return Err(IntegrityError::ChecksumMismatch {
                    file: name.to_string(),
                    expected: expected.clone(),
                    actual,
                }
                .into());
            }
            contents.insert(name, bytes);
        }

        Ok(AgentSnapshot {
            parameters: serde_json::from_slice(&contents[PARAMETERS_FILE])
                .context("Failed to parse parameters")?,
            normalizer: serde_json::from_slice(&contents[NORMALIZER_FILE])
                .context("Failed to parse normalizer")?,
            metadata: serde_json::from_slice(&contents[METADATA_FILE])
                .context("Failed to parse metadata")?,
        })
    }

    /// Remove the oldest checkpoints beyond the retention limit
    fn prune(&self) -> Result<()> {
        let dirs = self.checkpoint_dirs()?;
        if dirs.len() <= self.config.max_keep {
            return Ok(());
        }

        let excess = dirs.len() - self.config.max_keep;
        for dir in dirs.into_iter().take(excess) {
            if let Err(e) = fs::remove_dir_all(&dir) {
                warn!(path = %dir.display(), error = %e, "Failed to prune checkpoint");
            } else {
                info!(path = %dir.display(), "Pruned old checkpoint");
            }
        }
        Ok(())
    }

    /// Checkpoint directories sorted oldest first
    fn checkpoint_dirs(&self) -> Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        for entry in fs::read_dir(&self.config.dir)
            .with_context(|| format!("Failed to list {:?}", self.config.dir))?
        {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("checkpoint-"))
                    .unwrap_or(false)
            {
                dirs.push(path);
            }
        }
        dirs.sort();
        Ok(dirs)
    }
}

/// Write bytes to a temp file, sync, then rename into place
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    let mut file = File::create(&temp_path)
        .with_context(|| format!("Failed to create temp file {:?}", temp_path))?;
    file.write_all(bytes)
        .with_context(|| format!("Failed to write {:?}", temp_path))?;
    file.sync_all()
        .with_context(|| format!("Failed to sync {:?}", temp_path))?;
    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))?;
    Ok(())
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
