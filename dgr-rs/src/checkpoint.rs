//! Saving and restoring scholar parameters.
//!
//! A checkpoint directory holds one safetensors file per parameter group
//! (`generator.safetensors`, `critic.safetensors`, `solver.safetensors` for
//! the reference models) and a `scholar.json` metadata file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use candle_core::Tensor;
use candle_nn::VarMap;
use serde::{Deserialize, Serialize};

use crate::error::{DgrError, Result};
use crate::scholar::Scholar;
use crate::trainable::{Classifier, Generator};

/// Current checkpoint layout version.
pub const FORMAT_VERSION: u32 = 1;

const METADATA_FILE: &str = "scholar.json";
const SOLVER_GROUP: &str = "solver";

/// Contents of `scholar.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Layout version.
    pub format_version: u32,
    /// Scholar label.
    pub label: String,
    /// Number of tasks the scholar had learned when saved.
    pub tasks_completed: usize,
    /// Parameter groups present, in save order.
    pub groups: Vec<String>,
}

/// Directory used for the checkpoint taken after `task` (1-based).
#[must_use]
pub fn task_checkpoint_dir(root: impl AsRef<Path>, task: usize) -> PathBuf {
    root.as_ref().join(format!("task-{task}"))
}

fn groups<'s, G: Generator, C: Classifier>(scholar: &'s Scholar<G, C>) -> Vec<(&'static str, &'s VarMap)> {
    let mut groups = scholar.generator.named_varmaps();
    groups.push((SOLVER_GROUP, scholar.solver.varmap()));
    groups
}

/// Write every parameter group of `scholar` and its metadata into `dir`.
///
/// # Errors
///
/// Returns an error if the directory or a file cannot be written.
pub fn save_checkpoint<G: Generator, C: Classifier>(
    scholar: &Scholar<G, C>,
    dir: impl AsRef<Path>,
    tasks_completed: usize,
) -> Result<CheckpointMetadata> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;

    let groups = groups(scholar);
    for (name, varmap) in &groups {
        let path = dir.join(format!("{name}.safetensors"));
        varmap
            .save(&path)
            .map_err(|e| DgrError::Checkpoint(format!("Failed to save {}: {e}", path.display())))?;
    }

    let metadata = CheckpointMetadata {
        format_version: FORMAT_VERSION,
        label: scholar.label().to_string(),
        tasks_completed,
        groups: groups.iter().map(|(name, _)| (*name).to_string()).collect(),
    };
    std::fs::write(dir.join(METADATA_FILE), serde_json::to_string_pretty(&metadata)?)?;

    tracing::info!("Saved checkpoint to: {}", dir.display());
    Ok(metadata)
}

/// Read `scholar.json` from `dir`.
///
/// # Errors
///
/// Returns [`DgrError::Checkpoint`] if the file is missing or malformed.
pub fn read_metadata(dir: impl AsRef<Path>) -> Result<CheckpointMetadata> {
    let path = dir.as_ref().join(METADATA_FILE);
    let json = std::fs::read_to_string(&path)
        .map_err(|e| DgrError::Checkpoint(format!("Failed to read {}: {e}", path.display())))?;
    let metadata: CheckpointMetadata = serde_json::from_str(&json)
        .map_err(|e| DgrError::Checkpoint(format!("Failed to parse {}: {e}", path.display())))?;
    if metadata.format_version != FORMAT_VERSION {
        return Err(DgrError::Checkpoint(format!(
            "unsupported checkpoint format version {}",
            metadata.format_version
        )));
    }
    Ok(metadata)
}

/// Overwrite the parameters of an identically shaped `scholar` with those
/// saved in `dir`.
///
/// # Errors
///
/// Returns [`DgrError::Checkpoint`] if the label differs, a group or
/// parameter is missing, or a shape disagrees.
pub fn load_checkpoint<G: Generator, C: Classifier>(
    scholar: &Scholar<G, C>,
    dir: impl AsRef<Path>,
) -> Result<CheckpointMetadata> {
    let dir = dir.as_ref();
    let metadata = read_metadata(dir)?;
    if metadata.label != scholar.label() {
        return Err(DgrError::Checkpoint(format!(
            "checkpoint belongs to scholar '{}', not '{}'",
            metadata.label,
            scholar.label()
        )));
    }

    for (name, varmap) in groups(scholar) {
        let path = dir.join(format!("{name}.safetensors"));
        if !path.exists() {
            return Err(DgrError::Checkpoint(format!("missing {}", path.display())));
        }
        let tensors = candle_core::safetensors::load(&path, scholar.device())?;
        restore_group(varmap, &tensors, name)?;
    }

    tracing::info!(
        "Loaded checkpoint from: {} (tasks_completed={})",
        dir.display(),
        metadata.tasks_completed
    );
    Ok(metadata)
}

fn restore_group(varmap: &VarMap, tensors: &HashMap<String, Tensor>, group: &str) -> Result<()> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| DgrError::Training("parameter map lock poisoned".into()))?;
    for (name, var) in data.iter() {
        let saved = tensors
            .get(name)
            .ok_or_else(|| DgrError::Checkpoint(format!("{group}: missing parameter {name}")))?;
        if saved.dims() != var.dims() {
            return Err(DgrError::Checkpoint(format!(
                "{group}: parameter {name} has shape {:?}, expected {:?}",
                saved.dims(),
                var.dims()
            )));
        }
        var.set(&saved.to_dtype(var.dtype())?.to_device(var.device())?)?;
    }
    Ok(())
}
