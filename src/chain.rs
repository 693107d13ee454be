//! Chain ancestry, derived two independent ways. The backup side
//! (`resolve_base`) rescans the destination directory and re-checks
//! live snapshot state to pick an incremental base. The restore side
//! (`discover_chain`) trusts only the chain-pointer sidecars written at
//! backup time and never consults the filesystem manager.

use std::{
    collections::HashSet,
    fs, io,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use tracing as log;

use crate::{
    error::JobError,
    marker,
    naming::{self, SnapshotTag},
    tooling::SnapshotBackend,
    volume::Volume,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseDecision {
    Full,
    Incremental {
        parent: SnapshotTag,
        artifact: PathBuf,
    },
}

/// Decide whether the next backup of `vol` into `dir` can be
/// incremental, and against which prior artifact.
///
/// Candidates are visited newest first. A lock marker on a candidate
/// means a write for that tag died mid-flight; artifacts are created in
/// strict timestamp order, so nothing older can be trusted as a
/// stand-in base either and the answer is an immediate `Full`. A
/// candidate whose snapshot was pruned is merely skipped.
pub fn resolve_base(
    vol: &Volume,
    dir: &Path,
    backend: &dyn SnapshotBackend,
) -> Result<BaseDecision> {
    let title = vol.title();
    let mut candidates = list_artifacts(dir, &title, backend.kind())?;
    candidates.sort();
    candidates.reverse();

    for (stamp, file_name) in candidates {
        let tag = SnapshotTag::new(vol.name.clone(), stamp);

        if marker::is_locked(dir, &tag) {
            log::info!(
                "[chain] {}: marker present for {}, chain unusable, full backup",
                vol.name,
                tag.file_tag()
            );
            return Ok(BaseDecision::Full);
        }

        if backend.snapshot_exists(vol, &tag)? {
            log::info!(
                "[chain] {}: incremental against {} ({})",
                vol.name,
                tag.fs_name(),
                file_name
            );
            return Ok(BaseDecision::Incremental {
                artifact: dir.join(file_name),
                parent: tag,
            });
        }

        log::debug!(
            "[chain] {}: snapshot {} pruned, trying older candidate",
            vol.name,
            tag.fs_name()
        );
    }

    log::info!("[chain] {}: no usable base, full backup", vol.name);
    Ok(BaseDecision::Full)
}

/// Artifact candidates as `(stamp, file name)`, unsorted. A missing
/// directory is simply an empty chain.
fn list_artifacts(
    dir: &Path,
    title: &str,
    kind: crate::volume::FsKind,
) -> Result<Vec<(String, String)>> {
    let rd = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("scan {}", dir.display())),
    };

    let mut out = Vec::new();
    for entry in rd {
        let entry = entry.with_context(|| format!("scan {}", dir.display()))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !naming::is_artifact_of(name, title, kind) {
            continue;
        }
        let Some(stamp) = naming::stamp_of_artifact(name) else {
            continue;
        };
        out.push((stamp.to_string(), name.to_string()));
    }
    Ok(out)
}

/// Ordered replay sequence, oldest (the chain root, a full backup)
/// first, the requested target last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestorePlan {
    pub steps: Vec<PathBuf>,
}

impl RestorePlan {
    #[inline]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Walk chain-pointer sidecars backward from `target` to the chain
/// root. Parent file names resolve relative to the target's directory.
/// A sidecar naming a file that is not there, or a sidecar loop, makes
/// the chain unusable as a whole.
pub fn discover_chain(target: &Path) -> Result<RestorePlan, JobError> {
    let mut steps: Vec<PathBuf> = Vec::new();
    let mut seen: HashSet<PathBuf> = HashSet::new();
    let mut current = target.to_path_buf();

    loop {
        steps.push(current.clone());

        let Some(sidecar) = naming::sidecar_path(&current) else {
            break; // not artifact-shaped, nothing to follow
        };
        if !sidecar.exists() {
            break; // chain root: a full backup has no sidecar
        }

        let content = fs::read_to_string(&sidecar).map_err(|source| JobError::Transfer {
            artifact: sidecar.clone(),
            source: source.into(),
        })?;
        let parent_name = Path::new(content.trim())
            .file_name()
            .map(|n| n.to_os_string())
            .ok_or_else(|| JobError::ChainInconsistency {
                sidecar: sidecar.clone(),
                missing: PathBuf::from(content.trim()),
            })?;

        let parent = current.with_file_name(parent_name);
        if !parent.exists() {
            return Err(JobError::ChainInconsistency {
                sidecar,
                missing: parent,
            });
        }
        if !seen.insert(parent.clone()) {
            // a sidecar loop would replay forever
            return Err(JobError::ChainInconsistency {
                sidecar,
                missing: parent,
            });
        }
        current = parent;
    }

    steps.reverse();
    Ok(RestorePlan { steps })
}
