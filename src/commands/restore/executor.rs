use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use tracing as log;

use crate::{
    AppCtx,
    chain::{self, RestorePlan},
    error::JobError,
    tooling::{SnapshotBackend, btrfs, zfs},
    ui,
    utils::{bins::ensure_bins, lock::LockGuard},
    volume::FsKind,
};

pub struct RunOpts {
    pub kind: FsKind,
    pub artifact: PathBuf,
    pub destination: String,
    pub force: bool,
    pub dry_run: bool,
}

impl TryFrom<&super::RestoreArgs> for RunOpts {
    type Error = anyhow::Error;

    fn try_from(value: &super::RestoreArgs) -> Result<Self> {
        let kind: FsKind = value.kind.parse()?;
        Ok(Self {
            kind,
            artifact: value.artifact.clone(),
            destination: value.destination.clone(),
            force: value.force,
            dry_run: value.dry_run,
        })
    }
}

pub fn run(ctx: &AppCtx, opts: RunOpts) -> Result<()> {
    let bins = match opts.kind {
        FsKind::Zfs => zfs::REQ_BINS,
        FsKind::Btrfs => btrfs::REQ_BINS,
    };
    ensure_bins(bins.iter().copied())?;
    let _lock = LockGuard::try_acquire("snapship-restore")?;

    if !opts.artifact.is_file() {
        bail!("artifact not found: {}", opts.artifact.display());
    }

    let plan = chain::discover_chain(&opts.artifact)
        .with_context(|| format!("discover chain of {}", opts.artifact.display()))?;

    log::info!(
        "[restore] restoring to \"{}\" ({} step chain)",
        opts.destination,
        plan.len()
    );
    ui::log_restore_plan(&plan);

    let backend = ctx.tools.backend(opts.kind);
    apply(backend.as_ref(), &plan, &opts.destination, opts.force, opts.dry_run)?;

    if !opts.dry_run {
        log::info!("[restore] done");
    }
    Ok(())
}

/// Replay the chain oldest-to-newest. The order is load-bearing: an
/// incremental artifact is meaningless until its parent was applied,
/// so the first failure aborts everything after it.
pub fn apply(
    backend: &dyn SnapshotBackend,
    plan: &RestorePlan,
    destination: &str,
    force: bool,
    test_mode: bool,
) -> Result<(), JobError> {
    for (i, artifact) in plan.steps.iter().enumerate() {
        if test_mode {
            log::info!(
                "[restore] DRY-RUN: would apply {} ({}/{})",
                artifact.display(),
                i + 1,
                plan.len()
            );
            continue;
        }

        log::info!(
            "[restore] applying {} ({}/{})",
            artifact.display(),
            i + 1,
            plan.len()
        );
        backend
            .import(artifact, destination, force)
            .map_err(|source| JobError::Transfer {
                artifact: artifact.clone(),
                source,
            })?;
    }
    Ok(())
}
