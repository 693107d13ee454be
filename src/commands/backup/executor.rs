use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use tracing as log;

use crate::{
    AppCtx,
    chain::{self, BaseDecision},
    config::{Config, Source},
    error::JobError,
    marker,
    naming::{self, SnapshotTag},
    tooling::{self, SnapshotBackend},
    ui,
    utils::{bins::ensure_bins, lock::LockGuard, time::now_stamp},
    volume::{FsKind, Volume},
};

pub struct RunOpts {
    pub device: Option<String>,
    pub mountpoint: Option<PathBuf>,
    pub options: Option<String>,
    pub list_only: bool,
}

impl From<&super::BackupArgs> for RunOpts {
    fn from(value: &super::BackupArgs) -> Self {
        Self {
            device: value.device.clone(),
            mountpoint: value.mountpoint.clone(),
            options: value.options.clone(),
            list_only: value.list_only,
        }
    }
}

/// Job-wide knobs, passed explicitly everywhere: filesystem kind, the
/// destination root (`{mountpoint}/{job name}`) and the job name.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub kind: FsKind,
    pub root: PathBuf,
    pub name: String,
}

#[derive(Debug)]
pub struct VolumeDone {
    pub artifact: PathBuf,
    pub incremental: bool,
}

pub fn run(ctx: &AppCtx, opts: RunOpts) -> Result<()> {
    let cfg = ctx
        .cfg
        .as_ref()
        .context("backup needs a config file; pass --config <file>")?;
    let kind = cfg.source.kind();
    ensure_bins(tooling::required_bins(kind))?;
    let _lock = LockGuard::try_acquire("snapship-backup")?;

    let dest = cfg.resolve_destination(opts.device, opts.mountpoint, opts.options)?;
    ui::log_job_header(
        &cfg.job.name,
        &dest.device,
        &dest.mountpoint,
        &cfg.source.to_string(),
    );

    let backend = ctx.tools.backend(kind);
    let mount = ctx.tools.mount();

    // A destination that cannot be mounted aborts the whole job before
    // any volume is touched.
    mount
        .mount(&dest.device, &dest.mountpoint, dest.options.as_deref())
        .map_err(|source| JobError::Mount {
            mountpoint: dest.mountpoint.clone(),
            source,
        })?;

    let job = JobContext {
        kind,
        root: naming::dest_root(&dest.mountpoint, &cfg.job.name),
        name: cfg.job.name.clone(),
    };
    log::debug!("[backup] job {} -> {}", job.name, job.root.display());

    let worked = process_volumes(ctx, cfg, &job, backend.as_ref(), opts.list_only);

    // The unmount always runs, and its failure makes the process exit
    // non-zero even when every volume went through.
    let unmounted = mount
        .unmount(&dest.mountpoint)
        .map_err(|source| JobError::Mount {
            mountpoint: dest.mountpoint.clone(),
            source,
        });

    worked?;
    unmounted?;
    Ok(())
}

fn process_volumes(
    ctx: &AppCtx,
    cfg: &Config,
    job: &JobContext,
    backend: &dyn SnapshotBackend,
    list_only: bool,
) -> Result<()> {
    let mut volumes = enumerate(ctx, cfg)?;
    volumes.retain(|v| {
        let keep = cfg.job.allows(&v.name);
        if !keep {
            log::debug!("[backup] skip {} (excluded)", v.name);
        }
        keep
    });

    if volumes.is_empty() {
        log::info!("nothing to back up");
        return Ok(());
    }

    if list_only {
        return log_plan(job, backend, &volumes);
    }

    let mut summary: Vec<Vec<String>> = Vec::new();
    for vol in &volumes {
        let outcome = now_stamp()
            .map_err(|source| JobError::Snapshot {
                tag: vol.name.clone(),
                source,
            })
            .and_then(|stamp| run_volume(backend, job, vol, &stamp));

        match outcome {
            Ok(done) => {
                let mode = if done.incremental { "incremental" } else { "full" };
                summary.push(vec![
                    vol.name.clone(),
                    format!("done ({mode})"),
                    done.artifact.display().to_string(),
                ]);
            }
            Err(e) if e.is_isolated() => {
                // one volume's failure never blocks the siblings
                log::error!("[backup] {}: {e}", vol.name);
                summary.push(vec![vol.name.clone(), format!("failed: {e}"), "-".into()]);
            }
            Err(e) => return Err(e.into()),
        }
    }

    ui::log_backup_summary(summary);
    Ok(())
}

fn enumerate(ctx: &AppCtx, cfg: &Config) -> Result<Vec<Volume>> {
    match &cfg.source {
        Source::Zfs { pools } => ctx.tools.zfs().list_volumes(pools),
        Source::Btrfs { root } => ctx.tools.btrfs().list_volumes(root),
    }
}

/// Resolve and print what a run would do, without creating snapshots
/// or touching the destination tree.
fn log_plan(job: &JobContext, backend: &dyn SnapshotBackend, volumes: &[Volume]) -> Result<()> {
    let stamp = now_stamp()?;
    let mut rows = Vec::new();
    for vol in volumes {
        let tag = SnapshotTag::new(vol.name.clone(), stamp.clone());
        let dir = naming::volume_dir(&job.root, &vol.title());
        let (mode, base, artifact) = match chain::resolve_base(vol, &dir, backend)? {
            BaseDecision::Full => (
                "full",
                "-".to_string(),
                naming::full_artifact_name(&tag, job.kind),
            ),
            BaseDecision::Incremental { parent, .. } => (
                "incremental",
                parent.fs_name(),
                naming::incremental_artifact_name(&tag, job.kind),
            ),
        };
        rows.push(vec![vol.name.clone(), mode.to_string(), base, artifact]);
    }
    ui::log_backup_plan(rows);
    Ok(())
}

/// One volume through the whole machine: snapshot, resolve the chain,
/// lock, write the sidecar, transfer, unlock.
pub fn run_volume(
    backend: &dyn SnapshotBackend,
    job: &JobContext,
    vol: &Volume,
    stamp: &str,
) -> Result<VolumeDone, JobError> {
    let tag = SnapshotTag::new(vol.name.clone(), stamp);

    log::info!("[backup] {}: creating snapshot \"{}\"", vol.name, tag.fs_name());
    backend
        .create_snapshot(vol, &tag)
        .map_err(|source| JobError::Snapshot {
            tag: tag.fs_name(),
            source,
        })?;

    let dir = naming::volume_dir(&job.root, &vol.title());
    let decision = chain::resolve_base(vol, &dir, backend).map_err(|source| JobError::Transfer {
        artifact: dir.clone(),
        source,
    })?;

    fs::create_dir_all(&dir).map_err(|source| JobError::Transfer {
        artifact: dir.clone(),
        source: source.into(),
    })?;

    let (artifact, parent) = match decision {
        BaseDecision::Full => (dir.join(naming::full_artifact_name(&tag, job.kind)), None),
        BaseDecision::Incremental {
            parent,
            artifact: base,
        } => (
            dir.join(naming::incremental_artifact_name(&tag, job.kind)),
            Some((parent, base)),
        ),
    };

    marker::acquire(&artifact)?;

    if let Some((_, base)) = &parent {
        write_sidecar(&artifact, base)?;
    }

    match &parent {
        Some((p, base)) => log::info!(
            "[backup] {}: sending {} incrementally from {} (base {})",
            vol.name,
            tag.fs_name(),
            p.fs_name(),
            base.display()
        ),
        None => log::info!("[backup] {}: sending {} in full", vol.name, tag.fs_name()),
    }

    // On failure the marker stays behind on purpose: the next run must
    // treat this tag as unusable and fall back to a full backup.
    backend
        .export(vol, &tag, parent.as_ref().map(|(p, _)| p), &artifact)
        .map_err(|source| JobError::Transfer {
            artifact: artifact.clone(),
            source,
        })?;

    marker::release(&artifact).map_err(|source| JobError::Transfer {
        artifact: artifact.clone(),
        source: source.into(),
    })?;

    log::info!("[backup] {}: done -> {}", vol.name, artifact.display());
    Ok(VolumeDone {
        artifact,
        incremental: parent.is_some(),
    })
}

fn write_sidecar(artifact: &Path, base: &Path) -> Result<(), JobError> {
    let err = |source: anyhow::Error| JobError::Transfer {
        artifact: artifact.to_path_buf(),
        source,
    };
    let sidecar =
        naming::sidecar_path(artifact).ok_or_else(|| err(anyhow::anyhow!("not an artifact path")))?;
    let base_name = base
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            err(anyhow::anyhow!(
                "parent artifact has no file name: {}",
                base.display()
            ))
        })?;
    fs::write(&sidecar, base_name).map_err(|e| err(e.into()))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::testutil::MockBackend;

    const S1: &str = "2024-05-01_T03-00-00";
    const S2: &str = "2024-05-02_T03-00-00";
    const S3: &str = "2024-05-03_T03-00-00";

    fn job(root: &Path) -> JobContext {
        JobContext {
            kind: FsKind::Zfs,
            root: root.to_path_buf(),
            name: "backup_test".into(),
        }
    }

    fn vol() -> Volume {
        Volume::new("tank/data", FsKind::Zfs)
    }

    #[test]
    fn first_backup_is_full() {
        let tmp = TempDir::new().unwrap();
        let backend = MockBackend::zfs(&[]);

        let done = run_volume(&backend, &job(tmp.path()), &vol(), S1).unwrap();
        assert!(!done.incremental);
        assert_eq!(
            done.artifact,
            tmp.path()
                .join("tank--data")
                .join(format!("tank--data@{S1}.zfs.gz"))
        );
        assert!(done.artifact.exists());
        assert_eq!(
            *backend.exports.lock().unwrap(),
            vec![done.artifact.clone()]
        );
        // marker released, no sidecar for a chain root
        assert!(
            !tmp.path()
                .join("tank--data")
                .join(format!("tank--data@{S1}.doing.txt"))
                .exists()
        );
        assert!(
            !tmp.path()
                .join("tank--data")
                .join(format!("tank--data@{S1}.txt"))
                .exists()
        );
    }

    #[test]
    fn second_backup_chains_and_records_parent() {
        let tmp = TempDir::new().unwrap();
        let backend = MockBackend::zfs(&[]);
        let j = job(tmp.path());
        let v = vol();

        let first = run_volume(&backend, &j, &v, S1).unwrap();
        let second = run_volume(&backend, &j, &v, S2).unwrap();

        assert!(second.incremental);
        assert_eq!(
            second.artifact,
            tmp.path()
                .join("tank--data")
                .join(format!("tank--data@{S2}.incremental.zfs.gz"))
        );

        // sidecar holds the exact file name of the full artifact
        let sidecar = tmp
            .path()
            .join("tank--data")
            .join(format!("tank--data@{S2}.incremental.txt"));
        let content = fs::read_to_string(sidecar).unwrap();
        assert_eq!(content, format!("tank--data@{S1}.zfs.gz"));
        assert_eq!(
            content,
            first.artifact.file_name().unwrap().to_str().unwrap()
        );
    }

    #[test]
    fn failed_transfer_leaves_marker_and_next_run_goes_full() {
        let tmp = TempDir::new().unwrap();
        let j = job(tmp.path());
        let v = vol();

        let ok = MockBackend::zfs(&[]);
        run_volume(&ok, &j, &v, S1).unwrap();

        // second attempt dies mid-transfer
        let dying = MockBackend::zfs(&[format!("tank/data@{S1}")]).failing_export();
        let err = run_volume(&dying, &j, &v, S2).unwrap_err();
        assert!(matches!(err, JobError::Transfer { .. }), "{err}");
        let marker_file = tmp
            .path()
            .join("tank--data")
            .join(format!("tank--data@{S2}.doing.txt"));
        assert!(marker_file.exists());

        // next run must not chain onto anything, even though S1 is
        // still live and unlocked
        let next = MockBackend::zfs(&[
            format!("tank/data@{S1}"),
            format!("tank/data@{S2}"),
        ]);
        let done = run_volume(&next, &j, &v, S3).unwrap();
        assert!(!done.incremental);
        assert_eq!(
            done.artifact.file_name().unwrap().to_str().unwrap(),
            format!("tank--data@{S3}.zfs.gz")
        );
    }

    #[test]
    fn snapshot_failure_is_isolated_and_touches_nothing() {
        let tmp = TempDir::new().unwrap();
        let backend = MockBackend::zfs(&[]).failing_create();

        let err = run_volume(&backend, &job(tmp.path()), &vol(), S1).unwrap_err();
        assert!(matches!(err, JobError::Snapshot { .. }), "{err}");
        assert!(err.is_isolated());
        assert!(!tmp.path().join("tank--data").exists());
    }
}
