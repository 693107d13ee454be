use std::path::PathBuf;

use thiserror::Error;

/// Failure classes with distinct propagation rules. Mount errors abort
/// the whole job before any volume is touched; snapshot, lock and
/// transfer errors are caught at the volume boundary during backup;
/// transfer and chain errors abort a restore outright.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("mount/unmount at {}: {source}", .mountpoint.display())]
    Mount {
        mountpoint: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("snapshot {tag}: {source}")]
    Snapshot {
        tag: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("lock marker {}: {source}", .path.display())]
    LockConflict {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("transfer {}: {source}", .artifact.display())]
    Transfer {
        artifact: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("chain broken: {} points to missing artifact {}", .sidecar.display(), .missing.display())]
    ChainInconsistency { sidecar: PathBuf, missing: PathBuf },
}

impl JobError {
    /// True for failures a backup job survives by skipping the volume.
    pub fn is_isolated(&self) -> bool {
        matches!(
            self,
            JobError::Snapshot { .. } | JobError::LockConflict { .. } | JobError::Transfer { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn isolation_per_class() {
        let snap = JobError::Snapshot {
            tag: "tank/data@t".into(),
            source: anyhow!("boom"),
        };
        let mount = JobError::Mount {
            mountpoint: "/mnt".into(),
            source: anyhow!("boom"),
        };
        let chain = JobError::ChainInconsistency {
            sidecar: "a.txt".into(),
            missing: "b.zfs.gz".into(),
        };
        assert!(snap.is_isolated());
        assert!(!mount.is_isolated());
        assert!(!chain.is_isolated());
    }
}
