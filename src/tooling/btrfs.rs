use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};

use super::{DynRunner, SnapshotBackend};
use crate::{
    naming::SnapshotTag,
    utils::process::{CmdSpec, Pipeline, StdioSpec},
    volume::{FsKind, Volume},
};

pub const REQ_BINS: &[&str] = &["btrfs", "pigz", "pv"];

const PV_BUFFER: &str = "512M";

pub struct BtrfsBackend {
    runner: Arc<DynRunner>,
}

impl BtrfsBackend {
    pub fn new(runner: Arc<DynRunner>) -> Self {
        Self { runner }
    }

    #[inline]
    fn btrfs(&self) -> CmdSpec {
        CmdSpec::new("btrfs")
    }

    /// Subvolumes under `root`. Snapshot subvolumes of our own making
    /// carry an `@` in their path and are not backup sources.
    pub fn list_volumes(&self, root: &Path) -> Result<Vec<Volume>> {
        let cmd = self
            .btrfs()
            .args(["subvolume", "list"])
            .arg(root.display().to_string())
            .stdin(StdioSpec::Null)
            .stdout(StdioSpec::Pipe)
            .stderr(StdioSpec::Null);

        let out = self
            .runner
            .run_capture(&Pipeline::new().cmd(cmd))
            .with_context(|| format!("btrfs subvolume list {}", root.display()))?;

        Ok(parse_subvolume_list(&out, root))
    }

    /// Snapshots live as read-only siblings of the subvolume:
    /// `{mountpoint}@{stamp}`.
    fn snapshot_fs_path(vol: &Volume, stamp: &str) -> Result<PathBuf> {
        let mp = vol
            .mountpoint
            .as_ref()
            .with_context(|| format!("btrfs volume {} has no mountpoint", vol.name))?;
        Ok(PathBuf::from(format!("{}@{}", mp.display(), stamp)))
    }

    fn pv(&self) -> CmdSpec {
        CmdSpec::new("pv").arg("-B").arg(PV_BUFFER)
    }
}

impl SnapshotBackend for BtrfsBackend {
    fn kind(&self) -> FsKind {
        FsKind::Btrfs
    }

    fn snapshot_exists(&self, vol: &Volume, tag: &SnapshotTag) -> Result<bool> {
        let path = Self::snapshot_fs_path(vol, &tag.stamp)?;
        let cmd = self
            .btrfs()
            .args(["subvolume", "show"])
            .arg(path.display().to_string())
            .stdout(StdioSpec::Null)
            .stderr(StdioSpec::Null);

        // non-zero exit means "no such subvolume", the pruned answer
        Ok(self.runner.run(&Pipeline::new().cmd(cmd)).is_ok())
    }

    fn create_snapshot(&self, vol: &Volume, tag: &SnapshotTag) -> Result<()> {
        let src = vol
            .mountpoint
            .as_ref()
            .with_context(|| format!("btrfs volume {} has no mountpoint", vol.name))?;
        let snap = Self::snapshot_fs_path(vol, &tag.stamp)?;

        // -r: only read-only snapshots can be sent
        let cmd = self
            .btrfs()
            .args(["subvolume", "snapshot", "-r"])
            .arg(src.display().to_string())
            .arg(snap.display().to_string())
            .stderr(StdioSpec::Inherit);

        self.runner
            .run(&Pipeline::new().cmd(cmd))
            .with_context(|| format!("btrfs subvolume snapshot {}", snap.display()))
    }

    fn export(
        &self,
        vol: &Volume,
        tag: &SnapshotTag,
        parent: Option<&SnapshotTag>,
        dest: &Path,
    ) -> Result<()> {
        let snap = Self::snapshot_fs_path(vol, &tag.stamp)?;

        let mut send = self.btrfs().arg("send");
        if let Some(p) = parent {
            let parent_path = Self::snapshot_fs_path(vol, &p.stamp)?;
            send = send.arg("-p").arg(parent_path.display().to_string());
        }
        let send = send.arg(snap.display().to_string()).stderr(StdioSpec::Inherit);

        let pipeline = Pipeline::new()
            .cmd(send)
            .cmd(self.pv())
            .cmd(
                CmdSpec::new("pigz")
                    .arg("-c")
                    .stdout(StdioSpec::ToFile(dest.to_path_buf()))
                    .stderr(StdioSpec::Inherit),
            );

        self.runner
            .run(&pipeline)
            .with_context(|| format!("btrfs send {} -> {}", snap.display(), dest.display()))
    }

    fn import(&self, artifact: &Path, destination: &str, _force: bool) -> Result<()> {
        // btrfs receive has no force/rollback flag; the flag only
        // applies to zfs receive -F
        let pipeline = Pipeline::new()
            .cmd(
                CmdSpec::new("pigz")
                    .arg("-dc")
                    .arg(artifact.display().to_string()),
            )
            .cmd(self.pv())
            .cmd(
                self.btrfs()
                    .args(["receive", destination])
                    .stderr(StdioSpec::Inherit),
            );

        self.runner
            .run(&pipeline)
            .with_context(|| format!("btrfs receive {} <- {}", destination, artifact.display()))
    }
}

/// Lines look like `ID 256 gen 119 top level 5 path home`.
fn parse_subvolume_list(out: &str, root: &Path) -> Vec<Volume> {
    out.lines()
        .filter_map(|line| {
            let (_, path) = line.split_once(" path ")?;
            let path = path.trim();
            if path.is_empty() || path.contains('@') {
                return None;
            }
            Some(Volume {
                name: path.to_string(),
                mountpoint: Some(root.join(path)),
                mounted: true,
                kind: FsKind::Btrfs,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subvolume_list_parse() {
        let out = "ID 256 gen 119 top level 5 path home\n\
                   ID 257 gen 120 top level 5 path srv/data\n\
                   ID 258 gen 121 top level 5 path home@2024-05-01_T03-00-00\n";
        let vols = parse_subvolume_list(out, Path::new("/"));
        assert_eq!(vols.len(), 2);
        assert_eq!(vols[0].name, "home");
        assert_eq!(vols[0].mountpoint.as_deref(), Some(Path::new("/home")));
        assert_eq!(vols[1].name, "srv/data");
    }

    #[test]
    fn snapshot_path_is_sibling_of_mountpoint() {
        let mut vol = Volume::new("home", FsKind::Btrfs);
        vol.mountpoint = Some(PathBuf::from("/srv/home"));
        let p = BtrfsBackend::snapshot_fs_path(&vol, "2024-05-01_T03-00-00").unwrap();
        assert_eq!(p, PathBuf::from("/srv/home@2024-05-01_T03-00-00"));
    }

    #[test]
    fn snapshot_path_requires_mountpoint() {
        let vol = Volume::new("home", FsKind::Btrfs);
        assert!(BtrfsBackend::snapshot_fs_path(&vol, "x").is_err());
    }
}
