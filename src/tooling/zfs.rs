use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use tracing as log;

use super::{DynRunner, SnapshotBackend};
use crate::{
    naming::SnapshotTag,
    utils::process::{CmdSpec, Pipeline, StdioSpec},
    volume::{FsKind, Volume},
};

pub const REQ_BINS: &[&str] = &["zfs", "pigz", "pv"];

/// `pv` buffer size used in both transfer directions.
const PV_BUFFER: &str = "512M";

pub struct ZfsBackend {
    runner: Arc<DynRunner>,
}

impl ZfsBackend {
    pub fn new(runner: Arc<DynRunner>) -> Self {
        Self { runner }
    }

    #[inline]
    fn zfs(&self) -> CmdSpec {
        CmdSpec::new("zfs")
    }

    /// Mounted filesystems plus zvols under the given pools. Legacy or
    /// unmounted filesystems cannot be snapshotted usefully and are
    /// skipped here; name-based exclusion is the caller's business.
    pub fn list_volumes(&self, pools: &[String]) -> Result<Vec<Volume>> {
        let mut out = Vec::new();
        for pool in pools {
            let fs_txt = self
                .runner
                .run_capture(&Pipeline::new().cmd(self.list_cmd("filesystem", pool)))
                .with_context(|| format!("zfs list filesystems in {pool}"))?;
            out.extend(parse_filesystems(&fs_txt));

            let vol_txt = self
                .runner
                .run_capture(&Pipeline::new().cmd(self.list_cmd("volume", pool)))
                .with_context(|| format!("zfs list volumes in {pool}"))?;
            out.extend(parse_zvols(&vol_txt));
        }
        Ok(out)
    }

    fn list_cmd(&self, dataset_type: &str, pool: &str) -> CmdSpec {
        self.zfs()
            .args([
                "list",
                "-H",
                "-t",
                dataset_type,
                "-o",
                "name,mountpoint,mounted",
                "-r",
                pool,
            ])
            .stdin(StdioSpec::Null)
            .stdout(StdioSpec::Pipe)
            .stderr(StdioSpec::Null)
    }

    /// Size probe feeding `pv -s`. Best effort: a probe failure only
    /// costs the progress total, never the transfer.
    fn estimate_send_size(&self, tag: &SnapshotTag, parent: Option<&SnapshotTag>) -> Option<u64> {
        let mut cmd = self.zfs().arg("send").arg("-nP");
        if let Some(p) = parent {
            cmd = cmd.arg("-i").arg(p.fs_name());
        }
        let cmd = cmd
            .arg(tag.fs_name())
            .stdout(StdioSpec::Pipe)
            .stderr(StdioSpec::Null);

        match self.runner.run_capture(&Pipeline::new().cmd(cmd)) {
            Ok(out) => parse_send_size(&out),
            Err(e) => {
                log::debug!("zfs send -nP probe failed for {}: {e}", tag.fs_name());
                None
            }
        }
    }

    fn pv(&self, size: Option<u64>) -> CmdSpec {
        let mut cmd = CmdSpec::new("pv").arg("-B").arg(PV_BUFFER);
        if let Some(s) = size {
            cmd = cmd.arg("-s").arg(s.to_string());
        }
        cmd
    }
}

impl SnapshotBackend for ZfsBackend {
    fn kind(&self) -> FsKind {
        FsKind::Zfs
    }

    fn snapshot_exists(&self, _vol: &Volume, tag: &SnapshotTag) -> Result<bool> {
        let cmd = self
            .zfs()
            .args(["list", "-t", "snapshot", "-o", "name", "-H"])
            .arg(tag.fs_name())
            .stdout(StdioSpec::Pipe)
            .stderr(StdioSpec::Null);

        // zfs exits non-zero for an unknown snapshot; that is the
        // normal "pruned" answer, not a failure.
        match self.runner.run_capture(&Pipeline::new().cmd(cmd)) {
            Ok(out) => Ok(!out.trim().is_empty()),
            Err(_) => Ok(false),
        }
    }

    fn create_snapshot(&self, _vol: &Volume, tag: &SnapshotTag) -> Result<()> {
        let cmd = self
            .zfs()
            .args(["snapshot"])
            .arg(tag.fs_name())
            .stderr(StdioSpec::Inherit);
        self.runner
            .run(&Pipeline::new().cmd(cmd))
            .with_context(|| format!("zfs snapshot {}", tag.fs_name()))
    }

    fn export(
        &self,
        _vol: &Volume,
        tag: &SnapshotTag,
        parent: Option<&SnapshotTag>,
        dest: &Path,
    ) -> Result<()> {
        let size = self.estimate_send_size(tag, parent);

        let mut send = self.zfs().arg("send");
        if let Some(p) = parent {
            send = send.arg("-i").arg(p.fs_name());
        }
        let send = send.arg(tag.fs_name()).stderr(StdioSpec::Inherit);

        let pipeline = Pipeline::new()
            .cmd(send)
            .cmd(self.pv(size))
            .cmd(
                CmdSpec::new("pigz")
                    .arg("-c")
                    .stdout(StdioSpec::ToFile(dest.to_path_buf()))
                    .stderr(StdioSpec::Inherit),
            );

        self.runner
            .run(&pipeline)
            .with_context(|| format!("zfs send {} -> {}", tag.fs_name(), dest.display()))
    }

    fn import(&self, artifact: &Path, destination: &str, force: bool) -> Result<()> {
        let mut recv = self.zfs().arg("receive");
        if force {
            recv = recv.arg("-F");
        }
        let recv = recv.arg(destination).stderr(StdioSpec::Inherit);

        let pipeline = Pipeline::new()
            .cmd(
                CmdSpec::new("pigz")
                    .arg("-dc")
                    .arg(artifact.display().to_string()),
            )
            .cmd(self.pv(None))
            .cmd(recv);

        self.runner
            .run(&pipeline)
            .with_context(|| format!("zfs receive {} <- {}", destination, artifact.display()))
    }
}

fn parse_filesystems(out: &str) -> Vec<Volume> {
    out.lines()
        .filter_map(|line| {
            let mut it = line.split_whitespace();
            let (name, mountpoint, mounted) = (it.next()?, it.next()?, it.next()?);
            let usable = mounted.eq_ignore_ascii_case("yes")
                && !matches!(mountpoint, "legacy" | "none" | "-");
            usable.then(|| Volume {
                name: name.to_string(),
                mountpoint: Some(mountpoint.into()),
                mounted: true,
                kind: FsKind::Zfs,
            })
        })
        .collect()
}

fn parse_zvols(out: &str) -> Vec<Volume> {
    out.lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(|name| Volume::new(name, FsKind::Zfs))
        .collect()
}

/// `zfs send -nP` prints a final line whose second column is the
/// estimated stream size in bytes.
fn parse_send_size(out: &str) -> Option<u64> {
    let last = out.lines().filter(|l| !l.trim().is_empty()).next_back()?;
    last.split_whitespace().nth(1)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filesystems_filtered_on_mount_state() {
        let out = "tank/data\t/tank/data\tyes\n\
                   tank/legacy\tlegacy\tyes\n\
                   tank/unmounted\t/tank/unmounted\tno\n\
                   tank/none\tnone\t-\n";
        let vols = parse_filesystems(out);
        assert_eq!(vols.len(), 1);
        assert_eq!(vols[0].name, "tank/data");
        assert!(vols[0].mounted);
    }

    #[test]
    fn zvols_have_no_mountpoint() {
        let out = "tank/vm-100-disk-0\t-\t-\n";
        let vols = parse_zvols(out);
        assert_eq!(vols.len(), 1);
        assert_eq!(vols[0].name, "tank/vm-100-disk-0");
        assert!(vols[0].mountpoint.is_none());
    }

    #[test]
    fn send_size_from_last_line() {
        let out = "full\ttank/data@t\t123456\nsize\t987654\n";
        assert_eq!(parse_send_size(out), Some(987_654));
        assert_eq!(parse_send_size(""), None);
        assert_eq!(parse_send_size("size\tnot-a-number\n"), None);
    }
}
