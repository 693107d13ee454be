use std::{fmt, path::PathBuf, str::FromStr};

use anyhow::bail;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FsKind {
    Zfs,
    Btrfs,
}

impl FsKind {
    /// Suffix embedded in artifact file names ("zfs" / "btrfs").
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            FsKind::Zfs => "zfs",
            FsKind::Btrfs => "btrfs",
        }
    }
}

impl fmt::Display for FsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FsKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zfs" => Ok(FsKind::Zfs),
            "btrfs" => Ok(FsKind::Btrfs),
            other => bail!("unknown filesystem kind '{other}' (expected zfs|btrfs)"),
        }
    }
}

/// One dataset/subvolume subject to backup, as reported by the
/// enumeration side of a backend. Immutable for the duration of a run.
#[derive(Debug, Clone)]
pub struct Volume {
    /// Hierarchical name ("tank/data" for ZFS, subvolume path for BTRFS).
    pub name: String,
    /// Where the volume is mounted; zvols have none.
    pub mountpoint: Option<PathBuf>,
    pub mounted: bool,
    pub kind: FsKind,
}

impl Volume {
    pub fn new(name: impl Into<String>, kind: FsKind) -> Self {
        Self {
            name: name.into(),
            mountpoint: None,
            mounted: false,
            kind,
        }
    }

    /// File-name-safe identity used in artifact names and the
    /// destination directory layout.
    #[inline]
    pub fn title(&self) -> String {
        crate::naming::volume_title(&self.name)
    }
}
