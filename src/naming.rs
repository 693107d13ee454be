//! Deterministic mapping from a volume identity and a timestamp to the
//! set of file names on the backup destination: artifact, lock marker
//! and chain-pointer sidecar. Everything here is pure string work; the
//! exact shapes are load-bearing because the chain resolver and the
//! restore walker re-derive ancestry from them.

use std::path::{Path, PathBuf};

use crate::volume::FsKind;

const INCREMENTAL_INFIX: &str = ".incremental";
const MARKER_SUFFIX: &str = ".doing.txt";
const SIDECAR_SUFFIX: &str = ".txt";

/// Volume name made file-name-safe: `/` becomes `--`.
#[inline]
pub fn volume_title(name: &str) -> String {
    name.replace('/', "--")
}

/// Point-in-time identity of one volume. The filesystem manager sees
/// `{volume}@{stamp}`; file names embed `{title}@{stamp}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotTag {
    pub volume: String,
    pub stamp: String,
}

impl SnapshotTag {
    pub fn new(volume: impl Into<String>, stamp: impl Into<String>) -> Self {
        Self {
            volume: volume.into(),
            stamp: stamp.into(),
        }
    }

    /// Name the filesystem manager operates on, e.g. `tank/data@2024-05-01_T03-00-00`.
    #[inline]
    pub fn fs_name(&self) -> String {
        format!("{}@{}", self.volume, self.stamp)
    }

    /// Form embedded in file names, e.g. `tank--data@2024-05-01_T03-00-00`.
    #[inline]
    pub fn file_tag(&self) -> String {
        format!("{}@{}", volume_title(&self.volume), self.stamp)
    }
}

impl std::fmt::Display for SnapshotTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.fs_name())
    }
}

/// `{title}@{stamp}.{kind}.gz`
pub fn full_artifact_name(tag: &SnapshotTag, kind: FsKind) -> String {
    format!("{}.{}.gz", tag.file_tag(), kind.as_str())
}

/// `{title}@{stamp}.incremental.{kind}.gz`
pub fn incremental_artifact_name(tag: &SnapshotTag, kind: FsKind) -> String {
    format!("{}{}.{}.gz", tag.file_tag(), INCREMENTAL_INFIX, kind.as_str())
}

/// `{title}@{stamp}.doing.txt` — one marker per tag, shared by the full
/// and the incremental spelling of the same artifact.
pub fn marker_name_for_tag(tag: &SnapshotTag) -> String {
    format!("{}{}", tag.file_tag(), MARKER_SUFFIX)
}

fn strip_artifact_suffix(file_name: &str) -> Option<&str> {
    file_name
        .strip_suffix(".zfs.gz")
        .or_else(|| file_name.strip_suffix(".btrfs.gz"))
}

/// Marker file name derived from an artifact file name; the
/// `.incremental` infix is dropped so both spellings map to one marker.
pub fn marker_name_for_artifact(file_name: &str) -> Option<String> {
    let stem = strip_artifact_suffix(file_name)?;
    let stem = stem.strip_suffix(INCREMENTAL_INFIX).unwrap_or(stem);
    Some(format!("{stem}{MARKER_SUFFIX}"))
}

/// Sidecar file name for an artifact: `.{kind}.gz` replaced by `.txt`,
/// the `.incremental` infix kept.
pub fn sidecar_name_for_artifact(file_name: &str) -> Option<String> {
    let stem = strip_artifact_suffix(file_name)?;
    Some(format!("{stem}{SIDECAR_SUFFIX}"))
}

/// Sidecar path next to an artifact; `None` when the path is not
/// artifact-shaped.
pub fn sidecar_path(artifact: &Path) -> Option<PathBuf> {
    let name = artifact.file_name()?.to_str()?;
    sidecar_name_for_artifact(name).map(|s| artifact.with_file_name(s))
}

/// Timestamp embedded in an artifact file name.
pub fn stamp_of_artifact(file_name: &str) -> Option<&str> {
    let (_, rest) = file_name.split_once('@')?;
    strip_artifact_suffix(rest)
        .map(|r| r.strip_suffix(INCREMENTAL_INFIX).unwrap_or(r))
}

/// Whether `file_name` is an artifact of the given volume title and kind.
/// The `@` separator keeps `tank--data2` files out of `tank--data`'s chain.
pub fn is_artifact_of(file_name: &str, title: &str, kind: FsKind) -> bool {
    file_name.len() > title.len()
        && file_name.as_bytes()[title.len()] == b'@'
        && file_name.starts_with(title)
        && file_name.ends_with(&format!(".{}.gz", kind.as_str()))
}

#[inline]
pub fn is_incremental_artifact(file_name: &str) -> bool {
    file_name.contains(INCREMENTAL_INFIX)
}

/// `{mountpoint}/{jobName}`
#[inline]
pub fn dest_root(mountpoint: &Path, job_name: &str) -> PathBuf {
    mountpoint.join(job_name)
}

/// `{dest root}/{title}` — the directory holding one volume's artifacts.
#[inline]
pub fn volume_dir(root: &Path, title: &str) -> PathBuf {
    root.join(title)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag() -> SnapshotTag {
        SnapshotTag::new("tank/data", "2024-05-01_T03-00-00")
    }

    #[test]
    fn title_is_slash_safe() {
        assert_eq!(volume_title("tank/data"), "tank--data");
        assert_eq!(volume_title("flat"), "flat");
    }

    #[test]
    fn tag_forms() {
        let t = tag();
        assert_eq!(t.fs_name(), "tank/data@2024-05-01_T03-00-00");
        assert_eq!(t.file_tag(), "tank--data@2024-05-01_T03-00-00");
    }

    #[test]
    fn artifact_names_bit_exact() {
        let t = tag();
        assert_eq!(
            full_artifact_name(&t, FsKind::Zfs),
            "tank--data@2024-05-01_T03-00-00.zfs.gz"
        );
        assert_eq!(
            incremental_artifact_name(&t, FsKind::Btrfs),
            "tank--data@2024-05-01_T03-00-00.incremental.btrfs.gz"
        );
    }

    #[test]
    fn marker_drops_incremental_infix() {
        assert_eq!(
            marker_name_for_tag(&tag()),
            "tank--data@2024-05-01_T03-00-00.doing.txt"
        );
        assert_eq!(
            marker_name_for_artifact("tank--data@2024-05-01_T03-00-00.incremental.zfs.gz")
                .unwrap(),
            "tank--data@2024-05-01_T03-00-00.doing.txt"
        );
        assert_eq!(
            marker_name_for_artifact("tank--data@2024-05-01_T03-00-00.zfs.gz").unwrap(),
            "tank--data@2024-05-01_T03-00-00.doing.txt"
        );
    }

    #[test]
    fn sidecar_keeps_incremental_infix() {
        assert_eq!(
            sidecar_name_for_artifact("tank--data@2024-05-01_T03-00-00.incremental.zfs.gz")
                .unwrap(),
            "tank--data@2024-05-01_T03-00-00.incremental.txt"
        );
        assert_eq!(
            sidecar_name_for_artifact("tank--data@2024-05-01_T03-00-00.btrfs.gz").unwrap(),
            "tank--data@2024-05-01_T03-00-00.txt"
        );
        assert!(sidecar_name_for_artifact("tank--data@x.doing.txt").is_none());
    }

    #[test]
    fn stamp_extraction() {
        assert_eq!(
            stamp_of_artifact("tank--data@2024-05-01_T03-00-00.zfs.gz"),
            Some("2024-05-01_T03-00-00")
        );
        assert_eq!(
            stamp_of_artifact("tank--data@2024-05-01_T03-00-00.incremental.btrfs.gz"),
            Some("2024-05-01_T03-00-00")
        );
        assert_eq!(stamp_of_artifact("no-separator.zfs.gz"), None);
    }

    #[test]
    fn artifact_matching_respects_separator() {
        assert!(is_artifact_of(
            "tank--data@2024-05-01_T03-00-00.zfs.gz",
            "tank--data",
            FsKind::Zfs
        ));
        // sibling volume sharing the prefix must not match
        assert!(!is_artifact_of(
            "tank--data2@2024-05-01_T03-00-00.zfs.gz",
            "tank--data",
            FsKind::Zfs
        ));
        // wrong kind, marker and sidecar files must not match
        assert!(!is_artifact_of(
            "tank--data@2024-05-01_T03-00-00.btrfs.gz",
            "tank--data",
            FsKind::Zfs
        ));
        assert!(!is_artifact_of(
            "tank--data@2024-05-01_T03-00-00.doing.txt",
            "tank--data",
            FsKind::Zfs
        ));
    }

    #[test]
    fn layout() {
        let root = dest_root(Path::new("/mnt"), "backup_macmini");
        assert_eq!(root, PathBuf::from("/mnt/backup_macmini"));
        assert_eq!(
            volume_dir(&root, "tank--data"),
            PathBuf::from("/mnt/backup_macmini/tank--data")
        );
    }
}
