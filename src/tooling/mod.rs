use std::{path::Path, sync::Arc};

use anyhow::Result;

use crate::{
    naming::SnapshotTag,
    utils::process::Runner,
    volume::{FsKind, Volume},
};

pub mod btrfs;
pub mod mount;
pub mod zfs;

pub use btrfs::BtrfsBackend;
pub use mount::{MountCli, MountPort};
pub use zfs::ZfsBackend;

pub type DynRunner = dyn Runner + Send + Sync;

/// One polymorphic capability over the two filesystem managers. The
/// chain resolver and both orchestrators are written once against this
/// trait; the zfs/btrfs split lives entirely behind it.
pub trait SnapshotBackend: Send + Sync {
    fn kind(&self) -> FsKind;

    /// Live snapshot check. Liveness is re-checked every time, never
    /// cached: snapshots may be pruned by tooling outside this process.
    fn snapshot_exists(&self, vol: &Volume, tag: &SnapshotTag) -> Result<bool>;

    fn create_snapshot(&self, vol: &Volume, tag: &SnapshotTag) -> Result<()>;

    /// Export the snapshot (full, or as a delta against `parent`)
    /// through compression into `dest`. Blocks until the external
    /// pipeline exits.
    fn export(
        &self,
        vol: &Volume,
        tag: &SnapshotTag,
        parent: Option<&SnapshotTag>,
        dest: &Path,
    ) -> Result<()>;

    /// Decompress `artifact` and receive it into `destination`.
    /// `force` maps to overwrite semantics where the manager has them.
    fn import(&self, artifact: &Path, destination: &str, force: bool) -> Result<()>;
}

pub struct Toolbox {
    zfs: Arc<ZfsBackend>,
    btrfs: Arc<BtrfsBackend>,
    mount: Arc<dyn MountPort>,
}

impl Toolbox {
    pub fn new(runner: Arc<DynRunner>) -> Self {
        Self {
            zfs: Arc::new(ZfsBackend::new(runner.clone())),
            btrfs: Arc::new(BtrfsBackend::new(runner.clone())),
            mount: Arc::new(MountCli::new(runner)),
        }
    }

    pub fn backend(&self, kind: FsKind) -> Arc<dyn SnapshotBackend> {
        match kind {
            FsKind::Zfs => self.zfs.clone(),
            FsKind::Btrfs => self.btrfs.clone(),
        }
    }

    #[inline]
    pub fn zfs(&self) -> Arc<ZfsBackend> {
        self.zfs.clone()
    }

    #[inline]
    pub fn btrfs(&self) -> Arc<BtrfsBackend> {
        self.btrfs.clone()
    }

    #[inline]
    pub fn mount(&self) -> Arc<dyn MountPort> {
        self.mount.clone()
    }
}

/// Binaries a job with the given source kind needs in PATH.
pub fn required_bins(kind: FsKind) -> Vec<&'static str> {
    let mut all: Vec<&'static str> = Vec::new();
    match kind {
        FsKind::Zfs => all.extend(zfs::REQ_BINS),
        FsKind::Btrfs => all.extend(btrfs::REQ_BINS),
    }
    all.extend(mount::REQ_BINS);
    all
}
