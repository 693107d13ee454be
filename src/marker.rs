//! Transfer-in-progress markers. A marker is created before the export
//! pipeline starts and removed only after it reports success; anything
//! that dies in between leaves the marker behind, which is what the
//! chain resolver keys on. Existence is the whole contract, the file
//! content carries no meaning.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tracing as log;

use crate::{
    error::JobError,
    naming::{self, SnapshotTag},
};

/// Marker path for an artifact, next to the artifact itself.
pub fn marker_path(artifact: &Path) -> Option<PathBuf> {
    let name = artifact.file_name()?.to_str()?;
    let marker = naming::marker_name_for_artifact(name)?;
    Some(artifact.with_file_name(marker))
}

/// Create the marker for `artifact`. Any write failure is a hard
/// `LockConflict`; a marker that cannot be created means the artifact
/// must not be written either.
pub fn acquire(artifact: &Path) -> Result<(), JobError> {
    let path = marker_path(artifact).ok_or_else(|| JobError::LockConflict {
        path: artifact.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidInput, "not an artifact path"),
    })?;
    log::debug!("marker acquire {}", path.display());
    fs::write(&path, b"writing file").map_err(|source| JobError::LockConflict { path, source })
}

/// Remove the marker for `artifact`. Removing a marker that is not
/// there is a no-op, not an error.
pub fn release(artifact: &Path) -> io::Result<()> {
    let Some(path) = marker_path(artifact) else {
        return Ok(());
    };
    log::debug!("marker release {}", path.display());
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Pure existence check used by the chain resolver.
#[inline]
pub fn is_locked(dir: &Path, tag: &SnapshotTag) -> bool {
    dir.join(naming::marker_name_for_tag(tag)).exists()
}
