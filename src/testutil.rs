//! Backend double shared by the chain and orchestrator tests: snapshot
//! liveness comes from a fixed set, exports write a stub file, imports
//! are recorded instead of executed.

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use anyhow::Result;

use crate::{
    naming::SnapshotTag,
    tooling::SnapshotBackend,
    volume::{FsKind, Volume},
};

pub struct MockBackend {
    pub kind: FsKind,
    pub live: Mutex<HashSet<String>>,
    pub exports: Mutex<Vec<PathBuf>>,
    pub imports: Mutex<Vec<(PathBuf, String)>>,
    pub fail_create: bool,
    pub fail_export: bool,
    pub fail_import_at: Option<usize>,
}

impl MockBackend {
    pub fn zfs(live: &[String]) -> Self {
        Self {
            kind: FsKind::Zfs,
            live: Mutex::new(live.iter().cloned().collect()),
            exports: Mutex::new(Vec::new()),
            imports: Mutex::new(Vec::new()),
            fail_create: false,
            fail_export: false,
            fail_import_at: None,
        }
    }

    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn failing_export(mut self) -> Self {
        self.fail_export = true;
        self
    }

    pub fn failing_import_at(mut self, step: usize) -> Self {
        self.fail_import_at = Some(step);
        self
    }
}

impl SnapshotBackend for MockBackend {
    fn kind(&self) -> FsKind {
        self.kind
    }

    fn snapshot_exists(&self, _vol: &Volume, tag: &SnapshotTag) -> Result<bool> {
        Ok(self.live.lock().unwrap().contains(&tag.fs_name()))
    }

    fn create_snapshot(&self, _vol: &Volume, tag: &SnapshotTag) -> Result<()> {
        if self.fail_create {
            anyhow::bail!("snapshot command exited with status 1");
        }
        self.live.lock().unwrap().insert(tag.fs_name());
        Ok(())
    }

    fn export(
        &self,
        _vol: &Volume,
        _tag: &SnapshotTag,
        _parent: Option<&SnapshotTag>,
        dest: &Path,
    ) -> Result<()> {
        if self.fail_export {
            // a dying pipeline leaves a truncated artifact behind
            fs::write(dest, b"par")?;
            anyhow::bail!("pipeline exited with status 1");
        }
        fs::write(dest, b"stream")?;
        self.exports.lock().unwrap().push(dest.to_path_buf());
        Ok(())
    }

    fn import(&self, artifact: &Path, destination: &str, _force: bool) -> Result<()> {
        let mut imports = self.imports.lock().unwrap();
        if Some(imports.len()) == self.fail_import_at {
            anyhow::bail!("receive exited with status 1");
        }
        imports.push((artifact.to_path_buf(), destination.to_string()));
        Ok(())
    }
}
