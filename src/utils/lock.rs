//! Job-level advisory lock. The destination directory assumes a single
//! writer; this flock keeps a second `snapship` instance from starting
//! a run while one is active. The per-artifact transfer markers in
//! `crate::marker` are a different mechanism with different lifetime.

use std::{
    fs::{File, OpenOptions},
    io,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use fs2::FileExt;

pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("path", &self.path)
            .finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

impl LockGuard {
    pub fn try_acquire(name: &str) -> Result<Self> {
        let path = lock_path_for(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("open lockfile {}", path.display()))?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { file, path }),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                bail!("another run holds lock: {}", path.display())
            }
            Err(e) => Err(e).with_context(|| format!("flock {}", path.display())),
        }
    }
}

fn lock_path_for(name: &str) -> PathBuf {
    let file = format!("{}.lock", sanitize_name(name));
    let run_lock = Path::new("/run/lock");
    if dir_writable(run_lock) {
        run_lock.join(file)
    } else {
        std::env::temp_dir().join(file)
    }
}

fn dir_writable(dir: &Path) -> bool {
    if !dir.is_dir() {
        return false;
    }
    let probe = dir.join(".snapship_lock_probe");
    match OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&probe)
    {
        Ok(_) => {
            let _ = std::fs::remove_file(probe);
            true
        }
        Err(_) => false,
    }
}

fn sanitize_name(s: &str) -> String {
    let filtered: String = s
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    format!("snapship_{filtered}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rand_suffix() -> String {
        use std::time::{SystemTime, UNIX_EPOCH};
        let ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        format!("{ns}")
    }

    #[test]
    fn acquire_and_reacquire_after_drop() {
        let name = format!("lock-basic-{}", rand_suffix());
        let g1 = LockGuard::try_acquire(&name).expect("first acquire ok");
        drop(g1);
        let _g2 = LockGuard::try_acquire(&name).expect("re-acquire ok after drop");
    }

    #[test]
    fn conflict_same_name() {
        let name = format!("lock-conflict-{}", rand_suffix());
        let _g1 = LockGuard::try_acquire(&name).expect("first acquire ok");
        let err = LockGuard::try_acquire(&name).unwrap_err().to_string();
        assert!(err.contains("another run holds lock"), "err was: {err}");
    }

    #[test]
    fn sanitize_keeps_safe_chars_only() {
        assert_eq!(sanitize_name("a/b c.d"), "snapship_abcd");
        assert_eq!(sanitize_name("ok_Name-1"), "snapship_ok_Name-1");
    }

    #[test]
    fn lock_path_lands_in_run_lock_or_tmp() {
        let p = lock_path_for(&format!("lp-{}", rand_suffix()));
        let parent = p.parent().unwrap();
        let tmp = std::env::temp_dir();
        assert!(
            parent.starts_with("/run/lock") || parent.starts_with(&tmp),
            "parent={parent:?}"
        );
    }
}
