use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};

use super::DynRunner;
use crate::utils::process::{CmdSpec, Pipeline, StdioSpec};

pub const REQ_BINS: &[&str] = &["mount", "umount"];

pub trait MountPort: Send + Sync {
    fn mount(&self, device: &str, mountpoint: &Path, options: Option<&str>) -> Result<()>;
    fn unmount(&self, mountpoint: &Path) -> Result<()>;
}

pub struct MountCli {
    runner: Arc<DynRunner>,
}

impl MountCli {
    pub fn new(runner: Arc<DynRunner>) -> Self {
        Self { runner }
    }
}

impl MountPort for MountCli {
    fn mount(&self, device: &str, mountpoint: &Path, options: Option<&str>) -> Result<()> {
        let mut cmd = CmdSpec::new("mount");
        if let Some(opts) = options.filter(|o| !o.trim().is_empty()) {
            cmd = cmd.arg("-o").arg(opts);
        }
        let cmd = cmd
            .arg(device)
            .arg(mountpoint.display().to_string())
            .stderr(StdioSpec::Inherit);

        self.runner
            .run(&Pipeline::new().cmd(cmd))
            .with_context(|| format!("mount {} at {}", device, mountpoint.display()))
    }

    fn unmount(&self, mountpoint: &Path) -> Result<()> {
        let cmd = CmdSpec::new("umount")
            .arg(mountpoint.display().to_string())
            .stderr(StdioSpec::Inherit);

        self.runner
            .run(&Pipeline::new().cmd(cmd))
            .with_context(|| format!("umount {}", mountpoint.display()))
    }
}
