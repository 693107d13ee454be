use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use crate::AppCtx;

pub mod executor;

#[derive(Debug, Args)]
pub struct BackupArgs {
    /// Block device or remote share holding the backup destination
    #[arg(long)]
    pub device: Option<String>,

    /// Where the destination gets mounted
    #[arg(long)]
    pub mountpoint: Option<PathBuf>,

    /// Options passed through to mount -o
    #[arg(long)]
    pub options: Option<String>,

    /// Print the resolved volume/artifact plan without executing
    #[arg(long)]
    pub list_only: bool,
}

impl BackupArgs {
    pub fn run(&self, ctx: &AppCtx) -> Result<()> {
        executor::run(ctx, executor::RunOpts::from(self))
    }
}
