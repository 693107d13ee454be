use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use crate::AppCtx;

pub mod executor;

#[derive(Debug, Args)]
pub struct RestoreArgs {
    /// Filesystem kind the backup was taken from (zfs|btrfs)
    #[arg(long)]
    pub kind: String,

    /// Artifact to restore up to; its chain is replayed from the root
    #[arg(long)]
    pub artifact: PathBuf,

    /// Destination dataset (zfs) or directory (btrfs) to receive into
    #[arg(long)]
    pub destination: String,

    /// Overwrite the destination to match (zfs receive -F)
    #[arg(long)]
    pub force: bool,

    /// Print the replay plan without receiving anything
    #[arg(long)]
    pub dry_run: bool,
}

impl RestoreArgs {
    pub fn run(&self, ctx: &AppCtx) -> Result<()> {
        executor::run(ctx, executor::RunOpts::try_from(self)?)
    }
}
