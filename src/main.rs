use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

mod chain;
mod commands;
mod config;
mod error;
mod marker;
mod naming;
#[cfg(test)]
mod testutil;
mod tooling;
mod ui;
mod utils;
mod volume;

use commands::backup;
use commands::restore;
use config::Config;
use tooling::Toolbox;
use utils::process::ProcessRunner;

pub struct AppCtx {
    pub cfg: Option<Config>,
    pub tools: Toolbox,
}

#[derive(Parser, Debug)]
#[command(
    name = "snapship",
    about = "Incremental ZFS/BTRFS snapshot backup and restore over a mounted destination",
    arg_required_else_help = false,
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    #[arg(long, default_value = "./config.toml", global = true)]
    config: PathBuf,

    #[arg(long, global = true)]
    debug: bool,

    #[arg(long, global = true)]
    check_config: bool,

    #[arg(long, global = true)]
    print_config: bool,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    Backup(backup::BackupArgs),
    Restore(restore::RestoreArgs),
}

fn init_tracing(debug: bool) {
    let default = if debug { "trace" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_file(debug)
        .with_line_number(debug)
        .without_time()
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    if cli.check_config || cli.print_config {
        let cfg = Config::load(&cli.config)?;
        if cli.check_config {
            tracing::info!("config OK");
        }
        if cli.print_config {
            println!("{}", cfg.to_toml()?);
        }
        return Ok(());
    }

    let Some(cmd) = cli.command else {
        let mut cmd = Cli::command();
        cmd.print_help()?;
        println!();
        return Ok(());
    };

    // backup cannot run without a config; restore takes everything on
    // the command line and consults a config only when one is present
    let cfg = match &cmd {
        Cmd::Backup(_) => Some(Config::load(&cli.config)?),
        Cmd::Restore(_) => cli
            .config
            .exists()
            .then(|| Config::load(&cli.config))
            .transpose()?,
    };

    let runner = Arc::new(ProcessRunner::new());
    let ctx = AppCtx {
        tools: Toolbox::new(runner),
        cfg,
    };

    match cmd {
        Cmd::Backup(args) => args.run(&ctx),
        Cmd::Restore(args) => args.run(&ctx),
    }
}
