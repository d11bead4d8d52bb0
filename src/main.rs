//! zfs-backup - Main entry point
//!
//! Resolves the config path, loads the context, and dispatches either a
//! single-step subcommand or the full configured backup sequence. The
//! process exit code reflects the engine's terminal state.

use anyhow::Result;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use zfs_backup::backend::{RcloneCli, ZfsCli};
use zfs_backup::cli::{Cli, Commands};
use zfs_backup::{Context, PipelineRunner, RunState, SequenceEngine, Step, StepName, StepRunner};

/// Initialize tracing; `--verbose` lowers the default level to debug,
/// `RUST_LOG` overrides either.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse_args();
    init_logging(cli.verbose);

    let Some(config_path) = cli.config else {
        eprintln!("error: must specify --config or ZFS_BACKUP_CONFIG");
        std::process::exit(1);
    };
    if !config_path.is_file() {
        eprintln!("error: {} is not a valid file", config_path.display());
        std::process::exit(1);
    }

    let ctx = match Context::load(&config_path) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };
    debug!("configuration loaded from {}", config_path.display());

    let exit = match run(&ctx, cli.command, cli.dry_run) {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            1
        }
    };
    std::process::exit(exit);
}

fn run(ctx: &Context, command: Option<Commands>, dry_run: bool) -> Result<i32> {
    let zfs = ZfsCli::new(ctx.encryption_passphrase.clone());
    let rclone = RcloneCli::new(
        ctx.rclone_conf.clone(),
        ctx.rclone_bwlimit.clone(),
        &ctx.rclone_args,
    );

    // Single-step subcommands share the same operation code paths as
    // the full sequence; only `perform` drives the engine.
    let single_step = match command {
        None | Some(Commands::Perform) => None,
        Some(Commands::ShowContext) => {
            ctx.show(true);
            return Ok(0);
        }
        Some(Commands::Lock) => Some(Step::new(StepName::Lock)),
        Some(Commands::Unlock) => Some(Step::new(StepName::Unlock)),
        Some(Commands::Snapshot) => Some(Step::new(StepName::Snapshot)),
        Some(Commands::PruneSnapshot { yes }) => Some(Step {
            name: StepName::PruneSnapshots,
            yes,
        }),
    };

    let mut runner = PipelineRunner::new(ctx, &zfs, &rclone);

    match single_step {
        Some(step) => {
            runner.run_step(&step, dry_run)?;
            Ok(0)
        }
        None => {
            let mut engine = SequenceEngine::new(
                ctx.backup_sequences.clone(),
                ctx.on_failure.clone(),
                dry_run,
            );
            match engine.run(&mut runner) {
                RunState::Succeeded => Ok(0),
                state => {
                    error!("backup sequence terminated: {state}");
                    Ok(1)
                }
            }
        }
    }
}
