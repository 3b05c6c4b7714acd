//! blocksync: replay sync scenarios and reconcile block trees.
//!
//! # Usage
//!
//! ```text
//! blocksync replay <scenario.yaml|json> [--json]
//! blocksync reconcile <tree> --template <template> [--subtree <id>] [--lock inherit|none|insert|all] [--json]
//! ```

mod commands;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};

use commands::{reconcile::ReconcileArgs, replay::ReplayArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "blocksync",
    version,
    about = "Drive block-tree synchronization from the command line",
    long_about = None,
)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a scripted scenario against a fresh store and print its trace.
    Replay(ReplayArgs),

    /// Reconcile a block tree against a template and print the result.
    Reconcile(ReconcileArgs),
}

fn init_tracing(verbose: u8) {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Replay(args) => args.run(),
        Commands::Reconcile(args) => args.run(),
    }
}
