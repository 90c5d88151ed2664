//! Rootforge - builds a minimal Linux root filesystem from package descriptors
//!
//! Loads the package catalog, resolves the build order and cross-compiles
//! every package into a staged rootfs (using convenient-rootfs).

mod commands;

use clap::Parser;
use commands::{Cli, Commands};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rootforge=info,convenient_rootfs=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Build(args) => {
            println!("\n╔════════════════════════════════════════════════════════╗");
            println!("║                  ROOTFORGE ROOTFS BUILD                ║");
            println!("╚════════════════════════════════════════════════════════╝\n");
            commands::build::execute(args)
        }
        Commands::Order { configs } => {
            commands::order::execute(configs).map(|()| ExitCode::SUCCESS)
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("❌ {e}");
            ExitCode::FAILURE
        }
    }
}
