mod cmd;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jitcall", about = "Generate, load and call machine code at runtime")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the greeting stub and call it
    Run(cmd::run::Cmd),
    /// Print the decoded greeting stub
    Inspect(cmd::inspect::Cmd),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("JITCALL_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Run(cmd) => cmd.execute(),
        Commands::Inspect(cmd) => cmd.execute(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "jitcall failed");
            ExitCode::FAILURE
        }
    }
}
