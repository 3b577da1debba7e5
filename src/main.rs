use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use guildhall::{Config, Runtime, observability};
use tracing::error;

#[derive(Parser)]
#[command(name = "guildhall", version, about = "Guild-management bot runtime")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "guildhall.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("guildhall: {e}");
            return ExitCode::FAILURE;
        }
    };

    observability::init_tracing(&config.logging);

    let runtime = match Runtime::build(config).await {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Startup failed");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = runtime.run().await {
        error!(error = %e, "Runtime exited with error");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
