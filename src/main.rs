use std::{process::ExitCode, sync::Arc};

use tokio_util::sync::CancellationToken;

use crate::config::LogStreamConfig;
use crate::runtime::DockerRuntime;
use crate::server::AppState;

mod cli;
mod config;
mod logs;
mod runtime;
mod server;
mod signals;

#[tokio::main]
async fn main() -> ExitCode {
    // Values from a local .env behave like real environment variables.
    let _ = dotenv::dotenv();

    // Initialize the logger
    env_logger::init();

    let args = cli::get_cli_args();
    let config = Arc::new(LogStreamConfig::from(args));
    log::debug!("Log stream defaults: {config:?}");
    if config.include.is_empty() {
        log::info!("No default include patterns; every request must pass `include`");
    }

    let runtime = match DockerRuntime::connect() {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    // Requests report an unreachable daemon in-band, so this is not fatal.
    if let Err(e) = runtime.ping().await {
        log::warn!("{e}");
    }

    let sessions = CancellationToken::new();
    let state = AppState::new(Arc::new(runtime), config, sessions.clone());

    match server::serve(args.listen, state, signals::shutdown_signal(sessions)).await {
        Ok(()) => {
            log::info!("Server stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
