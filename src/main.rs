#![deny(warnings)]
#![deny(clippy::unwrap_used)]

use std::process::ExitCode;

use clap::Parser;
use dotenv::dotenv;
use tracing_subscriber::EnvFilter;

use tsh::tsh::cli::Cli;
use tsh::tsh::config::TransportSettings;
use tsh::tsh::operations::SshOperations;
use tsh::tsh::{Dispatcher, TshError};

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        // --help and --version
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            let message = e.to_string();
            let message = message.trim().trim_start_matches("error: ");
            return fail(&TshError::Usage(message.to_string()));
        }
    };

    // RUST_LOG overrides -v; logs stay on stderr so stdout carries output
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter())),
        )
        .with_writer(std::io::stderr)
        .init();

    let operations = SshOperations::new(TransportSettings::from_env());
    let transport = operations.transport().clone();
    let mut dispatcher = Dispatcher::new(&operations);

    let result = tokio::select! {
        result = dispatcher.run(cli, transport) => result,
        _ = tokio::signal::ctrl_c() => Err(TshError::Interrupted),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e @ TshError::Interrupted) => {
            // A pending password prompt still holds a blocking thread
            fail(&e);
            std::process::exit(i32::from(e.exit_code()));
        }
        Err(e) => fail(&e),
    }
}

fn fail(err: &TshError) -> ExitCode {
    eprintln!("tsh: {}: {}", err.stage(), err);
    ExitCode::from(err.exit_code())
}
