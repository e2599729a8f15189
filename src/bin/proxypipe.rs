use std::{env, io, process};

use clap::error::ErrorKind;
use tracing::info;
use tracing_subscriber::EnvFilter;

use proxypipe::{Config, ConfigError};

fn fatal(err: impl std::fmt::Display) -> ! {
    eprintln!("ERROR: {err}");
    process::exit(-1);
}

#[tokio::main]
async fn main() {
    let config = match Config::from_args(env::args_os()) {
        Ok(config) => config,
        Err(ConfigError::Usage(err)) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => err.exit(),
            _ => {
                // usage text already explains the problem
                if err.print().is_err() {
                    eprintln!("{err}");
                }
                process::exit(-1);
            }
        },
        Err(err) => fatal(err),
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    match proxypipe::run(&config, tokio::io::stdin(), tokio::io::stdout()).await {
        // exit right away: the other direction may still be blocked on stdin
        Ok(transfer) => {
            info!("{} finished after {} bytes", transfer.direction, transfer.bytes);
            process::exit(0);
        }
        Err(err) => fatal(err),
    }
}
