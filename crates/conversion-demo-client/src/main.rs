//! Demo CLI exercising the CronJob conversion webhook.
//!
//! The client creates, fetches and deletes the same logical resource through
//! both served API versions. Fetching through the "other" version forces the
//! apiserver to call the conversion webhook, which makes the lossy payload
//! handling directly observable.
use std::{process::ExitCode, str::FromStr};

use clap::Parser;
use kube::Client;
use tracing_subscriber::EnvFilter;

use crate::commands::DemoCommand;

mod commands;

#[derive(Debug, Parser)]
#[command(about = "Demo client for the CronJob conversion webhook", version)]
struct Cli {
    /// The operation to run, eg. createv1 or getv2.
    command: String,

    /// The name of the CronJob resource to operate on.
    resource_name: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Missing or extra arguments print the usage and exit non-zero.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                    ExitCode::SUCCESS
                }
                _ => ExitCode::FAILURE,
            };
        }
    };

    // An unknown operation is not an error, the demo just tells the user
    // what it understands.
    let command = match DemoCommand::from_str(&cli.command) {
        Ok(command) => command,
        Err(_) => {
            println!("unknown operation {:?}", cli.command);
            println!("use one of: createv1, getv1, deletev1, createv2, getv2, deletev2");
            return ExitCode::SUCCESS;
        }
    };

    let client = match Client::try_default().await {
        Ok(client) => client,
        Err(err) => {
            tracing::error!("{}", snafu::Report::from_error(err));
            return ExitCode::FAILURE;
        }
    };

    match commands::run(client, command, &cli.resource_name).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{}", snafu::Report::from_error(err));
            ExitCode::FAILURE
        }
    }
}
