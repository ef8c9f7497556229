//! avdev command-line entry point.

use std::process;

use clap::Parser;
use tracing::{debug, instrument};

use avdev::{
    cli::{Cli, CliCommand, formatting::format_error, watch},
    config::Config,
    services::MediaDevices,
    tracing_config,
};

fn load_config(cli: &Cli) -> avdev::Result<Config> {
    match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

#[instrument(skip_all)]
async fn run(cli: Cli, config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let devices = MediaDevices::new(&config)?;

    match cli.command.one_shot() {
        Some(command) => {
            let output = command.execute(&devices)?;
            println!("{output}");
        }
        None => {
            let json = matches!(cli.command, CliCommand::Watch { json: true });
            watch(&devices, json).await?;
        }
    }

    debug!("Done");
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {e}", format_error("Error"));
            process::exit(2);
        }
    };

    let tracing_result = if matches!(cli.command, CliCommand::Watch { .. }) {
        tracing_config::init_with_file(config.general.log_level)
    } else {
        tracing_config::init(config.general.log_level)
    };
    if let Err(e) = tracing_result {
        eprintln!("{}: cannot initialize logging: {e}", format_error("Warning"));
    }

    if let Err(e) = run(cli, config).await {
        eprintln!("{}: {e}", format_error("Error"));
        process::exit(1);
    }
}
