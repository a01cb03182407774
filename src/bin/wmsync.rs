//! wmsync CLI Binary
//!
//! Command-line interface for synchronizing a local folder with a remote
//! workspace.

use clap::Parser;
use std::process;
use wmsync::logging::init_logging;
use wmsync::tooling::cli::{Cli, CliContext};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let context = match CliContext::new(cli.workspace.clone(), cli.config.clone()) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error initializing workspace: {:#}", e);
            process::exit(1);
        }
    };

    let logging = cli.logging_config(context.logging());
    if let Err(e) = init_logging(Some(&logging)) {
        eprintln!("Error initializing logging: {}", e);
        process::exit(1);
    }

    match context.execute(&cli).await {
        Ok(output) => {
            if !output.text.is_empty() {
                println!("{}", output.text);
            }
            if !output.success {
                process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}
