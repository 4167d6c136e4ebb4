//! methodhub - operator CLI for the analytics method registry
//!
//! Usage:
//!   methodhub upload kmeans.wasm            Register a method module
//!   methodhub validate kmeans mapping.json  Check a port configuration
//!   methodhub populate ./methods            Bulk-import a directory

mod cli;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_env("METHODHUB_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = cli::Cli::parse();
    match cli::run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("methodhub: {:#}", e);
            ExitCode::from(2)
        }
    }
}
