//! StashKeep — client for an encrypted personal data keeper.
//!
//! Keeps a single login session in the platform keyring, repairs expired
//! sessions transparently, retries transient failures, and serves reads from
//! an encrypted local cache when the network is down.

mod api;
mod auth;
mod buildinfo;
mod cache;
mod cli;
mod config;
mod models;
mod service;
mod transport;

use clap::Parser;

#[tokio::main]
async fn main() {
    // Load .env if present; ignore its absence.
    let _ = dotenvy::dotenv();

    let args = cli::Cli::parse();
    if let Err(err) = cli::run(args).await {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}
