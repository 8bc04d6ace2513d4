//! Olav CLI binary: start the orchestration server or mint a master token.
//!
//! Exit codes: 0 success, 1 startup misconfiguration, 2 fatal runtime error,
//! 99 "already initialized" for idempotent init commands.

use clap::{Parser, Subcommand};
use std::sync::Arc;

use olav::bootstrap::{Collaborators, Orchestrator};

const EXIT_MISCONFIGURED: i32 = 1;
const EXIT_RUNTIME: i32 = 2;
const EXIT_ALREADY_INITIALIZED: i32 = 99;

#[derive(Parser, Debug)]
#[command(name = "olav")]
#[command(about = "Olav — network-operations workflow orchestrator")]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server.
    Serve {
        /// Listen address (overrides OLAV_LISTEN_ADDR).
        #[arg(long, value_name = "ADDR")]
        addr: Option<String>,
    },
    /// Generate a master token for MASTER_TOKEN (refuses when one is set).
    InitToken,
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
}

fn load_settings() -> env_config::Settings {
    if let Err(e) = env_config::load_and_apply(None) {
        eprintln!("config: {e}");
        std::process::exit(EXIT_MISCONFIGURED);
    }
    match env_config::Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("config: {e}");
            std::process::exit(EXIT_MISCONFIGURED);
        }
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let args = Args::parse();
    let mut settings = load_settings();

    match args.cmd {
        Command::InitToken => {
            if settings.master_token.is_some() {
                eprintln!("MASTER_TOKEN is already configured");
                std::process::exit(EXIT_ALREADY_INITIALIZED);
            }
            println!("{}", olav::session::generate_master_token());
        }
        Command::Serve { addr } => {
            if let Some(addr) = addr {
                settings.listen_addr = addr;
            }
            let (orchestrator, generated) =
                match Orchestrator::build(settings, Collaborators::loopback()) {
                    Ok(built) => built,
                    Err(e) => {
                        eprintln!("startup: {e}");
                        std::process::exit(EXIT_MISCONFIGURED);
                    }
                };
            if let Some(master) = generated {
                // Logged exactly once; operators must capture it to register clients.
                tracing::warn!("generated master token: {master}");
            }
            if let Err(e) = serve::run_serve(Arc::new(orchestrator)).await {
                eprintln!("server: {e}");
                std::process::exit(EXIT_RUNTIME);
            }
        }
    }
}
