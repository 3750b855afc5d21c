//! Multi-table Texas Hold'em poker server.
//!
//! Binds the tick-driven engine from `holdem_core` to a TCP socket and
//! runs it until interrupted.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Error;
use ctrlc::set_handler;
use log::info;
use pico_args::Arguments;

use holdem_core::ServerConfig;
use holdem_core::net::server::Server;

const HELP: &str = "\
Run a multi-table Texas Hold'em poker server

USAGE:
  holdem_server [OPTIONS]

OPTIONS:
  --bind     IP:PORT    Server socket bind address  [default: env SERVER_BIND or 127.0.0.1:40888]
  --config   PATH       Server config file (JSON)   [default: env SERVER_CONFIG or server.cfg]

FLAGS:
  -h, --help            Print help information

ENVIRONMENT:
  SERVER_BIND           Server bind address (e.g., 0.0.0.0:40888)
  SERVER_CONFIG         Path to the config file
  RUST_LOG              Log filter (e.g., info, holdem_core=debug)
";

struct Args {
    bind: SocketAddr,
    config_path: PathBuf,
}

fn main() -> Result<(), Error> {
    let mut pargs = Arguments::from_env();

    // Help has a higher priority and should be handled separately.
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }

    let args = Args {
        bind: pargs.value_from_str("--bind").unwrap_or_else(|_| {
            std::env::var("SERVER_BIND")
                .unwrap_or_else(|_| "127.0.0.1:40888".to_string())
                .parse()
                .expect("Invalid SERVER_BIND address")
        }),
        config_path: pargs.value_from_str("--config").unwrap_or_else(|_| {
            std::env::var("SERVER_CONFIG")
                .unwrap_or_else(|_| "server.cfg".to_string())
                .into()
        }),
    };

    // Catching signals for exit.
    set_handler(|| std::process::exit(0))?;

    env_logger::builder().format_target(false).init();
    info!("starting poker server at {}", args.bind);

    let mut config = ServerConfig::default();
    config
        .load(&args.config_path)
        .map_err(|e| anyhow::anyhow!("failed to load {}: {e}", args.config_path.display()))?;

    let mut server = Server::bind(args.bind, config)?;
    server.set_config_path(args.config_path);

    info!("server is running. Press Ctrl+C to stop.");
    server.run()?;

    Ok(())
}
