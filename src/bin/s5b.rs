//! S5B CLI binary.
//!
//! SOCKS5 bytestream helper tool.
//!
//! # Commands
//!
//! - `key` - Print the connect key of a session
//! - `candidates` - Print the direct candidates this host would offer
//! - `listen` - Run a local accept listener and log connection attempts

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use s5b::{
    config::Config,
    connection_key,
    stream::hosts,
    Jid, LocalConnectionRegistry, LocalListener, VERSION,
};

#[derive(Parser)]
#[command(name = "s5b")]
#[command(version = VERSION)]
#[command(about = "SOCKS5 bytestream negotiation tools", long_about = None)]
struct Cli {
    /// Config file (default: ~/.config/s5b/config.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the connect key (SOCKS5 DST.ADDR) of a session
    Key {
        /// Session id
        sid: String,

        /// Initiator full address
        initiator: String,

        /// Target full address
        target: String,
    },

    /// Print the direct candidates this host would offer
    Candidates {
        /// Local full address
        #[arg(short, long, default_value = "local@localhost/s5b")]
        jid: String,

        /// Listening port to pair with interface addresses
        #[arg(short, long)]
        port: Option<u16>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a local accept listener
    Listen {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Connect keys to accept (others are refused)
        #[arg(short, long)]
        key: Vec<String>,

        /// Enable verbose logging
        #[arg(short, long)]
        verbose: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config)?;

    match cli.command {
        Commands::Key {
            sid,
            initiator,
            target,
        } => cmd_key(&sid, &initiator, &target),

        Commands::Candidates { jid, port, json } => cmd_candidates(&config, &jid, port, json),

        Commands::Listen {
            host,
            port,
            key,
            verbose,
        } => cmd_listen(config, host, port, key, verbose),
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    let file = match path {
        Some(path) => Config::from_file(path)?,
        None => match Config::default_path().filter(|p| p.exists()) {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        },
    };
    Ok(file.with_env())
}

fn cmd_key(sid: &str, initiator: &str, target: &str) -> anyhow::Result<()> {
    let initiator: Jid = initiator.parse()?;
    let target: Jid = target.parse()?;
    println!("{}", connection_key(sid, &initiator, &target));
    Ok(())
}

fn cmd_candidates(config: &Config, jid: &str, port: Option<u16>, json: bool) -> anyhow::Result<()> {
    let local: Jid = jid.parse()?;
    let port = port.unwrap_or(config.listener.port);
    let candidates =
        hosts::local_candidates(&local, &config.stream, &hosts::interface_addresses(), port);

    if json {
        println!("{}", serde_json::to_string_pretty(&candidates)?);
        return Ok(());
    }

    if candidates.is_empty() {
        println!("No direct candidates (set --port or a forward address)");
    }
    for candidate in &candidates {
        println!("{}", candidate);
    }
    Ok(())
}

fn cmd_listen(
    config: Config,
    host: Option<String>,
    port: Option<u16>,
    keys: Vec<String>,
    verbose: bool,
) -> anyhow::Result<()> {
    // Initialize logging
    let log_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let mut listener_config = config.listener;
    if let Some(host) = host {
        listener_config.host = host;
    }
    if let Some(port) = port {
        listener_config.port = port;
    }
    let addr = listener_config.socket_addr()?;

    let registry = LocalConnectionRegistry::new();
    for key in keys {
        let logged = key.clone();
        let registered = registry.register(
            &key,
            Box::new(move |socket| match socket.peer_addr() {
                Ok(peer) => tracing::info!(key = %logged, "Accepted bytestream from {}", peer),
                Err(_) => tracing::info!(key = %logged, "Accepted bytestream"),
            }),
        );
        if !registered {
            tracing::warn!(key = %key, "Duplicate connect key ignored");
        }
    }
    tracing::info!("Accepting {} connect key(s)", registry.len());

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let listener = LocalListener::bind(addr, registry).await?;
        tracing::info!("Listening on {}", listener.local_addr()?);
        listener.run().await?;
        Ok::<_, anyhow::Error>(())
    })
}
