//! relink - CLI entry point
//!
//! `relink connect` dials a peer with the reconnecting client and prints every
//! frame it receives; `relink echo` runs a framed echo peer to dial against.

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use relink::client::{Agent, Session, SessionError, TcpClient};
use relink::config::{ClientConfig, ConfigLoader, FrameConfig};
use relink::echo::EchoServer;
use relink::logging;
use tokio::runtime::Runtime;
use tokio::signal;
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Result type used at the CLI boundary.
type CliResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

/// Reconnecting TCP client with length-prefixed framing
#[derive(Parser)]
#[command(name = "relink")]
#[command(version, about = "Reconnecting TCP client with length-prefixed framing")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands for the relink CLI
#[derive(Subcommand)]
enum Commands {
    /// Dial a peer and print every frame it sends
    Connect {
        /// TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Remote address (overrides the configuration file)
        #[arg(long)]
        addr: Option<String>,

        /// Number of connections (overrides the configuration file)
        #[arg(long)]
        conns: Option<usize>,

        /// Dial again after a connection ends
        #[arg(long)]
        auto_reconnect: bool,

        /// Payload to send on every new connection (repeatable)
        #[arg(long = "send", value_name = "TEXT")]
        send: Vec<String>,
    },

    /// Run a framed echo peer
    Echo {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:3563")]
        listen: String,

        /// TOML configuration file providing the frame layout
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// Sends the configured greetings, then prints frames until the session ends.
struct PrintAgent {
    session: Session,
    greetings: Arc<Vec<String>>,
}

#[async_trait]
impl Agent for PrintAgent {
    async fn run(&mut self) {
        for text in self.greetings.iter() {
            if let Err(e) = self.session.send(text.as_bytes()).await {
                warn!(session = self.session.id(), error = %e, "send failed");
                return;
            }
        }

        loop {
            match self.session.receive().await {
                Ok(frame) => {
                    println!(
                        "[{}] {}",
                        self.session.peer_addr(),
                        String::from_utf8_lossy(&frame)
                    );
                }
                Err(SessionError::Closed) => return,
                Err(e) => {
                    info!(session = self.session.id(), error = %e, "session ended");
                    return;
                }
            }
        }
    }

    fn on_close(&mut self) {
        info!(session = self.session.id(), peer = %self.session.peer_addr(), "disconnected");
    }
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_shutdown() {
    match unix_signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = signal::ctrl_c() => {
                    info!("received SIGINT (Ctrl+C), shutting down");
                },
                _ = sigterm.recv() => {
                    info!("received SIGTERM, shutting down");
                },
            }
        }
        Err(e) => {
            warn!(error = %e, "could not register SIGTERM handler, using SIGINT only");
            if let Err(e) = signal::ctrl_c().await {
                error!(error = %e, "failed waiting for SIGINT");
            } else {
                info!("received SIGINT (Ctrl+C), shutting down");
            }
        }
    }
}

/// Builds the client configuration from an optional file plus flag overrides.
fn build_config(
    path: Option<PathBuf>,
    addr: Option<String>,
    conns: Option<usize>,
    auto_reconnect: bool,
) -> CliResult<ClientConfig> {
    let mut config = match (path, addr.clone()) {
        (Some(path), _) => ConfigLoader::load_from_path(&path)?,
        (None, Some(addr)) => ClientConfig::new(addr, FrameConfig::default()),
        (None, None) => return Err("either --config or --addr is required".into()),
    };
    if let Some(addr) = addr {
        config.address = addr;
    }
    if let Some(conns) = conns {
        config.conn_num = conns;
    }
    if auto_reconnect {
        config.auto_reconnect = true;
    }
    Ok(config)
}

async fn run_connect(config: ClientConfig, greetings: Vec<String>) -> CliResult<()> {
    let greetings = Arc::new(greetings);
    let client = TcpClient::new(config, move |session| PrintAgent {
        session,
        greetings: Arc::clone(&greetings),
    });
    client.start()?;
    wait_for_shutdown().await;
    client.close().await;
    Ok(())
}

async fn run_echo(listen: String, config: Option<PathBuf>) -> CliResult<()> {
    let frame = match config {
        Some(path) => ConfigLoader::load_from_path(&path)?.frame,
        None => FrameConfig::default(),
    };
    let server = EchoServer::bind(&listen, frame.codec()?).await?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        wait_for_shutdown().await;
        let _ = shutdown_tx.send(());
    });

    server.run_with_shutdown(shutdown_rx).await?;
    Ok(())
}

fn main() -> ExitCode {
    // Parse CLI arguments before starting the runtime so usage errors are
    // reported without any log noise.
    let cli = Cli::parse();
    logging::init();

    let runtime = match Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to create Tokio runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Commands::Connect {
            config,
            addr,
            conns,
            auto_reconnect,
            send,
        } => build_config(config, addr, conns, auto_reconnect)
            .and_then(|config| runtime.block_on(run_connect(config, send))),
        Commands::Echo { listen, config } => runtime.block_on(run_echo(listen, config)),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
