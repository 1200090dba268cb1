//! roomchat client - Entry Point

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpStream;
use tracing::info;

use roomchat::client::{self, ClientOptions, TerminalConsole, TerminalPrompt, DEFAULT_HISTORY_MINUTES};
use roomchat::logging::{init_tracing, LogArgs};

#[derive(Debug, Parser)]
#[command(name = "roomchat-client", version, about = "Interactive room chat client")]
struct Cli {
    /// Server to connect to, as host:port
    #[arg(long, value_name = "HOST:PORT")]
    server: String,

    /// Minutes of room history to show on joining
    #[arg(long, default_value_t = DEFAULT_HISTORY_MINUTES)]
    history_minutes: i64,

    #[command(flatten)]
    log: LogArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log).map_err(|e| anyhow::anyhow!("cannot initialise logging: {e}"))?;

    let stream = TcpStream::connect(&cli.server)
        .await
        .with_context(|| format!("cannot connect to {}", cli.server))?;
    info!("connected to {}", cli.server);

    let options = ClientOptions {
        history_lookback: chrono::Duration::minutes(cli.history_minutes.max(0)),
        ..ClientOptions::default()
    };
    client::run(stream, TerminalPrompt, TerminalConsole, options).await?;
    Ok(())
}
