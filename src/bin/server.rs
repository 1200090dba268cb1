//! roomchat server - Entry Point
//!
//! Loads configuration, opens the store and accepts connections. The `user`
//! subcommands administer accounts in the configured store instead.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{info, warn};

use roomchat::config::{ServerConfig, StorageConfig};
use roomchat::logging::{init_tracing, LogArgs};
use roomchat::password::prehash_password;
use roomchat::session::SessionRegistry;
use roomchat::user::UserDirectory;
use roomchat::ChatServer;

#[derive(Debug, Parser)]
#[command(name = "roomchat-server", version, about = "Multi-user room chat server")]
struct Cli {
    /// Address to listen on, as host:port
    #[arg(long, value_name = "HOST:PORT")]
    server: Option<String>,

    /// TOML configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(flatten)]
    log: LogArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Manage user accounts
    #[command(subcommand)]
    User(UserCommand),
}

#[derive(Debug, Subcommand)]
enum UserCommand {
    /// Soft-delete a user; the name stays reserved
    Delete { username: String },
    /// Replace a user's password (read from stdin)
    SetPassword { username: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log).map_err(|e| anyhow::anyhow!("cannot initialise logging: {e}"))?;

    let config = match &cli.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };

    match cli.command {
        Some(Command::User(command)) => administer(&config, command).await,
        None => serve(cli.server, config).await,
    }
}

async fn serve(server: Option<String>, config: ServerConfig) -> Result<()> {
    let Some(addr) = server.or_else(|| config.listen.clone()) else {
        bail!("missing --server host:port (or `listen` in the config file)");
    };

    let stores = config.storage.open().context("cannot open store")?;
    let server = Arc::new(ChatServer::new(&config, stores));

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot listen on {addr}"))?;
    info!("roomchat server listening on {}", addr);

    server
        .run_until(listener, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;
    Ok(())
}

async fn administer(config: &ServerConfig, command: UserCommand) -> Result<()> {
    if config.storage == StorageConfig::Memory {
        warn!("in-memory storage: account changes will not outlive this command");
    }

    let stores = config.storage.open().context("cannot open store")?;
    let users = UserDirectory::new(stores.users, Arc::new(SessionRegistry::default()));

    match command {
        UserCommand::Delete { username } => {
            users.delete(&username).await?;
            println!("User '{username}' deleted");
        }
        UserCommand::SetPassword { username } => {
            let password = read_password()?;
            users
                .change_password(&username, &prehash_password(&password))
                .await?;
            println!("Password for '{username}' updated");
        }
    }
    Ok(())
}

fn read_password() -> Result<String> {
    print!("New password: ");
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("password cannot be empty");
    }
    Ok(password)
}
