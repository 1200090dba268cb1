//! Logging setup shared by both binaries

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use clap::Args;
use tracing_subscriber::EnvFilter;

/// Logging flags accepted by every binary
#[derive(Debug, Clone, Default, Args)]
pub struct LogArgs {
    /// Log informational events
    #[arg(short, long)]
    pub verbose: bool,

    /// Log debug events; implies --verbose
    #[arg(long)]
    pub debug: bool,

    /// Append logs to this file instead of stderr
    #[arg(long, value_name = "PATH")]
    pub logfile: Option<PathBuf>,
}

impl LogArgs {
    /// Filter used when `RUST_LOG` is unset
    pub fn default_directive(&self) -> &'static str {
        if self.debug {
            "roomchat=debug,info"
        } else if self.verbose {
            "roomchat=info,warn"
        } else {
            "warn"
        }
    }
}

/// Install the global subscriber; `RUST_LOG` overrides the flags
pub fn init_tracing(args: &LogArgs) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.default_directive()));

    match &args.logfile {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init(),
    }
}
