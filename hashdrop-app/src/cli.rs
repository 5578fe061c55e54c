//! Command-line arguments. Flags override values from `settings.toml`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::settings::Settings;

/// hashdrop - send files with end-to-end integrity verification.
#[derive(Parser, Debug)]
#[command(author, version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level (-v, -vv). Ignored when RUST_LOG is set.
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Directory holding settings.toml.
    #[arg(long, global = true)]
    pub config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Receive uploads and verify them.
    Serve(ServeArgs),
    /// Send a file to a server.
    Send(SendArgs),
    /// List uploads recorded by a server.
    Receipts(ReceiptsArgs),
    /// Show the effective settings.
    Config(ConfigArgs),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on.
    #[arg(long)]
    pub bind: Option<String>,

    /// Directory received files are written to.
    #[arg(long)]
    pub storage_dir: Option<PathBuf>,

    /// Largest accepted request body in bytes.
    #[arg(long)]
    pub max_body_bytes: Option<usize>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// File to send.
    pub path: PathBuf,

    /// Server as host:port.
    #[arg(long)]
    pub server: Option<String>,

    /// Salt the digest.
    #[arg(long, conflicts_with = "no_salt")]
    pub salt: bool,

    /// Send an unsalted digest.
    #[arg(long)]
    pub no_salt: bool,

    /// Seconds to wait for the whole upload.
    #[arg(long)]
    pub timeout: Option<u64>,
}

#[derive(Args, Debug)]
pub struct ReceiptsArgs {
    /// Storage directory of the server.
    #[arg(long)]
    pub storage_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Write the effective settings to settings.toml.
    #[arg(long)]
    pub save: bool,
}

impl Cli {
    /// Settings from the config dir with this invocation's flags applied.
    pub fn settings(&self) -> Settings {
        let mut settings = match &self.config_dir {
            Some(dir) => Settings::load_from_dir(dir.clone()),
            None => Settings::load(),
        };
        self.apply(&mut settings);
        settings
    }

    fn apply(&self, settings: &mut Settings) {
        match &self.command {
            Command::Serve(args) => {
                if let Some(bind) = &args.bind {
                    settings.server.bind_addr = bind.clone();
                }
                if let Some(dir) = &args.storage_dir {
                    settings.server.storage_dir = dir.clone();
                }
                if let Some(max) = args.max_body_bytes {
                    settings.server.max_body_bytes = max;
                }
            }
            Command::Send(args) => {
                if let Some(server) = &args.server {
                    settings.client.server_addr = server.clone();
                }
                if args.salt {
                    settings.client.use_salt = true;
                }
                if args.no_salt {
                    settings.client.use_salt = false;
                }
                if let Some(secs) = args.timeout {
                    settings.client.timeout_secs = secs;
                }
            }
            Command::Receipts(args) => {
                if let Some(dir) = &args.storage_dir {
                    settings.server.storage_dir = dir.clone();
                }
            }
            Command::Config(_) => {}
        }
    }

    /// Default log filter for the verbosity flag.
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
