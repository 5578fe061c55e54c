mod cli;
mod report;
mod settings;

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use hashdrop_files::store::FileStore;
use hashdrop_files::transfer::{FileReceiver, FileSender, SendState};
use hashdrop_net::{HttpTransport, ServerLimits, UploadServer};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use settings::Settings;

/// Exit status when the server reported an integrity failure.
const EXIT_INTEGRITY_FAILED: u8 = 2;

async fn serve(settings: &Settings) -> Result<ExitCode> {
    let addr: SocketAddr = settings
        .server
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind address: {}", settings.server.bind_addr))?;

    let store = FileStore::new(settings.server.storage_dir.clone())?;
    let files_dir = store.files_dir().to_path_buf();
    let receiver = Arc::new(FileReceiver::new(store));
    let limits = ServerLimits {
        max_body_bytes: settings.server.max_body_bytes,
        request_timeout: settings.server.request_timeout(),
    };

    let server = UploadServer::bind(addr, receiver, limits).await?;
    println!(
        "Receiving files on http://{}/upload into {}",
        server.local_addr()?,
        files_dir.display()
    );
    println!("Press Ctrl+C to stop.");

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for Ctrl+C");
            }
        })
        .await?;
    Ok(ExitCode::SUCCESS)
}

async fn send(settings: &Settings, path: &std::path::Path) -> Result<ExitCode> {
    let transport = HttpTransport::new(
        settings.client.server_addr.clone(),
        settings.client.timeout(),
    );
    let sender = FileSender::new();

    let mut states = sender.subscribe();
    let progress = tokio::spawn(async move {
        loop {
            match states.recv().await {
                Ok(SendState::Idle) | Err(RecvError::Closed) => break,
                Ok(state) => eprintln!("{}", report::state_label(state)),
                Err(RecvError::Lagged(_)) => continue,
            }
        }
    });

    let result = sender
        .send_path(path, settings.client.use_salt, &transport)
        .await;
    let _ = progress.await;

    match result {
        Ok(outcome) => {
            println!("{}", report::outcome_message(&outcome));
            if outcome.is_verified() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(EXIT_INTEGRITY_FAILED))
            }
        }
        Err(e) => {
            eprintln!("{}", report::error_message(&e));
            Ok(ExitCode::FAILURE)
        }
    }
}

fn receipts(settings: &Settings) -> Result<ExitCode> {
    let store = FileStore::new(settings.server.storage_dir.clone())?;
    let receipts = store.list_receipts()?;
    if receipts.is_empty() {
        println!("No uploads recorded in {}", store.storage_dir().display());
    }
    for receipt in &receipts {
        println!("{}", report::receipt_line(receipt));
    }
    Ok(ExitCode::SUCCESS)
}

fn config(cli: &Cli, settings: &Settings, save: bool) -> Result<ExitCode> {
    let config_dir = cli.config_dir.clone().unwrap_or_else(Settings::config_dir);
    if save {
        match &cli.config_dir {
            Some(dir) => settings.save_to_dir(dir.clone())?,
            None => settings.save()?,
        }
    }
    println!("# {}", config_dir.join("settings.toml").display());
    print!(
        "{}",
        toml::to_string_pretty(settings).context("failed to serialize settings")?
    );
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level())),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings = cli.settings();

    match &cli.command {
        Command::Serve(_) => serve(&settings).await,
        Command::Send(args) => send(&settings, &args.path).await,
        Command::Receipts(_) => receipts(&settings),
        Command::Config(args) => config(&cli, &settings, args.save),
    }
}
