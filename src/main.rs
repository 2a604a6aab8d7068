use anyhow::Result;
use clap::{Parser, Subcommand, ValueHint};
use iocraft::prelude::*;
use std::{
    io::{self, Write},
    path::PathBuf,
};
use url::Url;

use crate::client::{CloudreveClient, DEFAULT_CHUNK_SIZE};
use crate::transport::HttpTransport;
use crate::ui::{ConfigHeader, ErrorMessage, InputPrompt, SuccessMessage};
use crate::uploader::{FileOutcome, Uploader};

mod client;
mod config;
mod rest_types;
mod transport;
mod ui;
mod uploader;

#[derive(Parser)]
#[command(name = "revup")]
#[command(version)]
#[command(about = "A tool for uploading release artifacts to a Cloudreve drive")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload files and request direct links for them
    Upload {
        /// Files to upload
        #[arg(required = true, value_hint = ValueHint::FilePath)]
        files: Vec<PathBuf>,
        /// Chunk size in bytes for ranged uploads
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: u64,
        /// Report with plain status lines instead of a progress bar
        #[arg(short, long)]
        quiet: bool,
    },
    /// Configure revup interactively
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Config => interactive_config(),
        Commands::Upload {
            files,
            chunk_size,
            quiet,
        } => upload_files(files, chunk_size, quiet).await,
    }
}

async fn upload_files(files: Vec<PathBuf>, chunk_size: u64, quiet: bool) -> Result<()> {
    let config = config::read_config()?;

    let client = CloudreveClient::new(config.api_url.clone(), HttpTransport::new());

    // A failed credential exchange degrades the run instead of aborting it:
    // every authenticated call will be rejected individually and reported
    // per file.
    let token = match client.request_token(&config.email, &config.password).await {
        Ok(token) => Some(token),
        Err(error) => {
            element!(ErrorMessage(message: format!(
                "Authentication failed: {:#}. Continuing without a token.",
                error
            )))
            .print();
            None
        }
    };

    let uploader = Uploader::new(
        client,
        token,
        config.app,
        config.version,
        config.storage_policy_id,
        chunk_size,
    );
    let uploader = if quiet { uploader.quiet() } else { uploader };

    let result = uploader.upload_batch(&files).await;

    println!();
    for (path, outcome) in &result.outcomes {
        match outcome {
            FileOutcome::Done { finalized: true } => {
                element!(SuccessMessage(message: format!("{} uploaded", path.display()))).print();
            }
            FileOutcome::Done { finalized: false } => {
                element!(ErrorMessage(message: format!(
                    "{} transferred, but the upload callback failed",
                    path.display()
                )))
                .print();
            }
            FileOutcome::NegotiationFailed => {
                element!(ErrorMessage(message: format!(
                    "{} skipped, no upload session",
                    path.display()
                )))
                .print();
            }
            FileOutcome::TransferFailed => {
                element!(ErrorMessage(message: format!(
                    "{} failed during transfer",
                    path.display()
                )))
                .print();
            }
        }
    }

    if let Some(links) = result.links {
        println!();
        println!("Direct links:");
        println!("{}", serde_json::to_string_pretty(&links)?);
    }

    Ok(())
}

fn read_input(prompt: &str, default: Option<&str>, description: Option<&str>) -> Result<String> {
    element! {
        InputPrompt(
            prompt: prompt.to_string(),
            default: default.map(|s| s.to_string()),
            description: description.map(|s| s.to_string())
        )
    }
    .print();

    print!("> ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim().to_string();

    if input.is_empty() {
        if let Some(default) = default {
            Ok(default.to_string())
        } else {
            Ok(input)
        }
    } else {
        Ok(input)
    }
}

fn interactive_config() -> Result<()> {
    element!(ConfigHeader()).print();

    // Re-running `revup config` offers the current values as defaults.
    let existing = config::read_config_file().unwrap_or_default();
    let existing_url = existing.api_url.map(|url| url.to_string());

    let api_url = loop {
        let url_str = read_input(
            "Cloudreve API base URL",
            existing_url.as_deref(),
            Some("The base API URL of your Cloudreve instance, e.g. https://pan.example.com/api/v4"),
        )?;

        match Url::parse(&url_str) {
            Ok(url) => break url,
            Err(error) => {
                element!(ErrorMessage(message: format!("Invalid URL: {}", error))).print();
                println!();
            }
        }
    };

    let storage_policy_id = loop {
        let policy = read_input(
            "Storage policy id",
            existing.storage_policy_id.as_deref(),
            Some("The storage policy uploads are filed under"),
        )?;

        if policy.is_empty() {
            element!(ErrorMessage(message: "Storage policy id cannot be empty".to_string()))
                .print();
            println!();
        } else {
            break policy;
        }
    };

    let app = loop {
        let app = read_input(
            "Application name",
            existing.app.as_deref(),
            Some("The application folder uploads are grouped under in the drive"),
        )?;

        if app.is_empty() {
            element!(ErrorMessage(message: "Application name cannot be empty".to_string()))
                .print();
            println!();
        } else {
            break app;
        }
    };

    config::write_config(config::ConfigFile {
        api_url: Some(api_url),
        storage_policy_id: Some(storage_policy_id),
        app: Some(app),
    })?;

    element!(SuccessMessage(message: "Configuration complete!".to_string())).print();

    Ok(())
}
