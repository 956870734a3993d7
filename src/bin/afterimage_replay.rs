use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use afterimage::{
    Afterimage, AfterimageConfig, CollaboratorError, Collaborators, DeliverySink, MediaFetcher,
    MessageEnvelope, OutboundMessage, ProcessableEvent, RecoveredRecord, media_reference,
};

/// Replays a recorded event stream through the recovery pipeline
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Newline-delimited JSON file of events
    #[clap(long, value_name = "PATH", required = true)]
    input: PathBuf,

    /// Directory for application data [env: AFTERIMAGE_DATA_DIR, default: ./data]
    #[clap(long, value_name = "PATH")]
    data_dir: Option<PathBuf>,

    /// Directory for application logs [env: AFTERIMAGE_LOGS_DIR, default: ./logs]
    #[clap(long, value_name = "PATH")]
    logs_dir: Option<PathBuf>,

    /// Maximum number of cached messages [env: AFTERIMAGE_CACHE_CAPACITY]
    #[clap(long)]
    capacity: Option<usize>,

    /// Destination printed alongside each notification [env: AFTERIMAGE_DESTINATION, default: stdout]
    #[clap(long)]
    destination: Option<String>,
}

impl Args {
    /// Command line flags win over `AFTERIMAGE_*` variables and `.env`
    fn config(&self) -> Result<AfterimageConfig> {
        let _ = dotenvy::dotenv();
        let config = AfterimageConfig::from_vars(|name| {
            let flag = match name {
                "AFTERIMAGE_DATA_DIR" => self.data_dir.as_ref().map(|p| p.display().to_string()),
                "AFTERIMAGE_LOGS_DIR" => self.logs_dir.as_ref().map(|p| p.display().to_string()),
                "AFTERIMAGE_CACHE_CAPACITY" => self.capacity.map(|c| c.to_string()),
                "AFTERIMAGE_DESTINATION" => self.destination.clone(),
                _ => None,
            };
            flag.or_else(|| std::env::var(name).ok())
        })?;

        Ok(match config.destination {
            Some(_) => config,
            None => config.with_destination("stdout"),
        })
    }
}

/// Reads media referenced by `file://` urls
struct FileUrlFetcher;

#[async_trait]
impl MediaFetcher for FileUrlFetcher {
    async fn fetch(&self, envelope: &MessageEnvelope) -> Result<Vec<u8>, CollaboratorError> {
        let reference = media_reference(envelope).ok_or("envelope carries no media")?;
        let url = reference
            .node
            .get("url")
            .and_then(|url| url.as_str())
            .ok_or("media reference has no url")?;
        let path = url
            .strip_prefix("file://")
            .ok_or_else(|| format!("unsupported media url: {}", url))?;
        Ok(tokio::fs::read(path).await?)
    }
}

/// Prints every notification to stdout
struct StdoutSink;

#[async_trait]
impl DeliverySink for StdoutSink {
    async fn send(
        &self,
        destination: &str,
        message: OutboundMessage,
    ) -> Result<(), CollaboratorError> {
        match message {
            OutboundMessage::Text { text } => println!("[{}]\n{}\n", destination, text),
            OutboundMessage::Media {
                bytes,
                mime_type,
                caption,
                file_name,
            } => println!(
                "[{}] <{} bytes {} {}> {}\n",
                destination,
                bytes.len(),
                mime_type,
                file_name.unwrap_or_default(),
                caption.unwrap_or_default()
            ),
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = args.config()?;
    let collaborators = Collaborators::new(Arc::new(FileUrlFetcher), Arc::new(StdoutSink));
    let afterimage = Afterimage::initialize(config, collaborators).await?;

    let file = tokio::fs::File::open(&args.input)
        .await
        .with_context(|| format!("Failed to open {:?}", args.input))?;
    let mut lines = BufReader::new(file).lines();
    let sender = afterimage.event_sender();

    let mut line_number = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ProcessableEvent>(&line) {
            Ok(event) => sender.send(event).await?,
            Err(e) => tracing::warn!(
                target: "afterimage_replay::main",
                "Skipping line {}: {}",
                line_number,
                e
            ),
        }
    }

    afterimage.shutdown_event_processing().await?;

    let stats = afterimage.stats().await;
    let stored = RecoveredRecord::count(afterimage.database()).await?;
    println!(
        "Replayed {} lines: {} recovered, {} missed, {} still cached, {} stored records",
        line_number, stats.recovered, stats.missed, stats.len, stored
    );

    Ok(())
}
