use clap::Parser;
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use subvox::config::{Credentials, SessionOptions};
use subvox::media;
use subvox::stt::{RaasrHttpClient, TranscriptionSession, DEFAULT_ENDPOINT};
use subvox::subtitle;

/// Transcribe an audio or video file through the chunked-upload speech
/// service and write an SRT subtitle file.
#[derive(Parser)]
#[command(name = "subvox")]
struct Cli {
    /// Input audio or video file.
    input: PathBuf,

    /// Output subtitle file (default: <input stem>_<timestamp>.stt.srt).
    output: Option<PathBuf>,

    /// Transcription service endpoint.
    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Seconds between progress checks.
    #[arg(long, default_value = "5")]
    poll_interval_secs: u64,

    /// Progress checks before giving up on the remote task.
    #[arg(long, default_value = "120")]
    max_poll_attempts: u32,

    /// Directory for audio extracted from video inputs.
    #[arg(long, default_value = "temp")]
    temp_dir: PathBuf,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(output) => {
            tracing::info!("Done: {}", output.display());
        }
        Err(e) => {
            tracing::error!("{}", e);
            process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let credentials = Credentials::from_env()?;

    let audio_path = if media::is_audio_file(&cli.input) {
        cli.input.clone()
    } else {
        media::extract_audio(&cli.input, &cli.temp_dir)?
    };

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, aborting before the next remote call");
                cancel.store(true, Ordering::SeqCst);
            }
        });
    }

    let options = SessionOptions {
        poll_interval: Duration::from_secs(cli.poll_interval_secs),
        max_poll_attempts: cli.max_poll_attempts,
        ..SessionOptions::default()
    };

    let client = RaasrHttpClient::new(cli.endpoint);
    let mut session =
        TranscriptionSession::new(Box::new(client), credentials, options).with_cancel_flag(cancel);
    let segments = session.run(&audio_path).await?;

    let output = cli
        .output
        .unwrap_or_else(|| subtitle::srt_output_path(&cli.input));
    subtitle::write_srt(&segments, &output)?;
    Ok(output)
}
