// src/media.rs
// Audio-track extraction for video inputs

use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a", "aac", "ogg", "flac", "opus", "wma"];

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Failed to launch ffmpeg: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("ffmpeg failed: {0}")]
    Failed(String),

    #[error("ffmpeg produced no output at {0}")]
    MissingOutput(PathBuf),
}

/// Inputs that are already audio skip extraction.
pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| AUDIO_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Pull the audio track out of a video file with one ffmpeg invocation,
/// writing a stamped mp3 under `temp_dir`.
pub fn extract_audio(video: &Path, temp_dir: &Path) -> Result<PathBuf, MediaError> {
    fs::create_dir_all(temp_dir)?;

    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    let audio_path = temp_dir.join(format!("{}_audio.mp3", stamp));

    tracing::info!(
        "Extracting audio track: {} -> {}",
        video.display(),
        audio_path.display()
    );

    let output = Command::new("ffmpeg")
        .arg("-i")
        .arg(video)
        .arg("-q:a")
        .arg("0")
        .arg("-map")
        .arg("a")
        .arg(&audio_path)
        .output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(MediaError::Failed(stderr.trim().to_string()));
    }

    if !audio_path.exists() {
        return Err(MediaError::MissingOutput(audio_path));
    }

    Ok(audio_path)
}
