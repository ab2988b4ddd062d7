// src/subtitle.rs
// SRT rendering of timed transcript segments

use crate::stt::TranscriptSegment;
use chrono::Utc;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

/// Render a millisecond offset as `HH:MM:SS,mmm`. Hours are not clamped to
/// a day; long recordings keep counting up.
pub fn format_timestamp(ms: u64) -> String {
    let (seconds, millis) = (ms / 1000, ms % 1000);
    let (minutes, seconds) = (seconds / 60, seconds % 60);
    let (hours, minutes) = (minutes / 60, minutes % 60);
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, millis)
}

/// Encode segments as an SRT document: for each segment a 1-based sequence
/// number, a timing line, the text, and a blank separator line. Sequence
/// numbers come from position, nothing else. An empty segment list encodes
/// to an empty document.
pub fn encode(segments: &[TranscriptSegment]) -> String {
    let mut out = String::new();
    for (i, segment) in segments.iter().enumerate() {
        let _ = writeln!(
            out,
            "{}\n{} --> {}\n{}\n",
            i + 1,
            format_timestamp(segment.begin_ms),
            format_timestamp(segment.end_ms),
            segment.text
        );
    }
    out
}

/// Encode and write the subtitle file.
pub fn write_srt(segments: &[TranscriptSegment], path: &Path) -> std::io::Result<()> {
    fs::write(path, encode(segments))?;
    tracing::info!("Subtitle file written: {}", path.display());
    Ok(())
}

/// Default output location: next to the input, stamped so repeated runs
/// never clobber each other.
pub fn srt_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("transcript");
    let name = format!("{}_{}.stt.srt", stem, Utc::now().timestamp());
    input.with_file_name(name)
}
