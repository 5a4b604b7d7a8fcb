use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;

use anyhow::{Context, Result};

use crate::config::Config;

/// Time offset for frame extraction, either a percentage of the total
/// duration or an absolute number of seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThumbnailTime {
    Percent(f64),
    Seconds(f64),
}

impl FromStr for ThumbnailTime {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let value = value.trim();
        if let Some(percent) = value.strip_suffix('%') {
            let percent: f64 = percent
                .trim()
                .parse()
                .with_context(|| format!("Invalid thumbnail time percentage: '{value}'"))?;
            if !(0.0..=100.0).contains(&percent) {
                anyhow::bail!("Thumbnail time percentage must be between 0 and 100: '{value}'");
            }
            Ok(Self::Percent(percent))
        } else {
            let seconds: f64 = value
                .parse()
                .with_context(|| format!("Invalid thumbnail time: '{value}'"))?;
            if seconds < 0.0 {
                anyhow::bail!("Thumbnail time cannot be negative: '{value}'");
            }
            Ok(Self::Seconds(seconds))
        }
    }
}

impl ThumbnailTime {
    /// Resolve to an absolute offset in seconds.
    /// A percentage without a known duration degrades to the start of the file.
    #[must_use]
    pub fn resolve(&self, duration: Option<f64>) -> f64 {
        match self {
            Self::Percent(percent) => duration.map_or(0.0, |duration| duration * percent / 100.0),
            Self::Seconds(seconds) => *seconds,
        }
    }
}

/// Extract a single frame from a video into the thumbnail cache.
///
/// A failed attempt is retried exactly once, forcing offset zero. Partial
/// output files are deleted on every failure path.
pub fn generate(config: &Config, video: &Path, duration: Option<f64>) -> Result<PathBuf> {
    fs::create_dir_all(&config.thumbnail_cache).with_context(|| {
        format!("Failed to create thumbnail cache: {}", config.thumbnail_cache.display())
    })?;

    let output = cache_path(config, video);
    let offset = config.thumbnail_time.resolve(duration);

    with_fallback(
        || extract_frame(config, video, offset, &output),
        || extract_frame(config, video, 0.0, &output),
    )?;
    Ok(output)
}

/// Deterministic cache path derived from the original file name.
#[must_use]
pub fn cache_path(config: &Config, video: &Path) -> PathBuf {
    config
        .thumbnail_cache
        .join(format!("{}.png", crate::path_to_filename_string(video)))
}

/// Best-effort delete; a file that no longer exists is a no-op.
pub fn remove_if_exists(path: &Path) {
    let _ = fs::remove_file(path);
}

/// Run the primary attempt, falling back to exactly one retry on failure.
fn with_fallback<T>(primary: impl FnOnce() -> Result<T>, fallback: impl FnOnce() -> Result<T>) -> Result<T> {
    primary().or_else(|_| fallback())
}

/// One extraction attempt. Cleans up its own partial output on failure.
fn extract_frame(config: &Config, video: &Path, offset: f64, output: &Path) -> Result<()> {
    let result = run_ffmpeg(config, video, offset, output);
    if result.is_err() {
        remove_if_exists(output);
    }
    result
}

fn run_ffmpeg(config: &Config, video: &Path, offset: f64, output: &Path) -> Result<()> {
    let mut command = Command::new(&config.ffmpeg);
    command.args(["-hide_banner", "-loglevel", "error", "-y"]);
    if offset > 0.0 {
        command.arg("-ss").arg(format!("{offset:.3}"));
    }
    command.arg("-i").arg(video).args(["-frames:v", "1"]).arg(output);

    let result = command
        .output()
        .with_context(|| format!("Failed to execute ffmpeg: {}", config.ffmpeg.display()))?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        anyhow::bail!("ffmpeg failed: {}", stderr.trim());
    }

    // ffmpeg can exit cleanly without producing a usable frame, for example
    // when seeking past the end of the stream.
    let metadata = fs::metadata(output).with_context(|| format!("No thumbnail produced: {}", output.display()))?;
    if metadata.len() == 0 {
        anyhow::bail!("Empty thumbnail produced: {}", output.display());
    }
    Ok(())
}
