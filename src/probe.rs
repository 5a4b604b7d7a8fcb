use std::fmt::Write as _;
use std::path::Path;
use std::process::Command;

use serde::Deserialize;

use crate::config::Config;

/// Container and stream metadata for a single media file.
///
/// All fields default to empty strings so a failed probe degrades to blank
/// template values instead of aborting the file.
#[derive(Debug, Default)]
pub struct MediaInfo {
    /// Raw duration in seconds as reported by ffprobe, for example `5124.335000`.
    pub duration: String,
    /// Parsed duration for thumbnail offset calculations.
    pub duration_seconds: Option<f64>,
    /// File size in bytes.
    pub size: String,
    /// Container `creation_time` tag, if any.
    pub date: String,
    /// Free-text accumulation of per-stream summaries.
    pub streams: String,
}

#[derive(Deserialize)]
struct FfprobeOutput {
    format: Option<FormatInfo>,
    streams: Option<Vec<StreamInfo>>,
}

#[derive(Deserialize)]
struct FormatInfo {
    duration: Option<String>,
    size: Option<String>,
    tags: Option<FormatTags>,
}

#[derive(Deserialize)]
struct FormatTags {
    creation_time: Option<String>,
}

#[derive(Deserialize)]
struct StreamInfo {
    codec_type: Option<String>,
    codec_name: Option<String>,
    codec_long_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    display_aspect_ratio: Option<String>,
    avg_frame_rate: Option<String>,
    channels: Option<u32>,
    channel_layout: Option<String>,
    sample_rate: Option<String>,
    bit_rate: Option<String>,
}

/// Probe container and stream metadata with ffprobe.
///
/// Returns `None` when the probe fails for any reason; the caller proceeds
/// with empty metadata.
#[must_use]
pub fn probe_media(config: &Config, path: &Path) -> Option<MediaInfo> {
    let output = Command::new(&config.ffprobe)
        .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(path)
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_probe_output(&stdout)
}

/// Parse raw ffprobe JSON into a [`MediaInfo`].
fn parse_probe_output(json: &str) -> Option<MediaInfo> {
    let probe: FfprobeOutput = serde_json::from_str(json).ok()?;
    let mut info = MediaInfo::default();

    if let Some(format) = &probe.format {
        info.duration = format.duration.clone().unwrap_or_default();
        info.duration_seconds = info.duration.parse::<f64>().ok();
        info.size = format.size.clone().unwrap_or_default();
        info.date = format
            .tags
            .as_ref()
            .and_then(|tags| tags.creation_time.clone())
            .unwrap_or_default();
    }

    if let Some(streams) = &probe.streams {
        info.streams = build_stream_summary(streams);
    }

    Some(info)
}

/// Accumulate one free-text description per stream, skipping embedded
/// thumbnail-image streams (mjpeg video in a movie container).
fn build_stream_summary(streams: &[StreamInfo]) -> String {
    let mut summary = String::new();
    let mut index = 0;

    for stream in streams {
        let codec_type = stream.codec_type.as_deref().unwrap_or("");
        let is_video = codec_type.eq_ignore_ascii_case("video");

        if is_video && stream.codec_name.as_deref() == Some("mjpeg") {
            continue;
        }

        index += 1;
        let _ = write!(
            summary,
            ";Stream: {index};Type: {};Codec: {};",
            capitalize(codec_type),
            stream.codec_long_name.as_deref().unwrap_or("")
        );

        if is_video {
            let _ = write!(
                summary,
                "Resolution: {}x{};Aspect Ratio: {};Frame rate: {};",
                stream.width.unwrap_or(0),
                stream.height.unwrap_or(0),
                stream.display_aspect_ratio.as_deref().unwrap_or(""),
                format_frame_rate(stream.avg_frame_rate.as_deref())
            );
        } else if codec_type.eq_ignore_ascii_case("audio") {
            let _ = write!(
                summary,
                "Channels: {};Mode: {};Sample Rate: {} hz;Bit Rate: {} kb/s;",
                stream.channels.unwrap_or(0),
                capitalize(stream.channel_layout.as_deref().unwrap_or("")),
                stream.sample_rate.as_deref().unwrap_or(""),
                bit_rate_kbps(stream.bit_rate.as_deref())
            );
        }
    }

    summary
}

/// Parse a frame rate string, either a fraction like `30000/1001` or a plain number.
fn parse_frame_rate(rate: &str) -> Option<f64> {
    if let Some((numerator, denominator)) = rate.trim().split_once('/') {
        let numerator: f64 = numerator.trim().parse().ok()?;
        let denominator: f64 = denominator.trim().parse().ok()?;
        if denominator > 0.0 {
            return Some(numerator / denominator);
        }
        return None;
    }
    rate.trim().parse().ok()
}

/// Format a frame rate rounded to two decimals, with trailing zeros trimmed.
/// Missing or unparsable rates render as `0`.
fn format_frame_rate(rate: Option<&str>) -> String {
    let rate = rate.and_then(parse_frame_rate).unwrap_or(0.0);
    let rounded = (rate * 100.0).round() / 100.0;
    let formatted = format!("{rounded:.2}");
    formatted.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Bit rate in whole kb/s, `0` when missing.
fn bit_rate_kbps(bit_rate: Option<&str>) -> u64 {
    bit_rate
        .and_then(|rate| rate.parse::<f64>().ok())
        .map_or(0, |rate| (rate / 1000.0).round() as u64)
}

/// Uppercase the first character and lowercase the rest, `stereo` becomes `Stereo`.
fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
    })
}
