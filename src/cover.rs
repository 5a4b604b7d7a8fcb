use std::path::Path;

use crate::config::Config;
use crate::image::{self, CoverImage};
use crate::scan::FileEntry;
use crate::tags::MediaTags;
use crate::thumbnail;

/// One named method of deriving a file's cover image.
///
/// Unrecognized strategy names parse to [`CoverStrategy::Unknown`], which
/// always fails instead of erroring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverStrategy {
    /// Embedded artwork from the file's tags.
    Tag,
    /// Sibling image file with a matching base name.
    Image,
    /// Frame extracted from the video itself.
    Ffmpeg,
    /// Folder-level cover image.
    Folder,
    Unknown,
}

impl CoverStrategy {
    /// Parse a strategy name, case-insensitive.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "tag" => Self::Tag,
            "image" => Self::Image,
            "ffmpeg" => Self::Ffmpeg,
            "folder" => Self::Folder,
            _ => Self::Unknown,
        }
    }
}

/// Resolve cover art for a movie file by trying the configured strategies in
/// order, returning the first success or `None` when all fail.
#[must_use]
pub fn resolve(
    config: &Config,
    folder_cover: Option<&Path>,
    file: &FileEntry,
    tags: Option<&MediaTags>,
    duration: Option<f64>,
) -> Option<CoverImage> {
    config
        .cover_strategies
        .iter()
        .find_map(|strategy| apply_strategy(*strategy, config, folder_cover, file, tags, duration))
}

fn apply_strategy(
    strategy: CoverStrategy,
    config: &Config,
    folder_cover: Option<&Path>,
    file: &FileEntry,
    tags: Option<&MediaTags>,
    duration: Option<f64>,
) -> Option<CoverImage> {
    match strategy {
        CoverStrategy::Tag => tags?
            .picture
            .as_ref()
            .map(|picture| image::normalize(config, picture.data.clone(), &picture.format)),
        CoverStrategy::Image => file
            .cover_file
            .as_deref()
            .and_then(|path| image::normalize_file(config, path)),
        CoverStrategy::Folder => folder_cover.and_then(|path| image::normalize_file(config, path)),
        CoverStrategy::Ffmpeg => resolve_from_thumbnail(config, file, duration),
        CoverStrategy::Unknown => None,
    }
}

/// Generate a video frame thumbnail and normalize it. The generated file is
/// consumed and removed unless the thumbnail cache is kept.
fn resolve_from_thumbnail(config: &Config, file: &FileEntry, duration: Option<f64>) -> Option<CoverImage> {
    let path = thumbnail::generate(config, &file.path, duration).ok()?;
    let cover = image::normalize_file(config, &path);
    if !config.keep_thumbnails {
        thumbnail::remove_if_exists(&path);
    }
    cover
}
