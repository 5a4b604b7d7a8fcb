use std::ffi::OsStr;
use std::fs::File;
use std::path::Path;

use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey, StandardVisualKey, Value};
use symphonia::core::probe::Hint;

/// Embedded artwork from a media container.
#[derive(Debug, Clone)]
pub struct TagPicture {
    /// Image format subtype, for example `jpeg` or `png`.
    pub format: String,
    pub data: Vec<u8>,
}

/// Semantic tag values extracted from a file's embedded metadata.
///
/// Absent entirely when extraction fails; individual fields are `None` when
/// the container does not carry them.
#[derive(Debug, Clone, Default)]
pub struct MediaTags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub year: Option<String>,
    pub comment: Option<String>,
    pub track: Option<String>,
    pub genre: Option<String>,
    pub composer: Option<String>,
    pub lyrics: Option<String>,
    pub picture: Option<TagPicture>,
}

/// Read embedded tags from a media file.
///
/// Returns `None` if the file cannot be opened or probed; tag extraction is a
/// cosmetic feature and never produces a hard error.
#[must_use]
pub fn read_tags(path: &Path) -> Option<MediaTags> {
    let file = File::open(path).ok()?;
    let source = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(OsStr::to_str) {
        hint.with_extension(extension);
    }

    let mut probed = symphonia::default::get_probe()
        .format(&hint, source, &FormatOptions::default(), &MetadataOptions::default())
        .ok()?;

    let mut tags = MediaTags::default();
    let mut found = false;

    // Metadata read during probing, before container instantiation.
    if let Some(mut metadata) = probed.metadata.get()
        && let Some(revision) = metadata.skip_to_latest()
    {
        apply_revision(revision, &mut tags);
        found = true;
    }

    // Metadata carried by the container itself.
    let mut metadata = probed.format.metadata();
    if let Some(revision) = metadata.skip_to_latest() {
        apply_revision(revision, &mut tags);
        found = true;
    }

    found.then_some(tags)
}

/// Map a raw metadata revision into semantic tag names. Already-set fields
/// are kept, so earlier revisions win.
///
/// Pure transformation over the tag reader's output; the third-party types do
/// not leak past this module.
fn apply_revision(revision: &MetadataRevision, tags: &mut MediaTags) {
    for tag in revision.tags() {
        let Some(std_key) = tag.std_key else { continue };
        let target = match std_key {
            StandardTagKey::TrackTitle => &mut tags.title,
            StandardTagKey::Artist => &mut tags.artist,
            StandardTagKey::Album => &mut tags.album,
            StandardTagKey::Date | StandardTagKey::ReleaseDate => &mut tags.year,
            StandardTagKey::Comment => &mut tags.comment,
            StandardTagKey::TrackNumber => &mut tags.track,
            StandardTagKey::Genre => &mut tags.genre,
            StandardTagKey::Composer => &mut tags.composer,
            StandardTagKey::Lyrics => &mut tags.lyrics,
            _ => continue,
        };
        if target.is_none() {
            *target = value_to_string(&tag.value);
        }
    }

    if tags.picture.is_none() {
        let front = revision
            .visuals()
            .iter()
            .find(|visual| visual.usage == Some(StandardVisualKey::FrontCover));
        let chosen = front.or_else(|| revision.visuals().first());
        if let Some(visual) = chosen.filter(|visual| !visual.data.is_empty()) {
            tags.picture = Some(TagPicture {
                format: media_subtype(&visual.media_type),
                data: visual.data.to_vec(),
            });
        }
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    let value = value.to_string();
    let value = value.trim();
    if value.is_empty() { None } else { Some(value.to_string()) }
}

/// Strip the `image/` prefix from a MIME type, `image/jpeg` becomes `jpeg`.
fn media_subtype(media_type: &str) -> String {
    media_type.strip_prefix("image/").unwrap_or(media_type).to_lowercase()
}
