use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use clap::Parser;
use encoding_rs::Encoding;
use regex::{Regex, RegexBuilder};

use crate::cover::CoverStrategy;
use crate::thumbnail::ThumbnailTime;

/// Default output file name.
const DEFAULT_OUTPUT_FILE: &str = "movie-shelf.html";

/// Default template directory.
const DEFAULT_TEMPLATE_DIR: &str = "templates";

/// Default output character encoding label.
const DEFAULT_ENCODING: &str = "utf-8";

/// Default page title shown in the generated page.
const DEFAULT_PAGE_TITLE: &str = "My Movies";

/// Directory for generated video frame thumbnails.
const DEFAULT_THUMBNAIL_CACHE: &str = ".thumbnail-cache";

/// File extensions considered to be movies.
const DEFAULT_MOVIE_EXTENSIONS: &[&str] = &["mp4", "avi", "xvid", "flv", "mpeg"];

/// File extensions considered to be cover images.
const DEFAULT_IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif"];

/// Base names recognized as folder-level cover images.
const DEFAULT_COVER_NAMES: &[&str] = &["cover", "thumbnail"];

/// Default time offset for generated thumbnails.
const DEFAULT_THUMBNAIL_TIME: &str = "30%";

/// Default JPEG quality for resized cover images.
const DEFAULT_JPEG_QUALITY: u8 = 30;

/// Default cover display size in pixels.
const DEFAULT_WIDTH: u32 = 116;
const DEFAULT_HEIGHT: u32 = 170;

static SIZE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)x(\d+)$").expect("Failed to compile size regex"));

static ENV_PAIR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\w+),(.+)$").expect("Failed to compile env pair regex"));

#[derive(Parser, Debug)]
#[command(author, version, name = "mshelf", about = "Generate a static HTML shelf page for a movie directory")]
pub struct Args {
    /// Directory to scan for movie files
    #[arg(value_hint = clap::ValueHint::DirPath)]
    pub directory: PathBuf,

    /// Output file (default: ./movie-shelf.html)
    #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
    pub file: Option<PathBuf>,

    /// Path to the template directory (default: ./templates)
    #[arg(short, long, value_hint = clap::ValueHint::DirPath)]
    pub templates: Option<PathBuf>,

    /// File extensions considered as movies, comma-separated
    #[arg(short, long, value_name = "EXT,EXT")]
    pub extensions: Option<String>,

    /// Output character encoding
    #[arg(long)]
    pub encoding: Option<String>,

    /// Page title for the generated HTML
    #[arg(long, value_name = "TITLE")]
    pub page_title: Option<String>,

    /// Cover strategies to try in order, comma-separated
    #[arg(short, long, value_name = "NAME,NAME")]
    pub cover_strategy: Option<String>,

    /// Time offset for generated thumbnails, percentage or seconds
    #[arg(long, value_name = "30% | 120")]
    pub thumbnail_time: Option<String>,

    /// Cover display size in pixels
    #[arg(short, long, value_name = "WxH")]
    pub size: Option<String>,

    /// Cover size when zoomed in pixels (default: size * 2)
    #[arg(short, long, value_name = "WxH")]
    pub zoom: Option<String>,

    /// JPEG quality of resized images
    #[arg(short, long)]
    pub quality: Option<u8>,

    /// Do not resize cover images
    #[arg(long)]
    pub no_resize: bool,

    /// Do not delete the thumbnail cache at the end of the run
    #[arg(short, long)]
    pub keep_thumbnails: bool,

    /// Do not process subfolders
    #[arg(long)]
    pub no_recursive: bool,

    /// Emit subfolder blocks before a folder's own files
    #[arg(long)]
    pub folder_last: bool,

    /// Regular expression applied to full paths, can be given multiple times (OR-combined)
    #[arg(long, value_name = "REGEX")]
    pub filter: Vec<String>,

    /// Additional key,value pairs for templates, can be given multiple times
    #[arg(long, value_name = "KEY,VALUE")]
    pub env: Vec<String>,

    /// Path to the ffmpeg executable if not in PATH
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    pub ffmpeg: Option<PathBuf>,

    /// Path to the ffprobe executable if not in PATH
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    pub ffprobe: Option<PathBuf>,

    /// Print verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

/// Global template values merged into every rendered fragment.
#[derive(Debug, Clone)]
pub struct ShelfEnv {
    pub width: u32,
    pub height: u32,
    pub zoom_width: u32,
    pub zoom_height: u32,
    pub page_title: String,
    /// Extra user-provided pairs. Built-in keys always win on collision.
    pub extra: Vec<(String, String)>,
}

impl ShelfEnv {
    /// All environment pairs in merge order: later entries override earlier ones,
    /// so built-in keys come last.
    #[must_use]
    pub fn pairs(&self, total_files: usize) -> Vec<(String, String)> {
        let mut pairs = self.extra.clone();
        pairs.push(("page-title".to_string(), self.page_title.clone()));
        pairs.push(("width".to_string(), self.width.to_string()));
        pairs.push(("height".to_string(), self.height.to_string()));
        pairs.push(("zoom-width".to_string(), self.zoom_width.to_string()));
        pairs.push(("zoom-height".to_string(), self.zoom_height.to_string()));
        pairs.push(("files".to_string(), total_files.to_string()));
        pairs
    }
}

/// Validated, immutable configuration built once from command line arguments.
#[derive(Debug)]
pub struct Config {
    pub directory: PathBuf,
    pub output_file: PathBuf,
    pub template_dir: PathBuf,
    pub encoding: &'static Encoding,
    /// Movie extensions with a leading dot, lowercase.
    pub extensions: Vec<String>,
    /// Image extensions without a dot, lowercase.
    pub image_extensions: Vec<String>,
    pub cover_names: Vec<String>,
    pub cover_strategies: Vec<CoverStrategy>,
    pub thumbnail_time: ThumbnailTime,
    pub thumbnail_cache: PathBuf,
    pub quality: u8,
    pub no_resize: bool,
    pub keep_thumbnails: bool,
    pub recursive: bool,
    pub folder_last: bool,
    pub filters: Vec<Regex>,
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub verbose: bool,
    pub env: ShelfEnv,
    cover_file_re: Regex,
}

impl Config {
    /// Create config from validated command line arguments.
    ///
    /// Fails on an unusable directory or malformed option values before any output exists.
    pub fn try_from_args(args: &Args) -> Result<Self> {
        let directory = crate::resolve_input_path(Some(&args.directory))?;
        if !directory.is_dir() {
            anyhow::bail!("Input path is not a directory: '{}'", directory.display());
        }

        let encoding_label = args.encoding.as_deref().unwrap_or(DEFAULT_ENCODING);
        let encoding = Encoding::for_label(encoding_label.trim().as_bytes())
            .with_context(|| format!("Unknown encoding: '{encoding_label}'"))?;

        let extensions = args.extensions.as_deref().map_or_else(
            || DEFAULT_MOVIE_EXTENSIONS.iter().map(|ext| format!(".{ext}")).collect(),
            normalize_extensions,
        );

        let cover_strategies: Vec<CoverStrategy> = args
            .cover_strategy
            .as_deref()
            .unwrap_or("tag,image,ffmpeg,folder")
            .split(',')
            .filter(|name| !name.trim().is_empty())
            .map(CoverStrategy::parse)
            .collect();

        let thumbnail_time = args
            .thumbnail_time
            .as_deref()
            .unwrap_or(DEFAULT_THUMBNAIL_TIME)
            .parse::<ThumbnailTime>()?;

        let (width, height) = match args.size.as_deref() {
            Some(size) => parse_size(size)?,
            None => (DEFAULT_WIDTH, DEFAULT_HEIGHT),
        };
        let (zoom_width, zoom_height) = match args.zoom.as_deref() {
            Some(zoom) => parse_size(zoom)?,
            None => (width * 2, height * 2),
        };

        let extra = args
            .env
            .iter()
            .map(|pair| parse_env_pair(pair))
            .collect::<Result<Vec<_>>>()?;

        let filters = args
            .filter
            .iter()
            .map(|pattern| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .with_context(|| format!("Invalid filter regex: '{pattern}'"))
            })
            .collect::<Result<Vec<_>>>()?;

        let image_extensions: Vec<String> = DEFAULT_IMAGE_EXTENSIONS.iter().map(ToString::to_string).collect();
        let cover_names: Vec<String> = DEFAULT_COVER_NAMES.iter().map(ToString::to_string).collect();
        let cover_file_re = build_cover_file_regex(&cover_names, &image_extensions)?;

        Ok(Self {
            directory,
            output_file: args.file.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_FILE)),
            template_dir: args.templates.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_TEMPLATE_DIR)),
            encoding,
            extensions,
            image_extensions,
            cover_names,
            cover_strategies,
            thumbnail_time,
            thumbnail_cache: PathBuf::from(DEFAULT_THUMBNAIL_CACHE),
            quality: args.quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            no_resize: args.no_resize,
            keep_thumbnails: args.keep_thumbnails,
            recursive: !args.no_recursive,
            folder_last: args.folder_last,
            filters,
            ffmpeg: args.ffmpeg.clone().unwrap_or_else(|| PathBuf::from("ffmpeg")),
            ffprobe: args.ffprobe.clone().unwrap_or_else(|| PathBuf::from("ffprobe")),
            verbose: args.verbose,
            env: ShelfEnv {
                width,
                height,
                zoom_width,
                zoom_height,
                page_title: args.page_title.clone().unwrap_or_else(|| DEFAULT_PAGE_TITLE.to_string()),
                extra,
            },
            cover_file_re,
        })
    }

    /// Check if a file is a movie file based on its extension.
    #[must_use]
    pub fn is_movie_file(&self, path: &Path) -> bool {
        let extension = crate::path_to_file_extension_string(path);
        self.extensions.iter().any(|ext| ext[1..] == extension)
    }

    /// Check if a file is a cover image candidate based on its extension.
    #[must_use]
    pub fn is_image_file(&self, path: &Path) -> bool {
        let extension = crate::path_to_file_extension_string(path);
        self.image_extensions.iter().any(|ext| *ext == extension)
    }

    /// Check if a file name matches the folder-level cover name pattern.
    #[must_use]
    pub fn is_cover_file(&self, name: &str) -> bool {
        self.cover_file_re.is_match(name)
    }

    /// Check if the full path passes the configured filters.
    /// An empty filter list always passes; multiple filters are OR-combined.
    #[must_use]
    pub fn filter_applies(&self, path: &Path) -> bool {
        if self.filters.is_empty() {
            return true;
        }
        let path = crate::path_to_string(path);
        self.filters.iter().any(|filter| filter.is_match(&path))
    }
}

/// Normalize a comma-separated extension list to lowercase with a leading dot.
fn normalize_extensions(extensions: &str) -> Vec<String> {
    extensions
        .split(',')
        .map(str::trim)
        .filter(|ext| !ext.is_empty())
        .map(|ext| {
            let ext = ext.to_lowercase();
            if ext.starts_with('.') { ext } else { format!(".{ext}") }
        })
        .collect()
}

/// Parse a `WIDTHxHEIGHT` size value.
fn parse_size(value: &str) -> Result<(u32, u32)> {
    let captures = SIZE_RE
        .captures(value.trim())
        .with_context(|| format!("Invalid size: '{value}', expected WIDTHxHEIGHT"))?;
    let width = captures[1].parse::<u32>().context("Invalid width")?;
    let height = captures[2].parse::<u32>().context("Invalid height")?;
    Ok((width, height))
}

/// Parse a `key,value` environment pair.
fn parse_env_pair(value: &str) -> Result<(String, String)> {
    let captures = ENV_PAIR_RE
        .captures(value)
        .with_context(|| format!("Invalid env pair: '{value}', expected KEY,VALUE"))?;
    Ok((captures[1].to_string(), captures[2].to_string()))
}

/// Build the regex matching folder-level cover file names, for example `cover.jpg`.
fn build_cover_file_regex(names: &[String], extensions: &[String]) -> Result<Regex> {
    RegexBuilder::new(&format!(
        r"(?:{})\.(?:{})",
        names.join("|"),
        extensions.join("|")
    ))
    .case_insensitive(true)
    .build()
    .context("Failed to build cover file regex")
}
