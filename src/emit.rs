use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use encoding_rs::Encoding;
use indicatif::ProgressBar;
#[cfg(not(test))]
use indicatif::ProgressStyle;

use crate::config::Config;
use crate::cover;
use crate::image::{self, CoverImage};
use crate::probe;
use crate::scan::{self, FileEntry, FolderNode};
use crate::tags::{self, MediaTags};
use crate::template::{self, RenderContext, Templates};

#[cfg(not(test))]
const PROGRESS_BAR_CHARS: &str = "=> ";
#[cfg(not(test))]
const PROGRESS_BAR_TEMPLATE: &str = "[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {percent}%";

/// One emission step. The full plan is built up front from the scanned tree,
/// then executed strictly in sequence by a single consumer, so the output
/// order is fixed by the tree shape alone.
enum EmitTask<'a> {
    FolderOpen { folder: &'a FolderNode, parent_id: &'a str },
    File { folder: &'a FolderNode, file: &'a FileEntry },
    FolderClose { folder: &'a FolderNode, parent_id: &'a str },
}

/// Scan the configured directory and write the complete shelf page.
pub fn generate_shelf(config: &Config) -> Result<()> {
    let Some(root) = scan::scan_directory(config, &config.directory) else {
        crate::print_warning!("No movie files found in: {}", config.directory.display());
        return Ok(());
    };

    println!("{}", format!("Found {} movie file(s)", root.total).green().bold());

    let templates = Templates::load(&config.template_dir, config.encoding)?;
    let writer = ShelfWriter::create(&config.output_file, config.encoding)?;

    let mut emitter = Emitter {
        config,
        templates,
        writer,
        env_pairs: config.env.pairs(root.total),
        progress: create_progress_bar(root.total as u64),
        processed: 0,
        folder_covers: HashMap::new(),
    };

    emitter.emit_global(true)?;
    let plan = build_plan(&root, config.folder_last);
    for task in &plan {
        emitter.execute(task)?;
    }
    emitter.emit_global(false)?;
    emitter.progress.finish_and_clear();

    cleanup_thumbnail_cache(config);
    println!(
        "{}",
        format!(
            "Finished: {} file(s) written to {}",
            emitter.processed,
            config.output_file.display()
        )
        .green()
    );
    Ok(())
}

/// Build the ordered emission plan for the whole tree.
///
/// The root folder contributes no open/close block, only its children.
fn build_plan(root: &FolderNode, folder_last: bool) -> Vec<EmitTask<'_>> {
    let mut plan = Vec::new();
    push_folder_children(root, folder_last, &mut plan);
    plan
}

/// Append a folder's children in the configured order: files before subfolder
/// blocks by default, subfolder blocks first with `folder_last`.
fn push_folder_children<'a>(folder: &'a FolderNode, folder_last: bool, plan: &mut Vec<EmitTask<'a>>) {
    if folder_last {
        for sub in &folder.subs {
            push_folder_block(sub, folder, folder_last, plan);
        }
        plan.extend(folder.files.iter().map(|file| EmitTask::File { folder, file }));
    } else {
        plan.extend(folder.files.iter().map(|file| EmitTask::File { folder, file }));
        for sub in &folder.subs {
            push_folder_block(sub, folder, folder_last, plan);
        }
    }
}

fn push_folder_block<'a>(
    folder: &'a FolderNode,
    parent: &'a FolderNode,
    folder_last: bool,
    plan: &mut Vec<EmitTask<'a>>,
) {
    plan.push(EmitTask::FolderOpen {
        folder,
        parent_id: &parent.id,
    });
    push_folder_children(folder, folder_last, plan);
    plan.push(EmitTask::FolderClose {
        folder,
        parent_id: &parent.id,
    });
}

/// The single consumer of the emission plan. Owns the output stream; every
/// fragment write completes before the next task starts.
struct Emitter<'a> {
    config: &'a Config,
    templates: Templates,
    writer: ShelfWriter,
    env_pairs: Vec<(String, String)>,
    progress: ProgressBar,
    processed: usize,
    /// Display covers resolved at folder open, reused for the close fragment.
    folder_covers: HashMap<String, Option<CoverImage>>,
}

impl Emitter<'_> {
    fn execute(&mut self, task: &EmitTask) -> Result<()> {
        match task {
            EmitTask::FolderOpen { folder, parent_id } => self.emit_folder_open(folder, parent_id),
            EmitTask::File { folder, file } => self.emit_file(folder, file),
            EmitTask::FolderClose { folder, parent_id } => self.emit_folder_close(folder, parent_id),
        }
    }

    /// Write the header or footer, which see only the environment values.
    fn emit_global(&mut self, header: bool) -> Result<()> {
        let mut context = RenderContext::new();
        context.merge(self.env_pairs.iter().cloned());
        let fragment = if header { &self.templates.header } else { &self.templates.footer };
        self.writer.write_fragment(&template::render(fragment, &context))
    }

    fn emit_folder_open(&mut self, folder: &FolderNode, parent_id: &str) -> Result<()> {
        self.progress
            .println(format!("{} {}", "Processing folder:".cyan(), folder.path.display()));

        // The display cover is resolved before the open block and reused for
        // the matching close block.
        let folder_cover = folder
            .cover
            .as_deref()
            .and_then(|path| image::normalize_file(self.config, path));
        let context = self.folder_context(folder, parent_id, folder_cover.as_ref());
        let fragment = template::render(&self.templates.folder_start, &context);
        self.folder_covers.insert(folder.id.clone(), folder_cover);
        self.writer.write_fragment(&fragment)
    }

    fn emit_folder_close(&mut self, folder: &FolderNode, parent_id: &str) -> Result<()> {
        let folder_cover = self.folder_covers.remove(&folder.id).flatten();
        let context = self.folder_context(folder, parent_id, folder_cover.as_ref());
        self.writer
            .write_fragment(&template::render(&self.templates.folder_end, &context))
    }

    /// Process one movie file and write its fragment: tag read, metadata
    /// probe and cover resolution all tolerate failure with default values.
    fn emit_file(&mut self, folder: &FolderNode, file: &FileEntry) -> Result<()> {
        self.processed += 1;
        self.progress.inc(1);
        if self.config.verbose {
            self.progress
                .println(format!("{} {}", "Processing file:".cyan(), file.name.yellow()));
        }

        let file_tags = tags::read_tags(&file.path);
        let info = probe::probe_media(self.config, &file.path).unwrap_or_default();
        let file_cover = cover::resolve(
            self.config,
            folder.cover.as_deref(),
            file,
            file_tags.as_ref(),
            info.duration_seconds,
        );

        let mut context = RenderContext::new();
        if let Some(file_tags) = &file_tags {
            insert_tag_values(&mut context, file_tags);
        }
        context.insert("id", &file.id);
        context.insert("parent-id", &folder.id);
        context.insert("file", &file.name);
        context.insert("path", crate::path_to_string(&file.path));
        context.insert("type", crate::path_to_file_extension_string(&file.path).to_uppercase());
        context.insert(
            "title",
            file_tags
                .as_ref()
                .and_then(|file_tags| file_tags.title.clone())
                .unwrap_or_else(|| crate::path_to_file_stem_string(&file.path)),
        );
        context.insert("size", &info.size);
        context.insert("duration", &info.duration);
        context.insert("date", &info.date);
        context.insert("streams", &info.streams);
        context.merge(self.env_pairs.iter().cloned());
        self.apply_cover(&mut context, file_cover.as_ref());

        self.writer
            .write_fragment(&template::render(&self.templates.file, &context))
    }

    fn folder_context(&self, folder: &FolderNode, parent_id: &str, folder_cover: Option<&CoverImage>) -> RenderContext {
        let item_count = folder.subs.len() + folder.files.len();
        let plural = if item_count == 1 { "" } else { "s" };
        let mut context = RenderContext::new();
        context.insert("id", &folder.id);
        context.insert("parent-id", parent_id);
        context.insert("folder", format!("{} ({item_count} Item{plural})", folder.name));
        context.merge(self.env_pairs.iter().cloned());
        self.apply_cover(&mut context, folder_cover);
        context
    }

    /// Fill the `image` and `cover` placeholders. The cover fragment is
    /// pre-rendered with the current context so its own placeholders resolve
    /// against the same values.
    fn apply_cover(&self, context: &mut RenderContext, cover_image: Option<&CoverImage>) {
        if let Some(cover_image) = cover_image {
            context.insert("image", cover_image.data_uri());
            let markup = template::render(&self.templates.cover, context);
            context.insert("cover", markup);
        } else {
            context.insert("image", "");
            context.insert("cover", "");
        }
    }
}

/// The output stream. Each fragment is encoded with the configured character
/// encoding before it is written.
struct ShelfWriter {
    file: File,
    encoding: &'static Encoding,
}

impl ShelfWriter {
    fn create(path: &Path, encoding: &'static Encoding) -> Result<Self> {
        let file = File::create(path).with_context(|| format!("Failed to create output file: {}", path.display()))?;
        Ok(Self { file, encoding })
    }

    fn write_fragment(&mut self, fragment: &str) -> Result<()> {
        let (bytes, _, _) = self.encoding.encode(fragment);
        self.file.write_all(&bytes).context("Failed to write output file")
    }
}

fn insert_tag_values(context: &mut RenderContext, file_tags: &MediaTags) {
    let pairs = [
        ("title", &file_tags.title),
        ("artist", &file_tags.artist),
        ("album", &file_tags.album),
        ("year", &file_tags.year),
        ("comment", &file_tags.comment),
        ("track", &file_tags.track),
        ("genre", &file_tags.genre),
        ("composer", &file_tags.composer),
        ("lyrics", &file_tags.lyrics),
    ];
    for (key, value) in pairs {
        if let Some(value) = value {
            context.insert(key, value.clone());
        }
    }
}

/// Remove the thumbnail cache after the whole tree has been emitted.
/// A cache that was never created is a no-op.
fn cleanup_thumbnail_cache(config: &Config) {
    if config.keep_thumbnails {
        return;
    }
    match fs::remove_dir_all(&config.thumbnail_cache) {
        Ok(()) => {}
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => crate::print_warning!("Failed to remove thumbnail cache: {error}"),
    }
}

/// Create a progress bar that is hidden during tests.
fn create_progress_bar(len: u64) -> ProgressBar {
    #[cfg(test)]
    {
        let _ = len;
        ProgressBar::hidden()
    }
    #[cfg(not(test))]
    {
        let progress_bar = ProgressBar::new(len);
        progress_bar.set_style(
            ProgressStyle::default_bar()
                .template(PROGRESS_BAR_TEMPLATE)
                .expect("Failed to set progress bar template")
                .progress_chars(PROGRESS_BAR_CHARS),
        );
        progress_bar
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use clap::Parser;
    use tempfile::TempDir;

    use super::*;
    use crate::config::Args;

    /// Minimal templates that make the emission order visible in the output.
    fn write_templates(directory: &Path) {
        let fragments = [
            ("header", "H|"),
            ("folder-start", "O:<#folder#>|"),
            ("file", "F:<#title#>:<#cover#>|"),
            ("cover", "C"),
            ("folder-end", "E:<#folder#>|"),
            ("footer", "Z:<#files#>"),
        ];
        for (name, content) in fragments {
            fs::write(directory.join(format!("{name}.tpl.html")), content).expect("failed to write test template");
        }
    }

    fn test_config(directory: &Path, extra_args: &[&str]) -> Config {
        let mut args = vec!["mshelf", directory.to_str().expect("valid path")];
        args.extend_from_slice(extra_args);
        let args = Args::parse_from(args);
        Config::try_from_args(&args).expect("valid test config")
    }

    /// A config wired to a tempdir fixture: templates, output file and
    /// thumbnail cache all live under the tempdir, ffmpeg is excluded from
    /// the cover strategies so no external tools are needed.
    fn fixture_config(dir: &TempDir, extra_args: &[&str]) -> Config {
        let template_dir = dir.path().join("templates");
        fs::create_dir(&template_dir).expect("mkdir");
        write_templates(&template_dir);

        let movies = dir.path().join("movies");
        fs::create_dir(&movies).expect("mkdir");

        let mut args = vec!["--cover-strategy", "tag,image,folder"];
        args.extend_from_slice(extra_args);
        let mut config = test_config(&movies, &args);
        config.template_dir = template_dir;
        config.output_file = dir.path().join("out.html");
        config.thumbnail_cache = dir.path().join("cache");
        config.ffprobe = PathBuf::from("/nonexistent/ffprobe-binary");
        config
    }

    fn touch(path: &Path) {
        fs::write(path, b"x").expect("failed to write test file");
    }

    fn read_output(config: &Config) -> String {
        fs::read_to_string(&config.output_file).expect("output file should exist")
    }

    #[test]
    fn test_end_to_end_file_without_covers() {
        let dir = TempDir::new().expect("tempdir");
        let config = fixture_config(&dir, &[]);
        touch(&config.directory.join("movie.mp4"));

        generate_shelf(&config).expect("should generate");
        // No tags, no sibling image, no folder cover: title falls back to the
        // file stem and the cover placeholder stays empty.
        assert_eq!(read_output(&config), "H|F:movie:|Z:1");
    }

    #[test]
    fn test_files_before_subfolders_by_default() {
        let dir = TempDir::new().expect("tempdir");
        let config = fixture_config(&dir, &[]);
        touch(&config.directory.join("top.mp4"));
        let sub = config.directory.join("sub");
        fs::create_dir(&sub).expect("mkdir");
        touch(&sub.join("nested.mp4"));

        generate_shelf(&config).expect("should generate");
        assert_eq!(
            read_output(&config),
            "H|F:top:|O:sub (1 Item)|F:nested:|E:sub (1 Item)|Z:2"
        );
    }

    #[test]
    fn test_folder_last_puts_subfolders_first() {
        let dir = TempDir::new().expect("tempdir");
        let config = fixture_config(&dir, &["--folder-last"]);
        touch(&config.directory.join("top.mp4"));
        let sub = config.directory.join("sub");
        fs::create_dir(&sub).expect("mkdir");
        touch(&sub.join("nested.mp4"));

        generate_shelf(&config).expect("should generate");
        assert_eq!(
            read_output(&config),
            "H|O:sub (1 Item)|F:nested:|E:sub (1 Item)|F:top:|Z:2"
        );
    }

    #[test]
    fn test_subfolders_ordered_case_insensitively() {
        let dir = TempDir::new().expect("tempdir");
        let config = fixture_config(&dir, &[]);
        for name in ["Beta", "alpha"] {
            let sub = config.directory.join(name);
            fs::create_dir(&sub).expect("mkdir");
            touch(&sub.join("movie.mp4"));
        }

        generate_shelf(&config).expect("should generate");
        assert_eq!(
            read_output(&config),
            "H|O:alpha (1 Item)|F:movie:|E:alpha (1 Item)|O:Beta (1 Item)|F:movie:|E:Beta (1 Item)|Z:2"
        );
    }

    #[test]
    fn test_emission_is_deterministic() {
        let dir = TempDir::new().expect("tempdir");
        let config = fixture_config(&dir, &[]);
        touch(&config.directory.join("b.mp4"));
        touch(&config.directory.join("A.mp4"));
        let sub = config.directory.join("series");
        fs::create_dir(&sub).expect("mkdir");
        touch(&sub.join("episode.mp4"));

        generate_shelf(&config).expect("should generate");
        let first = read_output(&config);
        generate_shelf(&config).expect("should generate again");
        assert_eq!(first, read_output(&config));
        assert_eq!(first, "H|F:A:|F:b:|O:series (1 Item)|F:episode:|E:series (1 Item)|Z:3");
    }

    #[test]
    fn test_sibling_cover_renders_cover_fragment() {
        let dir = TempDir::new().expect("tempdir");
        let config = fixture_config(&dir, &["--no-resize"]);
        touch(&config.directory.join("movie.mp4"));
        touch(&config.directory.join("movie.jpg"));

        generate_shelf(&config).expect("should generate");
        assert_eq!(read_output(&config), "H|F:movie:C|Z:1");
    }

    #[test]
    fn test_empty_tree_writes_nothing() {
        let dir = TempDir::new().expect("tempdir");
        let config = fixture_config(&dir, &[]);
        touch(&config.directory.join("notes.txt"));

        generate_shelf(&config).expect("should succeed without movies");
        assert!(!config.output_file.exists());
    }

    #[test]
    fn test_thumbnail_cache_cleanup() {
        let dir = TempDir::new().expect("tempdir");
        let config = fixture_config(&dir, &[]);
        touch(&config.directory.join("movie.mp4"));
        fs::create_dir_all(&config.thumbnail_cache).expect("mkdir");
        touch(&config.thumbnail_cache.join("stale.png"));

        generate_shelf(&config).expect("should generate");
        assert!(!config.thumbnail_cache.exists());
    }

    #[test]
    fn test_thumbnail_cache_kept_on_request() {
        let dir = TempDir::new().expect("tempdir");
        let config = fixture_config(&dir, &["--keep-thumbnails"]);
        touch(&config.directory.join("movie.mp4"));
        fs::create_dir_all(&config.thumbnail_cache).expect("mkdir");
        touch(&config.thumbnail_cache.join("kept.png"));

        generate_shelf(&config).expect("should generate");
        assert!(config.thumbnail_cache.join("kept.png").exists());
    }

    #[test]
    fn test_build_plan_shapes() {
        let file = |name: &str| FileEntry {
            id: format!("{name}-id"),
            name: name.to_string(),
            path: PathBuf::from(name),
            cover_file: None,
        };
        let sub = FolderNode {
            path: PathBuf::from("/movies/sub"),
            name: "sub".to_string(),
            id: "sub-id".to_string(),
            files: vec![file("nested.mp4")],
            subs: Vec::new(),
            total: 1,
            cover: None,
        };
        let root = FolderNode {
            path: PathBuf::from("/movies"),
            name: "movies".to_string(),
            id: "root-id".to_string(),
            files: vec![file("top.mp4")],
            subs: vec![sub],
            total: 2,
            cover: None,
        };

        let shape = |folder_last: bool| {
            build_plan(&root, folder_last)
                .iter()
                .map(|task| match task {
                    EmitTask::FolderOpen { .. } => "open",
                    EmitTask::File { .. } => "file",
                    EmitTask::FolderClose { .. } => "close",
                })
                .collect::<Vec<_>>()
        };

        assert_eq!(shape(false), ["file", "open", "file", "close"]);
        assert_eq!(shape(true), ["open", "file", "close", "file"]);
    }
}
