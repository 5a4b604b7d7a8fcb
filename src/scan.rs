use std::path::{Path, PathBuf};

use uuid::Uuid;
use walkdir::WalkDir;

use crate::config::Config;

/// A movie file found during the directory scan.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    /// Sibling image with a base name matching the movie file, if any.
    pub cover_file: Option<PathBuf>,
}

/// A directory containing movie files, sibling covers and subfolders.
///
/// Children are owned by their parent; empty branches are pruned during the scan.
#[derive(Debug)]
pub struct FolderNode {
    pub path: PathBuf,
    pub name: String,
    pub id: String,
    pub files: Vec<FileEntry>,
    pub subs: Vec<FolderNode>,
    /// Recursive count of movie files in this folder and all subfolders.
    pub total: usize,
    /// Folder-level cover image, for example `cover.jpg`.
    pub cover: Option<PathBuf>,
}

/// One directory entry, collected up front so classification does not depend
/// on the order the OS returns entries in.
struct ScanEntry {
    name: String,
    path: PathBuf,
    is_dir: bool,
}

/// Recursively scan a directory into a [`FolderNode`] tree.
///
/// Returns `None` when the directory contains no movie files anywhere below it.
#[must_use]
pub fn scan_directory(config: &Config, directory: &Path) -> Option<FolderNode> {
    let mut entries: Vec<ScanEntry> = WalkDir::new(directory)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .map(|entry| ScanEntry {
            name: crate::os_str_to_string(entry.file_name()),
            is_dir: entry.file_type().is_dir(),
            path: entry.into_path(),
        })
        .collect();

    // Classification below is order-sensitive (first folder cover wins), so
    // normalize the OS listing order before anything else.
    entries.sort_by_key(|entry| entry.name.to_lowercase());

    let mut folder = FolderNode {
        path: directory.to_path_buf(),
        name: crate::path_to_filename_string(directory),
        id: Uuid::new_v4().to_string(),
        files: Vec::new(),
        subs: Vec::new(),
        total: 0,
        cover: None,
    };

    for entry in &entries {
        if entry.is_dir {
            if config.recursive
                && let Some(sub) = scan_directory(config, &entry.path)
            {
                folder.total += sub.total;
                folder.subs.push(sub);
            }
        } else if config.is_movie_file(&entry.path) && config.filter_applies(&entry.path) {
            folder.files.push(FileEntry {
                id: Uuid::new_v4().to_string(),
                name: entry.name.clone(),
                path: entry.path.clone(),
                cover_file: find_sibling_cover(config, &entry.name, &entries),
            });
        } else if folder.cover.is_none() && config.is_cover_file(&entry.name) {
            folder.cover = Some(entry.path.clone());
        }
    }

    folder.total += folder.files.len();

    if folder.files.is_empty() && folder.subs.is_empty() {
        return None;
    }

    folder.subs.sort_by_key(|sub| crate::path_to_string(&sub.path).to_lowercase());
    folder.files.sort_by_key(|file| file.name.to_lowercase());

    Some(folder)
}

/// Search sibling entries for an image whose base name matches the movie file,
/// either the movie's own base name or its full file name (case-insensitive).
fn find_sibling_cover(config: &Config, movie_name: &str, entries: &[ScanEntry]) -> Option<PathBuf> {
    let movie_stem = crate::path_to_file_stem_string(Path::new(movie_name)).to_lowercase();
    let movie_stem = movie_stem.trim();
    let movie_name = movie_name.to_lowercase();
    let movie_name = movie_name.trim();

    entries
        .iter()
        .filter(|entry| !entry.is_dir && config.is_image_file(&entry.path))
        .find(|entry| {
            let image_stem = crate::path_to_file_stem_string(Path::new(&entry.name)).to_lowercase();
            let image_stem = image_stem.trim();
            image_stem == movie_stem || image_stem == movie_name
        })
        .map(|entry| entry.path.clone())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use clap::Parser;
    use tempfile::TempDir;

    use super::*;
    use crate::config::{Args, Config};

    fn test_config(directory: &Path, extra_args: &[&str]) -> Config {
        let mut args = vec!["mshelf", directory.to_str().expect("valid path")];
        args.extend_from_slice(extra_args);
        let args = Args::parse_from(args);
        Config::try_from_args(&args).expect("valid test config")
    }

    fn touch(path: &Path) {
        fs::write(path, b"x").expect("failed to write test file");
    }

    #[test]
    fn test_empty_tree_is_pruned() {
        let dir = TempDir::new().expect("tempdir");
        fs::create_dir(dir.path().join("empty-sub")).expect("mkdir");
        touch(&dir.path().join("notes.txt"));

        assert!(scan_directory(&test_config(dir.path(), &[]), dir.path()).is_none());
    }

    #[test]
    fn test_files_sorted_case_insensitively() {
        let dir = TempDir::new().expect("tempdir");
        touch(&dir.path().join("B.mp4"));
        touch(&dir.path().join("a.mp4"));

        let folder = scan_directory(&test_config(dir.path(), &[]), dir.path()).expect("should find files");
        let names: Vec<&str> = folder.files.iter().map(|file| file.name.as_str()).collect();
        assert_eq!(names, ["a.mp4", "B.mp4"]);
    }

    #[test]
    fn test_sibling_cover_association() {
        let dir = TempDir::new().expect("tempdir");
        touch(&dir.path().join("Alien.mp4"));
        touch(&dir.path().join("alien.JPG"));
        touch(&dir.path().join("Blade Runner.mp4"));

        let folder = scan_directory(&test_config(dir.path(), &[]), dir.path()).expect("should find files");
        assert_eq!(folder.files[0].name, "Alien.mp4");
        assert_eq!(folder.files[0].cover_file, Some(dir.path().join("alien.JPG")));
        assert!(folder.files[1].cover_file.is_none());
    }

    #[test]
    fn test_sibling_cover_matching_full_movie_name() {
        let dir = TempDir::new().expect("tempdir");
        touch(&dir.path().join("Alien.mp4"));
        touch(&dir.path().join("Alien.mp4.jpg"));

        let folder = scan_directory(&test_config(dir.path(), &[]), dir.path()).expect("should find files");
        assert_eq!(folder.files[0].cover_file, Some(dir.path().join("Alien.mp4.jpg")));
    }

    #[test]
    fn test_folder_cover_first_match_wins() {
        let dir = TempDir::new().expect("tempdir");
        touch(&dir.path().join("movie.mp4"));
        touch(&dir.path().join("cover.jpg"));
        touch(&dir.path().join("thumbnail.png"));

        let folder = scan_directory(&test_config(dir.path(), &[]), dir.path()).expect("should find files");
        // Entries are sorted by name, so cover.jpg is seen before thumbnail.png.
        assert_eq!(folder.cover, Some(dir.path().join("cover.jpg")));
    }

    #[test]
    fn test_recursive_totals_and_pruning() {
        let dir = TempDir::new().expect("tempdir");
        let full = dir.path().join("full");
        let empty = dir.path().join("empty");
        fs::create_dir(&full).expect("mkdir");
        fs::create_dir(&empty).expect("mkdir");
        touch(&dir.path().join("top.mp4"));
        touch(&full.join("nested.mp4"));
        touch(&empty.join("readme.txt"));

        let folder = scan_directory(&test_config(dir.path(), &[]), dir.path()).expect("should find files");
        assert_eq!(folder.total, 2);
        assert_eq!(folder.subs.len(), 1);
        assert_eq!(folder.subs[0].name, "full");
        assert_eq!(folder.subs[0].total, 1);
    }

    #[test]
    fn test_no_recursive_skips_subfolders() {
        let dir = TempDir::new().expect("tempdir");
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).expect("mkdir");
        touch(&dir.path().join("top.mp4"));
        touch(&sub.join("nested.mp4"));

        let folder =
            scan_directory(&test_config(dir.path(), &["--no-recursive"]), dir.path()).expect("should find files");
        assert_eq!(folder.total, 1);
        assert!(folder.subs.is_empty());
    }

    #[test]
    fn test_path_filter_or_combination() {
        let dir = TempDir::new().expect("tempdir");
        touch(&dir.path().join("Asterix.mp4"));
        touch(&dir.path().join("Obelix.mp4"));
        touch(&dir.path().join("Idefix.mp4"));

        let config = test_config(dir.path(), &["--filter", "asterix", "--filter", "obelix"]);
        let folder = scan_directory(&config, dir.path()).expect("should find files");
        let names: Vec<&str> = folder.files.iter().map(|file| file.name.as_str()).collect();
        assert_eq!(names, ["Asterix.mp4", "Obelix.mp4"]);
    }
}
