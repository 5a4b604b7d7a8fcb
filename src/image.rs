use std::io::Cursor;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType};

use crate::config::Config;

/// A resolved cover image. "No cover" is an explicit `Option::None` at the
/// call sites, never an empty image.
#[derive(Debug, Clone)]
pub struct CoverImage {
    /// Image format subtype used in the data URI, for example `jpg`.
    pub format: String,
    pub data: Vec<u8>,
}

impl CoverImage {
    /// Encode as a base64 `data:` URI usable as an `img src` value.
    #[must_use]
    pub fn data_uri(&self) -> String {
        format!("data:image/{};base64,{}", self.format, STANDARD.encode(&self.data))
    }
}

/// Normalize raw image bytes: decode, scale down to fit the zoom bounding box
/// and re-encode as JPEG at the configured quality.
///
/// Degrades gracefully: when resizing is disabled or decoding/encoding fails,
/// the original bytes and format pass through unchanged.
#[must_use]
pub fn normalize(config: &Config, data: Vec<u8>, format: &str) -> CoverImage {
    if config.no_resize || data.is_empty() {
        return CoverImage {
            format: format.to_string(),
            data,
        };
    }

    let Ok(decoded) = image::load_from_memory(&data) else {
        return CoverImage {
            format: format.to_string(),
            data,
        };
    };

    let resized = fit_to_bounds(decoded, config.env.zoom_width, config.env.zoom_height);
    let rgb = resized.to_rgb8();

    let mut encoded = Vec::new();
    let mut cursor = Cursor::new(&mut encoded);
    let mut encoder = JpegEncoder::new_with_quality(&mut cursor, config.quality);
    if encoder
        .encode(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)
        .is_ok()
    {
        CoverImage {
            format: "jpg".to_string(),
            data: encoded,
        }
    } else {
        CoverImage {
            format: format.to_string(),
            data,
        }
    }
}

/// Read and normalize an image file. Returns `None` when the file is missing
/// or unreadable.
#[must_use]
pub fn normalize_file(config: &Config, path: &Path) -> Option<CoverImage> {
    let data = std::fs::read(path).ok()?;
    Some(normalize(config, data, &file_format(path)))
}

/// Scale down to fit the bounding box, preserving aspect ratio.
/// Images already inside the box are left at their original size.
fn fit_to_bounds(image: DynamicImage, max_width: u32, max_height: u32) -> DynamicImage {
    let (width, height) = (image.width(), image.height());
    if width <= max_width && height <= max_height {
        return image;
    }
    let (new_width, new_height) = bounded_size(width, height, max_width, max_height);
    image.resize_exact(new_width.max(1), new_height.max(1), FilterType::Lanczos3)
}

/// Scale the larger source dimension to its bound and the other proportionally.
fn bounded_size(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width > height {
        let new_height = f64::from(height) * f64::from(max_width) / f64::from(width);
        (max_width, new_height.round() as u32)
    } else {
        let new_width = f64::from(width) * f64::from(max_height) / f64::from(height);
        (new_width.round() as u32, max_height)
    }
}

/// Image format subtype from a file extension, `.jpeg` maps to `jpg`.
fn file_format(path: &Path) -> String {
    let extension = crate::path_to_file_extension_string(path);
    if extension == "jpeg" { "jpg".to_string() } else { extension }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use image::ImageFormat;
    use tempfile::TempDir;

    use super::*;
    use crate::config::{Args, Config};

    fn test_config(directory: &Path, extra_args: &[&str]) -> Config {
        let mut args = vec!["mshelf", directory.to_str().expect("valid path")];
        args.extend_from_slice(extra_args);
        let args = Args::parse_from(args);
        Config::try_from_args(&args).expect("valid test config")
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = DynamicImage::ImageRgb8(image::RgbImage::new(width, height));
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .expect("failed to encode test image");
        bytes
    }

    #[test]
    fn test_non_image_bytes_pass_through() {
        let dir = TempDir::new().expect("tempdir");
        let config = test_config(dir.path(), &[]);
        let original = b"definitely not an image".to_vec();
        let result = normalize(&config, original.clone(), "png");
        assert_eq!(result.data, original);
        assert_eq!(result.format, "png");
    }

    #[test]
    fn test_no_resize_passes_through() {
        let dir = TempDir::new().expect("tempdir");
        let config = test_config(dir.path(), &["--no-resize"]);
        let original = png_bytes(800, 400);
        let result = normalize(&config, original.clone(), "png");
        assert_eq!(result.data, original);
        assert_eq!(result.format, "png");
    }

    #[test]
    fn test_normalize_reencodes_as_jpeg() {
        let dir = TempDir::new().expect("tempdir");
        let config = test_config(dir.path(), &["--zoom", "200x300"]);
        let result = normalize(&config, png_bytes(800, 400), "png");
        assert_eq!(result.format, "jpg");
        let decoded = image::load_from_memory(&result.data).expect("should decode");
        assert_eq!((decoded.width(), decoded.height()), (200, 100));
    }

    #[test]
    fn test_bounded_size_width_bound() {
        assert_eq!(bounded_size(4000, 2000, 400, 600), (400, 200));
    }

    #[test]
    fn test_bounded_size_height_bound() {
        assert_eq!(bounded_size(2000, 4000, 400, 600), (300, 600));
    }

    #[test]
    fn test_small_image_keeps_dimensions() {
        let dir = TempDir::new().expect("tempdir");
        let config = test_config(dir.path(), &["--zoom", "200x300"]);
        let result = normalize(&config, png_bytes(100, 50), "png");
        assert_eq!(result.format, "jpg");
        let decoded = image::load_from_memory(&result.data).expect("should decode");
        assert_eq!((decoded.width(), decoded.height()), (100, 50));
    }

    #[test]
    fn test_normalize_file_missing() {
        let dir = TempDir::new().expect("tempdir");
        let config = test_config(dir.path(), &[]);
        assert!(normalize_file(&config, Path::new("/no/such/cover.jpg")).is_none());
    }

    #[test]
    fn test_data_uri() {
        let cover = CoverImage {
            format: "jpg".to_string(),
            data: vec![1, 2, 3],
        };
        assert_eq!(cover.data_uri(), "data:image/jpg;base64,AQID");
    }

    #[test]
    fn test_file_format_jpeg_alias() {
        assert_eq!(file_format(Path::new("cover.JPEG")), "jpg");
        assert_eq!(file_format(Path::new("cover.png")), "png");
    }
}
