use std::path::{Path, PathBuf};
use std::fs;
use image::{ImageFormat, RgbImage};

use crate::errors::{DopplerError, Result};

/// Extensions accepted when scanning a directory for screenshots
const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Represents an input screenshot with its metadata
pub struct InputImage {
    pub image: RgbImage,
    pub path: PathBuf,
    pub filename: String,
}

/// Get all PNG/JPEG files from a directory (recursively), sorted by path
pub fn get_image_files_in_dir<P: AsRef<Path>>(dir_path: P) -> Result<Vec<PathBuf>> {
    let dir_path = dir_path.as_ref();

    if !dir_path.exists() {
        return Err(DopplerError::InvalidPath(dir_path.to_path_buf()));
    }

    if !dir_path.is_dir() {
        return Err(DopplerError::Config(format!(
            "{} is not a directory", dir_path.display()
        )));
    }

    let mut image_files = Vec::new();
    find_image_files_recursive(dir_path, &mut image_files)?;
    image_files.sort();

    Ok(image_files)
}

/// Helper function to recursively search for image files
fn find_image_files_recursive(dir_path: &Path, result: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir_path)? {
        let path = entry?.path();

        if path.is_dir() {
            find_image_files_recursive(&path, result)?;
        } else if path.is_file() && is_image_file(&path) {
            result.push(path);
        }
    }

    Ok(())
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Load a screenshot, dropping any alpha channel
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<InputImage> {
    let path = path.as_ref();

    let filename = path.file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| DopplerError::InvalidPath(path.to_path_buf()))?
        .to_string();

    let image = image::open(path)?.to_rgb8();

    Ok(InputImage {
        image,
        path: path.to_path_buf(),
        filename,
    })
}

/// Save an RGB image as PNG
pub fn save_image<P: AsRef<Path>>(image: &RgbImage, path: P) -> Result<()> {
    image.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_png_and_jpeg_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("umb");
        fs::create_dir_all(&nested).unwrap();

        let img = RgbImage::new(4, 4);
        save_image(&img, dir.path().join("a.png")).unwrap();
        save_image(&img, nested.join("b.PNG")).unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let files = get_image_files_in_dir(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|p| is_image_file(p)));
    }

    #[test]
    fn load_reports_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan_01.png");
        save_image(&RgbImage::new(8, 6), &path).unwrap();

        let input = load_image(&path).unwrap();
        assert_eq!(input.filename, "scan_01");
        assert_eq!(input.image.dimensions(), (8, 6));
    }

    #[test]
    fn missing_directory_is_invalid_path() {
        let err = get_image_files_in_dir("/definitely/not/here").unwrap_err();
        assert!(matches!(err, DopplerError::InvalidPath(_)));
    }
}
