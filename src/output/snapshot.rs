//! Still photos and artifact naming in the output location.

use crate::error::CaptureError;
use chrono::{DateTime, Local};
use image::RgbImage;
use std::path::{Path, PathBuf};

/// `yyMMdd_HHmm_ss`, shared by photos and recordings.
const STAMP_FORMAT: &str = "%y%m%d_%H%M_%S";

pub fn timestamp(now: DateTime<Local>) -> String {
    now.format(STAMP_FORMAT).to_string()
}

/// A path in `dir` named after `now` that does not exist yet.
///
/// Names only have one-second resolution, so a clash gets `_1`, `_2`, ...
/// appended instead of replacing the earlier file.
pub fn unique_path(dir: &Path, now: DateTime<Local>, extension: &str) -> PathBuf {
    let stem = timestamp(now);
    let first = dir.join(format!("{stem}.{extension}"));
    if !first.exists() {
        return first;
    }
    (1u32..)
        .map(|n| dir.join(format!("{stem}_{n}.{extension}")))
        .find(|p| !p.exists())
        .unwrap_or(first)
}

/// Create the output location if needed. Existing content is left alone.
pub fn ensure_output_dir(dir: &Path) -> Result<(), CaptureError> {
    std::fs::create_dir_all(dir)?;
    Ok(())
}

/// Write an already cropped frame as a JPEG into `dir`.
pub fn save_photo(image: &RgbImage, dir: &Path) -> Result<PathBuf, CaptureError> {
    ensure_output_dir(dir)?;
    let path = unique_path(dir, Local::now(), "jpg");
    image.save(&path)?;
    tracing::info!("Photo saved to {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 3, 9, 14, 5, 7).unwrap()
    }

    #[test]
    fn test_timestamp_format() {
        assert_eq!(timestamp(fixed_time()), "250309_1405_07");
    }

    #[test]
    fn test_unique_path_never_reuses_a_name() {
        let dir = tempfile::tempdir().unwrap();
        let a = unique_path(dir.path(), fixed_time(), "jpg");
        assert_eq!(a.file_name().unwrap(), "250309_1405_07.jpg");
        std::fs::write(&a, b"x").unwrap();

        let b = unique_path(dir.path(), fixed_time(), "jpg");
        assert_eq!(b.file_name().unwrap(), "250309_1405_07_1.jpg");
        std::fs::write(&b, b"x").unwrap();

        let c = unique_path(dir.path(), fixed_time(), "jpg");
        assert_eq!(c.file_name().unwrap(), "250309_1405_07_2.jpg");
    }

    #[test]
    fn test_save_photo_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("photos");
        let img = RgbImage::from_pixel(16, 16, image::Rgb([1, 2, 3]));

        let first = save_photo(&img, &target).unwrap();
        let second = save_photo(&img, &target).unwrap();

        assert_ne!(first, second);
        assert!(first.exists() && second.exists());
        assert_eq!(image::open(&first).unwrap().width(), 16);
    }
}
