//! Contrast-limited adaptive histogram equalization on the Lab lightness
//! channel, done by OpenCV's `imgproc`.

use super::manifest::{DatasetManifest, MANIFEST_FILE};
use super::{check_fresh, copy_tree, file_name, list_images, require_dir, BatchReport, FreshOutput, SPLITS};
use crate::error::DatasetError;
use image::RgbImage;
use opencv::core::{self, Mat, Scalar, Size, Vector};
use opencv::imgproc;
use opencv::prelude::*;
use std::path::Path;

/// Equalizer settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Clahe {
    pub clip_limit: f64,
    /// Tiles per side of the grid
    pub tiles: usize,
}

impl Default for Clahe {
    fn default() -> Self {
        Self {
            clip_limit: 2.0,
            tiles: 8,
        }
    }
}

impl Clahe {
    pub fn new(clip_limit: f64, tiles: usize) -> Result<Self, DatasetError> {
        if !(clip_limit.is_finite() && clip_limit >= 0.0) {
            return Err(DatasetError::InvalidParameter(format!(
                "clip limit {clip_limit} must be a non-negative number"
            )));
        }
        if tiles == 0 || i32::try_from(tiles).is_err() {
            return Err(DatasetError::InvalidParameter(format!(
                "tile grid {tiles} must be at least 1"
            )));
        }
        Ok(Self { clip_limit, tiles })
    }

    /// Equalize the lightness of an RGB image, leaving its chroma alone.
    pub fn equalize(&self, img: &RgbImage) -> Result<RgbImage, DatasetError> {
        let (width, height) = img.dimensions();
        if width == 0 || height == 0 {
            return Ok(img.clone());
        }
        let _span = tracing::debug_span!("clahe_equalize", width, height, tiles = self.tiles).entered();

        let rgb = rgb_to_mat(img)?;
        let mut lab = Mat::default();
        imgproc::cvt_color(&rgb, &mut lab, imgproc::COLOR_RGB2Lab, 0)?;

        let mut planes = Vector::<Mat>::new();
        core::split(&lab, &mut planes)?;

        let tiles = self.tiles as i32;
        let mut equalizer = imgproc::create_clahe(self.clip_limit, Size::new(tiles, tiles))?;
        let mut lightness = Mat::default();
        equalizer.apply(&planes.get(0)?, &mut lightness)?;
        planes.set(0, lightness)?;
        core::merge(&planes, &mut lab)?;

        let mut out = Mat::default();
        imgproc::cvt_color(&lab, &mut out, imgproc::COLOR_Lab2RGB, 0)?;
        RgbImage::from_raw(width, height, out.data_bytes()?.to_vec()).ok_or_else(|| {
            DatasetError::InvalidParameter(format!("equalized image is not {width}x{height}"))
        })
    }
}

/// Copy an RGB buffer into a continuous 8-bit, 3-channel `Mat`.
fn rgb_to_mat(img: &RgbImage) -> Result<Mat, DatasetError> {
    let (width, height) = img.dimensions();
    let rows = i32::try_from(height)
        .map_err(|_| DatasetError::InvalidParameter(format!("image height {height} too large")))?;
    let cols = i32::try_from(width)
        .map_err(|_| DatasetError::InvalidParameter(format!("image width {width} too large")))?;

    let mut mat = Mat::new_rows_cols_with_default(rows, cols, core::CV_8UC3, Scalar::all(0.0))?;
    mat.data_bytes_mut()?.copy_from_slice(img.as_raw());
    Ok(mat)
}

/// Build a CLAHE copy of the YOLO dataset at `src` in `out`.
///
/// Labels are copied as they are and `data.yaml` is rewritten to point at
/// `out`. Every `*.jpg` under `images/<split>` is equalized.
pub fn clahe_dataset(src: &Path, out: &Path, clahe: &Clahe) -> Result<BatchReport, DatasetError> {
    require_dir(src)?;
    require_dir(&src.join("images"))?;
    require_dir(&src.join("labels"))?;
    let manifest_path = src.join(MANIFEST_FILE);
    if !manifest_path.is_file() {
        return Err(DatasetError::SourceMissing(manifest_path));
    }
    for split in SPLITS {
        require_dir(&src.join("images").join(split))?;
    }
    check_fresh(out)?;
    let manifest = DatasetManifest::load(&manifest_path)?;

    let output = FreshOutput::create(out)?;
    tracing::info!(
        "Applying CLAHE (clip {}, {}x{} tiles) to {} into {}",
        clahe.clip_limit,
        clahe.tiles,
        clahe.tiles,
        src.display(),
        out.display()
    );

    let labels = copy_tree(&src.join("labels"), &output.path().join("labels"))?;
    tracing::info!("Copied {} label files", labels);
    manifest
        .with_root(output.path())
        .save(&output.path().join(MANIFEST_FILE))?;

    let mut processed = 0;
    for split in SPLITS {
        let dst_dir = output.path().join("images").join(split);
        std::fs::create_dir_all(&dst_dir)?;

        for image_path in list_images(&src.join("images").join(split), true)? {
            let img = image::open(&image_path)?.to_rgb8();
            clahe.equalize(&img)?.save(dst_dir.join(file_name(&image_path)))?;
            processed += 1;
        }
        tracing::debug!("Split {} done", split);
    }

    if processed == 0 {
        return Err(DatasetError::SourceEmpty(src.to_path_buf()));
    }
    let output = output.commit();
    tracing::info!("Done: {} images equalized", processed);
    Ok(BatchReport {
        output,
        processed,
        skipped: 0,
    })
}
