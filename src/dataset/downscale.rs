//! Shrink the cells of a YOLO dataset while keeping the canvas size.

use super::labels::{read_labels, write_labels, BoxLabel};
use super::manifest::{DatasetManifest, MANIFEST_FILE};
use super::{file_name, list_images, require_dir, BatchReport, FreshOutput, SPLITS};
use crate::error::DatasetError;
use image::{imageops, Rgb, RgbImage};
use std::path::{Path, PathBuf};

pub const DEFAULT_FACTOR: f64 = 0.25;
pub const DEFAULT_CANVAS: u32 = 360;

/// `<src>ToScale0_25` beside `src` for a factor of 0.25.
pub fn default_output(src: &Path, factor: f64) -> PathBuf {
    let name = src
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = format!("{}", factor).replace('.', "_");
    src.with_file_name(format!("{name}ToScale{suffix}"))
}

/// Place `img`, resized to `canvas`×`canvas` and then shrunk by `factor`,
/// centered on a white `canvas`×`canvas` image.
pub fn shrink_onto_canvas(img: &RgbImage, factor: f64, canvas: u32) -> RgbImage {
    let base = if img.dimensions() == (canvas, canvas) {
        img.clone()
    } else {
        imageops::resize(img, canvas, canvas, imageops::FilterType::Lanczos3)
    };

    let small_side = ((canvas as f64 * factor) as u32).max(1);
    let small = imageops::resize(&base, small_side, small_side, imageops::FilterType::Lanczos3);

    let mut out = RgbImage::from_pixel(canvas, canvas, Rgb([255, 255, 255]));
    let offset = ((canvas - small_side) / 2) as i64;
    imageops::replace(&mut out, &small, offset, offset);
    out
}

/// Rewrite every `images/<split>` image of `src` into `out` with its
/// content shrunk by `factor` on a white `canvas`, and rescale the labels.
pub fn downscale_dataset(
    src: &Path,
    out: &Path,
    factor: f64,
    canvas: u32,
) -> Result<BatchReport, DatasetError> {
    if !(factor > 0.0 && factor <= 1.0) {
        return Err(DatasetError::InvalidParameter(format!(
            "factor {factor} must be in (0, 1]"
        )));
    }
    if canvas == 0 {
        return Err(DatasetError::InvalidParameter("canvas must be positive".to_string()));
    }
    require_dir(src)?;
    require_dir(&src.join("images"))?;

    let output = FreshOutput::create(out)?;
    tracing::info!(
        "Downscaling {} by {} on a {}x{} canvas into {}",
        src.display(),
        factor,
        canvas,
        canvas,
        out.display()
    );

    let mut processed = 0;
    let mut skipped = 0;
    for split in SPLITS {
        let src_images = src.join("images").join(split);
        let src_labels = src.join("labels").join(split);
        let dst_images = output.path().join("images").join(split);
        let dst_labels = output.path().join("labels").join(split);
        std::fs::create_dir_all(&dst_images)?;
        std::fs::create_dir_all(&dst_labels)?;

        if !src_images.is_dir() {
            tracing::warn!("No {} split in {}", split, src.display());
            continue;
        }

        for image_path in list_images(&src_images, false)? {
            let label_path = src_labels.join(file_name(&image_path)).with_extension("txt");
            let labels = if label_path.is_file() {
                match read_labels(&label_path) {
                    Ok(labels) => Some(labels),
                    Err(e) => {
                        tracing::warn!("Skipping {}: {}", image_path.display(), e);
                        skipped += 1;
                        continue;
                    }
                }
            } else {
                None
            };

            let img = match image::open(&image_path) {
                Ok(img) => img.to_rgb8(),
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", image_path.display(), e);
                    skipped += 1;
                    continue;
                }
            };

            shrink_onto_canvas(&img, factor, canvas).save(dst_images.join(file_name(&image_path)))?;
            if let Some(labels) = labels {
                let scaled: Vec<BoxLabel> = labels
                    .iter()
                    .map(|l| l.scaled_about_center(factor))
                    .collect();
                write_labels(&dst_labels.join(file_name(&label_path)), &scaled)?;
            }
            processed += 1;
        }
        tracing::debug!("Split {} done", split);
    }

    if processed == 0 {
        return Err(DatasetError::SourceEmpty(src.to_path_buf()));
    }
    DatasetManifest::new(output.path()).save(&output.path().join(MANIFEST_FILE))?;

    let output = output.commit();
    tracing::info!("Done: {} processed, {} skipped", processed, skipped);
    Ok(BatchReport {
        output,
        processed,
        skipped,
    })
}
