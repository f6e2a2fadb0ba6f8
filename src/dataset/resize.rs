//! Square resizing of labeled images, optionally with the boxes drawn in.

use super::labels::read_labels;
use super::{file_name, labeled_images, BatchReport, FreshOutput, LabeledImage};
use crate::error::DatasetError;
use image::{imageops, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::path::Path;

pub const DEFAULT_SIZE: u32 = 360;

/// Box color for a class name taken from the file name.
pub fn class_color(class: &str) -> Rgb<u8> {
    match class {
        "BAS" => Rgb([255, 0, 0]),
        "EOS" => Rgb([0, 255, 0]),
        "NEU" => Rgb([0, 0, 255]),
        "LIM" => Rgb([255, 255, 0]),
        "MON" => Rgb([255, 0, 255]),
        _ => Rgb([255, 255, 255]),
    }
}

/// Resize every labeled `*.jpg` in `src` to `size`×`size` into `out`,
/// copying labels unchanged.
pub fn resize_dataset(src: &Path, out: &Path, size: u32) -> Result<BatchReport, DatasetError> {
    run(src, out, size, false)
}

/// Like [`resize_dataset`], with every label box drawn on the image.
pub fn annotate_dataset(src: &Path, out: &Path, size: u32) -> Result<BatchReport, DatasetError> {
    run(src, out, size, true)
}

fn run(src: &Path, out: &Path, size: u32, annotate: bool) -> Result<BatchReport, DatasetError> {
    if size == 0 {
        return Err(DatasetError::InvalidParameter("size must be positive".to_string()));
    }
    let (pairs, unpaired) = labeled_images(src)?;
    let output = FreshOutput::create(out)?;

    tracing::info!(
        "{} {} images from {} to {}x{}",
        if annotate { "Annotating" } else { "Resizing" },
        pairs.len(),
        src.display(),
        size,
        size
    );

    let mut processed = 0;
    let mut skipped = unpaired;
    for pair in &pairs {
        let img = match image::open(&pair.image) {
            Ok(img) => img.to_rgb8(),
            Err(e) => {
                tracing::warn!("Skipping {}: {}", pair.image.display(), e);
                skipped += 1;
                continue;
            }
        };

        let mut resized = imageops::resize(&img, size, size, imageops::FilterType::Triangle);
        if annotate && !draw_labels(&mut resized, pair) {
            skipped += 1;
            continue;
        }

        resized.save(output.path().join(file_name(&pair.image)))?;
        std::fs::copy(&pair.label, output.path().join(file_name(&pair.label)))?;
        processed += 1;
    }

    let output = output.commit();
    tracing::info!("Done: {} processed, {} skipped", processed, skipped);
    Ok(BatchReport {
        output,
        processed,
        skipped,
    })
}

/// Draw every box of `pair` onto `img`. False if the label file is unusable.
fn draw_labels(img: &mut RgbImage, pair: &LabeledImage) -> bool {
    let labels = match read_labels(&pair.label) {
        Ok(labels) => labels,
        Err(e) => {
            tracing::warn!("Skipping {}: {}", pair.image.display(), e);
            return false;
        }
    };

    let color = class_color(pair.class_name());
    let (width, height) = img.dimensions();
    for label in labels {
        let (x1, y1, x2, y2) = label.to_pixels(width, height);
        draw_box(img, (x1, y1, x2, y2), color, 2);
    }
    true
}

/// Hollow rectangle `thickness` pixels wide, growing inward.
pub fn draw_box(img: &mut RgbImage, corners: (i32, i32, i32, i32), color: Rgb<u8>, thickness: u32) {
    let (x1, y1, x2, y2) = corners;
    for t in 0..thickness as i32 {
        let w = x2 - x1 - 2 * t;
        let h = y2 - y1 - 2 * t;
        if w <= 0 || h <= 0 {
            break;
        }
        draw_hollow_rect_mut(img, Rect::at(x1 + t, y1 + t).of_size(w as u32, h as u32), color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_pair(dir: &Path, stem: &str, label: &str) {
        RgbImage::from_pixel(100, 80, Rgb([10, 10, 10]))
            .save(dir.join(format!("{stem}.jpg")))
            .unwrap();
        std::fs::write(dir.join(format!("{stem}.txt")), label).unwrap();
    }

    #[test]
    fn test_resize_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("merge");
        std::fs::create_dir(&src).unwrap();
        write_pair(&src, "NEU_1", "2 0.5 0.5 0.2 0.2\n");
        write_pair(&src, "EOS_2", "1 0.5 0.5 0.2 0.2\n");
        std::fs::write(src.join("BAS_3.jpg"), b"not an image").unwrap();
        std::fs::write(src.join("BAS_3.txt"), b"0 0.5 0.5 0.1 0.1\n").unwrap();
        RgbImage::new(4, 4).save(src.join("LIM_4.jpg")).unwrap();

        let out = dir.path().join("merge_resize_360x360");
        let report = resize_dataset(&src, &out, 360).unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(report.skipped, 2);

        let img = image::open(out.join("NEU_1.jpg")).unwrap();
        assert_eq!((img.width(), img.height()), (360, 360));
        assert_eq!(
            std::fs::read_to_string(out.join("NEU_1.txt")).unwrap(),
            "2 0.5 0.5 0.2 0.2\n"
        );
        assert!(!out.join("BAS_3.jpg").exists());
    }

    #[test]
    fn test_annotate_draws_class_color() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("merge");
        std::fs::create_dir(&src).unwrap();
        write_pair(&src, "EOS_7", "1 0.5 0.5 0.5 0.5\n");

        let out = dir.path().join("vis");
        let report = annotate_dataset(&src, &out, 200).unwrap();
        assert_eq!(report.processed, 1);

        // JPEG is lossy; compare channels rather than exact values
        let img = image::open(out.join("EOS_7.jpg")).unwrap().to_rgb8();
        let edge = img.get_pixel(100, 51);
        assert!(edge[1] > 100 && edge[1] > edge[0] + 50, "edge pixel {edge:?}");
        let inside = img.get_pixel(100, 100);
        assert!(inside[1] < 60, "inside pixel {inside:?}");
    }

    #[test]
    fn test_empty_or_absent_source_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");

        assert!(matches!(
            resize_dataset(&dir.path().join("absent"), &out, 360),
            Err(DatasetError::SourceMissing(_))
        ));
        let empty = dir.path().join("empty");
        std::fs::create_dir(&empty).unwrap();
        assert!(matches!(
            resize_dataset(&empty, &out, 360),
            Err(DatasetError::SourceEmpty(_))
        ));
        assert!(!out.exists());
    }

    #[test]
    fn test_refuses_existing_output() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("merge");
        std::fs::create_dir(&src).unwrap();
        write_pair(&src, "NEU_1", "2 0.5 0.5 0.2 0.2\n");
        let out = dir.path().join("out");
        std::fs::create_dir(&out).unwrap();
        std::fs::write(out.join("old.jpg"), b"x").unwrap();

        assert!(matches!(
            annotate_dataset(&src, &out, 360),
            Err(DatasetError::DestinationNotEmpty(_))
        ));
        assert_eq!(std::fs::read_dir(&out).unwrap().count(), 1);
    }

    #[test]
    fn test_draw_box_thickness() {
        let mut img = RgbImage::new(20, 20);
        draw_box(&mut img, (2, 2, 12, 12), Rgb([255, 0, 0]), 2);
        assert_eq!(img.get_pixel(2, 5).0, [255, 0, 0]);
        assert_eq!(img.get_pixel(3, 5).0, [255, 0, 0]);
        assert_eq!(img.get_pixel(4, 5).0, [0, 0, 0]);
        // Degenerate boxes draw nothing
        draw_box(&mut img, (15, 15, 15, 18), Rgb([0, 255, 0]), 2);
        assert_eq!(img.get_pixel(15, 16).0, [0, 0, 0]);
    }
}
