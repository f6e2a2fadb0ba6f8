use image::{imageops, RgbImage};
use std::time::Instant;

/// Side of the square that preview, recordings and snapshots share.
pub const TARGET_SIDE: u32 = 720;

/// A decoded camera frame as published by the acquisition loop.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Position in the loop's output, starting at 1
    pub seq: u64,
    pub captured_at: Instant,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(seq: u64, image: RgbImage) -> Self {
        Self {
            seq,
            captured_at: Instant::now(),
            image,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// The frame as it is shown, recorded and saved.
    pub fn cropped(&self) -> RgbImage {
        center_crop(&self.image, TARGET_SIDE)
    }
}

/// Cut the largest centered square no bigger than `target` and bring it to
/// exactly `target`×`target`.
///
/// Sources whose short side is at least `target` are cropped without any
/// resampling, so the output is the exact centered region.
pub fn center_crop(image: &RgbImage, target: u32) -> RgbImage {
    let _span = tracing::debug_span!("center_crop").entered();

    let (width, height) = image.dimensions();
    let side = width.min(height).min(target);
    if side == 0 {
        return RgbImage::new(target, target);
    }

    let x = (width - side) / 2;
    let y = (height - side) / 2;
    let crop = imageops::crop_imm(image, x, y, side, side).to_image();

    if side == target {
        crop
    } else {
        imageops::resize(&crop, target, target, imageops::FilterType::Triangle)
    }
}
