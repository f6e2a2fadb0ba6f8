use super::OutputSink;
use anyhow::{Context, Result};
use image::RgbImage;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use v4l::video::Output;
use v4l::{Device, Format, FourCC};

/// Live preview into a v4l2loopback device, viewable with any camera app.
pub struct V4L2Output {
    file: File,
    width: u32,
    height: u32,
}

impl V4L2Output {
    pub fn new<P: AsRef<Path>>(device_path: P, width: u32, height: u32) -> Result<Self> {
        let path = device_path.as_ref();
        tracing::info!(
            "Opening v4l2loopback preview at {} ({}x{})",
            path.display(),
            width,
            height
        );

        // Announce the format so readers negotiate YUYV at our size
        let device = Device::with_path(path)
            .with_context(|| format!("Failed to open v4l2 device at {}", path.display()))?;
        let format = Format::new(width, height, FourCC::new(b"YUYV"));
        let actual = Output::set_format(&device, &format)
            .with_context(|| format!("Failed to set preview format on {}", path.display()))?;
        if (actual.width, actual.height) != (width, height) {
            tracing::warn!(
                "Preview device accepted {}x{} instead of {}x{}",
                actual.width,
                actual.height,
                width,
                height
            );
        }

        // v4l2loopback accepts raw frame data written to the device file
        let file = File::options()
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open v4l2loopback device at {}", path.display()))?;

        tracing::info!("Preview device ready");

        Ok(Self {
            file,
            width,
            height,
        })
    }
}

/// Pack RGB pixels as YUYV 4:2:2, averaging chroma over each pixel pair.
pub(crate) fn rgb_to_yuyv(rgb_image: &RgbImage) -> Vec<u8> {
    let (width, height) = rgb_image.dimensions();
    let mut yuyv = Vec::with_capacity((width * height * 2) as usize);

    for y in 0..height {
        for x in (0..width).step_by(2) {
            let left = rgb_image.get_pixel(x, y);
            let right = if x + 1 < width {
                rgb_image.get_pixel(x + 1, y)
            } else {
                left
            };

            let (y1, u1, v1) = rgb_to_yuv(left[0], left[1], left[2]);
            let (y2, u2, v2) = rgb_to_yuv(right[0], right[1], right[2]);

            let u = ((u1 as u16 + u2 as u16) / 2) as u8;
            let v = ((v1 as u16 + v2 as u16) / 2) as u8;

            // Y0 U Y1 V
            yuyv.extend_from_slice(&[y1, u, y2, v]);
        }
    }

    yuyv
}

fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let r = r as f32;
    let g = g as f32;
    let b = b as f32;

    let y = (0.299 * r + 0.587 * g + 0.114 * b).clamp(0.0, 255.0) as u8;
    let u = ((-0.147 * r - 0.289 * g + 0.436 * b) + 128.0).clamp(0.0, 255.0) as u8;
    let v = ((0.615 * r - 0.515 * g - 0.100 * b) + 128.0).clamp(0.0, 255.0) as u8;

    (y, u, v)
}

impl OutputSink for V4L2Output {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        let resized;
        let frame = if frame.dimensions() != (self.width, self.height) {
            resized = image::imageops::resize(
                frame,
                self.width,
                self.height,
                image::imageops::FilterType::Triangle,
            );
            &resized
        } else {
            frame
        };

        self.file
            .write_all(&rgb_to_yuyv(frame))
            .context("Failed to write frame to v4l2loopback device")?;

        Ok(())
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_yuyv_size_and_gray_chroma() {
        let img = RgbImage::from_pixel(4, 2, Rgb([128, 128, 128]));
        let packed = rgb_to_yuyv(&img);
        assert_eq!(packed.len(), 4 * 2 * 2);
        for quad in packed.chunks(4) {
            assert_eq!(quad[0], quad[2]);
            // Neutral gray carries no chroma
            assert!((quad[1] as i16 - 128).abs() <= 1);
            assert!((quad[3] as i16 - 128).abs() <= 1);
        }
    }

    #[test]
    fn test_odd_width_repeats_last_pixel() {
        let img = RgbImage::from_pixel(3, 1, Rgb([255, 255, 255]));
        let packed = rgb_to_yuyv(&img);
        assert_eq!(packed.len(), 8);
        assert_eq!(packed[4], packed[6]);
    }
}
