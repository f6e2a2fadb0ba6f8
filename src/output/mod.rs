mod ffmpeg;
mod loopback;
pub mod snapshot;

pub use ffmpeg::{FfmpegRecorder, FfmpegRecorderFactory};
pub use loopback::V4L2Output;

use anyhow::Result;
use image::RgbImage;
use std::path::Path;

/// Trait for output destinations
pub trait OutputSink {
    /// Write a frame to the output
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()>;

    /// Get the expected output resolution
    fn resolution(&self) -> (u32, u32);

    /// Flush and release the output. Later writes are errors.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Opens video files for recording sessions. Called on the acquisition
/// thread, which then owns the returned sink.
pub trait RecorderFactory: Send + Sync {
    fn open(&self, path: &Path, width: u32, height: u32, fps: f64) -> Result<Box<dyn OutputSink>>;
}
