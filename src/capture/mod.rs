mod synthetic;
mod webcam;

pub use synthetic::{SyntheticBackend, SyntheticCapture};
pub use webcam::{NokhwaBackend, WebcamCapture};

use anyhow::Result;
use image::RgbImage;

/// Rate used when a device reports nothing plausible.
pub const FALLBACK_FRAME_RATE: f64 = 20.0;

/// Highest reported rate that is taken at face value.
pub const MAX_PLAUSIBLE_FRAME_RATE: f64 = 120.0;

/// Which device to open and the size to ask it for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraSelection {
    pub index: u32,
    /// Requested width; devices are free to ignore it
    pub width: u32,
    /// Requested height; devices are free to ignore it
    pub height: u32,
}

impl CameraSelection {
    pub fn new(index: u32, width: u32, height: u32) -> Self {
        Self {
            index,
            width,
            height,
        }
    }
}

impl Default for CameraSelection {
    fn default() -> Self {
        Self::new(0, 1280, 720)
    }
}

/// A camera that can be selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraInfo {
    pub index: u32,
    pub name: String,
}

/// Trait for camera capture sources
///
/// A source is opened by a [`CaptureBackend`] and released when dropped.
pub trait CaptureSource {
    /// Capture a single frame
    fn capture_frame(&mut self) -> Result<RgbImage>;

    /// Get the resolution of captured frames
    fn resolution(&self) -> (u32, u32);

    /// Frame rate as reported by the device, which may be zero or nonsense
    fn frame_rate(&self) -> f64;
}

/// Opens capture sources. Shared with the acquisition thread, which opens
/// and owns the device itself.
pub trait CaptureBackend: Send + Sync {
    fn open(&self, selection: &CameraSelection) -> Result<Box<dyn CaptureSource>>;

    fn list_cameras(&self) -> Result<Vec<CameraInfo>>;
}

/// Sanitize a device-reported rate.
pub fn effective_frame_rate(reported: f64) -> f64 {
    if reported.is_finite() && reported > 0.0 && reported <= MAX_PLAUSIBLE_FRAME_RATE {
        reported
    } else {
        FALLBACK_FRAME_RATE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_rate_fallback() {
        assert_eq!(effective_frame_rate(0.0), FALLBACK_FRAME_RATE);
        assert_eq!(effective_frame_rate(-5.0), FALLBACK_FRAME_RATE);
        assert_eq!(effective_frame_rate(121.0), FALLBACK_FRAME_RATE);
        assert_eq!(effective_frame_rate(f64::NAN), FALLBACK_FRAME_RATE);
        assert_eq!(effective_frame_rate(f64::INFINITY), FALLBACK_FRAME_RATE);
    }

    #[test]
    fn test_frame_rate_kept_when_plausible() {
        assert_eq!(effective_frame_rate(30.0), 30.0);
        assert_eq!(effective_frame_rate(120.0), 120.0);
        assert_eq!(effective_frame_rate(7.5), 7.5);
    }

    #[test]
    fn test_default_selection() {
        let sel = CameraSelection::default();
        assert_eq!((sel.index, sel.width, sel.height), (0, 1280, 720));
    }
}
