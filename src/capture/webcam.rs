use super::{CameraInfo, CameraSelection, CaptureBackend, CaptureSource};
use anyhow::{Context, Result};
use image::RgbImage;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
    Resolution,
};
use nokhwa::Camera;

pub struct WebcamCapture {
    camera: Camera,
    index: u32,
    width: u32,
    height: u32,
    frame_rate: f64,
}

impl WebcamCapture {
    pub fn new(device_index: u32, width: u32, height: u32) -> Result<Self> {
        tracing::info!(
            "Initializing webcam {} at {}x{}",
            device_index,
            width,
            height
        );

        let index = CameraIndex::Index(device_index);
        // Closest match only; the driver picks whatever it supports
        let wanted = CameraFormat::new(Resolution::new(width, height), FrameFormat::MJPEG, 30);
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(wanted));

        let mut camera = Camera::new(index, requested).context("Failed to open camera")?;

        camera
            .open_stream()
            .context("Failed to open camera stream")?;

        let resolution = camera.resolution();
        let frame_rate = camera.frame_rate() as f64;

        tracing::info!(
            "Webcam {} streaming at {}x{}, reported {} fps",
            device_index,
            resolution.width(),
            resolution.height(),
            frame_rate
        );

        Ok(Self {
            camera,
            index: device_index,
            width: resolution.width(),
            height: resolution.height(),
            frame_rate,
        })
    }
}

impl CaptureSource for WebcamCapture {
    fn capture_frame(&mut self) -> Result<RgbImage> {
        let frame = self.camera.frame().context("Failed to capture frame")?;

        let decoded = frame
            .decode_image::<RgbFormat>()
            .context("Failed to decode frame")?;

        Ok(decoded)
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn frame_rate(&self) -> f64 {
        self.frame_rate
    }
}

impl Drop for WebcamCapture {
    fn drop(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            tracing::warn!("Failed to stop webcam {} stream: {}", self.index, e);
        }
        tracing::debug!("Webcam {} released", self.index);
    }
}

/// Real cameras through nokhwa.
#[derive(Debug, Default, Clone, Copy)]
pub struct NokhwaBackend;

impl CaptureBackend for NokhwaBackend {
    fn open(&self, selection: &CameraSelection) -> Result<Box<dyn CaptureSource>> {
        let capture = WebcamCapture::new(selection.index, selection.width, selection.height)?;
        Ok(Box::new(capture))
    }

    fn list_cameras(&self) -> Result<Vec<CameraInfo>> {
        let devices = nokhwa::query(ApiBackend::Auto).context("Failed to enumerate cameras")?;

        let mut cameras: Vec<CameraInfo> = devices
            .iter()
            .filter_map(|info| {
                let index = info.index().as_index().ok()?;
                Some(CameraInfo {
                    index,
                    name: info.human_name(),
                })
            })
            .collect();
        cameras.sort_by_key(|c| c.index);

        Ok(cameras)
    }
}
