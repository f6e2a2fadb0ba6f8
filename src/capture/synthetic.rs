use super::{CameraInfo, CameraSelection, CaptureBackend, CaptureSource};
use anyhow::{bail, Result};
use image::{Rgb, RgbImage};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Test-pattern cameras. Stands in for hardware on machines without a
/// webcam, and in tests.
#[derive(Debug, Clone)]
pub struct SyntheticBackend {
    indices: Vec<u32>,
    reported_fps: f64,
    interval: Duration,
    budget: Option<Arc<AtomicU64>>,
    open_devices: Arc<AtomicUsize>,
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self::new(30.0)
    }
}

impl SyntheticBackend {
    /// One camera at index 0 reporting `reported_fps`.
    pub fn new(reported_fps: f64) -> Self {
        let interval = if reported_fps.is_finite() && reported_fps > 0.0 {
            Duration::from_secs_f64(1.0 / reported_fps.min(1000.0))
        } else {
            Duration::from_millis(50)
        };
        Self {
            indices: vec![0],
            reported_fps,
            interval,
            budget: None,
            open_devices: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_indices(mut self, indices: &[u32]) -> Self {
        self.indices = indices.to_vec();
        self
    }

    /// Delay of each read, like a device blocking until its next frame.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Share a counter of frames still allowed. Each successful read takes
    /// one; reads fail while it is zero.
    pub fn with_frame_budget(mut self, budget: Arc<AtomicU64>) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Number of sources currently open.
    pub fn open_devices(&self) -> usize {
        self.open_devices.load(Ordering::SeqCst)
    }
}

impl CaptureBackend for SyntheticBackend {
    fn open(&self, selection: &CameraSelection) -> Result<Box<dyn CaptureSource>> {
        if !self.indices.contains(&selection.index) {
            bail!("no synthetic camera at index {}", selection.index);
        }
        self.open_devices.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            "Synthetic camera {} opened at {}x{}",
            selection.index,
            selection.width,
            selection.height
        );

        Ok(Box::new(SyntheticCapture {
            width: selection.width.max(1),
            height: selection.height.max(1),
            reported_fps: self.reported_fps,
            interval: self.interval,
            budget: self.budget.clone(),
            open_devices: Arc::clone(&self.open_devices),
            tick: 0,
        }))
    }

    fn list_cameras(&self) -> Result<Vec<CameraInfo>> {
        Ok(self
            .indices
            .iter()
            .map(|&index| CameraInfo {
                index,
                name: format!("Synthetic camera {index}"),
            })
            .collect())
    }
}

pub struct SyntheticCapture {
    width: u32,
    height: u32,
    reported_fps: f64,
    interval: Duration,
    budget: Option<Arc<AtomicU64>>,
    open_devices: Arc<AtomicUsize>,
    tick: u64,
}

impl SyntheticCapture {
    fn take_budget(&self) -> bool {
        match &self.budget {
            None => true,
            Some(budget) => budget
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok(),
        }
    }
}

impl CaptureSource for SyntheticCapture {
    fn capture_frame(&mut self) -> Result<RgbImage> {
        if !self.interval.is_zero() {
            std::thread::sleep(self.interval);
        }
        if !self.take_budget() {
            bail!("no frame ready");
        }

        self.tick += 1;
        let shift = (self.tick * 4) as u32;
        let bar = (self.width / 8).max(1);
        // Scrolling color bars
        let frame = RgbImage::from_fn(self.width, self.height, |x, y| {
            let band = ((x + shift) / bar) % 8;
            let r = if band & 1 != 0 { 230 } else { 20 };
            let g = if band & 2 != 0 { 230 } else { 20 };
            let b = if band & 4 != 0 { 230 } else { 20 };
            let shade = (y * 32 / self.height.max(1)) as u8;
            Rgb([r - shade / 2, g - shade / 2, b - shade / 2])
        });

        Ok(frame)
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn frame_rate(&self) -> f64 {
        self.reported_fps
    }
}

impl Drop for SyntheticCapture {
    fn drop(&mut self) {
        self.open_devices.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_unknown_index_fails() {
        let backend = SyntheticBackend::default().with_indices(&[0, 2]);
        assert!(backend.open(&CameraSelection::new(1, 64, 48)).is_err());
        assert!(backend.open(&CameraSelection::new(2, 64, 48)).is_ok());
        assert_eq!(backend.open_devices(), 0);
    }

    #[test]
    fn test_budget_limits_reads() {
        let budget = Arc::new(AtomicU64::new(2));
        let backend = SyntheticBackend::default()
            .with_interval(Duration::ZERO)
            .with_frame_budget(Arc::clone(&budget));

        let mut source = backend.open(&CameraSelection::new(0, 32, 16)).unwrap();
        assert_eq!(backend.open_devices(), 1);
        assert_eq!(source.capture_frame().unwrap().dimensions(), (32, 16));
        assert!(source.capture_frame().is_ok());
        assert!(source.capture_frame().is_err());

        budget.store(1, Ordering::SeqCst);
        assert!(source.capture_frame().is_ok());

        drop(source);
        assert_eq!(backend.open_devices(), 0);
    }

    #[test]
    fn test_list_cameras() {
        let backend = SyntheticBackend::default().with_indices(&[0, 1]);
        let cams = backend.list_cameras().unwrap();
        assert_eq!(cams.len(), 2);
        assert_eq!(cams[1].index, 1);
    }
}
