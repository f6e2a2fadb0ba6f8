use super::mailbox::FrameMailbox;
use super::worker::{AcquisitionEvent, AcquisitionLoop, RecordingSummary};
use crate::capture::{CameraInfo, CameraSelection, CaptureBackend};
use crate::error::CaptureError;
use crate::frame::Frame;
use crate::output::snapshot;
use crate::output::RecorderFactory;
use anyhow::Result;
use chrono::Local;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Operator-side owner of at most one acquisition loop.
pub struct CameraController {
    backend: Arc<dyn CaptureBackend>,
    recorders: Arc<dyn RecorderFactory>,
    output_dir: PathBuf,
    events_tx: Sender<AcquisitionEvent>,
    events_rx: Receiver<AcquisitionEvent>,
    active: Option<AcquisitionLoop>,
}

impl CameraController {
    pub fn new(
        backend: Arc<dyn CaptureBackend>,
        recorders: Arc<dyn RecorderFactory>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            backend,
            recorders,
            output_dir: output_dir.into(),
            events_tx,
            events_rx,
            active: None,
        }
    }

    pub fn list_cameras(&self) -> Result<Vec<CameraInfo>> {
        self.backend.list_cameras()
    }

    /// Switch to `selection`, stopping the current camera first.
    ///
    /// A recording armed on the old camera is closed by its shutdown and
    /// does not carry over. Returns the detected frame rate.
    pub fn select_camera(&mut self, selection: CameraSelection) -> Result<f64, CaptureError> {
        self.stop_camera();

        let started = AcquisitionLoop::start(
            selection,
            Arc::clone(&self.backend),
            Arc::clone(&self.recorders),
            self.events_tx.clone(),
        )?;
        let rate = started.frame_rate();
        self.active = Some(started);
        Ok(rate)
    }

    /// Stop the current camera. Its mailbox goes with it, so a thread that
    /// has to be left behind cannot hand out frames afterwards.
    pub fn stop_camera(&mut self) {
        if let Some(mut current) = self.active.take() {
            current.stop();
        }
    }

    /// Start recording into a new timestamped file in the output location.
    pub fn start_recording(&mut self) -> Result<PathBuf, CaptureError> {
        let active = self.active.as_ref().ok_or(CaptureError::NoActiveCamera)?;

        snapshot::ensure_output_dir(&self.output_dir)?;
        let path = snapshot::unique_path(&self.output_dir, Local::now(), "mp4");

        if let Err(e) = active.start_recording(&path) {
            remove_if_empty(&path);
            return Err(e);
        }
        Ok(path)
    }

    /// Close the open recording. A no-op when nothing is recording.
    pub fn stop_recording(&mut self) -> Result<Option<RecordingSummary>, CaptureError> {
        match self.active.as_ref() {
            Some(active) => active.stop_recording(),
            None => Ok(None),
        }
    }

    /// Save the latest frame, cropped like the preview. Without any frame
    /// yet this does nothing and returns `None`.
    pub fn capture_photo(&self) -> Result<Option<PathBuf>, CaptureError> {
        let Some(frame) = self.latest_frame() else {
            return Ok(None);
        };
        let path = snapshot::save_photo(&frame.cropped(), &self.output_dir)?;
        Ok(Some(path))
    }

    /// Point snapshots and recordings at `dir`, creating it if needed.
    pub fn set_output_dir(&mut self, dir: impl Into<PathBuf>) -> Result<(), CaptureError> {
        let dir = dir.into();
        snapshot::ensure_output_dir(&dir)?;
        tracing::info!("Output location set to {}", dir.display());
        self.output_dir = dir;
        Ok(())
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn selection(&self) -> Option<CameraSelection> {
        self.active.as_ref().map(|a| a.selection())
    }

    pub fn frame_rate(&self) -> Option<f64> {
        self.active.as_ref().map(|a| a.frame_rate())
    }

    pub fn resolution(&self) -> Option<(u32, u32)> {
        self.active.as_ref().map(|a| a.resolution())
    }

    pub fn is_recording(&self) -> bool {
        self.active.as_ref().is_some_and(|a| a.is_recording())
    }

    pub fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.active.as_ref().and_then(|a| a.mailbox().latest())
    }

    /// Mailbox of the running camera, if any.
    pub fn mailbox(&self) -> Option<Arc<FrameMailbox>> {
        self.active.as_ref().map(|a| Arc::clone(a.mailbox()))
    }

    pub fn events(&self) -> Receiver<AcquisitionEvent> {
        self.events_rx.clone()
    }

    /// Close any recording and stop the camera.
    pub fn shutdown(&mut self) {
        if let Err(e) = self.stop_recording() {
            tracing::error!("{}", e);
        }
        self.stop_camera();
    }
}

impl Drop for CameraController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn remove_if_empty(path: &Path) {
    if std::fs::metadata(path).is_ok_and(|m| m.len() == 0) {
        let _ = std::fs::remove_file(path);
    }
}
