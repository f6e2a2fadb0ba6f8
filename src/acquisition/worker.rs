//! The acquisition thread.
//!
//! The device and the open recording both live on this thread for their
//! whole lifetime. The operator side talks to it through a control channel
//! and two atomic flags, and reads frames from the loop's own mailbox.

use super::mailbox::FrameMailbox;
use crate::capture::{effective_frame_rate, CameraSelection, CaptureBackend, CaptureSource};
use crate::error::CaptureError;
use crate::frame::{Frame, TARGET_SIDE};
use crate::output::{OutputSink, RecorderFactory};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Pause between device reads.
pub const PACING_DELAY: Duration = Duration::from_millis(5);

/// Longest wait for the thread to exit on stop.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Longest wait for the thread to answer a recording command.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(5);

/// Things the acquisition thread reports on its own.
#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionEvent {
    /// A write failed; the session has been closed
    RecordingFailed { path: PathBuf, reason: String },
    /// A session was closed by loop shutdown rather than by the operator
    RecordingClosed(RecordingSummary),
    Stopped {
        camera: u32,
        frames: u64,
        read_failures: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingSummary {
    pub path: PathBuf,
    pub frames: u64,
}

enum Control {
    StartRecording {
        path: PathBuf,
        reply: Sender<Result<(), CaptureError>>,
    },
    StopRecording {
        reply: Sender<Result<Option<RecordingSummary>, CaptureError>>,
    },
}

/// Handle to a running acquisition thread.
pub struct AcquisitionLoop {
    selection: CameraSelection,
    frame_rate: f64,
    resolution: (u32, u32),
    mailbox: Arc<FrameMailbox>,
    running: Arc<AtomicBool>,
    recording: Arc<AtomicBool>,
    control: Sender<Control>,
    exited: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl AcquisitionLoop {
    /// Open the device on a new thread and start publishing into a mailbox
    /// that belongs to this loop alone.
    ///
    /// Returns once the device is open and its rate is known, or with the
    /// error that kept it from opening.
    pub fn start(
        selection: CameraSelection,
        backend: Arc<dyn CaptureBackend>,
        recorders: Arc<dyn RecorderFactory>,
        events: Sender<AcquisitionEvent>,
    ) -> Result<Self, CaptureError> {
        let running = Arc::new(AtomicBool::new(true));
        let recording = Arc::new(AtomicBool::new(false));
        let mailbox = Arc::new(FrameMailbox::new());
        let (control_tx, control_rx) = unbounded();
        let (init_tx, init_rx) = bounded::<Result<(f64, (u32, u32)), CaptureError>>(1);
        let (exit_tx, exit_rx) = bounded::<()>(1);

        let thread_running = Arc::clone(&running);
        let thread_recording = Arc::clone(&recording);
        let thread_mailbox = Arc::clone(&mailbox);

        let handle = std::thread::Builder::new()
            .name(format!("acquisition-{}", selection.index))
            .spawn(move || {
                let _exit = ExitSignal(exit_tx);

                let source = match backend.open(&selection) {
                    Ok(source) => source,
                    Err(e) => {
                        let _ = init_tx.send(Err(CaptureError::DeviceOpen {
                            index: selection.index,
                            reason: format!("{:#}", e),
                        }));
                        return;
                    }
                };

                let reported = source.frame_rate();
                let frame_rate = effective_frame_rate(reported);
                if frame_rate != reported {
                    tracing::warn!(
                        "Camera {} reported {} fps, using {}",
                        selection.index,
                        reported,
                        frame_rate
                    );
                }
                let resolution = source.resolution();
                if init_tx.send(Ok((frame_rate, resolution))).is_err() {
                    return;
                }

                let mut worker = Worker {
                    camera: selection.index,
                    source,
                    recorders,
                    frame_rate,
                    session: None,
                    mailbox: thread_mailbox,
                    events,
                    control: control_rx,
                    running: thread_running,
                    recording: thread_recording,
                    seq: 0,
                    read_failures: 0,
                };
                worker.run();
            })?;

        let started = match init_rx.recv() {
            Ok(result) => result,
            Err(_) => Err(CaptureError::StartupLost),
        };
        let (frame_rate, resolution) = match started {
            Ok(started) => started,
            Err(e) => {
                let _ = handle.join();
                return Err(e);
            }
        };

        tracing::info!(
            "Acquisition started on camera {} at {}x{}, {:.1} fps",
            selection.index,
            resolution.0,
            resolution.1,
            frame_rate
        );

        Ok(Self {
            selection,
            frame_rate,
            resolution,
            mailbox,
            running,
            recording,
            control: control_tx,
            exited: exit_rx,
            handle: Some(handle),
        })
    }

    pub fn selection(&self) -> CameraSelection {
        self.selection
    }

    /// Rate detected at startup; recordings are encoded at this rate.
    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    /// Frame size the device actually delivers.
    pub fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    pub fn mailbox(&self) -> &Arc<FrameMailbox> {
        &self.mailbox
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Arm recording into `path` at the detected rate.
    pub fn start_recording(&self, path: &Path) -> Result<(), CaptureError> {
        let (reply, answer) = bounded(1);
        self.send(Control::StartRecording {
            path: path.to_path_buf(),
            reply,
        })?;
        Self::await_reply(answer)?
    }

    /// Close the open recording, if any. Calling it with nothing open is fine.
    pub fn stop_recording(&self) -> Result<Option<RecordingSummary>, CaptureError> {
        if !self.is_running() && !self.is_recording() {
            return Ok(None);
        }
        let (reply, answer) = bounded(1);
        if self.send(Control::StopRecording { reply }).is_err() {
            // Thread is gone and closed its session on the way out
            return Ok(None);
        }
        match answer.recv_timeout(CONTROL_TIMEOUT) {
            Ok(result) => result,
            Err(RecvTimeoutError::Disconnected) => Ok(None),
            Err(RecvTimeoutError::Timeout) => Err(CaptureError::ControlTimeout(CONTROL_TIMEOUT)),
        }
    }

    /// Ask the thread to finish and wait up to [`STOP_TIMEOUT`] for it.
    ///
    /// Returns false if the thread had to be left behind; it still releases
    /// the device and closes its recording when it gets there.
    pub fn stop(&mut self) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };
        self.running.store(false, Ordering::Release);

        match self.exited.recv_timeout(STOP_TIMEOUT) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    tracing::error!("Acquisition thread for camera {} panicked", self.selection.index);
                }
                tracing::info!("Acquisition stopped on camera {}", self.selection.index);
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    "Acquisition thread for camera {} did not exit within {:?}, detaching",
                    self.selection.index,
                    STOP_TIMEOUT
                );
                false
            }
        }
    }

    fn send(&self, command: Control) -> Result<(), CaptureError> {
        self.control
            .send(command)
            .map_err(|_| CaptureError::NoActiveCamera)
    }

    fn await_reply<T>(answer: Receiver<T>) -> Result<T, CaptureError> {
        answer.recv_timeout(CONTROL_TIMEOUT).map_err(|e| match e {
            RecvTimeoutError::Timeout => CaptureError::ControlTimeout(CONTROL_TIMEOUT),
            RecvTimeoutError::Disconnected => CaptureError::NoActiveCamera,
        })
    }
}

impl Drop for AcquisitionLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Tells the handle the thread is done, whichever way it ends.
struct ExitSignal(Sender<()>);

impl Drop for ExitSignal {
    fn drop(&mut self) {
        let _ = self.0.try_send(());
    }
}

struct RecordingSession {
    sink: Box<dyn OutputSink>,
    path: PathBuf,
    frames: u64,
}

struct Worker {
    camera: u32,
    source: Box<dyn CaptureSource>,
    recorders: Arc<dyn RecorderFactory>,
    frame_rate: f64,
    session: Option<RecordingSession>,
    mailbox: Arc<FrameMailbox>,
    events: Sender<AcquisitionEvent>,
    control: Receiver<Control>,
    running: Arc<AtomicBool>,
    recording: Arc<AtomicBool>,
    seq: u64,
    read_failures: u64,
}

impl Worker {
    fn run(&mut self) {
        while self.running.load(Ordering::Acquire) {
            self.drain_control(true);

            match self.source.capture_frame() {
                Ok(image) => {
                    self.seq += 1;
                    let frame = Arc::new(Frame::new(self.seq, image));
                    self.mailbox.publish(Arc::clone(&frame));
                    if self.session.is_some() {
                        self.record(&frame);
                    }
                }
                Err(e) => {
                    self.read_failures += 1;
                    tracing::debug!(
                        "Camera {} read failed ({} so far): {:#}",
                        self.camera,
                        self.read_failures,
                        e
                    );
                }
            }

            std::thread::sleep(PACING_DELAY);
        }

        // Answer anything sent while we were stopping
        self.drain_control(false);

        if let Some(summary) = self.close_session() {
            let _ = self.events.send(AcquisitionEvent::RecordingClosed(summary));
        }

        tracing::debug!(
            "Camera {} loop done: {} frames, {} failed reads",
            self.camera,
            self.seq,
            self.read_failures
        );
        let _ = self.events.send(AcquisitionEvent::Stopped {
            camera: self.camera,
            frames: self.seq,
            read_failures: self.read_failures,
        });
    }

    fn drain_control(&mut self, accepting: bool) {
        while let Ok(command) = self.control.try_recv() {
            match command {
                Control::StartRecording { path, reply } => {
                    let result = if accepting {
                        self.open_session(path)
                    } else {
                        Err(CaptureError::NoActiveCamera)
                    };
                    let _ = reply.send(result);
                }
                Control::StopRecording { reply } => {
                    let result = match self.session.as_ref().map(|s| s.path.clone()) {
                        None => Ok(None),
                        Some(path) => match self.finish_session() {
                            Ok(summary) => Ok(summary),
                            Err(reason) => Err(CaptureError::RecordingWrite { path, reason }),
                        },
                    };
                    let _ = reply.send(result);
                }
            }
        }
    }

    fn open_session(&mut self, path: PathBuf) -> Result<(), CaptureError> {
        if let Some(open) = &self.session {
            return Err(CaptureError::RecordingActive(open.path.clone()));
        }

        let mut sink = self
            .recorders
            .open(&path, TARGET_SIDE, TARGET_SIDE, self.frame_rate)
            .map_err(|e| CaptureError::RecordingSetup {
                path: path.clone(),
                reason: format!("{:#}", e),
            })?;

        let (width, height) = sink.resolution();
        if (width, height) != (TARGET_SIDE, TARGET_SIDE) {
            if let Err(e) = sink.finish() {
                tracing::warn!("Closing mis-sized recording: {:#}", e);
            }
            return Err(CaptureError::RecordingSetup {
                path,
                reason: format!("encoder opened at {width}x{height}, frames are {TARGET_SIDE}x{TARGET_SIDE}"),
            });
        }

        tracing::info!(
            "Recording {} at {:.1} fps",
            path.display(),
            self.frame_rate
        );
        self.session = Some(RecordingSession {
            sink,
            path,
            frames: 0,
        });
        self.recording.store(true, Ordering::Release);
        Ok(())
    }

    fn record(&mut self, frame: &Frame) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        if let Err(e) = session.sink.write_frame(&frame.cropped()) {
            let path = session.path.clone();
            let reason = format!("{:#}", e);
            tracing::error!("Recording {} failed: {}", path.display(), reason);
            // Close without feeding the broken handle again
            if let Err(close) = self.finish_session() {
                tracing::warn!("Closing failed recording: {}", close);
            }
            let _ = self
                .events
                .send(AcquisitionEvent::RecordingFailed { path, reason });
            return;
        }
        session.frames += 1;
    }

    /// Flush and release the session. Either way it is gone afterwards.
    fn finish_session(&mut self) -> Result<Option<RecordingSummary>, String> {
        self.recording.store(false, Ordering::Release);
        let Some(mut session) = self.session.take() else {
            return Ok(None);
        };
        let result = session.sink.finish();
        let summary = RecordingSummary {
            path: session.path,
            frames: session.frames,
        };
        match result {
            Ok(()) => Ok(Some(summary)),
            Err(e) => Err(format!("{:#}", e)),
        }
    }

    fn close_session(&mut self) -> Option<RecordingSummary> {
        match self.finish_session() {
            Ok(summary) => summary,
            Err(reason) => {
                tracing::error!("Failed to close recording on shutdown: {}", reason);
                None
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.close_session();
        tracing::debug!("Releasing camera {}", self.camera);
    }
}
