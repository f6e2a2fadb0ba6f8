//! Frame acquisition: the capture thread, the frame mailbox it publishes
//! into, and the controller the operator drives.

mod controller;
mod mailbox;
mod worker;

pub use controller::CameraController;
pub use mailbox::FrameMailbox;
pub use worker::{
    AcquisitionEvent, AcquisitionLoop, RecordingSummary, PACING_DELAY, STOP_TIMEOUT,
};
