//! Error types for the capture tool and the dataset batch tools

use std::path::PathBuf;
use thiserror::Error;

/// Failures surfaced to the operator by the capture tool.
///
/// Transient frame read failures never show up here; the acquisition loop
/// absorbs them.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Failed to open camera {index}: {reason}")]
    DeviceOpen { index: u32, reason: String },

    #[error("Acquisition thread exited before reporting startup")]
    StartupLost,

    #[error("No camera is running")]
    NoActiveCamera,

    #[error("A recording is already active: {}", .0.display())]
    RecordingActive(PathBuf),

    #[error("Failed to open recording {}: {reason}", .path.display())]
    RecordingSetup { path: PathBuf, reason: String },

    #[error("Recording {} failed: {reason}", .path.display())]
    RecordingWrite { path: PathBuf, reason: String },

    #[error("Acquisition thread did not answer within {0:?}")]
    ControlTimeout(std::time::Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Failures of the dataset batch tools. All of them abort the run before any
/// ambiguous output is left behind.
#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Source not found: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("Source contains no usable files: {}", .0.display())]
    SourceEmpty(PathBuf),

    #[error("Destination already exists and is not empty: {}", .0.display())]
    DestinationNotEmpty(PathBuf),

    #[error("Not a valid zip archive: {}", .0.display())]
    InvalidArchive(PathBuf),

    #[error("Invalid URL '{0}'")]
    InvalidUrl(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Malformed label line {line} in {}: {reason}", .path.display())]
    Label {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Session log error: {0}")]
    Session(String),

    #[error("Training run failed: {0}")]
    Training(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Manifest error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("OpenCV error: {0}")]
    OpenCv(#[from] opencv::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_error_display() {
        let err = CaptureError::DeviceOpen {
            index: 3,
            reason: "busy".to_string(),
        };
        assert!(err.to_string().contains("camera 3"));
        assert!(err.to_string().contains("busy"));

        let err = CaptureError::RecordingActive(PathBuf::from("/tmp/a.mp4"));
        assert!(err.to_string().contains("/tmp/a.mp4"));
    }

    #[test]
    fn test_dataset_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: DatasetError = io_err.into();
        match err {
            DatasetError::Io(_) => {}
            other => panic!("Expected Io error, got {other:?}"),
        }
    }
}
