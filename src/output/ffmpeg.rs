//! Recording through an FFmpeg child process.
//!
//! Raw RGB24 frames go to FFmpeg's stdin; FFmpeg encodes MPEG-4 Part 2
//! (`mp4v`) into an MP4 container. Closing stdin and waiting for the child is
//! what finalizes the container, so `finish` must run for every session.

use super::{OutputSink, RecorderFactory};
use anyhow::{anyhow, bail, Context, Result};
use ffmpeg_sidecar::command::FfmpegCommand;
use image::RgbImage;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;

/// Time given to FFmpeg to reject its arguments or output path.
const STARTUP_GRACE: Duration = Duration::from_millis(100);

pub struct FfmpegRecorder {
    stdin: Option<ChildStdin>,
    child: Option<Child>,
    stderr_reader: Option<JoinHandle<String>>,
    path: PathBuf,
    width: u32,
    height: u32,
    frames: u64,
}

impl FfmpegRecorder {
    pub fn open(path: &Path, width: u32, height: u32, fps: f64) -> Result<Self> {
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            bail!("Invalid recording size {}x{}", width, height);
        }
        if !(fps.is_finite() && fps > 0.0) {
            bail!("Invalid recording rate {}", fps);
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        // Surfaces unwritable paths here rather than inside FFmpeg
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;

        tracing::info!(
            "Opening recording {} ({}x{} @ {:.2} fps)",
            path.display(),
            width,
            height,
            fps
        );

        let size = format!("{}x{}", width, height);
        let rate = format!("{}", fps);

        let mut command = FfmpegCommand::new();
        command
            .hide_banner()
            .args(["-loglevel", "error", "-nostats"])
            // Input: raw frames from stdin
            .args(["-f", "rawvideo"])
            .args(["-pix_fmt", "rgb24"])
            .args(["-s", &size])
            .args(["-r", &rate])
            .args(["-i", "-"])
            // Output: MPEG-4 in MP4
            .args(["-c:v", "mpeg4"])
            .args(["-vtag", "mp4v"])
            .args(["-q:v", "3"])
            .args(["-pix_fmt", "yuv420p"])
            .overwrite()
            .output(path.to_string_lossy().to_string());

        let inner = command.as_inner_mut();
        inner.stdin(Stdio::piped());
        inner.stdout(Stdio::null());
        inner.stderr(Stdio::piped());

        let mut child = inner.spawn().context("Failed to start FFmpeg")?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("Failed to get FFmpeg stdin"))?;

        let stderr_reader = child.stderr.take().map(|mut stderr| {
            std::thread::spawn(move || {
                let mut output = String::new();
                let _ = stderr.read_to_string(&mut output);
                output
            })
        });

        let mut recorder = Self {
            stdin: Some(stdin),
            child: Some(child),
            stderr_reader,
            path: path.to_path_buf(),
            width,
            height,
            frames: 0,
        };

        std::thread::sleep(STARTUP_GRACE);
        let exited = match recorder.child.as_mut() {
            Some(child) => child.try_wait().context("Failed to poll FFmpeg")?,
            None => None,
        };
        if let Some(status) = exited {
            recorder.child = None;
            recorder.stdin = None;
            let detail = recorder.collect_stderr();
            bail!("FFmpeg exited at startup ({}): {}", status, detail);
        }

        Ok(recorder)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    fn collect_stderr(&mut self) -> String {
        self.stderr_reader
            .take()
            .and_then(|handle| handle.join().ok())
            .map(|text| text.lines().last().unwrap_or_default().to_string())
            .unwrap_or_default()
    }
}

impl OutputSink for FfmpegRecorder {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        if frame.dimensions() != (self.width, self.height) {
            bail!(
                "Frame is {}x{}, recording expects {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            );
        }

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow!("Recording {} is closed", self.path.display()))?;

        stdin
            .write_all(frame.as_raw())
            .context("Failed to write frame to FFmpeg")?;
        self.frames += 1;

        Ok(())
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn finish(&mut self) -> Result<()> {
        // Closing stdin tells FFmpeg to write the trailer
        drop(self.stdin.take());

        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        let status = child.wait().context("Failed to wait for FFmpeg")?;
        let detail = self.collect_stderr();

        if !status.success() {
            bail!(
                "FFmpeg failed on {} ({}): {}",
                self.path.display(),
                status,
                detail
            );
        }

        tracing::info!(
            "Recording {} closed after {} frames",
            self.path.display(),
            self.frames
        );
        Ok(())
    }
}

impl Drop for FfmpegRecorder {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            tracing::error!("{:#}", e);
        }
    }
}

/// Opens [`FfmpegRecorder`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegRecorderFactory;

impl RecorderFactory for FfmpegRecorderFactory {
    fn open(&self, path: &Path, width: u32, height: u32, fps: f64) -> Result<Box<dyn OutputSink>> {
        Ok(Box::new(FfmpegRecorder::open(path, width, height, fps)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffmpeg_sidecar::command::ffmpeg_is_installed;
    use ffmpeg_sidecar::ffprobe::{ffprobe_is_installed, ffprobe_path};
    use std::process::Command;

    /// Decoded frame count and frame rate of the first video stream.
    fn count_frames(path: &Path) -> (u64, String) {
        let output = Command::new(ffprobe_path())
            .args(["-v", "error", "-count_frames", "-select_streams", "v:0"])
            .args(["-show_entries", "stream=nb_read_frames,r_frame_rate"])
            .args(["-of", "default=noprint_wrappers=1"])
            .arg(path)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "ffprobe rejected {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr)
        );

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        let mut frames = 0;
        let mut rate = String::new();
        for line in text.lines() {
            match line.split_once('=') {
                Some(("nb_read_frames", v)) => frames = v.trim().parse().unwrap_or(0),
                Some(("r_frame_rate", v)) => rate = v.trim().to_string(),
                _ => {}
            }
        }
        (frames, rate)
    }

    #[test]
    fn test_rejects_odd_size() {
        let dir = tempfile::tempdir().unwrap();
        let err = FfmpegRecorder::open(&dir.path().join("a.mp4"), 721, 720, 20.0);
        assert!(err.is_err());
        assert!(!dir.path().join("a.mp4").exists());
    }

    #[test]
    fn test_rejects_bad_rate() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FfmpegRecorder::open(&dir.path().join("a.mp4"), 64, 64, 0.0).is_err());
        assert!(FfmpegRecorder::open(&dir.path().join("a.mp4"), 64, 64, f64::NAN).is_err());
    }

    #[test]
    fn test_unwritable_path_fails_at_open() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where a directory is expected
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        let result = FfmpegRecorder::open(&blocker.join("out.mp4"), 64, 64, 20.0);
        assert!(result.is_err());
    }

    #[test]
    fn test_records_frames_when_ffmpeg_available() {
        if !ffmpeg_is_installed() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        let mut recorder = FfmpegRecorder::open(&path, 64, 64, 20.0).unwrap();
        let frame = RgbImage::from_pixel(64, 64, image::Rgb([200, 10, 10]));
        for _ in 0..5 {
            recorder.write_frame(&frame).unwrap();
        }
        assert!(recorder.write_frame(&RgbImage::new(32, 32)).is_err());
        recorder.finish().unwrap();
        recorder.finish().unwrap();

        assert_eq!(recorder.frames_written(), 5);
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
        assert!(recorder.write_frame(&frame).is_err());
    }

    #[test]
    fn test_empty_session_is_a_valid_container() {
        if !(ffmpeg_is_installed() && ffprobe_is_installed()) {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.mp4");
        let mut recorder = FfmpegRecorder::open(&path, 64, 64, 20.0).unwrap();
        recorder.finish().unwrap();

        assert_eq!(recorder.frames_written(), 0);
        let (frames, _) = count_frames(&path);
        assert_eq!(frames, 0);
    }

    #[test]
    fn test_fifty_frames_at_recorded_rate() {
        if !(ffmpeg_is_installed() && ffprobe_is_installed()) {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fifty.mp4");
        let mut recorder = FfmpegRecorder::open(&path, 720, 720, 20.0).unwrap();
        for i in 0..50u32 {
            let shade = (i * 5) as u8;
            recorder
                .write_frame(&RgbImage::from_pixel(720, 720, image::Rgb([shade, 80, 160])))
                .unwrap();
        }
        recorder.finish().unwrap();

        assert_eq!(recorder.frames_written(), 50);
        assert_eq!(count_frames(&path), (50, "20/1".to_string()));
    }
}
