//! Line-oriented operator console for the capture tool.
//!
//! Commands arrive on stdin through a reader thread; everything else,
//! including feeding the preview, happens on the operator thread.

use crate::acquisition::{AcquisitionEvent, CameraController, FrameMailbox};
use crate::capture::CameraSelection;
use crate::output::OutputSink;
use anyhow::Result;
use crossbeam_channel::{select, tick, unbounded, Receiver};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Preview refresh period.
pub const PREVIEW_INTERVAL: Duration = Duration::from_millis(33);

const HELP: &str = "\
commands:
  cameras               list cameras
  select <n> [WxH]      switch to camera n (default size from the command line)
  photo                 save the current frame
  record                start recording
  stop                  stop recording
  dir <path>            change the output location
  status                show camera, rate, recording and output location
  help                  show this text
  quit                  stop everything and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    Cameras,
    Select {
        index: u32,
        size: Option<(u32, u32)>,
    },
    Photo,
    Record,
    Stop,
    Dir(PathBuf),
    Status,
    Help,
    Quit,
}

impl OperatorCommand {
    /// Parse one input line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };

        let command = match verb.to_ascii_lowercase().as_str() {
            "cameras" | "list" => Self::Cameras,
            "select" | "camera" => {
                let index = words
                    .next()
                    .ok_or("select needs a camera index")?
                    .parse::<u32>()
                    .map_err(|e| format!("bad camera index: {e}"))?;
                let size = words.next().map(parse_size).transpose()?;
                Self::Select { index, size }
            }
            "photo" | "snap" => Self::Photo,
            "record" | "rec" => Self::Record,
            "stop" => Self::Stop,
            "dir" | "folder" => {
                let rest = line.trim_start()[verb.len()..].trim();
                if rest.is_empty() {
                    return Err("dir needs a path".to_string());
                }
                Self::Dir(PathBuf::from(rest))
            }
            "status" => Self::Status,
            "help" | "?" => Self::Help,
            "quit" | "exit" | "q" => Self::Quit,
            other => return Err(format!("unknown command '{other}'")),
        };
        Ok(Some(command))
    }
}

fn parse_size(text: &str) -> Result<(u32, u32), String> {
    let (w, h) = text
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("size must look like 1280x720, got '{text}'"))?;
    let w = w.parse::<u32>().map_err(|e| format!("bad width: {e}"))?;
    let h = h.parse::<u32>().map_err(|e| format!("bad height: {e}"))?;
    if w == 0 || h == 0 {
        return Err("size must be non-zero".to_string());
    }
    Ok((w, h))
}

enum Flow {
    Continue,
    Quit,
}

pub struct Console {
    controller: CameraController,
    preview: Option<Box<dyn OutputSink>>,
    default_size: (u32, u32),
    /// Mailbox the preview last drew from and the frame it drew
    shown: Option<(Arc<FrameMailbox>, u64)>,
}

impl Console {
    pub fn new(
        controller: CameraController,
        preview: Option<Box<dyn OutputSink>>,
        default_size: (u32, u32),
    ) -> Self {
        Self {
            controller,
            preview,
            default_size,
            shown: None,
        }
    }

    pub fn controller(&self) -> &CameraController {
        &self.controller
    }

    /// Serve commands from `input` until `quit` or end of input.
    pub fn run<R>(mut self, input: R) -> Result<()>
    where
        R: BufRead + Send + 'static,
    {
        let lines = spawn_reader(input);
        let events = self.controller.events();
        let ticker = tick(PREVIEW_INTERVAL);

        println!("{HELP}");

        loop {
            select! {
                recv(lines) -> line => match line {
                    Ok(line) => {
                        if let Flow::Quit = self.handle_line(&line) {
                            break;
                        }
                    }
                    Err(_) => {
                        tracing::info!("Input closed");
                        break;
                    }
                },
                recv(events) -> event => {
                    if let Ok(event) = event {
                        report_event(&event);
                    }
                },
                recv(ticker) -> _ => self.refresh_preview(),
            }
        }

        self.controller.shutdown();
        Ok(())
    }

    fn handle_line(&mut self, line: &str) -> Flow {
        match OperatorCommand::parse(line) {
            Ok(Some(command)) => self.execute(command),
            Ok(None) => Flow::Continue,
            Err(e) => {
                println!("{e}\n{HELP}");
                Flow::Continue
            }
        }
    }

    fn execute(&mut self, command: OperatorCommand) -> Flow {
        match command {
            OperatorCommand::Cameras => match self.controller.list_cameras() {
                Ok(cameras) if cameras.is_empty() => println!("no cameras found"),
                Ok(cameras) => {
                    for cam in cameras {
                        println!("  [{}] {}", cam.index, cam.name);
                    }
                }
                Err(e) => println!("camera query failed: {e:#}"),
            },
            OperatorCommand::Select { index, size } => {
                let (width, height) = size.unwrap_or(self.default_size);
                match self
                    .controller
                    .select_camera(CameraSelection::new(index, width, height))
                {
                    Ok(rate) => println!("camera {index} running, FPS: {rate:.1}"),
                    Err(e) => println!("{e}"),
                }
            }
            OperatorCommand::Photo => match self.controller.capture_photo() {
                Ok(Some(path)) => println!("saved {}", path.display()),
                Ok(None) => println!("no frame yet"),
                Err(e) => println!("photo failed: {e}"),
            },
            OperatorCommand::Record => match self.controller.start_recording() {
                Ok(path) => println!("recording to {}", path.display()),
                Err(e) => println!("{e}"),
            },
            OperatorCommand::Stop => match self.controller.stop_recording() {
                Ok(Some(summary)) => println!(
                    "saved {} ({} frames)",
                    summary.path.display(),
                    summary.frames
                ),
                Ok(None) => println!("not recording"),
                Err(e) => println!("{e}"),
            },
            OperatorCommand::Dir(dir) => match self.controller.set_output_dir(dir) {
                Ok(()) => println!("output: {}", self.controller.output_dir().display()),
                Err(e) => println!("{e}"),
            },
            OperatorCommand::Status => self.print_status(),
            OperatorCommand::Help => println!("{HELP}"),
            OperatorCommand::Quit => return Flow::Quit,
        }
        Flow::Continue
    }

    fn print_status(&self) {
        match (self.controller.selection(), self.controller.frame_rate()) {
            (Some(sel), Some(rate)) => {
                let (width, height) = self.controller.resolution().unwrap_or((sel.width, sel.height));
                println!(
                    "camera {} ({}x{} requested, {}x{} delivered), FPS: {:.1}",
                    sel.index, sel.width, sel.height, width, height, rate
                )
            }
            _ => println!("no camera selected"),
        }
        println!(
            "recording: {}",
            if self.controller.is_recording() { "yes" } else { "no" }
        );
        println!("output: {}", self.controller.output_dir().display());
    }

    fn refresh_preview(&mut self) {
        let Some(preview) = self.preview.as_mut() else {
            return;
        };
        let Some(mailbox) = self.controller.mailbox() else {
            return;
        };
        // Numbering restarts with every camera
        let after = match &self.shown {
            Some((last, seq)) if Arc::ptr_eq(last, &mailbox) => *seq,
            _ => 0,
        };
        let Some(frame) = mailbox.newer_than(after) else {
            return;
        };
        self.shown = Some((mailbox, frame.seq));

        if let Err(e) = preview.write_frame(&frame.cropped()) {
            tracing::error!("Preview disabled: {:#}", e);
            self.preview = None;
        }
    }
}

fn spawn_reader<R>(input: R) -> Receiver<String>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = unbounded();
    std::thread::spawn(move || {
        for line in input.lines().map_while(Result::ok) {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn report_event(event: &AcquisitionEvent) {
    match event {
        AcquisitionEvent::RecordingFailed { path, reason } => {
            tracing::error!("Recording {} stopped: {}", path.display(), reason);
            println!("recording {} stopped: {}", path.display(), reason);
        }
        AcquisitionEvent::RecordingClosed(summary) => {
            tracing::info!(
                "Recording {} closed with {} frames",
                summary.path.display(),
                summary.frames
            );
        }
        AcquisitionEvent::Stopped {
            camera,
            frames,
            read_failures,
        } => {
            tracing::info!(
                "Camera {} stopped after {} frames ({} failed reads)",
                camera,
                frames,
                read_failures
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(OperatorCommand::parse("").unwrap(), None);
        assert_eq!(
            OperatorCommand::parse("  photo ").unwrap(),
            Some(OperatorCommand::Photo)
        );
        assert_eq!(
            OperatorCommand::parse("select 2").unwrap(),
            Some(OperatorCommand::Select { index: 2, size: None })
        );
        assert_eq!(
            OperatorCommand::parse("select 1 1920x1080").unwrap(),
            Some(OperatorCommand::Select {
                index: 1,
                size: Some((1920, 1080))
            })
        );
        assert_eq!(
            OperatorCommand::parse("QUIT").unwrap(),
            Some(OperatorCommand::Quit)
        );
    }

    #[test]
    fn test_parse_dir_keeps_spaces() {
        assert_eq!(
            OperatorCommand::parse("dir /tmp/my captures").unwrap(),
            Some(OperatorCommand::Dir(PathBuf::from("/tmp/my captures")))
        );
        assert!(OperatorCommand::parse("dir").is_err());
    }

    #[test]
    fn test_parse_errors() {
        assert!(OperatorCommand::parse("select").is_err());
        assert!(OperatorCommand::parse("select x").is_err());
        assert!(OperatorCommand::parse("select 0 10by10").is_err());
        assert!(OperatorCommand::parse("select 0 0x10").is_err());
        assert!(OperatorCommand::parse("launch").is_err());
    }
}
