use anyhow::{Context, Result};
use cellcap::acquisition::CameraController;
use cellcap::capture::{CameraSelection, CaptureBackend, NokhwaBackend, SyntheticBackend};
use cellcap::console::Console;
use cellcap::dataset::{clahe, downscale, fetch, resize};
use cellcap::output::{FfmpegRecorderFactory, OutputSink, V4L2Output};
use cellcap::train::ModelSize;
use cellcap::{report, train};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the capture console: live preview, recording and snapshots
    Capture {
        /// Camera index opened at startup
        #[arg(short, long, default_value_t = 0)]
        input_device: u32,

        /// Requested capture width
        #[arg(long, default_value_t = 1280)]
        capture_width: u32,

        /// Requested capture height
        #[arg(long, default_value_t = 720)]
        capture_height: u32,

        /// Where recordings and snapshots are written
        #[arg(long, env = "CELLCAP_OUTPUT_DIR", default_value = "data/capture")]
        output_dir: PathBuf,

        /// v4l2loopback device that receives the cropped preview
        #[arg(long)]
        preview_device: Option<String>,

        /// Use a generated test pattern instead of a camera
        #[arg(long)]
        synthetic: bool,
    },

    /// List cameras
    Cameras,

    /// Download archives into an empty directory
    Fetch {
        #[arg(long = "url", required = true)]
        urls: Vec<String>,

        #[arg(long)]
        dest: PathBuf,
    },

    /// Unpack a zip archive
    Extract {
        #[arg(long)]
        archive: PathBuf,

        /// Defaults to the archive path without its extension
        #[arg(long)]
        dest: Option<PathBuf>,
    },

    /// Resize labeled images to a square
    Resize {
        #[arg(long)]
        src: PathBuf,

        #[arg(long)]
        out: PathBuf,

        #[arg(long, default_value_t = resize::DEFAULT_SIZE)]
        size: u32,
    },

    /// Resize labeled images and draw their boxes
    Annotate {
        #[arg(long)]
        src: PathBuf,

        #[arg(long)]
        out: PathBuf,

        #[arg(long, default_value_t = resize::DEFAULT_SIZE)]
        size: u32,
    },

    /// Shrink dataset content onto a white canvas
    Downscale {
        #[arg(long)]
        src: PathBuf,

        /// Defaults to `<src>ToScale<factor>` beside the source
        #[arg(long)]
        out: Option<PathBuf>,

        #[arg(long, default_value_t = downscale::DEFAULT_FACTOR)]
        factor: f64,

        #[arg(long, default_value_t = downscale::DEFAULT_CANVAS)]
        canvas: u32,
    },

    /// Build a CLAHE-equalized copy of a dataset
    Clahe {
        #[arg(long)]
        src: PathBuf,

        #[arg(long)]
        out: PathBuf,

        #[arg(long, default_value_t = 2.0)]
        clip: f64,

        #[arg(long, default_value_t = 8)]
        tiles: usize,
    },

    /// Fine-tune a detector with the yolo command line
    Train {
        /// Dataset manifest (data.yaml)
        #[arg(long)]
        data: PathBuf,

        #[arg(long, value_enum, default_value_t = ModelSize::Small)]
        model: ModelSize,

        /// Check the dataset and print the command without running it
        #[arg(long)]
        dry_run: bool,
    },

    /// Chart a realtime detection session log
    Plot {
        #[arg(long)]
        csv: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    match args.command {
        Command::Capture {
            input_device,
            capture_width,
            capture_height,
            output_dir,
            preview_device,
            synthetic,
        } => run_capture(
            input_device,
            (capture_width, capture_height),
            output_dir,
            preview_device,
            synthetic,
        ),
        Command::Cameras => {
            for cam in NokhwaBackend.list_cameras()? {
                println!("[{}] {}", cam.index, cam.name);
            }
            Ok(())
        }
        Command::Fetch { urls, dest } => {
            let files = fetch::fetch_archives(&urls, &dest).context("Fetch failed")?;
            for file in files {
                println!("{}", file.display());
            }
            Ok(())
        }
        Command::Extract { archive, dest } => {
            let dest = dest.unwrap_or_else(|| fetch::default_extract_dir(&archive));
            let entries = fetch::extract_archive(&archive, &dest).context("Extract failed")?;
            println!("extracted {} entries to {}", entries, dest.display());
            Ok(())
        }
        Command::Resize { src, out, size } => {
            let report = resize::resize_dataset(&src, &out, size).context("Resize failed")?;
            println!("{report}");
            Ok(())
        }
        Command::Annotate { src, out, size } => {
            let report = resize::annotate_dataset(&src, &out, size).context("Annotate failed")?;
            println!("{report}");
            Ok(())
        }
        Command::Downscale {
            src,
            out,
            factor,
            canvas,
        } => {
            let out = out.unwrap_or_else(|| downscale::default_output(&src, factor));
            let report = downscale::downscale_dataset(&src, &out, factor, canvas)
                .context("Downscale failed")?;
            println!("{report}");
            Ok(())
        }
        Command::Clahe {
            src,
            out,
            clip,
            tiles,
        } => {
            let settings = clahe::Clahe::new(clip, tiles)?;
            let report = clahe::clahe_dataset(&src, &out, &settings).context("CLAHE failed")?;
            println!("{report}");
            Ok(())
        }
        Command::Train {
            data,
            model,
            dry_run,
        } => {
            let plan = train::train(&data, model, dry_run).context("Training failed")?;
            println!("run: {}", plan.run_name);
            Ok(())
        }
        Command::Plot { csv } => {
            let report = report::plot_session(&csv).context("Plotting failed")?;
            println!("{}", report.summary.to_text());
            println!("\nplots: {}", report.plots_dir.display());
            Ok(())
        }
    }
}

fn run_capture(
    input_device: u32,
    size: (u32, u32),
    output_dir: PathBuf,
    preview_device: Option<String>,
    synthetic: bool,
) -> Result<()> {
    tracing::info!("cellcap capture starting");
    tracing::info!("Capture: {}x{}", size.0, size.1);
    tracing::info!("Output location: {}", output_dir.display());

    let backend: Arc<dyn CaptureBackend> = if synthetic {
        tracing::info!("Using synthetic test pattern");
        Arc::new(SyntheticBackend::new(30.0))
    } else {
        Arc::new(NokhwaBackend)
    };

    // Initialize preview output
    let preview: Option<Box<dyn OutputSink>> = match &preview_device {
        Some(path) => {
            let side = cellcap::frame::TARGET_SIDE;
            let output = V4L2Output::new(path, side, side)
                .context("Failed to initialize v4l2loopback preview")?;
            Some(Box::new(output))
        }
        None => {
            tracing::info!("No preview device; running headless");
            None
        }
    };

    let mut controller = CameraController::new(backend, Arc::new(FfmpegRecorderFactory), output_dir);
    match controller.select_camera(CameraSelection::new(input_device, size.0, size.1)) {
        Ok(rate) => tracing::info!("Camera {} running at {:.1} FPS", input_device, rate),
        Err(e) => tracing::error!("{}; use 'select' to pick another camera", e),
    }

    Console::new(controller, preview, size).run(std::io::BufReader::new(std::io::stdin()))
}
