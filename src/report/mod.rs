//! Charts and a text summary for a realtime detection session log.

pub mod charts;
pub mod session;

use crate::error::DatasetError;
use charts::{histogram, line_chart, palette, stacked_chart, Labels, Series, HISTOGRAM_BINS};
pub use session::{SessionLog, SessionSummary};
use std::path::{Path, PathBuf};

pub const PLOTS_DIR: &str = "plots";

/// Files written for one session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub plots_dir: PathBuf,
    pub files: Vec<PathBuf>,
    pub summary: SessionSummary,
}

/// Write the session charts and `07_summary.txt` into `plots/` beside `csv`.
pub fn plot_session(csv: &Path) -> Result<SessionReport, DatasetError> {
    let log = SessionLog::load(csv)?;
    let plots_dir = csv.parent().unwrap_or(Path::new(".")).join(PLOTS_DIR);
    std::fs::create_dir_all(&plots_dir)?;

    let (win_1s, win_3s) = log.windows();
    tracing::info!(
        "Plotting {} frames from {} (windows {} / {})",
        log.len(),
        csv.display(),
        win_1s,
        win_3s
    );

    let x = &log.frame_idx;
    let mut files = Vec::new();
    let mut save = |name: &str, img: image::RgbImage| -> Result<(), DatasetError> {
        let path = plots_dir.join(name);
        img.save(&path)?;
        tracing::debug!("Wrote {}", path.display());
        files.push(path);
        Ok(())
    };

    let win_1s_name = format!("rolling ~1s (win={win_1s})");
    let win_3s_name = format!("rolling ~3s (win={win_3s})");

    let inference_1s = session::rolling_mean(&log.inference_ms, win_1s);
    let inference_3s = session::rolling_mean(&log.inference_ms, win_3s);
    save(
        "01_inference_ms.png",
        line_chart(
            &Labels {
                title: "Realtime Inference Time per Frame",
                x: "frame_idx",
                y: "inference_ms",
            },
            x,
            &[
                Series::new(&log.inference_ms, palette(0), "inference_ms"),
                Series::new(&inference_1s, palette(1), &win_1s_name),
                Series::new(&inference_3s, palette(2), &win_3s_name),
            ],
        ),
    )?;

    let fps_1s = session::rolling_mean(&log.fps_inst, win_1s);
    let fps_3s = session::rolling_mean(&log.fps_inst, win_3s);
    save(
        "02_fps_inst.png",
        line_chart(
            &Labels {
                title: "Realtime FPS (Instant & Smoothed)",
                x: "frame_idx",
                y: "fps",
            },
            x,
            &[
                Series::new(&log.fps_inst, palette(0), "fps_inst"),
                Series::new(&fps_1s, palette(1), &win_1s_name),
                Series::new(&fps_3s, palette(2), &win_3s_name),
            ],
        ),
    )?;

    let objects_1s = session::rolling_mean(&log.total_objects, win_1s);
    save(
        "03_total_objects.png",
        line_chart(
            &Labels {
                title: "Total Detections per Frame",
                x: "frame_idx",
                y: "objects",
            },
            x,
            &[
                Series::new(&log.total_objects, palette(0), "total_objects"),
                Series::new(&objects_1s, palette(1), &win_1s_name),
            ],
        ),
    )?;

    if !log.class_counts.is_empty() {
        let layers: Vec<Series> = log
            .class_counts
            .iter()
            .enumerate()
            .map(|(i, (name, values))| Series::new(values, palette(i), name))
            .collect();
        save(
            "04_counts_per_class.png",
            stacked_chart(
                &Labels {
                    title: "Detections per Class (Stacked)",
                    x: "frame_idx",
                    y: "objects",
                },
                x,
                &layers,
            ),
        )?;
    }

    save(
        "05_inference_hist.png",
        histogram(
            &Labels {
                title: "Histogram: Inference Time (ms)",
                x: "inference_ms",
                y: "count",
            },
            &log.inference_ms,
            HISTOGRAM_BINS,
            palette(0),
        ),
    )?;

    if log.fps_inst.iter().any(|v| v.is_finite()) {
        save(
            "06_fps_hist.png",
            histogram(
                &Labels {
                    title: "Histogram: FPS (instant)",
                    x: "fps_inst",
                    y: "count",
                },
                &log.fps_inst,
                HISTOGRAM_BINS,
                palette(0),
            ),
        )?;
    }

    let summary = log.summary();
    let summary_path = plots_dir.join("07_summary.txt");
    std::fs::write(&summary_path, summary.to_text())?;
    files.push(summary_path);

    tracing::info!("Wrote {} files to {}", files.len(), plots_dir.display());
    Ok(SessionReport {
        plots_dir,
        files,
        summary,
    })
}
