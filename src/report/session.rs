//! Realtime detection session logs and their statistics.

use crate::error::DatasetError;
use chrono::NaiveDateTime;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

pub const REQUIRED_COLUMNS: [&str; 5] = [
    "frame_idx",
    "inference_ms",
    "fps_inst",
    "clahe_on",
    "total_objects",
];

const COUNT_PREFIX: &str = "count_";
const FALLBACK_FPS: f64 = 10.0;

/// One session CSV, rows sorted by frame index.
#[derive(Debug, Clone, Default)]
pub struct SessionLog {
    pub path: PathBuf,
    pub frame_idx: Vec<f64>,
    pub timestamps: Vec<Option<NaiveDateTime>>,
    pub inference_ms: Vec<f64>,
    /// Instant fps with infinities replaced by NaN
    pub fps_inst: Vec<f64>,
    pub clahe_on: Vec<f64>,
    pub total_objects: Vec<f64>,
    /// `(class, per-frame count)` in column order
    pub class_counts: Vec<(String, Vec<f64>)>,
}

fn parse_number(field: &str) -> f64 {
    field.trim().parse().unwrap_or(f64::NAN)
}

fn parse_timestamp(field: &str) -> Option<NaiveDateTime> {
    let field = field.trim();
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(field, fmt).ok())
}

impl SessionLog {
    pub fn load(path: &Path) -> Result<Self, DatasetError> {
        if !path.is_file() {
            return Err(DatasetError::SourceMissing(path.to_path_buf()));
        }
        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();
        let column = |name: &str| headers.iter().position(|h| h.trim() == name);

        let missing: Vec<&str> = REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|&c| column(c).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(DatasetError::Session(format!(
                "missing required columns: {}",
                missing.join(", ")
            )));
        }
        let idx: Vec<usize> = REQUIRED_COLUMNS.iter().filter_map(|&c| column(c)).collect();
        let timestamp_col = column("timestamp");
        let count_cols: Vec<(String, usize)> = headers
            .iter()
            .enumerate()
            .filter_map(|(i, h)| {
                h.trim()
                    .strip_prefix(COUNT_PREFIX)
                    .map(|class| (class.to_string(), i))
            })
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let field = |i: usize| record.get(i).unwrap_or("");
            let numbers: Vec<f64> = idx.iter().map(|&i| parse_number(field(i))).collect();
            let counts: Vec<f64> = count_cols.iter().map(|(_, i)| parse_number(field(*i))).collect();
            let timestamp = timestamp_col.and_then(|i| parse_timestamp(field(i)));
            rows.push((numbers, timestamp, counts));
        }
        if rows.is_empty() {
            return Err(DatasetError::Session(format!("{} has no rows", path.display())));
        }
        rows.sort_by(|a, b| a.0[0].total_cmp(&b.0[0]));

        let mut log = SessionLog {
            path: path.to_path_buf(),
            class_counts: count_cols
                .into_iter()
                .map(|(class, _)| (class, Vec::with_capacity(rows.len())))
                .collect(),
            ..Default::default()
        };
        for (numbers, timestamp, counts) in rows {
            log.frame_idx.push(numbers[0]);
            log.inference_ms.push(numbers[1]);
            log.fps_inst.push(if numbers[2].is_infinite() { f64::NAN } else { numbers[2] });
            log.clahe_on.push(numbers[3]);
            log.total_objects.push(numbers[4]);
            log.timestamps.push(timestamp);
            for ((_, column), value) in log.class_counts.iter_mut().zip(counts) {
                column.push(value);
            }
        }
        Ok(log)
    }

    pub fn len(&self) -> usize {
        self.frame_idx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frame_idx.is_empty()
    }

    /// Median instant fps, or 10 when there is none to speak of.
    pub fn typical_fps(&self) -> f64 {
        match median(&self.fps_inst) {
            Some(fps) if fps > 0.0 => fps,
            _ => FALLBACK_FPS,
        }
    }

    /// Smoothing windows of roughly one and three seconds, in frames.
    pub fn windows(&self) -> (usize, usize) {
        let fps = self.typical_fps();
        let one = fps.round().max(5.0) as usize;
        let three = (fps * 3.0).round().max(10.0) as usize;
        (one, three)
    }

    /// Seconds between the first and last readable timestamps.
    fn timestamp_span(&self) -> Option<f64> {
        let first = self.timestamps.iter().flatten().next()?;
        let last = self.timestamps.iter().flatten().last()?;
        let span = (*last - *first).num_milliseconds() as f64 / 1000.0;
        (span >= 0.0).then_some(span)
    }

    pub fn summary(&self) -> SessionSummary {
        let frame_max = self
            .frame_idx
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(0.0, f64::max) as i64;
        let fps_median = median(&self.fps_inst).unwrap_or(f64::NAN);

        let duration_s = match self.timestamp_span() {
            Some(span) if span != 0.0 => span,
            _ => {
                let fps = if fps_median > 0.0 { fps_median } else { FALLBACK_FPS };
                frame_max as f64 / fps.max(1e-6)
            }
        };

        let zero_frames = self.total_objects.iter().filter(|&&v| v == 0.0).count();
        let mut class_totals: Vec<(String, i64)> = self
            .class_counts
            .iter()
            .map(|(class, values)| (class.clone(), nan_sum(values) as i64))
            .collect();
        class_totals.sort_by(|a, b| b.1.cmp(&a.1));

        SessionSummary {
            path: self.path.clone(),
            frames: self.len(),
            frame_max,
            duration_s,
            clahe_mode: mode(&self.clahe_on).map(|m| m.round() as i64).unwrap_or(-1),
            inference_mean: mean(&self.inference_ms).unwrap_or(f64::NAN),
            inference_median: median(&self.inference_ms).unwrap_or(f64::NAN),
            fps_mean: mean(&self.fps_inst).unwrap_or(f64::NAN),
            fps_median,
            total_detections: nan_sum(&self.total_objects) as i64,
            zero_frames,
            class_totals,
        }
    }
}

/// Headline numbers of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub path: PathBuf,
    pub frames: usize,
    pub frame_max: i64,
    pub duration_s: f64,
    /// Dominant `clahe_on` value, -1 when the column holds no numbers
    pub clahe_mode: i64,
    pub inference_mean: f64,
    pub inference_median: f64,
    pub fps_mean: f64,
    pub fps_median: f64,
    pub total_detections: i64,
    pub zero_frames: usize,
    /// Largest first
    pub class_totals: Vec<(String, i64)>,
}

impl SessionSummary {
    pub fn zero_percent(&self) -> f64 {
        if self.frames == 0 {
            0.0
        } else {
            self.zero_frames as f64 / self.frames as f64 * 100.0
        }
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "CSV: {}", self.path.display());
        let _ = writeln!(out, "Frames: {} (frame_idx max: {})", self.frames, self.frame_max);
        let _ = writeln!(out, "Duration_s (estimated): {:.3}", self.duration_s);
        let _ = writeln!(out, "CLAHE mode (dominant): {}  (1=ON,0=OFF)", self.clahe_mode);
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "Inference ms: mean={:.3}, median={:.3}",
            self.inference_mean, self.inference_median
        );
        let _ = writeln!(out, "FPS inst: mean={:.3}, median={:.3}", self.fps_mean, self.fps_median);
        let _ = writeln!(out);
        let _ = writeln!(out, "Total detections (sum total_objects): {}", self.total_detections);
        let _ = write!(
            out,
            "Frames with 0 detection: {} ({:.2}%)",
            self.zero_frames,
            self.zero_percent()
        );
        if !self.class_totals.is_empty() {
            let _ = write!(out, "\n\nDetections per class (total over session):");
            for (class, total) in &self.class_totals {
                let _ = write!(out, "\n  - {class}: {total}");
            }
        }
        out
    }
}

fn finite(values: &[f64]) -> impl Iterator<Item = f64> + '_ {
    values.iter().copied().filter(|v| !v.is_nan())
}

fn nan_sum(values: &[f64]) -> f64 {
    finite(values).sum()
}

pub fn mean(values: &[f64]) -> Option<f64> {
    let (sum, n) = finite(values).fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

pub fn median(values: &[f64]) -> Option<f64> {
    let mut sorted: Vec<f64> = finite(values).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

/// Most frequent value; the smallest one on ties.
pub fn mode(values: &[f64]) -> Option<f64> {
    let mut sorted: Vec<f64> = finite(values).collect();
    sorted.sort_by(f64::total_cmp);

    let mut best: Option<(f64, usize)> = None;
    let mut i = 0;
    while i < sorted.len() {
        let run = sorted[i..].iter().take_while(|&&v| v == sorted[i]).count();
        if best.map_or(true, |(_, n)| run > n) {
            best = Some((sorted[i], run));
        }
        i += run;
    }
    best.map(|(v, _)| v)
}

/// Trailing mean over `window` samples. Positions with fewer than
/// `max(2, window / 3)` numbers in the window are NaN.
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    let min_periods = (window / 3).max(2);
    (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            match finite(&values[start..=i]).fold((0.0, 0usize), |(s, n), v| (s + v, n + 1)) {
                (sum, n) if n >= min_periods => sum / n as f64,
                _ => f64::NAN,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
frame_idx,timestamp,inference_ms,fps_inst,clahe_on,total_objects,count_NEU,count_EOS
2,2025-01-01 10:00:00.500,12.0,20.0,1,3,2,1
1,2025-01-01 10:00:00.000,10.0,inf,1,0,0,0
3,2025-01-01 10:00:02.000,14.0,10.0,0,5,1,4
";

    fn write_log(text: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.csv");
        std::fs::write(&path, text).unwrap();
        (dir, path)
    }

    #[test]
    fn test_load_sorts_and_cleans() {
        let (_dir, path) = write_log(CSV);
        let log = SessionLog::load(&path).unwrap();
        assert_eq!(log.frame_idx, vec![1.0, 2.0, 3.0]);
        assert!(log.fps_inst[0].is_nan());
        assert_eq!(log.inference_ms, vec![10.0, 12.0, 14.0]);
        assert_eq!(log.class_counts[0].0, "NEU");
        assert_eq!(log.class_counts[1].1, vec![0.0, 1.0, 4.0]);
    }

    #[test]
    fn test_summary() {
        let (_dir, path) = write_log(CSV);
        let summary = SessionLog::load(&path).unwrap().summary();
        assert_eq!(summary.frames, 3);
        assert_eq!(summary.frame_max, 3);
        assert!((summary.duration_s - 2.0).abs() < 1e-9);
        assert_eq!(summary.clahe_mode, 1);
        assert_eq!(summary.fps_median, 15.0);
        assert_eq!(summary.total_detections, 8);
        assert_eq!(summary.zero_frames, 1);
        assert_eq!(
            summary.class_totals,
            vec![("EOS".to_string(), 5), ("NEU".to_string(), 3)]
        );

        let text = summary.to_text();
        assert!(text.contains("Duration_s (estimated): 2.000"));
        assert!(text.contains("Frames with 0 detection: 1 (33.33%)"));
        assert!(text.ends_with("  - NEU: 3"));
    }

    #[test]
    fn test_duration_falls_back_to_fps() {
        let (_dir, path) = write_log(
            "frame_idx,inference_ms,fps_inst,clahe_on,total_objects\n40,5,20,0,1\n",
        );
        let summary = SessionLog::load(&path).unwrap().summary();
        assert!((summary.duration_s - 2.0).abs() < 1e-9);
        assert!(!summary.to_text().contains("per class"));
    }

    #[test]
    fn test_missing_columns_and_empty() {
        let (_dir, path) = write_log("frame_idx,inference_ms\n1,2\n");
        match SessionLog::load(&path) {
            Err(DatasetError::Session(msg)) => {
                assert!(msg.contains("fps_inst") && msg.contains("total_objects"))
            }
            other => panic!("Expected session error, got {other:?}"),
        }

        let (_dir, path) = write_log("frame_idx,inference_ms,fps_inst,clahe_on,total_objects\n");
        assert!(matches!(SessionLog::load(&path), Err(DatasetError::Session(_))));
    }

    #[test]
    fn test_windows() {
        let mut log = SessionLog {
            fps_inst: vec![29.6, 30.2, 30.0],
            ..Default::default()
        };
        assert_eq!(log.windows(), (30, 90));
        log.fps_inst = vec![f64::NAN];
        assert_eq!(log.typical_fps(), 10.0);
        assert_eq!(log.windows(), (10, 30));
        log.fps_inst = vec![2.0];
        assert_eq!(log.windows(), (5, 10));
    }

    #[test]
    fn test_rolling_mean() {
        let out = rolling_mean(&[1.0, 2.0, 3.0, f64::NAN, 5.0, 6.0], 3);
        assert!(out[0].is_nan());
        assert_eq!(out[1], 1.5);
        assert_eq!(out[2], 2.0);
        assert_eq!(out[3], 2.5);
        assert_eq!(out[4], 4.0);
        assert_eq!(out[5], 5.5);
    }

    #[test]
    fn test_stats() {
        assert_eq!(median(&[3.0, f64::NAN, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0]), Some(2.5));
        assert_eq!(median(&[f64::NAN]), None);
        assert_eq!(mean(&[1.0, f64::NAN, 3.0]), Some(2.0));
        assert_eq!(mode(&[1.0, 0.0, 1.0, 0.0]), Some(0.0));
        assert_eq!(mode(&[1.0, 0.0, 1.0]), Some(1.0));
        assert_eq!(mode(&[]), None);
    }
}
