//! Detector fine-tuning through the external `yolo` command line.

use crate::dataset::manifest::DatasetManifest;
use crate::error::DatasetError;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::process::Command;

pub const IMAGE_SIZE: u32 = 416;

/// YOLOv8 model sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ModelSize {
    #[value(name = "n")]
    Nano,
    #[value(name = "s")]
    Small,
    #[value(name = "m")]
    Medium,
    #[value(name = "l")]
    Large,
    #[value(name = "x")]
    Xl,
}

impl ModelSize {
    pub fn weights(self) -> &'static str {
        match self {
            ModelSize::Nano => "yolov8n.pt",
            ModelSize::Small => "yolov8s.pt",
            ModelSize::Medium => "yolov8m.pt",
            ModelSize::Large => "yolov8l.pt",
            ModelSize::Xl => "yolov8x.pt",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ModelSize::Nano => "nano",
            ModelSize::Small => "small",
            ModelSize::Medium => "medium",
            ModelSize::Large => "large",
            ModelSize::Xl => "xl",
        }
    }
}

/// File counts of one split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitCount {
    pub split: &'static str,
    pub images: usize,
    pub labels: usize,
}

/// A fully specified training run.
#[derive(Debug, Clone)]
pub struct TrainingPlan {
    pub data: PathBuf,
    pub model: ModelSize,
    pub run_name: String,
    pub image_size: u32,
}

impl TrainingPlan {
    /// Plan a run on the dataset described by the manifest at `data`.
    pub fn new(data: &Path, model: ModelSize, now: DateTime<Local>) -> Result<Self, DatasetError> {
        if !data.is_file() {
            return Err(DatasetError::SourceMissing(data.to_path_buf()));
        }
        Ok(Self {
            data: data.to_path_buf(),
            model,
            run_name: run_name(&dataset_name(data), IMAGE_SIZE, model, now),
            image_size: IMAGE_SIZE,
        })
    }

    /// `key=value` arguments after `yolo detect train`.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            format!("data={}", self.data.display()),
            format!("model={}", self.model.weights()),
            "epochs=100".to_string(),
            format!("imgsz={}", self.image_size),
            "device=0".to_string(),
            "batch=128".to_string(),
            format!("name={}", self.run_name),
            "patience=20".to_string(),
            "cos_lr=True".to_string(),
            "cache=False".to_string(),
            "workers=4".to_string(),
            "mosaic=1.0".to_string(),
            "scale=0.3".to_string(),
            "fliplr=0.5".to_string(),
        ];
        for disabled in [
            "degrees",
            "translate",
            "shear",
            "perspective",
            "flipud",
            "mixup",
            "copy_paste",
        ] {
            args.push(format!("{disabled}=0.0"));
        }
        args
    }

    pub fn command(&self) -> Command {
        let mut cmd = Command::new("yolo");
        cmd.arg("detect").arg("train").args(self.args());
        cmd
    }

    /// Where the trainer puts its results.
    pub fn results_dir(&self) -> PathBuf {
        Path::new("runs").join("detect").join(&self.run_name)
    }
}

/// Name of the directory holding the manifest.
pub fn dataset_name(data: &Path) -> String {
    data.parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dataset".to_string())
}

/// `<dataset>_<imgsz>_<size>_mosaic_scale_<yymmdd_HHMMSS>`
pub fn run_name(dataset: &str, image_size: u32, model: ModelSize, now: DateTime<Local>) -> String {
    format!(
        "{}_{}_{}_mosaic_scale_{}",
        dataset,
        image_size,
        model.label(),
        now.format("%y%m%d_%H%M%S")
    )
}

fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| e.path().is_file() && e.path().extension().is_some())
                .count()
        })
        .unwrap_or(0)
}

/// Image and label counts per split of the dataset beside `data`.
pub fn split_counts(data: &Path) -> Result<Vec<SplitCount>, DatasetError> {
    let manifest = DatasetManifest::load(data)?;
    let root = data.parent().unwrap_or(Path::new("."));
    Ok(manifest
        .with_root(root)
        .split_dirs()
        .into_iter()
        .map(|(split, images, labels)| SplitCount {
            split,
            images: count_files(&images),
            labels: count_files(&labels),
        })
        .collect())
}

/// Check the dataset, then run the trainer unless `dry_run`.
pub fn train(data: &Path, model: ModelSize, dry_run: bool) -> Result<TrainingPlan, DatasetError> {
    let plan = TrainingPlan::new(data, model, Local::now())?;

    for count in split_counts(data)? {
        tracing::info!(
            "{:<5} images: {:>6}  labels: {:>6}",
            count.split,
            count.images,
            count.labels
        );
    }
    tracing::info!("Run {} with {}", plan.run_name, plan.model.weights());

    if dry_run {
        tracing::info!("yolo detect train {}", plan.args().join(" "));
        return Ok(plan);
    }

    let status = plan
        .command()
        .status()
        .map_err(|e| DatasetError::Training(format!("failed to start yolo: {e}")))?;
    if !status.success() {
        return Err(DatasetError::Training(format!("yolo exited with {status}")));
    }

    tracing::info!("Results in {}", plan.results_dir().display());
    Ok(plan)
}
