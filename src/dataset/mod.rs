//! Batch tools that prepare the annotated blood-cell dataset.
//!
//! Every tool refuses to write into a directory that already has content
//! and removes its own output again if it fails halfway, so a run either
//! produces a complete directory or leaves the filesystem as it found it.

pub mod clahe;
pub mod downscale;
pub mod fetch;
pub mod labels;
pub mod manifest;
pub mod resize;

use crate::error::DatasetError;
use std::fmt;
use std::path::{Path, PathBuf};

/// Split directories of a YOLO dataset, in processing order.
pub const SPLITS: [&str; 3] = ["train", "val", "test"];

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "tif"];

/// What a batch run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub output: PathBuf,
    pub processed: usize,
    pub skipped: usize,
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed {}, skipped {}, output {}",
            self.processed,
            self.skipped,
            self.output.display()
        )
    }
}

/// An output directory owned by a running batch job.
///
/// Dropped without [`FreshOutput::commit`], it deletes what the job wrote.
pub struct FreshOutput {
    path: PathBuf,
    existed: bool,
    committed: bool,
}

impl FreshOutput {
    /// Claim `path`, which must be absent or an empty directory.
    pub fn create(path: &Path) -> Result<Self, DatasetError> {
        check_fresh(path)?;
        let existed = path.exists();
        std::fs::create_dir_all(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            existed,
            committed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn commit(mut self) -> PathBuf {
        self.committed = true;
        self.path.clone()
    }
}

impl Drop for FreshOutput {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        tracing::warn!("Removing incomplete output {}", self.path.display());
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            tracing::error!("Failed to remove {}: {}", self.path.display(), e);
            return;
        }
        if self.existed {
            let _ = std::fs::create_dir(&self.path);
        }
    }
}

/// Fail unless `path` is absent or an empty directory. Touches nothing.
pub fn check_fresh(path: &Path) -> Result<(), DatasetError> {
    if !path.exists() {
        return Ok(());
    }
    if path.is_dir() && std::fs::read_dir(path)?.next().is_none() {
        return Ok(());
    }
    Err(DatasetError::DestinationNotEmpty(path.to_path_buf()))
}

/// Fail unless `path` is an existing directory.
pub fn require_dir(path: &Path) -> Result<(), DatasetError> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(DatasetError::SourceMissing(path.to_path_buf()))
    }
}

/// Image files directly inside `dir`, sorted by name. `only_jpg` limits the
/// listing to `.jpg`.
pub fn list_images(dir: &Path, only_jpg: bool) -> Result<Vec<PathBuf>, DatasetError> {
    let mut images = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        let ext = ext.to_ascii_lowercase();
        let wanted = if only_jpg {
            ext == "jpg"
        } else {
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        };
        if wanted {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

/// An image with its label file beside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledImage {
    pub image: PathBuf,
    pub label: PathBuf,
}

impl LabeledImage {
    /// Class name encoded as the stem prefix, e.g. `NEU` for `NEU_0042.jpg`.
    pub fn class_name(&self) -> &str {
        let stem = self
            .image
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        stem.split('_').next().unwrap_or(stem)
    }
}

/// Pair every `*.jpg` in `src` with `<stem>.txt`.
///
/// Returns the pairs and how many images had no label. A missing source or
/// one without any pair is an error.
pub fn labeled_images(src: &Path) -> Result<(Vec<LabeledImage>, usize), DatasetError> {
    require_dir(src)?;

    let mut pairs = Vec::new();
    let mut unpaired = 0;
    for image in list_images(src, true)? {
        let label = image.with_extension("txt");
        if label.is_file() {
            pairs.push(LabeledImage { image, label });
        } else {
            unpaired += 1;
        }
    }

    if pairs.is_empty() {
        return Err(DatasetError::SourceEmpty(src.to_path_buf()));
    }
    Ok((pairs, unpaired))
}

/// Copy a directory tree.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<usize, DatasetError> {
    std::fs::create_dir_all(dst)?;
    let mut copied = 0;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copied += copy_tree(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// File name of `path` as a `Path`, for joining onto another directory.
pub(crate) fn file_name(path: &Path) -> &Path {
    path.file_name().map(Path::new).unwrap_or(path)
}
