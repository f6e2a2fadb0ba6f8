//! `data.yaml`: where a YOLO dataset's splits live and what its classes are.

use crate::error::DatasetError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "data.yaml";

/// Leukocyte classes of the thesis dataset, in class-index order.
pub const BLOOD_CELL_CLASSES: [&str; 5] = ["BAS", "EOS", "NEU", "LIM", "MON"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetManifest {
    /// Dataset root; split paths are relative to it
    pub path: PathBuf,
    pub train: String,
    pub val: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<String>,
    pub names: BTreeMap<u32, String>,
}

impl DatasetManifest {
    /// The standard `images/<split>` layout with the blood-cell classes.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            path: root.into(),
            train: "images/train".to_string(),
            val: "images/val".to_string(),
            test: Some("images/test".to_string()),
            names: BLOOD_CELL_CLASSES
                .iter()
                .enumerate()
                .map(|(i, name)| (i as u32, name.to_string()))
                .collect(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, DatasetError> {
        if !path.is_file() {
            return Err(DatasetError::SourceMissing(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&text)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), DatasetError> {
        std::fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    /// Same dataset, moved to `root`.
    pub fn with_root(&self, root: impl Into<PathBuf>) -> Self {
        Self {
            path: root.into(),
            ..self.clone()
        }
    }

    /// `(split name, image dir, label dir)` for every split present.
    pub fn split_dirs(&self) -> Vec<(&'static str, PathBuf, PathBuf)> {
        let mut dirs = vec![
            ("train", self.resolve(&self.train)),
            ("val", self.resolve(&self.val)),
        ];
        if let Some(test) = &self.test {
            dirs.push(("test", self.resolve(test)));
        }
        dirs.into_iter()
            .map(|(split, images)| {
                let labels = label_dir_for(&images);
                (split, images, labels)
            })
            .collect()
    }

    fn resolve(&self, split: &str) -> PathBuf {
        self.path.join(split)
    }
}

/// YOLO convention: swap the last `images` component for `labels`.
pub fn label_dir_for(images: &Path) -> PathBuf {
    let parts: Vec<_> = images.components().collect();
    let Some(pos) = parts.iter().rposition(|c| c.as_os_str() == "images") else {
        return images.to_path_buf();
    };
    parts
        .iter()
        .enumerate()
        .map(|(i, c)| {
            if i == pos {
                Path::new("labels")
            } else {
                Path::new(c.as_os_str())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MANIFEST_FILE);
        let manifest = DatasetManifest::new(dir.path());
        manifest.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("train: images/train"));
        assert!(text.contains("0: BAS"));

        assert_eq!(DatasetManifest::load(&path).unwrap(), manifest);
    }

    #[test]
    fn test_load_foreign_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MANIFEST_FILE);
        std::fs::write(
            &path,
            "path: /data/ds\ntrain: images/train\nval: images/val\nnames:\n  0: BAS\n  1: EOS\n",
        )
        .unwrap();
        let manifest = DatasetManifest::load(&path).unwrap();
        assert_eq!(manifest.test, None);
        assert_eq!(manifest.names.len(), 2);
        assert_eq!(manifest.split_dirs().len(), 2);
    }

    #[test]
    fn test_with_root_and_split_dirs() {
        let manifest = DatasetManifest::new("/a").with_root("/b");
        let dirs = manifest.split_dirs();
        assert_eq!(dirs[0].1, PathBuf::from("/b/images/train"));
        assert_eq!(dirs[2].2, PathBuf::from("/b/labels/test"));
    }

    #[test]
    fn test_label_dir_for() {
        assert_eq!(
            label_dir_for(Path::new("/x/images/val")),
            PathBuf::from("/x/labels/val")
        );
        assert_eq!(label_dir_for(Path::new("/x/pics")), PathBuf::from("/x/pics"));
    }
}
