use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use image::GrayImage;
use thiserror::Error;

use crate::shared::constants::{IMAGE_EXTENSIONS, SAMPLE_EXTENSION, UNKNOWN_LABEL};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid label {0:?}")]
    InvalidLabel(String),
    #[error("label not found: {0}")]
    NotFound(String),
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// One stored training image and the label directory it lives in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabeledSample {
    pub label: String,
    pub path: PathBuf,
}

/// Enrollment images on disk: `<root>/<label>/<file>`.
pub struct FaceStore {
    root: PathBuf,
    seq: AtomicU64,
}

impl FaceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            seq: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Labels become directory names, so anything that could escape the root
    /// is rejected. The unknown-face marker is reserved.
    pub fn validate_label(label: &str) -> Result<(), StoreError> {
        let bad = label.trim().is_empty()
            || label.trim().eq_ignore_ascii_case(UNKNOWN_LABEL)
            || label == "."
            || label == ".."
            || label.contains(['/', '\\', '\0']);
        if bad {
            Err(StoreError::InvalidLabel(label.to_string()))
        } else {
            Ok(())
        }
    }

    /// Writes `face` as a new lossless sample for `label` and returns its path.
    pub fn save_sample(&self, label: &str, face: &GrayImage) -> Result<PathBuf, StoreError> {
        Self::validate_label(label)?;
        let dir = self.root.join(label);
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;

        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!("cap_{millis}_{seq:06}.{SAMPLE_EXTENSION}"));

        face.save(&path).map_err(|source| StoreError::Image {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    pub fn delete_label(&self, label: &str) -> Result<(), StoreError> {
        Self::validate_label(label)?;
        let dir = self.root.join(label);
        if !dir.is_dir() {
            return Err(StoreError::NotFound(label.to_string()));
        }
        fs::remove_dir_all(&dir).map_err(|source| StoreError::Io { path: dir, source })
    }

    /// Removes every label directory, leaving an empty root behind.
    pub fn clear(&self) -> Result<(), StoreError> {
        for label in self.labels()? {
            let dir = self.root.join(&label);
            fs::remove_dir_all(&dir).map_err(|source| StoreError::Io { path: dir, source })?;
        }
        fs::create_dir_all(&self.root).map_err(|source| StoreError::Io {
            path: self.root.clone(),
            source,
        })
    }

    /// Label directories under the root, sorted. A missing root has none.
    pub fn labels(&self) -> Result<Vec<String>, StoreError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut labels: Vec<String> = read_dir_sorted(&self.root)?
            .into_iter()
            .filter(|p| p.is_dir())
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
            .collect();
        labels.sort();
        Ok(labels)
    }

    pub fn label_counts(&self) -> Result<BTreeMap<String, usize>, StoreError> {
        let mut counts = BTreeMap::new();
        for label in self.labels()? {
            let n = self.images_of(&label)?.len();
            counts.insert(label, n);
        }
        Ok(counts)
    }

    /// Every stored image: labels sorted, files sorted within each label.
    pub fn scan(&self) -> Result<Vec<LabeledSample>, StoreError> {
        let mut samples = Vec::new();
        for label in self.labels()? {
            for path in self.images_of(&label)? {
                samples.push(LabeledSample {
                    label: label.clone(),
                    path,
                });
            }
        }
        Ok(samples)
    }

    pub fn load_sample(path: &Path) -> Result<GrayImage, StoreError> {
        let img = image::open(path).map_err(|source| StoreError::Image {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(img.to_luma8())
    }

    fn images_of(&self, label: &str) -> Result<Vec<PathBuf>, StoreError> {
        Ok(read_dir_sorted(&self.root.join(label))?
            .into_iter()
            .filter(|p| p.is_file() && has_image_extension(p))
            .collect())
    }
}

fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let io_err = |source| StoreError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths = fs::read_dir(dir)
        .map_err(io_err)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_err)?;
    paths.sort();
    Ok(paths)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn face() -> GrayImage {
        GrayImage::from_fn(16, 16, |x, y| image::Luma([(x * 16 + y) as u8]))
    }

    #[rstest]
    #[case("alice", true)]
    #[case("Bob Smith", true)]
    #[case("", false)]
    #[case("   ", false)]
    #[case(".", false)]
    #[case("..", false)]
    #[case("a/b", false)]
    #[case("a\\b", false)]
    #[case("unknown", false)]
    #[case("Unknown ", false)]
    #[case("unknown2", true)]
    fn test_validate_label(#[case] label: &str, #[case] ok: bool) {
        assert_eq!(FaceStore::validate_label(label).is_ok(), ok);
    }

    #[test]
    fn test_save_sample_writes_png_under_label() {
        let tmp = TempDir::new().unwrap();
        let store = FaceStore::new(tmp.path());

        let path = store.save_sample("alice", &face()).unwrap();
        assert!(path.starts_with(tmp.path().join("alice")));
        assert_eq!(path.extension().unwrap(), "png");

        let loaded = FaceStore::load_sample(&path).unwrap();
        assert_eq!(loaded, face());
    }

    #[test]
    fn test_consecutive_samples_get_distinct_names() {
        let tmp = TempDir::new().unwrap();
        let store = FaceStore::new(tmp.path());
        let a = store.save_sample("alice", &face()).unwrap();
        let b = store.save_sample("alice", &face()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_scan_is_sorted_and_filters_extensions() {
        let tmp = TempDir::new().unwrap();
        for (label, file) in [("bob", "b.png"), ("alice", "z.jpg"), ("alice", "a.jpeg")] {
            let dir = tmp.path().join(label);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(file), b"x").unwrap();
        }
        fs::write(tmp.path().join("alice").join("notes.txt"), b"x").unwrap();

        let samples = FaceStore::new(tmp.path()).scan().unwrap();
        let names: Vec<(String, String)> = samples
            .iter()
            .map(|s| {
                let file = s.path.file_name().unwrap().to_string_lossy().to_string();
                (s.label.clone(), file)
            })
            .collect();
        assert_eq!(
            names,
            vec![
                ("alice".to_string(), "a.jpeg".to_string()),
                ("alice".to_string(), "z.jpg".to_string()),
                ("bob".to_string(), "b.png".to_string()),
            ]
        );
    }

    #[test]
    fn test_missing_root_has_no_labels() {
        let tmp = TempDir::new().unwrap();
        let store = FaceStore::new(tmp.path().join("absent"));
        assert!(store.labels().unwrap().is_empty());
        assert!(store.scan().unwrap().is_empty());
    }

    #[test]
    fn test_delete_label() {
        let tmp = TempDir::new().unwrap();
        let store = FaceStore::new(tmp.path());
        store.save_sample("alice", &face()).unwrap();
        store.save_sample("bob", &face()).unwrap();

        store.delete_label("alice").unwrap();
        assert_eq!(store.labels().unwrap(), vec!["bob".to_string()]);
    }

    #[test]
    fn test_delete_missing_label_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = FaceStore::new(tmp.path());
        assert!(matches!(
            store.delete_label("ghost"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_clear_removes_everything() {
        let tmp = TempDir::new().unwrap();
        let store = FaceStore::new(tmp.path());
        store.save_sample("alice", &face()).unwrap();
        store.save_sample("bob", &face()).unwrap();

        store.clear().unwrap();
        assert!(store.labels().unwrap().is_empty());
        assert!(tmp.path().is_dir());
    }

    #[test]
    fn test_label_counts() {
        let tmp = TempDir::new().unwrap();
        let store = FaceStore::new(tmp.path());
        store.save_sample("alice", &face()).unwrap();
        store.save_sample("alice", &face()).unwrap();
        store.save_sample("bob", &face()).unwrap();

        let counts = store.label_counts().unwrap();
        assert_eq!(counts.get("alice"), Some(&2));
        assert_eq!(counts.get("bob"), Some(&1));
    }
}
