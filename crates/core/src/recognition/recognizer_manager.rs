use std::sync::{Arc, Mutex, RwLock};

use thiserror::Error;

use crate::recognition::domain::face_recognizer::{FaceRecognizer, RecognizerTrainer};
use crate::recognition::domain::label_registry::LabelRegistry;
use crate::recognition::infrastructure::face_store::{FaceStore, StoreError};

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("failed to scan training data: {0}")]
    Scan(#[from] StoreError),
    #[error("recognizer training failed: {0}")]
    Train(String),
}

/// A label registry and the model trained against it.
///
/// Published as one immutable value so readers can never pair a model with
/// a registry it was not trained on.
#[derive(Default)]
pub struct RecognizerSnapshot {
    pub registry: LabelRegistry,
    /// `None` when there was nothing to train on.
    pub model: Option<Arc<dyn FaceRecognizer>>,
}

impl RecognizerSnapshot {
    pub fn is_trained(&self) -> bool {
        self.model.is_some()
    }
}

/// Outcome of a successful reload.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct ReloadReport {
    pub labels: usize,
    pub samples: usize,
    /// Images that could not be read and were left out.
    pub skipped: usize,
}

/// Owns the active recognizer and swaps it atomically on reload.
pub struct RecognizerManager {
    store: Arc<FaceStore>,
    trainer: Box<dyn RecognizerTrainer>,
    active: RwLock<Arc<RecognizerSnapshot>>,
    reload_lock: Mutex<()>,
}

impl RecognizerManager {
    pub fn new(store: Arc<FaceStore>, trainer: Box<dyn RecognizerTrainer>) -> Self {
        Self {
            store,
            trainer,
            active: RwLock::new(Arc::new(RecognizerSnapshot::default())),
            reload_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<FaceStore> {
        &self.store
    }

    /// The snapshot current at the time of the call. Later reloads do not
    /// affect a snapshot already handed out.
    pub fn snapshot(&self) -> Arc<RecognizerSnapshot> {
        let guard = self.active.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    pub fn labels(&self) -> Vec<String> {
        self.snapshot().registry.labels().to_vec()
    }

    /// Rebuilds registry and model from the store and publishes them together.
    ///
    /// Reloads are serialized. An empty training set publishes an empty
    /// registry with no model. A trainer failure leaves the previous snapshot
    /// in place.
    pub fn reload(&self) -> Result<ReloadReport, TrainingError> {
        let _serial = self.reload_lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut registry = LabelRegistry::new();
        let mut samples = Vec::new();
        let mut ids = Vec::new();
        let mut skipped = 0;

        for sample in self.store.scan()? {
            match FaceStore::load_sample(&sample.path) {
                Ok(img) => {
                    ids.push(registry.id_or_insert(&sample.label));
                    samples.push(img);
                }
                Err(e) => {
                    log::warn!("Skipping training image: {e}");
                    skipped += 1;
                }
            }
        }

        let model = if samples.is_empty() {
            log::info!("No training data under {}", self.store.root().display());
            None
        } else {
            let trained = self
                .trainer
                .train(&samples, &ids)
                .map_err(|e| TrainingError::Train(e.to_string()))?;
            Some(Arc::from(trained))
        };

        let report = ReloadReport {
            labels: registry.len(),
            samples: samples.len(),
            skipped,
        };
        self.publish(RecognizerSnapshot { registry, model });
        log::info!(
            "Recognizer reloaded: {} labels, {} samples, {} skipped",
            report.labels,
            report.samples,
            report.skipped
        );
        Ok(report)
    }

    fn publish(&self, snapshot: RecognizerSnapshot) {
        let mut guard = self.active.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognition::domain::face_recognizer::Prediction;
    use crate::recognition::infrastructure::lbph_recognizer::LbphTrainer;
    use image::GrayImage;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn face(seed: u8) -> GrayImage {
        GrayImage::from_fn(32, 32, |x, y| {
            image::Luma([((x * 7 + y * 13) as u8).wrapping_mul(seed | 1)])
        })
    }

    struct FailingTrainer;

    impl RecognizerTrainer for FailingTrainer {
        fn train(
            &self,
            _samples: &[GrayImage],
            _labels: &[u32],
        ) -> Result<Box<dyn FaceRecognizer>, Box<dyn std::error::Error>> {
            Err("boom".into())
        }
    }

    /// Records the label ids it was trained with.
    struct RecordingTrainer {
        calls: Arc<AtomicUsize>,
        seen: Arc<Mutex<Vec<u32>>>,
    }

    struct ConstRecognizer;

    impl FaceRecognizer for ConstRecognizer {
        fn predict(&self, _face: &GrayImage) -> Result<Prediction, Box<dyn std::error::Error>> {
            Ok(Prediction {
                label_id: 0,
                distance: 0.0,
            })
        }
    }

    impl RecognizerTrainer for RecordingTrainer {
        fn train(
            &self,
            _samples: &[GrayImage],
            labels: &[u32],
        ) -> Result<Box<dyn FaceRecognizer>, Box<dyn std::error::Error>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.seen.lock().unwrap() = labels.to_vec();
            Ok(Box::new(ConstRecognizer))
        }
    }

    fn manager(root: &std::path::Path, trainer: Box<dyn RecognizerTrainer>) -> RecognizerManager {
        RecognizerManager::new(Arc::new(FaceStore::new(root)), trainer)
    }

    #[test]
    fn test_initial_snapshot_is_empty() {
        let tmp = TempDir::new().unwrap();
        let m = manager(tmp.path(), Box::new(LbphTrainer::default()));
        let snap = m.snapshot();
        assert!(snap.registry.is_empty());
        assert!(!snap.is_trained());
    }

    #[test]
    fn test_reload_empty_root_gives_empty_registry_and_no_model() {
        let tmp = TempDir::new().unwrap();
        let m = manager(tmp.path(), Box::new(LbphTrainer::default()));

        let report = m.reload().unwrap();
        assert_eq!(report, ReloadReport::default());
        assert!(m.snapshot().registry.is_empty());
        assert!(m.snapshot().model.is_none());
    }

    #[test]
    fn test_ids_follow_sorted_label_order() {
        let tmp = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let m = manager(
            tmp.path(),
            Box::new(RecordingTrainer {
                calls: calls.clone(),
                seen: seen.clone(),
            }),
        );
        m.store().save_sample("zoe", &face(1)).unwrap();
        m.store().save_sample("adam", &face(2)).unwrap();
        m.store().save_sample("adam", &face(3)).unwrap();

        m.reload().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock().unwrap(), vec![0, 0, 1]);
        assert_eq!(m.labels(), vec!["adam".to_string(), "zoe".to_string()]);
    }

    #[test]
    fn test_unreadable_images_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let m = manager(tmp.path(), Box::new(LbphTrainer::default()));
        m.store().save_sample("alice", &face(5)).unwrap();
        fs::write(tmp.path().join("alice").join("broken.png"), b"not an image").unwrap();

        let report = m.reload().unwrap();
        assert_eq!(report.samples, 1);
        assert_eq!(report.skipped, 1);
        assert!(m.snapshot().is_trained());
    }

    #[test]
    fn test_only_unreadable_images_gives_empty_model() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("alice");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("broken.jpg"), b"junk").unwrap();
        let m = manager(tmp.path(), Box::new(LbphTrainer::default()));

        let report = m.reload().unwrap();
        assert_eq!(report.skipped, 1);
        assert!(m.snapshot().model.is_none());
        assert!(m.labels().is_empty());
    }

    #[test]
    fn test_trainer_failure_keeps_previous_snapshot() {
        let tmp = TempDir::new().unwrap();
        let good = manager(tmp.path(), Box::new(LbphTrainer::default()));
        good.store().save_sample("alice", &face(9)).unwrap();
        good.reload().unwrap();

        let failing = RecognizerManager {
            store: Arc::clone(good.store()),
            trainer: Box::new(FailingTrainer),
            active: RwLock::new(good.snapshot()),
            reload_lock: Mutex::new(()),
        };
        assert!(matches!(failing.reload(), Err(TrainingError::Train(_))));
        assert_eq!(failing.labels(), vec!["alice".to_string()]);
        assert!(failing.snapshot().is_trained());
    }

    #[test]
    fn test_old_snapshot_survives_reload() {
        let tmp = TempDir::new().unwrap();
        let m = manager(tmp.path(), Box::new(LbphTrainer::default()));
        m.store().save_sample("alice", &face(4)).unwrap();
        m.reload().unwrap();
        let before = m.snapshot();

        m.store().delete_label("alice").unwrap();
        m.reload().unwrap();

        assert_eq!(before.registry.labels(), &["alice".to_string()]);
        assert!(before.is_trained());
        assert!(m.labels().is_empty());
    }

    /// Predicts the highest label id it was trained with, so a prediction is
    /// only resolvable in the registry it was trained against.
    struct HighestIdTrainer;

    struct FixedIdRecognizer(u32);

    impl FaceRecognizer for FixedIdRecognizer {
        fn predict(&self, _face: &GrayImage) -> Result<Prediction, Box<dyn std::error::Error>> {
            Ok(Prediction {
                label_id: self.0,
                distance: 0.0,
            })
        }
    }

    impl RecognizerTrainer for HighestIdTrainer {
        fn train(
            &self,
            _samples: &[GrayImage],
            labels: &[u32],
        ) -> Result<Box<dyn FaceRecognizer>, Box<dyn std::error::Error>> {
            let highest = labels.iter().copied().max().ok_or("no labels")?;
            Ok(Box::new(FixedIdRecognizer(highest)))
        }
    }

    #[test]
    fn test_readers_never_see_model_from_another_reload() {
        let tmp = TempDir::new().unwrap();
        let m = Arc::new(manager(tmp.path(), Box::new(HighestIdTrainer)));
        m.store().save_sample("alice", &face(1)).unwrap();
        m.reload().unwrap();

        let writer = {
            let m = Arc::clone(&m);
            std::thread::spawn(move || {
                for _ in 0..50 {
                    m.store().save_sample("bob", &face(2)).unwrap();
                    m.reload().unwrap();
                    m.store().delete_label("bob").unwrap();
                    m.reload().unwrap();
                }
            })
        };

        let query = face(3);
        let mut checked = 0;
        while !writer.is_finished() {
            let snap = m.snapshot();
            if let Some(model) = &snap.model {
                let p = model.predict(&query).unwrap();
                assert!(
                    snap.registry.label(p.label_id).is_some(),
                    "id {} missing from registry {:?}",
                    p.label_id,
                    snap.registry.labels()
                );
                checked += 1;
            }
        }
        writer.join().unwrap();

        assert!(checked > 0);
        assert_eq!(m.labels(), vec!["alice".to_string()]);
    }

    #[test]
    fn test_concurrent_reloads_match_store() {
        let tmp = TempDir::new().unwrap();
        let m = Arc::new(manager(tmp.path(), Box::new(LbphTrainer::default())));
        m.store().save_sample("alice", &face(1)).unwrap();
        m.store().save_sample("bob", &face(2)).unwrap();
        m.store().save_sample("bob", &face(3)).unwrap();

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let m = Arc::clone(&m);
                std::thread::spawn(move || m.reload().unwrap())
            })
            .collect();
        for h in handles {
            let report = h.join().unwrap();
            assert_eq!(report.samples, 3);
        }

        assert_eq!(m.labels(), m.store().labels().unwrap());
        assert_eq!(m.labels(), vec!["alice".to_string(), "bob".to_string()]);
        assert!(m.snapshot().is_trained());
    }

    #[test]
    fn test_enrolled_face_is_recognized_after_reload() {
        let tmp = TempDir::new().unwrap();
        let m = manager(tmp.path(), Box::new(LbphTrainer::default()));
        let alice = face(11);
        m.store().save_sample("alice", &alice).unwrap();
        m.reload().unwrap();

        let snap = m.snapshot();
        let p = snap.model.as_ref().unwrap().predict(&alice).unwrap();
        assert_eq!(snap.registry.label(p.label_id), Some("alice"));
        assert!(p.distance < 11.0);
    }
}
