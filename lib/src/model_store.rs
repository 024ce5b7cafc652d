use std::collections::{BTreeSet, HashMap};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{ForecastError, Result};
use crate::forecast_model::ForecastModel;
use crate::sequence::MinMaxScaler;

const MODEL_FILE : &str = "model.ot";
const METADATA_FILE : &str = "metadata.json";
const CURRENT_FILE : &str = "CURRENT";
const STAGING_PREFIX : &str = ".staging-";
const VERSION_PREFIX : &str = "v-";
const LOAD_ATTEMPTS : usize = 3;
/// Superseded versions younger than this stay on disk for readers that resolved them just before a swap.
pub const DEFAULT_RETIRED_VERSION_GRACE : Duration = Duration::from_secs(60);

/// Everything persisted next to the model weights. The scaler is only valid for the
/// weights whose checksum is recorded here.
#[derive(Debug, PartialEq, Clone, Deserialize, Serialize)]
pub struct ModelMetadata {
    pub commodity : String,
    pub window_length : usize,
    pub n_features : usize,
    pub scaler : MinMaxScaler,
    pub last_date : NaiveDate,
    pub recent_history : Vec<f64>,
    pub trained_at : DateTime<Utc>,
    #[serde(default)]
    pub model_checksum : String
}

/// Directory of trained models, one sub-directory per lower-cased commodity key.
///
/// A key directory holds immutable version directories and a `CURRENT` file naming the
/// published one. Saving writes a new version and swaps `CURRENT` with a rename, so any
/// reader, in this process or another, resolves either the old pair or the new one.
#[derive(Debug)]
pub struct ModelStore {
    root : PathBuf,
    retired_version_grace : Duration,
    key_locks : Mutex<HashMap<String, Arc<Mutex<()>>>>
}

pub fn normalize_key(key : &str) -> Result<String> {
    let key = key.trim().to_lowercase();
    if key.is_empty() || key.starts_with('.') || key.contains(['/', '\\']) {
        return Err(ForecastError::InvalidArgument(format!("'{}' is not a valid model key", key)));
    }
    Ok(key)
}

fn file_checksum(path : &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

// Model failures other than a missing fit are I/O problems from the store's point of view.
fn as_persistence(key : &str, error : ForecastError) -> ForecastError {
    match error {
        ForecastError::ModelNotTrained => error,
        other => ForecastError::persistence(key, other)
    }
}

fn read_current(key_dir : &Path) -> std::io::Result<Option<String>> {
    match std::fs::read_to_string(key_dir.join(CURRENT_FILE)) {
        Ok(version) => Ok(Some(String::from(version.trim()))),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error)
    }
}

fn is_version_name(name : &str) -> bool {
    name.starts_with(VERSION_PREFIX) && !name.contains(['/', '\\'])
}

fn write_current(key_dir : &Path, version : &str) -> std::io::Result<()> {
    let mut pointer = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempfile_in(key_dir)?;
    pointer.write_all(version.as_bytes())?;
    pointer.as_file().sync_all()?;
    pointer.persist(key_dir.join(CURRENT_FILE)).map_err(|e| e.error)?;
    Ok(())
}

impl ModelStore {
    pub fn open(root : impl Into<PathBuf>) -> Result<ModelStore> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| ForecastError::persistence(&root.display().to_string(), e))?;
        Ok(ModelStore { root, retired_version_grace : DEFAULT_RETIRED_VERSION_GRACE, key_locks : Mutex::new(HashMap::new()) })
    }

    pub fn with_retired_version_grace(mut self, grace : Duration) -> ModelStore {
        self.retired_version_grace = grace;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_lock(&self, key : &str) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(String::from(key)).or_default().clone()
    }

    fn is_complete(dir : &Path) -> bool {
        dir.join(MODEL_FILE).is_file() && dir.join(METADATA_FILE).is_file()
    }

    fn published_version(key_dir : &Path) -> Option<PathBuf> {
        read_current(key_dir).ok().flatten()
            .filter(|version| is_version_name(version))
            .map(|version| key_dir.join(version))
            .filter(|dir| ModelStore::is_complete(dir))
    }

    /// Writes the pair into a new version directory and publishes it by swapping the
    /// `CURRENT` pointer. Until the swap, readers keep resolving the previous version.
    /// Returns the metadata as persisted, checksum included.
    pub fn save<M : ForecastModel + ?Sized>(&self, key : &str, model : &M, metadata : &ModelMetadata) -> Result<ModelMetadata> {
        let key = normalize_key(key)?;
        let lock = self.key_lock(&key);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let key_dir = self.root.join(&key);
        std::fs::create_dir_all(&key_dir).map_err(|e| ForecastError::persistence(&key, e))?;
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&key_dir)
            .map_err(|e| ForecastError::persistence(&key, e))?;

        let model_path = staging.path().join(MODEL_FILE);
        model.save(&model_path).map_err(|e| as_persistence(&key, e))?;

        let metadata = ModelMetadata {
            model_checksum : file_checksum(&model_path).map_err(|e| ForecastError::persistence(&key, e))?,
            ..metadata.clone()
        };
        let file = std::fs::File::create(staging.path().join(METADATA_FILE))
            .map_err(|e| ForecastError::persistence(&key, e))?;
        ::serde_json::to_writer_pretty(&file, &metadata).map_err(|e| ForecastError::persistence(&key, e))?;
        file.sync_all().map_err(|e| ForecastError::persistence(&key, e))?;

        let suffix = staging.path().file_name()
            .map(|name| name.to_string_lossy().trim_start_matches(STAGING_PREFIX).to_string())
            .unwrap_or_default();
        let version = format!("{}{}", VERSION_PREFIX, suffix);
        let version_dir = key_dir.join(&version);
        let previous = read_current(&key_dir).ok().flatten();

        std::fs::rename(staging.path(), &version_dir).map_err(|e| ForecastError::persistence(&key, e))?;
        if let Err(error) = write_current(&key_dir, &version) {
            // The previous pointer is untouched, so the old model stays published.
            let _ = std::fs::remove_dir_all(&version_dir);
            return Err(ForecastError::persistence(&key, error));
        }

        self.remove_retired_versions(&key_dir, &version, previous.as_deref());
        info!(key = %key, version = %version, checksum = %metadata.model_checksum, "Saved model to {}", version_dir.display());
        Ok(metadata)
    }

    // Keeps the current and the previous version; older ones go once they are past the grace period.
    fn remove_retired_versions(&self, key_dir : &Path, current : &str, previous : Option<&str>) {
        let entries = match std::fs::read_dir(key_dir) {
            Ok(entries) => entries,
            Err(_) => return
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_version_name(&name) || name == current || Some(name.as_str()) == previous {
                continue;
            }
            let expired = entry.metadata().and_then(|m| m.modified()).ok()
                .and_then(|modified| modified.elapsed().ok())
                .map(|age| age >= self.retired_version_grace)
                .unwrap_or(false);
            if expired {
                if let Err(error) = std::fs::remove_dir_all(entry.path()) {
                    debug!(version = %name, "Could not remove retired model version: {}", error);
                }
            }
        }
    }

    fn load_version<M : ForecastModel + ?Sized>(&self, key : &str, dir : &Path, model : &mut M) -> Result<ModelMetadata> {
        if !ModelStore::is_complete(dir) {
            return Err(ForecastError::ModelNotFound(String::from(key)));
        }

        let model_path = dir.join(MODEL_FILE);
        let file = std::fs::File::open(dir.join(METADATA_FILE)).map_err(|e| ForecastError::persistence(key, e))?;
        let metadata : ModelMetadata = ::serde_json::from_reader(&file).map_err(|e| ForecastError::persistence(key, e))?;

        let checksum = file_checksum(&model_path).map_err(|e| ForecastError::persistence(key, e))?;
        if checksum != metadata.model_checksum {
            return Err(ForecastError::ArtifactMismatch { key : String::from(key),
                reason : format!("weights checksum {} differs from recorded {}", checksum, metadata.model_checksum) });
        }

        model.build(metadata.window_length, metadata.n_features)?;
        model.load(&model_path).map_err(|e| as_persistence(key, e))?;

        let model_window = model.window_length()?;
        if model_window != metadata.window_length {
            return Err(ForecastError::ArtifactMismatch { key : String::from(key),
                reason : format!("model window {} differs from scaler window {}", model_window, metadata.window_length) });
        }
        Ok(metadata)
    }

    /// Builds `model` with the persisted shape and loads the published weights. No
    /// published version, or one missing either file, means there is no model for the key.
    pub fn load<M : ForecastModel + ?Sized>(&self, key : &str, model : &mut M) -> Result<ModelMetadata> {
        let key = normalize_key(key)?;
        let key_dir = self.root.join(&key);

        for attempt in 1..=LOAD_ATTEMPTS {
            let version = match read_current(&key_dir).map_err(|e| ForecastError::persistence(&key, e))? {
                Some(version) => version,
                None => {
                    debug!(key = %key, "No published model in {}", key_dir.display());
                    return Err(ForecastError::ModelNotFound(key));
                }
            };
            if !is_version_name(&version) {
                return Err(ForecastError::ArtifactMismatch { key,
                    reason : format!("'{}' does not name a model version", version) });
            }

            let dir = key_dir.join(&version);
            match self.load_version(&key, &dir, model) {
                // A concurrent save retired the version this attempt resolved; look up the pointer again.
                Err(error) if !ModelStore::is_complete(&dir) => {
                    debug!(key = %key, version = %version, attempt, "Model version vanished while loading: {}", error);
                },
                Ok(metadata) => {
                    debug!(key = %key, version = %version, "Loaded model from {}", dir.display());
                    return Ok(metadata);
                },
                Err(error) => return Err(error)
            }
        }
        Err(ForecastError::ModelNotFound(key))
    }

    pub fn list_available(&self) -> Result<BTreeSet<String>> {
        let entries = std::fs::read_dir(&self.root)
            .map_err(|e| ForecastError::persistence(&self.root.display().to_string(), e))?;

        let mut keys = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| ForecastError::persistence(&self.root.display().to_string(), e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || !entry.path().is_dir() {
                continue;
            }
            if ModelStore::published_version(&entry.path()).is_some() {
                keys.insert(name);
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast_model::tests::DriftModel;
    use crate::forecast_model::MockForecastModel;
    use crate::price_series::tests::day;
    use crate::config::FitOptions;
    use crate::sequence::prepare;
    use mockall::predicate::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;

    fn published_dir(root : &Path, key : &str) -> anyhow::Result<PathBuf> {
        let version = std::fs::read_to_string(root.join(key).join(CURRENT_FILE))?;
        Ok(root.join(key).join(version.trim()))
    }

    fn version_count(root : &Path, key : &str) -> anyhow::Result<usize> {
        let mut count = 0;
        for entry in std::fs::read_dir(root.join(key))? {
            if is_version_name(&entry?.file_name().to_string_lossy()) {
                count += 1;
            }
        }
        Ok(count)
    }

    fn metadata(commodity : &str, scaler : MinMaxScaler, window_length : usize) -> ModelMetadata {
        ModelMetadata { commodity : String::from(commodity), window_length, n_features : 1, scaler,
            last_date : day(39), recent_history : vec!(1.0, 2.0, 3.0), trained_at : Utc::now(),
            model_checksum : String::new() }
    }

    fn trained_drift_model(values : &[f64], window_length : usize) -> Result<(DriftModel, MinMaxScaler)> {
        let (windows, scaler) = prepare(values, window_length)?;
        let mut model = DriftModel::default();
        model.build(window_length, 1)?;
        model.fit(&windows, &FitOptions::default(), &())?;
        Ok((model, scaler))
    }

    #[test]
    fn saved_model_predicts_identically_after_load() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let store = ModelStore::open(root.path())?;
        let values : Vec<f64> = (0..40).map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0 + i as f64).collect();
        let (model, scaler) = trained_drift_model(&values, 5)?;

        store.save("Rice", &model, &metadata("rice", scaler, 5))?;

        let mut loaded = DriftModel::default();
        let loaded_metadata = store.load("rice", &mut loaded)?;

        let input = vec!(scaler.transform_all(&values[35..]));
        assert_eq!(loaded.predict(&input)?, model.predict(&input)?);
        assert_eq!(loaded_metadata.scaler, scaler);
        assert_eq!(loaded_metadata.window_length, 5);
        assert!(!loaded_metadata.model_checksum.is_empty());
        Ok(())
    }

    #[test]
    fn load_of_unknown_key_is_model_not_found() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let store = ModelStore::open(root.path())?;

        let result = store.load("wheat", &mut DriftModel::default());

        assert!(matches!(result, Err(ForecastError::ModelNotFound(key)) if key == "wheat"));
        Ok(())
    }

    #[test]
    fn partial_artifact_is_treated_as_absent() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let store = ModelStore::open(root.path())?;
        let (model, scaler) = trained_drift_model(&[1.0, 2.0, 3.0, 4.0, 5.0], 2)?;
        store.save("corn", &model, &metadata("corn", scaler, 2))?;
        std::fs::remove_file(published_dir(root.path(), "corn")?.join(METADATA_FILE))?;

        let result = store.load("corn", &mut DriftModel::default());

        assert!(matches!(result, Err(ForecastError::ModelNotFound(_))));
        assert!(store.list_available()?.is_empty());
        Ok(())
    }

    #[test]
    fn tampered_weights_fail_the_integrity_check() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let store = ModelStore::open(root.path())?;
        let (model, scaler) = trained_drift_model(&[1.0, 2.0, 4.0, 8.0, 16.0], 2)?;
        store.save("cotton", &model, &metadata("cotton", scaler, 2))?;

        let (other_model, _) = trained_drift_model(&[9.0, 7.0, 5.0, 3.0, 1.0], 2)?;
        other_model.save(&published_dir(root.path(), "cotton")?.join(MODEL_FILE))?;

        let result = store.load("cotton", &mut DriftModel::default());

        assert!(matches!(result, Err(ForecastError::ArtifactMismatch { .. })));
        Ok(())
    }

    #[test]
    fn list_available_reports_complete_pairs_only() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let store = ModelStore::open(root.path())?;
        let (model, scaler) = trained_drift_model(&[1.0, 2.0, 3.0, 4.0], 2)?;
        store.save("rice", &model, &metadata("rice", scaler, 2))?;
        store.save("WHEAT", &model, &metadata("wheat", scaler, 2))?;
        std::fs::create_dir_all(root.path().join("maize"))?;
        std::fs::create_dir_all(root.path().join(".staging-abc"))?;
        std::fs::create_dir_all(root.path().join("potato").join("v-orphan"))?;

        let keys = store.list_available()?;

        assert_eq!(keys.into_iter().collect::<Vec<_>>(), vec!(String::from("rice"), String::from("wheat")));
        Ok(())
    }

    #[test]
    fn saving_again_replaces_the_previous_artifact() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let store = ModelStore::open(root.path())?;
        let (first, first_scaler) = trained_drift_model(&[1.0, 2.0, 3.0, 4.0], 2)?;
        let (second, second_scaler) = trained_drift_model(&[10.0, 8.0, 6.0, 4.0], 2)?;

        store.save("onion", &first, &metadata("onion", first_scaler, 2))?;
        store.save("onion", &second, &metadata("onion", second_scaler, 2))?;

        let mut loaded = DriftModel::default();
        let loaded_metadata = store.load("onion", &mut loaded)?;
        assert_eq!(loaded_metadata.scaler, second_scaler);
        assert_eq!(loaded, second);
        Ok(())
    }

    #[test]
    fn untrained_model_is_not_saved() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let store = ModelStore::open(root.path())?;
        let mut model = MockForecastModel::new();
        model.expect_save()
            .times(1)
            .returning(|_| Err(ForecastError::ModelNotTrained));

        let scaler = MinMaxScaler::fit(&[1.0, 2.0])?;
        let result = store.save("potato", &model, &metadata("potato", scaler, 2));

        assert!(matches!(result, Err(ForecastError::ModelNotTrained)));
        assert!(store.list_available()?.is_empty());
        Ok(())
    }

    #[test]
    fn backend_load_failure_is_a_persistence_error() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let store = ModelStore::open(root.path())?;
        let (model, scaler) = trained_drift_model(&[1.0, 2.0, 3.0, 4.0], 2)?;
        store.save("rice", &model, &metadata("rice", scaler, 2))?;

        let mut failing = MockForecastModel::new();
        failing.expect_build()
            .with(eq(2), eq(1))
            .times(1)
            .returning(|_, _| Ok(()));
        failing.expect_load()
            .times(1)
            .returning(|_| Err(ForecastError::Backend(anyhow::anyhow!("corrupt tensor file"))));

        let result = store.load("rice", &mut failing);

        assert!(matches!(result, Err(ForecastError::Persistence { .. })));
        Ok(())
    }

    #[test]
    fn keys_with_path_components_are_rejected() {
        assert!(matches!(normalize_key("../rice"), Err(ForecastError::InvalidArgument(_))));
        assert!(matches!(normalize_key(".hidden"), Err(ForecastError::InvalidArgument(_))));
        assert!(matches!(normalize_key("  "), Err(ForecastError::InvalidArgument(_))));
        assert_eq!(normalize_key(" Rice ").ok(), Some(String::from("rice")));
    }

    #[test]
    fn failed_save_keeps_the_previous_model_published() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let store = ModelStore::open(root.path())?;
        let (model, scaler) = trained_drift_model(&[1.0, 2.0, 3.0, 4.0], 2)?;
        store.save("rice", &model, &metadata("rice", scaler, 2))?;

        let mut failing = MockForecastModel::new();
        failing.expect_save()
            .times(1)
            .returning(|_| Err(ForecastError::Backend(anyhow::anyhow!("disk full"))));
        let result = store.save("rice", &failing, &metadata("rice", scaler, 2));

        assert!(matches!(result, Err(ForecastError::Persistence { .. })));
        let mut loaded = DriftModel::default();
        store.load("rice", &mut loaded)?;
        assert_eq!(loaded, model);
        assert_eq!(version_count(root.path(), "rice")?, 1);
        Ok(())
    }

    #[test]
    fn replaced_versions_are_removed_after_the_grace_period() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let store = ModelStore::open(root.path())?.with_retired_version_grace(Duration::ZERO);
        let (model, scaler) = trained_drift_model(&[1.0, 2.0, 3.0, 4.0], 2)?;

        for _ in 0..4 {
            store.save("wheat", &model, &metadata("wheat", scaler, 2))?;
        }

        assert_eq!(version_count(root.path(), "wheat")?, 2);
        store.load("wheat", &mut DriftModel::default())?;

        let lingering = ModelStore::open(root.path())?;
        lingering.save("wheat", &model, &metadata("wheat", scaler, 2))?;
        lingering.save("wheat", &model, &metadata("wheat", scaler, 2))?;
        assert_eq!(version_count(root.path(), "wheat")?, 4);
        Ok(())
    }

    #[test]
    fn another_store_on_the_same_root_never_sees_a_missing_model_during_replacement() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let writer = ModelStore::open(root.path())?;
        let reader = ModelStore::open(root.path())?;
        let values : Vec<f64> = (0..20).map(|i| 50.0 + (i as f64 * 0.4).sin() * 3.0 + i as f64).collect();
        let (model, scaler) = trained_drift_model(&values, 4)?;
        writer.save("rice", &model, &metadata("rice", scaler, 4))?;

        let done = AtomicBool::new(false);
        let (saved, loads, failures) = std::thread::scope(|scope| {
            let saving = scope.spawn(|| {
                let result = (0..200).try_for_each(|_| writer.save("rice", &model, &metadata("rice", scaler, 4)).map(|_| ()));
                done.store(true, Ordering::SeqCst);
                result
            });

            let mut loads = 0;
            let mut failures = Vec::new();
            while !done.load(Ordering::SeqCst) {
                let mut loaded = DriftModel::default();
                match reader.load("rice", &mut loaded) {
                    Ok(loaded_metadata) if loaded == model && loaded_metadata.scaler == scaler => loads += 1,
                    Ok(_) => failures.push(String::from("loaded a different model")),
                    Err(error) => failures.push(error.to_string())
                }
            }
            (saving.join(), loads, failures)
        });

        assert!(matches!(saved, Ok(Ok(()))));
        assert!(failures.is_empty(), "{} of {} loads failed: {:?}", failures.len(), loads + failures.len(), failures.first());
        reader.load("rice", &mut DriftModel::default())?;
        Ok(())
    }

    #[test]
    fn saving_one_key_does_not_block_another() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let store = ModelStore::open(root.path())?;
        let (wheat, scaler) = trained_drift_model(&[1.0, 2.0, 3.0, 4.0], 2)?;
        store.save("wheat", &wheat, &metadata("wheat", scaler, 2))?;

        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let mut slow = MockForecastModel::new();
        slow.expect_save()
            .times(1)
            .return_once(move |path| {
                entered_tx.send(()).ok();
                release_rx.recv().ok();
                std::fs::write(path, b"weights").map_err(|e| ForecastError::Backend(e.into()))
            });

        let (saved, other_save, other_load, visible_early) = std::thread::scope(|scope| {
            let saving = scope.spawn(|| store.save("rice", &slow, &metadata("rice", scaler, 2)));
            entered_rx.recv().ok();

            // The rice save is now parked inside its key lock.
            let other_save = store.save("wheat", &wheat, &metadata("wheat", scaler, 2));
            let other_load = store.load("wheat", &mut DriftModel::default());
            let visible_early = store.list_available().map(|keys| keys.contains("rice"));
            release_tx.send(()).ok();

            (saving.join(), other_save, other_load, visible_early)
        });

        assert!(matches!(saved, Ok(Ok(_))));
        assert!(other_save.is_ok());
        assert!(other_load.is_ok());
        assert!(matches!(visible_early, Ok(false)));
        assert!(store.list_available()?.contains("rice"));
        Ok(())
    }
}
