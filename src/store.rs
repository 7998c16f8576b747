//! Sharded, file-backed estimate store.
//!
//! Each shard is one JSON document mapping first stop id to a map of second
//! stop id to estimated seconds, holding every stop-pair whose first stop
//! shares the shard's two-character prefix. All shard file access is
//! serialized through a single process-wide lock; the lock section is
//! synchronous and documents are replaced via a rename so a partial shard is
//! never observable.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;

/// Weight given to the existing estimate when blending in a new sample.
pub const BLEND_HISTORY_WEIGHT: f64 = 9.0;
/// Segments longer than this may have an implausibly fast prior replaced.
pub const OVERRIDE_DISTANCE_KM: f64 = 1.5;
/// Prior estimates below this (and below the new sample) count as implausible.
pub const OVERRIDE_FLOOR_SECONDS: f64 = 2.0;

type ShardDocument = BTreeMap<String, BTreeMap<String, f64>>;

/// Logical shard context, mapped onto a directory under the store root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shard {
    /// All-time estimates.
    AllTime,
    /// Estimates partitioned by weekday (0 = Sunday) and hour of day.
    Hourly { weekday: u32, hour: u32 },
    /// Historical first-vehicle-of-the-day bounds.
    FirstBus,
    /// Historical last-vehicle-of-the-day bounds.
    LastBus,
}

impl Shard {
    fn dir(&self) -> PathBuf {
        match self {
            Shard::AllTime => PathBuf::from("times"),
            Shard::Hourly { weekday, hour } => {
                PathBuf::from("times_hourly").join(weekday.to_string()).join(hour.to_string())
            }
            Shard::FirstBus => PathBuf::from("first_bus_times"),
            Shard::LastBus => PathBuf::from("last_bus_times"),
        }
    }
}

/// Shard key prefix: the first two characters of the first stop identifier.
pub fn shard_prefix(stop_id: &str) -> String {
    stop_id.chars().take(2).collect()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to persist shard {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub struct EstimateStore {
    root: PathBuf,
    lock: Mutex<()>,
}

impl EstimateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Mutex::new(()),
        }
    }

    fn shard_path(&self, shard: Shard, stop_a: &str) -> PathBuf {
        self.root
            .join(shard.dir())
            .join(format!("{}.json", shard_prefix(stop_a)))
    }

    /// Returns the stored estimate for a stop-pair, or `None` when the shard
    /// or the key is absent. A corrupt shard reads as absent.
    pub fn read(&self, shard: Shard, stop_a: &str, stop_b: &str) -> Option<f64> {
        let path = self.shard_path(shard, stop_a);
        let _guard = self.lock.lock().unwrap();
        load_document(&path).get(stop_a)?.get(stop_b).copied()
    }

    /// Folds a new sample into the stored estimate for a stop-pair.
    ///
    /// First sample for a pair is stored as-is. A negative prior is a sentinel
    /// forcing a direct overwrite, as is a prior below
    /// [`OVERRIDE_FLOOR_SECONDS`] (and below the sample) on a segment longer
    /// than [`OVERRIDE_DISTANCE_KM`]. Anything else blends with weight
    /// [`BLEND_HISTORY_WEIGHT`] on the prior.
    pub fn write(
        &self,
        shard: Shard,
        stop_a: &str,
        stop_b: &str,
        sample: f64,
        distance_km: f64,
    ) -> Result<(), StoreError> {
        let path = self.shard_path(shard, stop_a);
        let _guard = self.lock.lock().unwrap();

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|source| StoreError::Io {
                path: path.display().to_string(),
                source,
            })?;
        }

        let mut document = load_document(&path);
        let times = document.entry(stop_a.to_string()).or_default();
        let stored = match times.get(stop_b) {
            None => sample,
            Some(&prev) => reconcile(prev, sample, distance_km),
        };
        times.insert(stop_b.to_string(), stored);

        persist_document(&path, &document).map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })
    }
}

/// Reconciles a new sample with an existing estimate.
fn reconcile(prev: f64, sample: f64, distance_km: f64) -> f64 {
    if prev < 0.0 || (distance_km > OVERRIDE_DISTANCE_KM && prev < OVERRIDE_FLOOR_SECONDS.min(sample))
    {
        sample
    } else {
        (prev * BLEND_HISTORY_WEIGHT + sample) / (BLEND_HISTORY_WEIGHT + 1.0)
    }
}

/// Loads a shard document; absence or a decode failure reads as empty.
fn load_document(path: &Path) -> ShardDocument {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return ShardDocument::new(),
    };

    match serde_json::from_str(&raw) {
        Ok(document) => document,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Shard document undecodable, starting empty");
            ShardDocument::new()
        }
    }
}

/// Writes the full document next to the target and renames it into place.
fn persist_document(path: &Path, document: &ShardDocument) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec(document)?)?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn temp_store(name: &str) -> EstimateStore {
        let root = env::temp_dir().join(format!("eta_segment_sampler_{name}"));
        let _ = fs::remove_dir_all(&root); // clean up any prior run
        EstimateStore::new(root)
    }

    #[test]
    fn test_read_absent_shard() {
        let store = temp_store("read_absent");
        assert_eq!(store.read(Shard::AllTime, "A1", "A2"), None);
    }

    #[test]
    fn test_first_write_stored_as_is() {
        let store = temp_store("first_write");
        store.write(Shard::AllTime, "A1", "A2", 42.5, 0.4).unwrap();
        assert_eq!(store.read(Shard::AllTime, "A1", "A2"), Some(42.5));
    }

    #[test]
    fn test_blend_short_segment() {
        let store = temp_store("blend");
        store.write(Shard::AllTime, "A1", "A2", 90.0, 0.3).unwrap();
        store.write(Shard::AllTime, "A1", "A2", 30.0, 0.3).unwrap();
        let stored = store.read(Shard::AllTime, "A1", "A2").unwrap();
        assert!((stored - 84.0).abs() < 1e-9, "expected (90*9+30)/10, got {stored}");
    }

    #[test]
    fn test_negative_sentinel_forces_overwrite() {
        let store = temp_store("sentinel");
        store.write(Shard::AllTime, "A1", "A2", -1.0, 0.3).unwrap();
        store.write(Shard::AllTime, "A1", "A2", 200.0, 0.3).unwrap();
        assert_eq!(store.read(Shard::AllTime, "A1", "A2"), Some(200.0));
    }

    #[test]
    fn test_implausible_prior_on_long_segment_overwrites() {
        let store = temp_store("implausible");
        store.write(Shard::AllTime, "A1", "A2", 1.0, 2.0).unwrap();
        store.write(Shard::AllTime, "A1", "A2", 300.0, 2.0).unwrap();
        assert_eq!(store.read(Shard::AllTime, "A1", "A2"), Some(300.0));
    }

    #[test]
    fn test_small_prior_on_short_segment_still_blends() {
        let store = temp_store("short_blend");
        store.write(Shard::AllTime, "A1", "A2", 1.0, 0.2).unwrap();
        store.write(Shard::AllTime, "A1", "A2", 11.0, 0.2).unwrap();
        let stored = store.read(Shard::AllTime, "A1", "A2").unwrap();
        assert!((stored - 2.0).abs() < 1e-9, "expected (1*9+11)/10, got {stored}");
    }

    #[test]
    fn test_round_trip_across_reopen() {
        let root = env::temp_dir().join("eta_segment_sampler_reopen");
        let _ = fs::remove_dir_all(&root);

        let store = EstimateStore::new(&root);
        store.write(Shard::AllTime, "A1", "A2", 42.0, 0.4).unwrap();
        store.write(Shard::AllTime, "A1", "B9", 17.0, 0.4).unwrap();
        drop(store);

        let reopened = EstimateStore::new(&root);
        assert_eq!(reopened.read(Shard::AllTime, "A1", "A2"), Some(42.0));
        assert_eq!(reopened.read(Shard::AllTime, "A1", "B9"), Some(17.0));
    }

    #[test]
    fn test_corrupt_shard_reads_as_empty() {
        let store = temp_store("corrupt");
        store.write(Shard::AllTime, "A1", "A2", 42.0, 0.4).unwrap();

        let path = store.shard_path(Shard::AllTime, "A1");
        fs::write(&path, b"{not json").unwrap();

        assert_eq!(store.read(Shard::AllTime, "A1", "A2"), None);
        // A write on top of the corrupt document starts from scratch
        store.write(Shard::AllTime, "A1", "A2", 55.0, 0.4).unwrap();
        assert_eq!(store.read(Shard::AllTime, "A1", "A2"), Some(55.0));
    }

    #[test]
    fn test_hourly_shard_is_independent() {
        let store = temp_store("hourly");
        let hourly = Shard::Hourly { weekday: 3, hour: 8 };

        store.write(Shard::AllTime, "A1", "A2", 100.0, 0.4).unwrap();
        store.write(hourly, "A1", "A2", 60.0, 0.4).unwrap();

        assert_eq!(store.read(Shard::AllTime, "A1", "A2"), Some(100.0));
        assert_eq!(store.read(hourly, "A1", "A2"), Some(60.0));
    }

    #[test]
    fn test_shard_prefix() {
        assert_eq!(shard_prefix("A1B2C3"), "A1");
        assert_eq!(shard_prefix("X"), "X");
    }
}
