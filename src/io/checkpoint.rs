//! Durable in-progress slots for the trip being recorded
//!
//! One fixed file per sequence kind. Every write replaces the whole slot so
//! a crash leaves either the previous or the new checkpoint, never a mix.

use crate::domain::archive::{decode_locations, decode_motions, encode_locations, encode_motions};
use crate::domain::samples::{LocationSample, MotionSample};
use crate::io::storage::{remove_if_exists, write_atomic, StorageResult};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const LOCATIONS_CHECKPOINT: &str = "locations-in-progress.json";
pub const MOTIONS_CHECKPOINT: &str = "motions-in-progress.json";

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn locations_path(&self) -> PathBuf {
        self.dir.join(LOCATIONS_CHECKPOINT)
    }

    fn motions_path(&self) -> PathBuf {
        self.dir.join(MOTIONS_CHECKPOINT)
    }

    /// True when an in-progress trip was left on disk
    pub fn exists(&self) -> bool {
        self.locations_path().exists() || self.motions_path().exists()
    }

    pub fn save_locations(&self, samples: &[LocationSample]) -> StorageResult<()> {
        let bytes = encode_locations(samples)?;
        write_atomic(&self.locations_path(), &bytes)?;
        debug!(samples = %samples.len(), bytes = %bytes.len(), "locations_checkpointed");
        Ok(())
    }

    pub fn save_motions(&self, samples: &[MotionSample]) -> StorageResult<()> {
        let bytes = encode_motions(samples)?;
        write_atomic(&self.motions_path(), &bytes)?;
        debug!(samples = %samples.len(), bytes = %bytes.len(), "motions_checkpointed");
        Ok(())
    }

    /// Checkpointed locations, empty when no slot exists
    pub fn load_locations(&self) -> StorageResult<Vec<LocationSample>> {
        match read_optional(&self.locations_path())? {
            Some(bytes) => Ok(decode_locations(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    /// Checkpointed motions, empty when no slot exists
    pub fn load_motions(&self) -> StorageResult<Vec<MotionSample>> {
        match read_optional(&self.motions_path())? {
            Some(bytes) => Ok(decode_motions(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    /// Delete both slots
    pub fn clear(&self) -> StorageResult<()> {
        remove_if_exists(&self.locations_path())?;
        remove_if_exists(&self.motions_path())?;
        debug!(dir = %self.dir.display(), "checkpoints_cleared");
        Ok(())
    }
}

fn read_optional(path: &Path) -> std::io::Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::samples::{Confidence, MotionKind};
    use crate::io::storage::StorageError;
    use chrono::{TimeZone, Utc};

    fn location(secs: i64) -> LocationSample {
        LocationSample::new(43.47, -80.54, Utc.timestamp_opt(secs, 0).unwrap())
            .with_speed(1.5, None)
            .with_accuracy(8.0)
    }

    #[test]
    fn test_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        assert!(!store.exists());
        assert!(store.load_locations().unwrap().is_empty());
        assert!(store.load_motions().unwrap().is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        let locations = vec![location(1_600_000_000), location(1_600_000_005)];
        store.save_locations(&locations).unwrap();
        assert!(store.exists());

        let loaded = store.load_locations().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].timestamp, locations[1].timestamp);
        assert_eq!(loaded[0].accuracy, 8.0);

        let motion = MotionSample::new(
            MotionKind::Cycling,
            Confidence::High,
            Utc.timestamp_opt(1_600_000_001, 0).unwrap(),
        );
        store.save_motions(std::slice::from_ref(&motion)).unwrap();
        assert_eq!(store.load_motions().unwrap(), vec![motion]);
    }

    #[test]
    fn test_motions_alone_count_as_open() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        store.save_motions(&[]).unwrap();
        assert!(store.exists());
    }

    #[test]
    fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        store.save_locations(&[location(1_600_000_000)]).unwrap();

        store.clear().unwrap();
        assert!(!store.exists());
        // Clearing twice is fine
        store.clear().unwrap();
    }

    #[test]
    fn test_corrupt_slot_is_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        std::fs::write(dir.path().join(LOCATIONS_CHECKPOINT), b"[{\"lat\":").unwrap();

        assert!(matches!(store.load_locations(), Err(StorageError::Serialization(_))));
    }
}
