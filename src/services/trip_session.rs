//! Trip session lifecycle: start, append, checkpoint, finalize
//!
//! A session is either closed or open. While open every accepted sample is
//! followed by a full checkpoint rewrite of its sequence, so a crash loses at
//! most the sample being written. `stop` turns the accumulated data into one
//! or two immutable archives and clears the checkpoints.

use crate::domain::archive::{is_valid_owner, span, TripArchive, ANONYMOUS_OWNER};
use crate::domain::samples::{LocationSample, MotionSample};
use crate::io::archive_store::ArchiveStore;
use crate::io::checkpoint::CheckpointStore;
use crate::io::storage::{StorageError, StorageResult};
use smallvec::SmallVec;
use tracing::{info, warn};

/// Filenames written by one `stop`: locations, then motions when present
pub type FinalizedArchives = SmallVec<[String; 2]>;

pub struct TripSession {
    checkpoints: CheckpointStore,
    archives: ArchiveStore,
    owner: String,
    /// In-memory lifecycle flag; `is_open` asks the disk instead
    active: bool,
    locations: Vec<LocationSample>,
    motions: Vec<MotionSample>,
}

impl TripSession {
    pub fn new(checkpoints: CheckpointStore, archives: ArchiveStore) -> Self {
        Self {
            checkpoints,
            archives,
            owner: ANONYMOUS_OWNER.to_string(),
            active: false,
            locations: Vec::new(),
            motions: Vec::new(),
        }
    }

    /// Open the session, resuming from checkpoints when a previous run left
    /// an in-progress trip behind.
    pub fn start(&mut self, owner: Option<&str>) -> StorageResult<()> {
        if self.active {
            return Err(StorageError::InvalidState("trip already open"));
        }
        let owner = owner.unwrap_or(ANONYMOUS_OWNER);
        if !is_valid_owner(owner) {
            return Err(StorageError::InvalidState("owner identity not usable in a filename"));
        }

        let resumed = self.checkpoints.exists();
        let locations = self.checkpoints.load_locations()?;
        let motions = self.checkpoints.load_motions()?;
        if !resumed {
            // Claim the slot so the trip counts as open across a restart
            self.checkpoints.save_locations(&locations)?;
        }

        self.locations = locations;
        self.motions = motions;
        self.owner = owner.to_string();
        self.active = true;

        info!(
            owner = %self.owner,
            resumed = %resumed,
            locations = %self.locations.len(),
            motions = %self.motions.len(),
            "trip_started"
        );
        Ok(())
    }

    /// Append a fix and rewrite the location checkpoint. On a failed write the
    /// sample stays in memory and the next append retries the full rewrite.
    pub fn append_location(&mut self, sample: LocationSample) -> StorageResult<()> {
        if !self.active {
            return Err(StorageError::InvalidState("no open trip"));
        }
        self.locations.push(sample);
        self.checkpoints.save_locations(&self.locations)
    }

    /// Append a motion reading. Returns `Ok(false)` when the reading is not
    /// confident enough to keep.
    pub fn append_motion(&mut self, sample: MotionSample) -> StorageResult<bool> {
        if !self.active {
            return Err(StorageError::InvalidState("no open trip"));
        }
        if !sample.is_reliable() {
            return Ok(false);
        }
        self.motions.push(sample);
        self.checkpoints.save_motions(&self.motions)?;
        Ok(true)
    }

    /// Close the session. Writes the archives when any location was recorded;
    /// on failure the session stays open with its data intact.
    pub fn stop(&mut self) -> StorageResult<FinalizedArchives> {
        if !self.active {
            return Err(StorageError::InvalidState("no open trip"));
        }

        let mut written = FinalizedArchives::new();
        if let Some((start, end)) = span(&self.locations) {
            if let Some(archive) = TripArchive::locations(&self.owner, self.locations.clone()) {
                written.push(self.archives.write(&archive)?);
            }
            if !self.motions.is_empty() {
                let archive =
                    TripArchive::motions(&self.owner, start, end, self.motions.clone());
                written.push(self.archives.write(&archive)?);
            }
        } else if !self.motions.is_empty() {
            warn!(motions = %self.motions.len(), "trip_motions_discarded_without_locations");
        }

        self.checkpoints.clear()?;

        info!(
            owner = %self.owner,
            locations = %self.locations.len(),
            motions = %self.motions.len(),
            archives = %written.len(),
            "trip_stopped"
        );

        self.locations.clear();
        self.motions.clear();
        self.active = false;
        Ok(written)
    }

    /// Whether an in-progress trip exists on disk. Correct right after a
    /// restart, before `start` has been called again.
    pub fn is_open(&self) -> bool {
        self.checkpoints.exists()
    }

    /// Whether this process has the session open
    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn locations(&self) -> &[LocationSample] {
        &self.locations
    }

    pub fn location_count(&self) -> usize {
        self.locations.len()
    }

    pub fn motion_count(&self) -> usize {
        self.motions.len()
    }

    pub fn archives(&self) -> &ArchiveStore {
        &self.archives
    }
}
