//! Finalized trip archives on local storage
//!
//! Archives are immutable once written. Writing the same archive twice
//! produces the same filename and contents, so re-finalizing after a crash
//! between archive write and checkpoint clear is harmless.

use crate::domain::archive::{
    decode_locations, decode_motions, ArchiveKind, ArchiveName, TripArchive,
};
use crate::domain::samples::{LocationSample, MotionSample};
use crate::io::storage::{write_atomic, StorageError, StorageResult};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct ArchiveStore {
    dir: PathBuf,
}

impl ArchiveStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist an archive (create or overwrite by name). Returns its filename.
    pub fn write(&self, archive: &TripArchive) -> StorageResult<String> {
        let file_name = archive.file_name();
        let path = self.path_for(&file_name)?;
        let bytes = archive.encode()?;
        write_atomic(&path, &bytes)?;

        info!(
            archive = %file_name,
            samples = %archive.len(),
            bytes = %bytes.len(),
            "archive_written"
        );
        Ok(file_name)
    }

    /// Archive filenames, optionally for one owner, most recent trip first
    pub fn list(&self, owner: Option<&str>) -> StorageResult<Vec<String>> {
        let mut names = self.scan()?;
        if let Some(owner) = owner {
            names.retain(|(name, _)| name.owner == owner);
        }
        names.sort_by(|(a, a_file), (b, b_file)| {
            b.start.cmp(&a.start).then_with(|| b_file.cmp(a_file))
        });
        Ok(names.into_iter().map(|(_, file)| file).collect())
    }

    /// Parsed names of every archive in the directory (unordered)
    fn scan(&self) -> StorageResult<Vec<(ArchiveName, String)>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Some(file) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            match ArchiveName::parse(&file) {
                Some(name) => names.push((name, file)),
                None => debug!(file = %file, "archive_scan_skipped"),
            }
        }
        Ok(names)
    }

    /// Raw archive bytes, as uploaded
    pub fn read(&self, file_name: &str) -> StorageResult<Vec<u8>> {
        Ok(std::fs::read(self.path_for(file_name)?)?)
    }

    pub fn load_locations(&self, file_name: &str) -> StorageResult<Vec<LocationSample>> {
        Ok(decode_locations(&self.read(file_name)?)?)
    }

    pub fn load_motions(&self, file_name: &str) -> StorageResult<Vec<MotionSample>> {
        Ok(decode_motions(&self.read(file_name)?)?)
    }

    /// Most recent location archive for `owner`, with its filename
    pub fn latest_locations(
        &self,
        owner: Option<&str>,
    ) -> StorageResult<Option<(String, Vec<LocationSample>)>> {
        let latest = self.list(owner)?.into_iter().find(|file| {
            ArchiveName::parse(file).is_some_and(|name| name.kind == ArchiveKind::Locations)
        });
        match latest {
            Some(file) => {
                let samples = self.load_locations(&file)?;
                Ok(Some((file, samples)))
            }
            None => Ok(None),
        }
    }

    /// Only bare archive filenames resolve; anything path-like is rejected
    fn path_for(&self, file_name: &str) -> StorageResult<PathBuf> {
        let path_like = file_name.contains(|c| c == '/' || c == '\\');
        if path_like || ArchiveName::parse(file_name).is_none() {
            return Err(StorageError::InvalidState("not an archive filename"));
        }
        Ok(self.dir.join(file_name))
    }
}
