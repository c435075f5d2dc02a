//! On-disk record format for checkpoints and finalized trip archives
//!
//! Both checkpoints and archives are a JSON array of flat records. Locations
//! are narrowed to f32 on the way out; timestamps are whole unix seconds.

use crate::domain::samples::{Confidence, LocationSample, MotionKind, MotionSample};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp layout embedded in archive filenames
const NAME_TIME_FORMAT: &str = "%Y-%m-%d_%H:%M:%S";
/// Length of a formatted filename timestamp, e.g. `2020-10-27_12:00:00`
const NAME_TIME_LEN: usize = 19;
const ARCHIVE_EXT: &str = ".json";
const SPAN_SEPARATOR: &str = "_to_";

/// Owner tag used when no identity has been supplied
pub const ANONYMOUS_OWNER: &str = "anonymous";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub lat: f32,
    pub lon: f32,
    pub heading: f32,
    pub speed: f32,
    pub timestamp: i64,
    pub accuracy: f32,
}

impl From<&LocationSample> for LocationRecord {
    fn from(sample: &LocationSample) -> Self {
        Self {
            lat: sample.latitude as f32,
            lon: sample.longitude as f32,
            heading: sample.heading as f32,
            speed: sample.speed as f32,
            timestamp: sample.timestamp.timestamp(),
            accuracy: sample.accuracy as f32,
        }
    }
}

impl LocationRecord {
    pub fn to_sample(&self) -> LocationSample {
        LocationSample {
            latitude: self.lat as f64,
            longitude: self.lon as f64,
            heading: self.heading as f64,
            speed: self.speed as f64,
            accuracy: self.accuracy as f64,
            speed_accuracy: None,
            timestamp: unix_seconds(self.timestamp),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionRecord {
    pub activity: MotionKind,
    pub timestamp: i64,
}

impl From<&MotionSample> for MotionRecord {
    fn from(sample: &MotionSample) -> Self {
        Self { activity: sample.kind, timestamp: sample.started_at.timestamp() }
    }
}

impl MotionRecord {
    /// Only high-confidence motions are ever recorded, so the confidence is implied
    pub fn to_sample(&self) -> MotionSample {
        MotionSample::new(self.activity, Confidence::High, unix_seconds(self.timestamp))
    }
}

fn unix_seconds(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

pub fn encode_locations(samples: &[LocationSample]) -> serde_json::Result<Vec<u8>> {
    let records: Vec<LocationRecord> = samples.iter().map(LocationRecord::from).collect();
    serde_json::to_vec(&records)
}

pub fn decode_locations(bytes: &[u8]) -> serde_json::Result<Vec<LocationSample>> {
    let records: Vec<LocationRecord> = serde_json::from_slice(bytes)?;
    Ok(records.iter().map(LocationRecord::to_sample).collect())
}

pub fn encode_motions(samples: &[MotionSample]) -> serde_json::Result<Vec<u8>> {
    let records: Vec<MotionRecord> = samples.iter().map(MotionRecord::from).collect();
    serde_json::to_vec(&records)
}

pub fn decode_motions(bytes: &[u8]) -> serde_json::Result<Vec<MotionSample>> {
    let records: Vec<MotionRecord> = serde_json::from_slice(bytes)?;
    Ok(records.iter().map(MotionRecord::to_sample).collect())
}

/// Which sample sequence an archive holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveKind {
    Locations,
    Motions,
}

impl ArchiveKind {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveKind::Locations => "tripLocations",
            ArchiveKind::Motions => "tripMotions",
        }
    }

    fn from_prefix(s: &str) -> Option<Self> {
        match s {
            "tripLocations" => Some(ArchiveKind::Locations),
            "tripMotions" => Some(ArchiveKind::Motions),
            _ => None,
        }
    }
}

/// Whether `owner` can be embedded in an archive filename and a remote key
pub fn is_valid_owner(owner: &str) -> bool {
    !owner.is_empty()
        && owner != "."
        && owner != ".."
        && !owner.chars().any(|c| c == '/' || c == '\\' || c.is_control())
}

/// Structured form of `{kind}_{owner}_{start}_to_{end}.json`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveName {
    pub kind: ArchiveKind,
    pub owner: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ArchiveName {
    pub fn new(kind: ArchiveKind, owner: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { kind, owner: owner.to_string(), start, end }
    }

    /// Derived filename; a pure function of (kind, owner, start, end)
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}{}{}{}",
            self.kind.as_str(),
            self.owner,
            self.start.format(NAME_TIME_FORMAT),
            SPAN_SEPARATOR,
            self.end.format(NAME_TIME_FORMAT),
            ARCHIVE_EXT
        )
    }

    /// Parse a filename produced by [`ArchiveName::file_name`].
    ///
    /// Owners may themselves contain underscores, so the timestamps are peeled
    /// off the end first and the kind off the front.
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(ARCHIVE_EXT)?;
        let (head, end_str) = stem.rsplit_once(SPAN_SEPARATOR)?;
        let split_at = head.len().checked_sub(NAME_TIME_LEN)?;
        if end_str.len() != NAME_TIME_LEN || split_at == 0 || !head.is_char_boundary(split_at) {
            return None;
        }
        let (prefix, start_str) = head.split_at(split_at);
        let prefix = prefix.strip_suffix('_')?;
        let (kind_str, owner) = prefix.split_once('_')?;
        if owner.is_empty() {
            return None;
        }

        Some(Self {
            kind: ArchiveKind::from_prefix(kind_str)?,
            owner: owner.to_string(),
            start: parse_name_time(start_str)?,
            end: parse_name_time(end_str)?,
        })
    }
}

fn parse_name_time(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, NAME_TIME_FORMAT).ok().map(|naive| naive.and_utc())
}

/// Payload of a finalized archive
#[derive(Debug, Clone, PartialEq)]
pub enum ArchiveContents {
    Locations(Vec<LocationSample>),
    Motions(Vec<MotionSample>),
}

/// An immutable, named record of one completed trip
#[derive(Debug, Clone, PartialEq)]
pub struct TripArchive {
    name: ArchiveName,
    contents: ArchiveContents,
}

impl TripArchive {
    pub fn locations(owner: &str, samples: Vec<LocationSample>) -> Option<Self> {
        let (start, end) = span(&samples)?;
        Some(Self {
            name: ArchiveName::new(ArchiveKind::Locations, owner, start, end),
            contents: ArchiveContents::Locations(samples),
        })
    }

    /// Motion archives share the span of the trip's locations so that the pair
    /// sorts and uploads together.
    pub fn motions(
        owner: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        samples: Vec<MotionSample>,
    ) -> Self {
        Self {
            name: ArchiveName::new(ArchiveKind::Motions, owner, start, end),
            contents: ArchiveContents::Motions(samples),
        }
    }

    pub fn name(&self) -> &ArchiveName {
        &self.name
    }

    pub fn file_name(&self) -> String {
        self.name.file_name()
    }

    pub fn contents(&self) -> &ArchiveContents {
        &self.contents
    }

    pub fn len(&self) -> usize {
        match &self.contents {
            ArchiveContents::Locations(v) => v.len(),
            ArchiveContents::Motions(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        match &self.contents {
            ArchiveContents::Locations(v) => encode_locations(v),
            ArchiveContents::Motions(v) => encode_motions(v),
        }
    }
}

/// First and last timestamps of a location sequence
pub fn span(samples: &[LocationSample]) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    Some((samples.first()?.timestamp, samples.last()?.timestamp))
}
