//! Record model: one posted opportunity.
//!
//! A `Record` can only exist with a non-empty `id` and `title`. Both the
//! extractor and the seen-store loader go through [`Record::new`] (the loader
//! via `TryFrom<RawRecord>`), so an invalid entry is rejected at the boundary
//! instead of flowing downstream half-filled.

use chrono::{DateTime, Local, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

/// Sentinel used when the posting time could not be read.
pub const UNKNOWN_TIME_POSTED: &str = "Unknown";

/// Timestamp layout of `detected_at` in the seen-store file.
pub const DETECTED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// `detected_at` is wall-clock time in the host's local zone, without offset.
pub fn detected_at(now: DateTime<Utc>) -> NaiveDateTime {
    now.with_timezone(&Local).naive_local()
}

/// Visual status of a record on the dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordStatus {
    #[default]
    Posted,

    /// The card carried the "new" badge.
    #[serde(rename = "New Project", alias = "New")]
    New,
}

/// Reason a record was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidRecord {
    #[error("record id is empty")]
    MissingId,

    #[error("record title is empty")]
    MissingTitle,
}

/// One opportunity as extracted from the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRecord")]
pub struct Record {
    id: String,
    title: String,
    pub categories: Vec<String>,
    pub description: String,
    pub location: String,
    pub time_posted: String,
    pub status: RecordStatus,
    #[serde(serialize_with = "serialize_detected_at")]
    detected_at: NaiveDateTime,
}

impl Record {
    /// Build a record with every optional field at its default.
    ///
    /// `id` and `title` are trimmed; either being empty afterwards is an error.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        detected_at: NaiveDateTime,
    ) -> Result<Self, InvalidRecord> {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            return Err(InvalidRecord::MissingId);
        }
        let title = title.into().trim().to_string();
        if title.is_empty() {
            return Err(InvalidRecord::MissingTitle);
        }

        Ok(Self {
            id,
            title,
            categories: Vec::new(),
            description: String::new(),
            location: String::new(),
            time_posted: UNKNOWN_TIME_POSTED.to_string(),
            status: RecordStatus::Posted,
            detected_at,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Set once at extraction time.
    pub fn detected_at(&self) -> NaiveDateTime {
        self.detected_at
    }

    pub fn is_new(&self) -> bool {
        self.status == RecordStatus::New
    }
}

fn serialize_detected_at<S: Serializer>(
    value: &NaiveDateTime,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&value.format(DETECTED_AT_FORMAT))
}

/// Loose on-disk shape. Everything is optional here; validation happens in
/// `TryFrom<RawRecord> for Record`.
#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    categories: Option<Vec<String>>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    time_posted: Option<String>,
    #[serde(default)]
    status: Option<RecordStatus>,
    #[serde(default)]
    detected_at: Option<String>,
}

impl TryFrom<RawRecord> for Record {
    type Error = InvalidRecord;

    fn try_from(raw: RawRecord) -> Result<Self, Self::Error> {
        let detected_at = raw
            .detected_at
            .as_deref()
            .and_then(parse_detected_at)
            .unwrap_or_default();

        let mut record = Record::new(
            raw.id.unwrap_or_default(),
            raw.title.unwrap_or_default(),
            detected_at,
        )?;
        record.categories = raw.categories.unwrap_or_default();
        record.description = raw.description.unwrap_or_default();
        record.location = raw.location.unwrap_or_default();
        record.time_posted = raw
            .time_posted
            .unwrap_or_else(|| UNKNOWN_TIME_POSTED.to_string());
        record.status = raw.status.unwrap_or_default();
        Ok(record)
    }
}

fn parse_detected_at(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, DETECTED_AT_FORMAT)
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|dt| dt.with_timezone(&Local).naive_local())
        })
}
