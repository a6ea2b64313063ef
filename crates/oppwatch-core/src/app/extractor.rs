//! RecordExtractor - ページからレコードを取り出す
//!
//! # 方針
//! - 必須フィールド（id, title）を先に取り、どちらか欠けたらそのカードは捨てる
//! - 任意フィールドはそれぞれ独立に取り、失敗したら既定値に落とす
//! - 1 枚のカードの失敗（stale element など）はバッチ全体を止めない
//! - 自動化プロセス自体の障害（crash / 切断）だけは上に返す

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::PageProfile;
use crate::domain::{ExtractionStatus, Record, RecordStatus, UNKNOWN_TIME_POSTED, record};
use crate::ports::{Clock, DriverError, ElementRef, PageDriver, Selector};

/// Records found on one page load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub records: Vec<Record>,
    pub status: ExtractionStatus,
}

impl Extraction {
    fn timed_out() -> Self {
        Self {
            records: Vec::new(),
            status: ExtractionStatus::TimedOut,
        }
    }
}

/// Error building an extractor from a profile.
#[derive(Debug, thiserror::Error)]
#[error("invalid id pattern {pattern:?}: {source}")]
pub struct InvalidIdPattern {
    pattern: String,
    #[source]
    source: regex::Error,
}

/// Turns the dashboard into validated records.
#[derive(Debug, Clone)]
pub struct RecordExtractor {
    profile: PageProfile,
    id_pattern: Regex,
    wait: Duration,
    clock: Arc<dyn Clock>,
}

impl RecordExtractor {
    pub fn new(
        profile: PageProfile,
        wait: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, InvalidIdPattern> {
        let id_pattern = Regex::new(&profile.id_pattern).map_err(|source| InvalidIdPattern {
            pattern: profile.id_pattern.clone(),
            source,
        })?;
        Ok(Self {
            profile,
            id_pattern,
            wait,
            clock,
        })
    }

    /// Extract every valid record from the current page, in page order.
    ///
    /// A missing card list is `ExtractionStatus::TimedOut` with no records,
    /// not an error. Only fatal driver errors are returned.
    pub async fn extract(&self, page: &dyn PageDriver) -> Result<Extraction, DriverError> {
        if let Err(e) = page.wait_for(&self.profile.card_marker, self.wait).await {
            if e.is_fatal() {
                return Err(e);
            }
            info!(error = %e, "no cards appeared before the extraction timeout");
            return Ok(Extraction::timed_out());
        }

        let containers = page.query_all(None, &self.profile.container).await?;
        let mut records = Vec::new();
        let mut skipped = 0usize;

        for (index, container) in containers.iter().enumerate() {
            match self.extract_container(page, container).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => skipped += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    skipped += 1;
                    warn!(index, error = %e, "skipping card that failed to extract");
                }
            }
        }

        info!(
            containers = containers.len(),
            extracted = records.len(),
            skipped,
            "extracted records"
        );
        Ok(Extraction {
            records,
            status: ExtractionStatus::Found,
        })
    }

    /// `Ok(None)` for noise containers and for cards missing `id` or `title`.
    async fn extract_container(
        &self,
        page: &dyn PageDriver,
        container: &ElementRef,
    ) -> Result<Option<Record>, DriverError> {
        let p = &self.profile;
        let scope = Some(container);

        if page.query_first(scope, &p.record_marker).await?.is_none() {
            return Ok(None);
        }

        // required
        let Some(id) = self.read_id(page, container).await? else {
            debug!(container = %container, "card without a parsable id, discarding");
            return Ok(None);
        };
        let title = match page.query_first(scope, &p.title).await? {
            Some(el) => page.text(&el).await?.trim().to_string(),
            None => String::new(),
        };
        let detected_at = record::detected_at(self.clock.now());
        let mut record = match Record::new(id, title, detected_at) {
            Ok(record) => record,
            Err(e) => {
                debug!(container = %container, reason = %e, "discarding card");
                return Ok(None);
            }
        };

        // optional
        record.categories = optional(
            "categories",
            self.text_of(page, container, &p.categories).await,
            |text| {
                text.map(|t| split_categories(&t, p.category_separator))
                    .unwrap_or_default()
            },
        )?;
        record.description = optional(
            "description",
            self.text_of(page, container, &p.description).await,
            |text| text.map(|t| t.trim().to_string()).unwrap_or_default(),
        )?;
        record.location = optional(
            "location",
            self.text_of(page, container, &p.location).await,
            |text| {
                text.map(|t| t.replace(p.location_strip.as_str(), "").trim().to_string())
                    .unwrap_or_default()
            },
        )?;
        record.time_posted = optional(
            "time_posted",
            self.text_of(page, container, &p.time_posted).await,
            |text| text.map_or_else(|| UNKNOWN_TIME_POSTED.to_string(), |t| clean_time_posted(&t)),
        )?;
        record.status = optional(
            "status",
            page.query_first(scope, &p.new_badge).await,
            |badge| {
                if badge.is_some() {
                    RecordStatus::New
                } else {
                    RecordStatus::Posted
                }
            },
        )?;

        Ok(Some(record))
    }

    /// Parse the id out of the machine-readable attribute, never display text.
    async fn read_id(
        &self,
        page: &dyn PageDriver,
        container: &ElementRef,
    ) -> Result<Option<String>, DriverError> {
        let Some(el) = page.query_first(Some(container), &self.profile.id_element).await? else {
            return Ok(None);
        };
        let Some(raw) = page.attribute(&el, &self.profile.id_attribute).await? else {
            return Ok(None);
        };
        Ok(self
            .id_pattern
            .captures(&raw)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string()))
    }

    async fn text_of(
        &self,
        page: &dyn PageDriver,
        container: &ElementRef,
        selector: &Selector,
    ) -> Result<Option<String>, DriverError> {
        match page.query_first(Some(container), selector).await? {
            Some(el) => Ok(Some(page.text(&el).await?)),
            None => Ok(None),
        }
    }
}

/// Resolve one optional field: absent or failed degrades to the default that
/// `finish(None)` produces. Fatal driver errors still propagate.
fn optional<T, V>(
    field: &'static str,
    read: Result<Option<T>, DriverError>,
    finish: impl FnOnce(Option<T>) -> V,
) -> Result<V, DriverError> {
    match read {
        Ok(value) => Ok(finish(value)),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            debug!(field, error = %e, "optional field unreadable, using default");
            Ok(finish(None))
        }
    }
}

fn split_categories(text: &str, separator: char) -> Vec<String> {
    text.split(separator)
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

fn clean_time_posted(text: &str) -> String {
    let cleaned = text.replace("Posted", "").replace("ago", "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        UNKNOWN_TIME_POSTED.to_string()
    } else {
        cleaned.to_string()
    }
}
