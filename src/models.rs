//! Core data models used throughout Waterline.
//!
//! These types represent the work items, raw page payloads, and extracted
//! records that flow through the fetch → extract → analyze → persist
//! pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One unit of pipeline work: a listing URL or a cache key.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub source_url: String,
    pub mode: WorkMode,
}

/// Where a work item's content comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkMode {
    /// Fetch the page over the network (writing through to the cache).
    Fetch,
    /// Read previously fetched content from the cache only.
    CacheOnly,
}

/// Raw fetched page content, as stored in the content cache.
///
/// Written once per fetch and never mutated; a re-fetch either overwrites
/// or is skipped depending on the configured refetch policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawContent {
    pub key: String,
    pub source_url: Option<String>,
    pub body: String,
    pub fetched_at: DateTime<Utc>,
}

/// A normalized property record assembled by the extraction cascade.
///
/// Every field except the natural key may legitimately be absent;
/// best-effort extraction treats a missing field as a normal outcome, and
/// the upsert layer never overwrites a stored value with a null.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyRecord {
    /// Stable source-assigned identifier; the sole natural key.
    pub external_id: Option<String>,
    pub source_url: Option<String>,

    // Location
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,

    // Economics
    pub price: Option<i64>,
    pub estimated_value: Option<i64>,
    pub monthly_fee: Option<i64>,
    pub price_history: Option<String>,

    // Physical characteristics
    pub bedrooms: Option<f64>,
    pub bathrooms: Option<f64>,
    pub living_area_sqft: Option<i64>,
    pub lot_area_value: Option<f64>,
    pub lot_area_units: Option<String>,
    pub year_built: Option<i64>,
    pub property_subtype: Option<String>,

    // Market metadata
    pub status: Option<String>,
    pub days_listed: Option<i64>,
    pub view_count: Option<i64>,
    pub favorite_count: Option<i64>,

    pub raw_description: Option<String>,
}

macro_rules! for_each_property_field {
    ($macro:ident) => {
        $macro!(
            external_id,
            source_url,
            address,
            city,
            state,
            zip_code,
            latitude,
            longitude,
            price,
            estimated_value,
            monthly_fee,
            price_history,
            bedrooms,
            bathrooms,
            living_area_sqft,
            lot_area_value,
            lot_area_units,
            year_built,
            property_subtype,
            status,
            days_listed,
            view_count,
            favorite_count,
            raw_description
        )
    };
}

impl PropertyRecord {
    /// Fill any field that is still `None` from `other`.
    ///
    /// This is the first-match-wins merge of the strategy cascade: a field
    /// already set by an earlier (higher-trust) strategy is never
    /// overwritten by a later one.
    pub fn merge_missing(&mut self, other: PropertyRecord) {
        macro_rules! take_missing {
            ($($field:ident),*) => {
                $(if self.$field.is_none() {
                    self.$field = other.$field;
                })*
            };
        }
        for_each_property_field!(take_missing);
    }

    /// Count of populated fields, used for the zero-field quality warning.
    pub fn populated_fields(&self) -> usize {
        let mut n = 0;
        macro_rules! count_some {
            ($($field:ident),*) => {
                $(if self.$field.is_some() { n += 1; })*
            };
        }
        for_each_property_field!(count_some);
        n
    }
}

/// Waterfront-specific attributes derived from a property's text.
///
/// Exists only when at least one waterfront signal was detected; a property
/// without a feature record is *unknown*, not "not waterfront".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureRecord {
    pub external_id: String,

    pub waterfront_length_ft: Option<i64>,
    pub dock_length_ft: Option<i64>,
    pub seawall_length_ft: Option<i64>,
    /// Measurements that could not be classified by surrounding context.
    pub any_length_ft: Option<i64>,

    pub slip_count: Option<i64>,
    pub max_vessel_length_ft: Option<i64>,
    pub lift_capacity_lbs: Option<i64>,
    pub depth_ft: Option<i64>,
    pub bridge_clearance_ft: Option<i64>,
    pub canal_width_ft: Option<i64>,

    pub has_dock: bool,
    pub has_lift: bool,
    pub has_ramp: bool,
    pub no_fixed_bridges: Option<bool>,

    /// Semicolon-joined water body classifications (canal, ocean, ...).
    pub water_type: Option<String>,

    /// Distinct corroborating signal categories mapped into [0, 1);
    /// monotone non-decreasing in signal count.
    pub analysis_confidence: f64,
    /// Which pattern produced which value, for audit.
    pub analysis_notes: String,
}

/// Outcome of persisting one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Terminal result of one work item's trip through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Inserted,
    Updated,
    SkippedDuplicate,
    /// Dry-run or persistence disabled: extracted but not written.
    Extracted,
    Failed { reason: String },
}

/// Aggregate counters for one run, plus the failed items.
#[derive(Debug, Default, Clone)]
pub struct RunSummary {
    pub attempted: u64,
    pub extracted: u64,
    pub inserted: u64,
    pub updated: u64,
    pub skipped_duplicate: u64,
    pub failed: u64,
    /// Items that fetched fine but yielded zero fields.
    pub empty_extractions: u64,
    pub failures: Vec<FailedItem>,
}

/// A failed work item and why, sufficient for an operator to retry it.
#[derive(Debug, Clone)]
pub struct FailedItem {
    pub source_url: String,
    pub reason: String,
}

impl RunSummary {
    pub fn record(&mut self, item: &WorkItem, outcome: &ItemOutcome) {
        self.attempted += 1;
        match outcome {
            ItemOutcome::Inserted => {
                self.extracted += 1;
                self.inserted += 1;
            }
            ItemOutcome::Updated => {
                self.extracted += 1;
                self.updated += 1;
            }
            ItemOutcome::SkippedDuplicate => self.skipped_duplicate += 1,
            ItemOutcome::Extracted => self.extracted += 1,
            ItemOutcome::Failed { reason } => {
                self.failed += 1;
                self.failures.push(FailedItem {
                    source_url: item.source_url.clone(),
                    reason: reason.clone(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_missing_keeps_existing_values() {
        let mut first = PropertyRecord {
            bedrooms: Some(4.0),
            ..Default::default()
        };
        let second = PropertyRecord {
            bedrooms: Some(3.0),
            bathrooms: Some(2.5),
            ..Default::default()
        };
        first.merge_missing(second);
        assert_eq!(first.bedrooms, Some(4.0));
        assert_eq!(first.bathrooms, Some(2.5));
    }

    #[test]
    fn populated_fields_counts_only_set_fields() {
        let record = PropertyRecord {
            external_id: Some("1001".into()),
            price: Some(500_000),
            ..Default::default()
        };
        assert_eq!(record.populated_fields(), 2);
        assert_eq!(PropertyRecord::default().populated_fields(), 0);
    }

    #[test]
    fn summary_attributes_failures_to_items() {
        let mut summary = RunSummary::default();
        let item = WorkItem {
            source_url: "https://example.com/listing/1".into(),
            mode: WorkMode::Fetch,
        };
        summary.record(
            &item,
            &ItemOutcome::Failed {
                reason: "timeout".into(),
            },
        );
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failures[0].source_url, item.source_url);
    }
}
