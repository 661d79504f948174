use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime, UtcOffset};

/// Column order shared by CSV upload, export and the downloadable template.
pub const CSV_COLUMNS: [&str; 6] = [
    "startOfOrder",
    "plannedProductionTime",
    "actualProductionTime",
    "idealCycleTime",
    "totalPieces",
    "goodPieces",
];

pub const CSV_TEMPLATE_EXAMPLE_ROW: &str = "2024-02-11T10:00:00,480,420,0.5,800,750";

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum OeeError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl OeeError {
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Message without the category prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Validation(message) | Self::NotFound(message) => message,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl Display for RecordId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Display bucket granularity. Never affects which records a range selects.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Hour,
    Day,
    Week,
    Month,
}

impl Frequency {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "hour" => Some(Self::Hour),
            "day" => Some(Self::Day),
            "week" => Some(Self::Week),
            "month" => Some(Self::Month),
            _ => None,
        }
    }

    /// Start of the UTC bucket containing `at`. Weeks start on Monday.
    #[must_use]
    pub fn bucket_start(self, at: OffsetDateTime) -> OffsetDateTime {
        let at = at.to_offset(UtcOffset::UTC);
        let midnight = at.date().midnight().assume_utc();
        match self {
            Self::Hour => midnight + Duration::hours(i64::from(at.hour())),
            Self::Day => midnight,
            Self::Week => {
                midnight - Duration::days(i64::from(at.weekday().number_days_from_monday()))
            }
            Self::Month => midnight - Duration::days(i64::from(at.day()) - 1),
        }
    }
}

impl Display for Frequency {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timestamp parsing and formatting for `startOfOrder`.
///
/// Input accepts RFC 3339 or the zone-less ISO 8601 form used by the CSV
/// template (`YYYY-MM-DDTHH:mm:ss`), which is read as UTC.
pub mod timestamp {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::format_description::well_known::Rfc3339;
    use time::macros::format_description;
    use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

    use crate::OeeError;

    /// # Errors
    /// Returns a validation error when `value` matches none of the accepted formats.
    pub fn parse(value: &str) -> Result<OffsetDateTime, OeeError> {
        let value = value.trim();
        if let Ok(parsed) = OffsetDateTime::parse(value, &Rfc3339) {
            return Ok(parsed.to_offset(UtcOffset::UTC));
        }
        if let Ok(parsed) = PrimitiveDateTime::parse(
            value,
            format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
        ) {
            return Ok(parsed.assume_utc());
        }
        PrimitiveDateTime::parse(
            value,
            format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"),
        )
        .map(PrimitiveDateTime::assume_utc)
        .map_err(|_| {
            OeeError::validation(format!(
                "invalid timestamp `{value}`, expected YYYY-MM-DDTHH:mm:ss or RFC 3339"
            ))
        })
    }

    /// Zone-less UTC rendering used by CSV export. Fractional seconds are
    /// written only when present, so `parse` reads back the same instant.
    ///
    /// # Errors
    /// Returns a validation error when the year cannot be rendered in four digits.
    pub fn format_local(value: OffsetDateTime) -> Result<String, OeeError> {
        let value = value.to_offset(UtcOffset::UTC);
        let formatted = if value.nanosecond() == 0 {
            value.format(format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"))
        } else {
            value.format(format_description!(
                "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"
            ))
        };
        formatted.map_err(|err| OeeError::validation(format!("cannot format timestamp: {err}")))
    }

    /// # Errors
    /// Propagates serializer failures.
    pub fn serialize<S>(value: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        time::serde::rfc3339::serialize(value, serializer)
    }

    /// # Errors
    /// Fails when the value is not a string in an accepted format.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<OffsetDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use time::OffsetDateTime;

        /// # Errors
        /// Propagates serializer failures.
        pub fn serialize<S>(value: &Option<OffsetDateTime>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            time::serde::rfc3339::option::serialize(value, serializer)
        }

        /// # Errors
        /// Fails when a present value is not a string in an accepted format.
        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<OffsetDateTime>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let raw = Option::<String>::deserialize(deserializer)?;
            match raw {
                Some(raw) => super::parse(&raw).map(Some).map_err(serde::de::Error::custom),
                None => Ok(None),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct TimeRange {
    #[serde(with = "timestamp")]
    pub start: OffsetDateTime,
    #[serde(with = "timestamp")]
    pub end: OffsetDateTime,
    pub frequency: Frequency,
}

impl TimeRange {
    /// # Errors
    /// Returns a validation error when `start` is after `end`.
    pub fn new(
        start: OffsetDateTime,
        end: OffsetDateTime,
        frequency: Frequency,
    ) -> Result<Self, OeeError> {
        if start > end {
            return Err(OeeError::validation("start MUST NOT be after end"));
        }
        Ok(Self { start, end, frequency })
    }

    /// Build a range from raw query parameters.
    ///
    /// # Errors
    /// Returns a validation error for unparseable timestamps, an unknown
    /// frequency, or an inverted range.
    pub fn parse(start: &str, end: &str, frequency: &str) -> Result<Self, OeeError> {
        let start = timestamp::parse(start)
            .map_err(|err| OeeError::validation(format!("start: {}", err.message())))?;
        let end = timestamp::parse(end)
            .map_err(|err| OeeError::validation(format!("end: {}", err.message())))?;
        let frequency = Frequency::parse(frequency.trim()).ok_or_else(|| {
            OeeError::validation(format!(
                "frequency MUST be one of hour, day, week, month (got `{frequency}`)"
            ))
        })?;
        Self::new(start, end, frequency)
    }

    /// Inclusive on both ends.
    #[must_use]
    pub fn contains(&self, at: OffsetDateTime) -> bool {
        self.start <= at && at <= self.end
    }
}

/// A production record as submitted, before identifier assignment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewProductionRecord {
    #[serde(default, alias = "timestamp", with = "timestamp::option")]
    pub start_of_order: Option<OffsetDateTime>,
    pub planned_production_time: u32,
    pub actual_production_time: u32,
    pub ideal_cycle_time: f64,
    pub total_pieces: u32,
    pub good_pieces: u32,
}

impl NewProductionRecord {
    /// Check every field that feeds a metric denominator or bound.
    ///
    /// Zero denominators are rejected here so stored records always yield
    /// finite metrics; the metric functions themselves stay unguarded.
    ///
    /// # Errors
    /// Returns a validation error naming the first offending field.
    pub fn validate(&self) -> Result<(), OeeError> {
        if self.planned_production_time == 0 {
            return Err(OeeError::validation("plannedProductionTime MUST be greater than 0"));
        }
        if self.actual_production_time == 0 {
            return Err(OeeError::validation("actualProductionTime MUST be greater than 0"));
        }
        if !self.ideal_cycle_time.is_finite() || self.ideal_cycle_time <= 0.0 {
            return Err(OeeError::validation("idealCycleTime MUST be a finite number greater than 0"));
        }
        if self.total_pieces == 0 {
            return Err(OeeError::validation("totalPieces MUST be greater than 0"));
        }
        if self.good_pieces > self.total_pieces {
            return Err(OeeError::validation("goodPieces MUST NOT exceed totalPieces"));
        }
        Ok(())
    }

    /// Validate and pin the timestamp, falling back to `now` when absent.
    ///
    /// # Errors
    /// Returns the error from [`NewProductionRecord::validate`].
    pub fn resolve(self, now: OffsetDateTime) -> Result<ProductionRun, OeeError> {
        self.validate()?;
        Ok(ProductionRun {
            start_of_order: self.start_of_order.unwrap_or(now).to_offset(UtcOffset::UTC),
            planned_production_time: self.planned_production_time,
            actual_production_time: self.actual_production_time,
            ideal_cycle_time: self.ideal_cycle_time,
            total_pieces: self.total_pieces,
            good_pieces: self.good_pieces,
        })
    }
}

/// Validated measurements of one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProductionRun {
    #[serde(with = "timestamp")]
    pub start_of_order: OffsetDateTime,
    pub planned_production_time: u32,
    pub actual_production_time: u32,
    pub ideal_cycle_time: f64,
    pub total_pieces: u32,
    pub good_pieces: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductionRecord {
    pub id: RecordId,
    #[serde(flatten)]
    pub run: ProductionRun,
}

impl ProductionRecord {
    #[must_use]
    pub fn start_of_order(&self) -> OffsetDateTime {
        self.run.start_of_order
    }

    #[must_use]
    pub fn metrics(&self) -> RecordMetrics {
        RecordMetrics::from_run(&self.run)
    }
}

/// Availability in percent: `actual / planned * 100`.
#[must_use]
pub fn availability(planned: f64, actual: f64) -> f64 {
    actual / planned * 100.0
}

/// Performance in percent: theoretical time over actual time. May exceed 100.
#[must_use]
pub fn performance(actual_time: f64, ideal_cycle_time: f64, total_pieces: f64) -> f64 {
    let theoretical_time = ideal_cycle_time * total_pieces;
    theoretical_time / actual_time * 100.0
}

/// Quality in percent: `good / total * 100`.
#[must_use]
pub fn quality(total: f64, good: f64) -> f64 {
    good / total * 100.0
}

/// Composite OEE, the product of three percentages scaled back to percent.
#[must_use]
pub fn oee(availability: f64, performance: f64, quality: f64) -> f64 {
    availability * performance * quality / 10_000.0
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RecordMetrics {
    pub availability: f64,
    pub performance: f64,
    pub quality: f64,
    pub oee: f64,
}

impl RecordMetrics {
    #[must_use]
    pub fn from_run(run: &ProductionRun) -> Self {
        let availability = availability(
            f64::from(run.planned_production_time),
            f64::from(run.actual_production_time),
        );
        let performance = performance(
            f64::from(run.actual_production_time),
            run.ideal_cycle_time,
            f64::from(run.total_pieces),
        );
        let quality = quality(f64::from(run.total_pieces), f64::from(run.good_pieces));
        Self { availability, performance, quality, oee: oee(availability, performance, quality) }
    }
}

/// Counters and metrics for one display bucket.
///
/// Metrics are computed from summed counters, not averaged per record, so a
/// long run weighs more than a short one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BucketSummary {
    #[serde(with = "timestamp")]
    pub bucket_start: OffsetDateTime,
    pub record_count: usize,
    pub planned_production_time: u64,
    pub actual_production_time: u64,
    pub total_pieces: u64,
    pub good_pieces: u64,
    pub availability: f64,
    pub performance: f64,
    pub quality: f64,
    pub oee: f64,
}

#[derive(Debug, Default)]
struct BucketTotals {
    record_count: usize,
    planned: u64,
    actual: u64,
    theoretical: f64,
    total: u64,
    good: u64,
}

/// Group records into `frequency` buckets, ascending by bucket start.
/// Empty buckets are not emitted.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn summarize(records: &[ProductionRecord], frequency: Frequency) -> Vec<BucketSummary> {
    let mut buckets: BTreeMap<OffsetDateTime, BucketTotals> = BTreeMap::new();
    for record in records {
        let totals = buckets.entry(frequency.bucket_start(record.start_of_order())).or_default();
        totals.record_count += 1;
        totals.planned += u64::from(record.run.planned_production_time);
        totals.actual += u64::from(record.run.actual_production_time);
        totals.theoretical += record.run.ideal_cycle_time * f64::from(record.run.total_pieces);
        totals.total += u64::from(record.run.total_pieces);
        totals.good += u64::from(record.run.good_pieces);
    }

    buckets
        .into_iter()
        .map(|(bucket_start, totals)| {
            let availability = availability(totals.planned as f64, totals.actual as f64);
            let performance = totals.theoretical / totals.actual as f64 * 100.0;
            let quality = quality(totals.total as f64, totals.good as f64);
            BucketSummary {
                bucket_start,
                record_count: totals.record_count,
                planned_production_time: totals.planned,
                actual_production_time: totals.actual,
                total_pieces: totals.total,
                good_pieces: totals.good,
                availability,
                performance,
                quality,
                oee: oee(availability, performance, quality),
            }
        })
        .collect()
}
