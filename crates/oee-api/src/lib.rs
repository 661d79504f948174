use std::sync::Arc;

use oee_core::{
    summarize, timestamp, BucketSummary, Frequency, NewProductionRecord, OeeError,
    ProductionRecord, ProductionRun, RecordId, RecordMetrics, TimeRange,
};
use oee_store::RecordStore;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub mod csv;
pub mod sample;

pub const API_CONTRACT_VERSION: &str = "api.v1";

/// Raw `start`/`end`/`frequency` parameters as they arrive from a caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RangeQuery {
    pub start: Option<String>,
    pub end: Option<String>,
    pub frequency: Option<String>,
}

impl RangeQuery {
    /// # Errors
    /// Returns a validation error when a parameter is missing or malformed.
    pub fn to_time_range(&self) -> Result<TimeRange, OeeError> {
        let start = required(self.start.as_deref(), "start")?;
        let end = required(self.end.as_deref(), "end")?;
        let frequency = required(self.frequency.as_deref(), "frequency")?;
        TimeRange::parse(start, end, frequency)
    }
}

fn required<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str, OeeError> {
    match value.map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(OeeError::validation(format!("{name} MUST be provided"))),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub inserted: usize,
    pub first_id: Option<RecordId>,
    pub last_id: Option<RecordId>,
    pub records: Vec<ProductionRecord>,
}

impl BatchReport {
    fn from_records(records: Vec<ProductionRecord>) -> Self {
        Self {
            inserted: records.len(),
            first_id: records.first().map(|record| record.id),
            last_id: records.last().map(|record| record.id),
            records,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LatestMetrics {
    pub record: ProductionRecord,
    pub metrics: RecordMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RangeSummary {
    #[serde(with = "timestamp")]
    pub start: OffsetDateTime,
    #[serde(with = "timestamp")]
    pub end: OffsetDateTime,
    pub frequency: Frequency,
    pub record_count: usize,
    pub buckets: Vec<BucketSummary>,
}

/// Ingestion and query facade over one shared [`RecordStore`].
///
/// Cloning is cheap and every clone sees the same store.
#[derive(Debug, Clone, Default)]
pub struct OeeApi {
    store: Arc<RecordStore>,
}

impl OeeApi {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_store(store: Arc<RecordStore>) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn record_count(&self) -> usize {
        self.store.len()
    }

    /// Validate and store one record. A missing `startOfOrder` takes the
    /// server time of insert.
    ///
    /// # Errors
    /// Returns a validation error; nothing is stored in that case.
    pub fn add_record(&self, input: NewProductionRecord) -> Result<ProductionRecord, OeeError> {
        let run = input.resolve(OffsetDateTime::now_utc()).inspect_err(|err| {
            tracing::warn!(error = %err, "rejected production record");
        })?;
        let record = self.store.insert(run);
        tracing::info!(id = %record.id, start_of_order = %record.start_of_order(), "added production record");
        Ok(record)
    }

    /// Ingest a CSV document, all or nothing.
    ///
    /// Every row is validated before the first insert. Rows are then stored
    /// one by one in file order, so identifiers follow source order.
    ///
    /// # Errors
    /// Returns a validation error for a bad header, a bad row, or an empty
    /// document; the store is unchanged in that case.
    pub fn ingest_csv(&self, text: &str) -> Result<BatchReport, OeeError> {
        let inputs = csv::parse(text).inspect_err(|err| {
            tracing::warn!(error = %err, "rejected CSV upload");
        })?;
        let report = self.ingest_batch(inputs)?;
        tracing::info!(inserted = report.inserted, "ingested CSV upload");
        Ok(report)
    }

    /// Generate and store `count` sample records.
    ///
    /// # Errors
    /// Returns a validation error when `count` is outside `1..=100`.
    pub fn generate_sample(&self, count: u32) -> Result<BatchReport, OeeError> {
        let inputs = sample::generate(count, OffsetDateTime::now_utc(), &mut rand::thread_rng())
            .inspect_err(|err| {
                tracing::warn!(error = %err, "rejected sample generation");
            })?;
        let report = self.ingest_batch(inputs)?;
        tracing::info!(inserted = report.inserted, "generated sample records");
        Ok(report)
    }

    fn ingest_batch(&self, inputs: Vec<NewProductionRecord>) -> Result<BatchReport, OeeError> {
        let now = OffsetDateTime::now_utc();
        let runs = inputs
            .into_iter()
            .map(|input| input.resolve(now))
            .collect::<Result<Vec<ProductionRun>, OeeError>>()?;
        Ok(BatchReport::from_records(self.store.insert_batch(runs)))
    }

    /// Records in the range, ascending by `startOfOrder`. The frequency is
    /// validated but does not influence selection.
    ///
    /// # Errors
    /// Returns a validation error for missing or malformed parameters.
    pub fn list_records(&self, query: &RangeQuery) -> Result<Vec<ProductionRecord>, OeeError> {
        let range = query.to_time_range()?;
        let records = self.store.query_by_range(&range);
        tracing::debug!(
            start = %range.start,
            end = %range.end,
            frequency = %range.frequency,
            count = records.len(),
            "listed production records"
        );
        Ok(records)
    }

    /// # Errors
    /// Returns a not-found error when no record has been stored yet.
    pub fn latest_record(&self) -> Result<ProductionRecord, OeeError> {
        self.store.latest().ok_or_else(|| OeeError::NotFound("no OEE records found".to_string()))
    }

    /// # Errors
    /// Returns a not-found error when no record has been stored yet.
    pub fn latest_metrics(&self) -> Result<LatestMetrics, OeeError> {
        let record = self.latest_record()?;
        let metrics = record.metrics();
        Ok(LatestMetrics { record, metrics })
    }

    /// # Errors
    /// Returns a not-found error when no record carries `id`.
    pub fn record(&self, id: RecordId) -> Result<ProductionRecord, OeeError> {
        self.store
            .get(id)
            .ok_or_else(|| OeeError::NotFound(format!("OEE record {id} not found")))
    }

    /// Chart series for the range, grouped by the requested frequency.
    ///
    /// # Errors
    /// Returns a validation error for missing or malformed parameters.
    pub fn summary(&self, query: &RangeQuery) -> Result<RangeSummary, OeeError> {
        let range = query.to_time_range()?;
        let records = self.store.query_by_range(&range);
        Ok(RangeSummary {
            start: range.start,
            end: range.end,
            frequency: range.frequency,
            record_count: records.len(),
            buckets: summarize(&records, range.frequency),
        })
    }

    /// Records in the range rendered in the upload template format.
    ///
    /// # Errors
    /// Returns a validation error for missing or malformed parameters.
    pub fn export_csv(&self, query: &RangeQuery) -> Result<String, OeeError> {
        let records = self.list_records(query)?;
        csv::render(&records)
    }

    #[must_use]
    pub fn csv_template(&self) -> String {
        csv::template()
    }
}
