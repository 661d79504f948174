//! Synthetic shift data for demos and empty dashboards.

use oee_core::{NewProductionRecord, OeeError};
use rand::Rng;
use time::{Duration, OffsetDateTime};

pub const MAX_SAMPLE_RECORDS: u32 = 100;

const SAMPLE_WINDOW_DAYS: i64 = 30;
const PLANNED_SHIFT_MINUTES: u32 = 480;
const IDEAL_CYCLE_MINUTES: f64 = 0.5;

/// Generate `count` eight-hour shifts spread over the 30 days before `now`,
/// sorted ascending by `startOfOrder`.
///
/// # Errors
/// Returns a validation error when `count` is outside `1..=100`.
pub fn generate<R>(
    count: u32,
    now: OffsetDateTime,
    rng: &mut R,
) -> Result<Vec<NewProductionRecord>, OeeError>
where
    R: Rng + ?Sized,
{
    if !(1..=MAX_SAMPLE_RECORDS).contains(&count) {
        return Err(OeeError::validation(format!(
            "sample count MUST be between 1 and {MAX_SAMPLE_RECORDS} (got {count})"
        )));
    }

    let window = Duration::days(SAMPLE_WINDOW_DAYS);
    let window_start = now - window;
    let window_seconds = window.whole_seconds();

    let mut records = (0..count)
        .map(|_| {
            let total_pieces = rng.gen_range(750..=900);
            let quality_percent = rng.gen_range(85..=98);
            NewProductionRecord {
                start_of_order: Some(
                    window_start + Duration::seconds(rng.gen_range(0..=window_seconds)),
                ),
                planned_production_time: PLANNED_SHIFT_MINUTES,
                actual_production_time: rng.gen_range(420..=PLANNED_SHIFT_MINUTES),
                ideal_cycle_time: IDEAL_CYCLE_MINUTES,
                total_pieces,
                good_pieces: total_pieces * quality_percent / 100,
            }
        })
        .collect::<Vec<_>>();

    records.sort_by_key(|record| record.start_of_order);
    Ok(records)
}
