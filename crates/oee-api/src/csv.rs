//! CSV codec for production records.
//!
//! The upload format and the export/template format share one header:
//! `startOfOrder,plannedProductionTime,actualProductionTime,idealCycleTime,totalPieces,goodPieces`.

use std::str::FromStr;

use oee_core::{
    timestamp, NewProductionRecord, OeeError, ProductionRecord, CSV_COLUMNS,
    CSV_TEMPLATE_EXAMPLE_ROW,
};

pub const TEMPLATE_FILE_NAME: &str = "oee_template.csv";

#[must_use]
pub fn header() -> String {
    CSV_COLUMNS.join(",")
}

/// Header plus one example row, newline terminated.
#[must_use]
pub fn template() -> String {
    format!("{}\n{CSV_TEMPLATE_EXAMPLE_ROW}\n", header())
}

/// Parse a whole CSV document.
///
/// The header is checked before any row is read. Any malformed row fails the
/// whole document, and a document without data rows is an error.
///
/// # Errors
/// Returns a validation error for a missing or mismatched header, a row with
/// the wrong column count or an unparseable/out-of-range value, or no rows.
pub fn parse(text: &str) -> Result<Vec<NewProductionRecord>, OeeError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut lines = text.split('\n').enumerate();

    let header_line = lines.next().map(|(_, line)| line.trim()).unwrap_or_default();
    if header_line.is_empty() {
        return Err(OeeError::validation("invalid CSV shape: the file is empty"));
    }
    let expected = header();
    if header_line.to_lowercase() != expected.to_lowercase() {
        return Err(OeeError::validation(format!(
            "invalid CSV header: expected `{expected}`, use the provided template"
        )));
    }

    let mut records = Vec::new();
    for (index, line) in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let line_number = index + 1;
        let record = parse_row(line).map_err(|message| {
            OeeError::validation(format!("invalid CSV data on line {line_number}: {message}"))
        })?;
        records.push(record);
    }

    if records.is_empty() {
        return Err(OeeError::validation("no records found in the CSV file"));
    }
    Ok(records)
}

fn parse_row(line: &str) -> Result<NewProductionRecord, String> {
    let values = line.split(',').map(str::trim).collect::<Vec<_>>();
    let [start_of_order, planned, actual, ideal, total, good] = values.as_slice() else {
        return Err(format!("expected {} columns, found {}", CSV_COLUMNS.len(), values.len()));
    };

    let start_of_order =
        timestamp::parse(start_of_order).map_err(|err| err.message().to_string())?;
    let record = NewProductionRecord {
        start_of_order: Some(start_of_order),
        planned_production_time: parse_field(planned, "plannedProductionTime")?,
        actual_production_time: parse_field(actual, "actualProductionTime")?,
        ideal_cycle_time: parse_field(ideal, "idealCycleTime")?,
        total_pieces: parse_field(total, "totalPieces")?,
        good_pieces: parse_field(good, "goodPieces")?,
    };
    record.validate().map_err(|err| err.message().to_string())?;
    Ok(record)
}

fn parse_field<T: FromStr>(raw: &str, column: &str) -> Result<T, String> {
    raw.parse::<T>().map_err(|_| format!("{column} has invalid value `{raw}`"))
}

/// Render records in template column order.
///
/// # Errors
/// Returns a validation error when a timestamp cannot be rendered.
pub fn render(records: &[ProductionRecord]) -> Result<String, OeeError> {
    let mut out = header();
    out.push('\n');
    for record in records {
        let run = &record.run;
        out.push_str(&format!(
            "{},{},{},{},{},{}\n",
            timestamp::format_local(run.start_of_order)?,
            run.planned_production_time,
            run.actual_production_time,
            run.ideal_cycle_time,
            run.total_pieces,
            run.good_pieces
        ));
    }
    Ok(out)
}
