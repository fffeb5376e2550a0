//! CSV file data adapter.
//!
//! One file per symbol, `{symbol}.csv`, with the header
//! `timestamp,open,high,low,close,volume`. Timestamps are integer
//! nanoseconds since the epoch or `YYYY-MM-DD` dates (midnight UTC). Empty
//! price cells load as NaN so gaps survive into the series.

use crate::domain::bars::{BarSeries, FIELD_NAMES};
use crate::domain::error::StratlabError;
use crate::ports::data_port::DataPort;
use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};

const TIMESTAMP_COLUMN: &str = "timestamp";

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    /// Adapter rooted at a file's directory plus the symbol naming that file.
    pub fn for_file(path: &Path) -> (Self, String) {
        let base = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let symbol = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        (Self::new(base), symbol)
    }

    fn csv_path(&self, symbol: &str) -> PathBuf {
        self.base_path.join(format!("{}.csv", symbol))
    }
}

fn data_error(reason: impl Into<String>) -> StratlabError {
    StratlabError::Data {
        reason: reason.into(),
    }
}

fn parse_timestamp(raw: &str, row: usize) -> Result<i64, StratlabError> {
    if let Ok(nanos) = raw.parse::<i64>() {
        return Ok(nanos);
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| data_error(format!("row {}: invalid timestamp '{}': {}", row, raw, e)))?;
    date.and_hms_opt(0, 0, 0)
        .and_then(|dt| dt.and_utc().timestamp_nanos_opt())
        .ok_or_else(|| data_error(format!("row {}: timestamp '{}' out of range", row, raw)))
}

fn parse_value(raw: &str, column: &str, row: usize) -> Result<f64, StratlabError> {
    if raw.is_empty() {
        return Ok(f64::NAN);
    }
    raw.parse()
        .map_err(|e| data_error(format!("row {}: invalid {} value '{}': {}", row, column, raw, e)))
}

fn check_header(headers: &csv::StringRecord) -> Result<(), StratlabError> {
    let expected: Vec<&str> = std::iter::once(TIMESTAMP_COLUMN)
        .chain(FIELD_NAMES.iter().copied())
        .collect();
    let found: Vec<String> = headers.iter().map(str::to_lowercase).collect();
    if found.len() < expected.len() || found.iter().zip(&expected).any(|(f, e)| f != e) {
        return Err(data_error(format!(
            "expected header '{}', found '{}'",
            expected.join(","),
            found.join(",")
        )));
    }
    Ok(())
}

impl DataPort for CsvAdapter {
    fn fetch_bars(&self, symbol: &str) -> Result<BarSeries, StratlabError> {
        let path = self.csv_path(symbol);
        let content = fs::read_to_string(&path)
            .map_err(|e| data_error(format!("failed to read {}: {}", path.display(), e)))?;

        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());
        let headers = rdr
            .headers()
            .map_err(|e| data_error(format!("CSV parse error: {}", e)))?;
        check_header(headers)?;

        let mut rows: Vec<(i64, [f64; 5])> = Vec::new();
        for (i, result) in rdr.records().enumerate() {
            let row = i + 1;
            let record = result.map_err(|e| data_error(format!("CSV parse error: {}", e)))?;

            let raw = record
                .get(0)
                .ok_or_else(|| data_error(format!("row {}: missing timestamp column", row)))?;
            let timestamp = parse_timestamp(raw, row)?;

            let mut values = [0.0; 5];
            for (slot, (column, name)) in values.iter_mut().zip(FIELD_NAMES.iter().enumerate()) {
                let raw = record
                    .get(column + 1)
                    .ok_or_else(|| data_error(format!("row {}: missing {} column", row, name)))?;
                *slot = parse_value(raw, name, row)?;
            }
            rows.push((timestamp, values));
        }

        rows.sort_by_key(|(ts, _)| *ts);
        tracing::debug!(symbol, bars = rows.len(), path = %path.display(), "loaded bars");

        let mut series = BarSeries::default();
        for (ts, [open, high, low, close, volume]) in rows {
            series.timestamp.push(ts);
            series.open.push(open);
            series.high.push(high);
            series.low.push(low);
            series.close.push(close);
            series.volume.push(volume);
        }
        BarSeries::new(
            series.timestamp,
            series.open,
            series.high,
            series.low,
            series.close,
            series.volume,
        )
    }
}
