//! Loading the return/price dataset from CSV.

use crate::error::{Result, SimulationError};
use crate::panel::Panel;
use crate::types::PanelRecord;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use csv::ReaderBuilder;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use tracing::{debug, info, warn};

/// Raw CSV row with flexible column names.
#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(alias = "Date", alias = "DATE", alias = "timestamp", alias = "Timestamp")]
    date: String,
    #[serde(alias = "Ticker", alias = "symbol", alias = "Symbol", alias = "asset")]
    ticker: String,
    #[serde(rename = "return", alias = "Return", alias = "ret", alias = "log_return")]
    ret: f64,
    #[serde(alias = "Price", alias = "close", alias = "Close")]
    price: f64,
    #[serde(
        alias = "AdjustFactor",
        alias = "adjustment_factor",
        alias = "adj_factor",
        default = "default_adjust_factor"
    )]
    adjust_factor: f64,
}

fn default_adjust_factor() -> f64 { 1.0 }

/// Data source configuration.
#[derive(Debug, Clone)]
pub struct DataConfig {
    /// Date format string for parsing (e.g., "%Y-%m-%d").
    pub date_format: Option<String>,
    /// Whether the CSV has headers.
    pub has_headers: bool,
    /// CSV delimiter character. If None, delimiter is auto-detected.
    pub delimiter: Option<u8>,
    /// Skip invalid rows instead of failing.
    pub skip_invalid: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            date_format: None,
            has_headers: true,
            delimiter: None,
            skip_invalid: false,
        }
    }
}

/// Minimum columns of a panel row: date, ticker, return, price.
const MIN_FIELDS: usize = 4;

/// Detect the CSV delimiter from the first few lines of the file.
///
/// Picks the delimiter giving a consistent column count of at least
/// [`MIN_FIELDS`], preferring more columns.
fn detect_delimiter(path: &Path) -> Result<u8> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let lines: Vec<String> = reader.lines().take(5).filter_map(|l| l.ok()).collect();

    if lines.is_empty() {
        return Ok(b',');
    }

    let mut best_delimiter = b',';
    let mut best_score = 0;

    for &delim in &[b',', b'\t', b';', b'|'] {
        let counts: Vec<usize> = lines
            .iter()
            .map(|line| line.as_bytes().iter().filter(|&&b| b == delim).count() + 1)
            .collect();
        let first_count = counts[0];
        if first_count >= MIN_FIELDS && counts.iter().all(|&c| c == first_count) && first_count > best_score {
            best_score = first_count;
            best_delimiter = delim;
        }
    }

    debug!(
        "Detected delimiter {:?} with {} fields",
        best_delimiter as char, best_score
    );
    Ok(best_delimiter)
}

/// Parse a date string, trying the explicit format first and then common ones.
pub fn parse_date(s: &str, format: Option<&str>) -> Result<NaiveDate> {
    let s = s.trim();
    if let Some(fmt) = format {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d);
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.date());
        }
    }

    let date_formats = ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%m/%d/%Y", "%Y%m%d", "%d-%b-%Y"];
    for fmt in &date_formats {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d);
        }
    }

    let datetime_formats = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
    ];
    for fmt in &datetime_formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.date());
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.date_naive());
    }

    Err(SimulationError::DataError(format!("Could not parse date: '{}'", s)))
}

fn row_to_record(row: CsvRow, config: &DataConfig) -> Result<PanelRecord> {
    let date = parse_date(&row.date, config.date_format.as_deref())?;
    if row.ticker.trim().is_empty() {
        return Err(SimulationError::DataError("Empty ticker".to_string()));
    }
    if !row.ret.is_finite() {
        return Err(SimulationError::DataError(format!(
            "Non-finite return for {} on {}",
            row.ticker, date
        )));
    }
    if !(row.price.is_finite() && row.price > 0.0) {
        return Err(SimulationError::DataError(format!(
            "Non-positive price {} for {} on {}",
            row.price, row.ticker, date
        )));
    }
    if !(row.adjust_factor.is_finite() && row.adjust_factor > 0.0) {
        return Err(SimulationError::DataError(format!(
            "Non-positive adjust factor {} for {} on {}",
            row.adjust_factor, row.ticker, date
        )));
    }
    Ok(PanelRecord::new(
        date,
        row.ticker.trim(),
        row.ret,
        row.price,
        row.adjust_factor,
    ))
}

fn read_records<R: Read>(reader: R, delimiter: u8, config: &DataConfig) -> Result<Vec<PanelRecord>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(config.has_headers)
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut records = Vec::new();
    let mut skipped = 0;

    for (row_num, result) in reader.deserialize::<CsvRow>().enumerate() {
        let record = match result {
            Ok(row) => row_to_record(row, config),
            Err(e) => Err(SimulationError::CsvError(e)),
        };
        match record {
            Ok(r) => records.push(r),
            Err(e) if config.skip_invalid => {
                debug!("Skipping row {}: {}", row_num + 1, e);
                skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }

    if skipped > 0 {
        warn!("Skipped {} invalid rows", skipped);
    }
    if records.is_empty() {
        return Err(SimulationError::DataError("No rows loaded".to_string()));
    }
    Ok(records)
}

/// Load panel records from a CSV file.
pub fn load_records(path: impl AsRef<Path>, config: &DataConfig) -> Result<Vec<PanelRecord>> {
    let path = path.as_ref();
    info!("Loading data from: {}", path.display());

    let delimiter = match config.delimiter {
        Some(d) => d,
        None => detect_delimiter(path)?,
    };
    let records = read_records(File::open(path)?, delimiter, config)?;
    info!("Loaded {} records from {}", records.len(), path.display());
    Ok(records)
}

/// Load panel records from in-memory CSV content.
pub fn load_records_from_str(content: &str, config: &DataConfig) -> Result<Vec<PanelRecord>> {
    read_records(content.as_bytes(), config.delimiter.unwrap_or(b','), config)
}

/// Load a CSV file and build the panel from it.
pub fn load_panel(path: impl AsRef<Path>, config: &DataConfig) -> Result<Panel> {
    let records = load_records(path, config)?;
    let panel = Panel::from_records(records)?;
    if let (Some(first), Some(last)) = (panel.dates().first(), panel.dates().last()) {
        info!(
            "Panel has {} tickers over {} dates ({} to {})",
            panel.tickers().len(),
            panel.len(),
            first,
            last
        );
    }
    Ok(panel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const CSV: &str = "date,ticker,return,price,adjust_factor
2018-01-02,BOVA11,0.01,80.0,1.0
2018-01-02,PETR4,-0.02,20.0,1.0
2018-01-03,BOVA11,0.00,80.5,1.0
2018-01-03,PETR4,0.01,10.1,2.0
";

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        assert_eq!(parse_date("2024-01-15", None).unwrap(), expected);
        assert_eq!(parse_date("2024/01/15", None).unwrap(), expected);
        assert_eq!(parse_date("2024-01-15 00:00:00", None).unwrap(), expected);
        assert_eq!(parse_date("15.01.2024", Some("%d.%m.%Y")).unwrap(), expected);
        assert!(parse_date("not a date", None).is_err());
    }

    #[test]
    fn test_load_records_from_str() {
        let records = load_records_from_str(CSV, &DataConfig::default()).unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[1].ticker, "PETR4");
        assert_eq!(records[3].adjust_factor, 2.0);
    }

    #[test]
    fn test_column_aliases_and_default_factor() {
        let csv = "Date,symbol,ret,close\n2018-01-02,A,0.01,5.0\n";
        let records = load_records_from_str(csv, &DataConfig::default()).unwrap();
        assert_eq!(records[0].ticker, "A");
        assert_eq!(records[0].ret, 0.01);
        assert_eq!(records[0].price, 5.0);
        assert_eq!(records[0].adjust_factor, 1.0);
    }

    #[test]
    fn test_invalid_rows() {
        let csv = "date,ticker,return,price\n2018-01-02,A,0.01,5.0\n2018-01-03,A,0.01,-1.0\n";
        assert!(load_records_from_str(csv, &DataConfig::default()).is_err());

        let config = DataConfig {
            skip_invalid: true,
            ..Default::default()
        };
        let records = load_records_from_str(csv, &config).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_load_panel_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", CSV.replace(',', ";")).unwrap();

        let panel = load_panel(file.path(), &DataConfig::default()).unwrap();
        assert_eq!(panel.tickers(), &["BOVA11".to_string(), "PETR4".to_string()]);
        assert_eq!(panel.len(), 2);
        assert_eq!(panel.adjust_factors(1), &[1.0, 2.0]);
    }

    #[test]
    fn test_empty_file_rejected() {
        let file = NamedTempFile::new().unwrap();
        assert!(load_records(file.path(), &DataConfig::default()).is_err());
    }
}
