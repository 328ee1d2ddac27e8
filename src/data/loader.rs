use std::io::Read;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use thiserror::Error;
use tracing::{debug, info};

use super::frame::{Column, ColumnData, Frame, FrameError, Timestamp};
use crate::tools::http;

/// Names accepted as the time column, in priority order.
pub const TIMESTAMP_CANDIDATES: [&str; 4] = ["datetime", "date", "timestamp", "time"];

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("No datetime/date column detected. Expected one of: {}", TIMESTAMP_CANDIDATES.join(", "))]
    MissingTimestampColumn,
    #[error("failed to read {path}: {err}")]
    Io {
        path: String,
        #[source]
        err: std::io::Error,
    },
    #[error("failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },
    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

pub fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Load a delimited file or URL into a time-indexed [`Frame`].
///
/// Column names are trimmed and lower-cased, the first recognised timestamp
/// column becomes the index, rows whose timestamp does not parse are
/// dropped, and the rest are sorted oldest first.
pub fn load_financial_csv(source: &str) -> Result<Frame, LoadError> {
    let frame = if is_url(source) {
        let body = http::get_text(source, Duration::from_secs(30)).map_err(|e| LoadError::Fetch {
            url: source.to_string(),
            message: e.to_string(),
        })?;
        read_financial_csv(body.as_bytes())?
    } else {
        let file = std::fs::File::open(source).map_err(|err| LoadError::Io {
            path: source.to_string(),
            err,
        })?;
        read_financial_csv(file)?
    };

    info!(
        source,
        rows = frame.len(),
        columns = frame.width(),
        index = frame.index_name(),
        "loaded dataset"
    );
    Ok(frame)
}

/// The loader over any reader; see [`load_financial_csv`].
pub fn read_financial_csv<R: Read>(reader: R) -> Result<Frame, LoadError> {
    let mut csv = csv::Reader::from_reader(reader);
    let names = normalize_headers(csv.headers()?.iter());

    let ts_idx = TIMESTAMP_CANDIDATES
        .iter()
        .find_map(|cand| names.iter().position(|n| n == cand))
        .ok_or(LoadError::MissingTimestampColumn)?;

    let mut rows: Vec<(Timestamp, csv::StringRecord)> = Vec::new();
    let mut dropped = 0usize;
    for record in csv.records() {
        let record = record?;
        match record.get(ts_idx).and_then(parse_timestamp) {
            Some(ts) => rows.push((ts, record)),
            None => dropped += 1,
        }
    }
    if dropped > 0 {
        debug!(dropped, column = %names[ts_idx], "dropped rows with unparseable timestamps");
    }

    // Stable: equal timestamps keep file order.
    rows.sort_by_key(|(ts, _)| *ts);

    let index: Vec<Timestamp> = rows.iter().map(|(ts, _)| *ts).collect();
    let columns = names
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != ts_idx)
        .map(|(i, name)| {
            let cells: Vec<&str> = rows
                .iter()
                .map(|(_, rec)| rec.get(i).unwrap_or("").trim())
                .collect();
            Column::new(name.clone(), infer_column(&cells))
        })
        .collect();

    Ok(Frame::new(names[ts_idx].clone(), index, columns)?)
}

/// Trim and lower-case; later duplicates get `.1`, `.2`, ... suffixes.
fn normalize_headers<'a>(raw: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for header in raw {
        let base = header.trim().to_lowercase();
        let mut name = base.clone();
        let mut n = 1;
        while out.contains(&name) {
            name = format!("{base}.{n}");
            n += 1;
        }
        out.push(name);
    }
    out
}

/// Float when every non-empty cell is a number, text otherwise.
fn infer_column(cells: &[&str]) -> ColumnData {
    let numeric = cells
        .iter()
        .all(|c| c.is_empty() || c.parse::<f64>().is_ok());
    if numeric {
        ColumnData::Float(
            cells
                .iter()
                .map(|c| c.parse::<f64>().unwrap_or(f64::NAN))
                .collect(),
        )
    } else {
        ColumnData::Text(cells.iter().map(|c| c.to_string()).collect())
    }
}

const OFFSET_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
];

const NAIVE_FORMATS: [&str; 8] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%Y%m%d"];

/// Parse one timestamp cell. Naive values are read as UTC; values with an
/// offset are converted to UTC; all-digit cells of 10 or 13 digits are epoch
/// seconds or milliseconds.
pub fn parse_timestamp(raw: &str) -> Option<Timestamp> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if s.bytes().all(|b| b.is_ascii_digit()) {
        match s.len() {
            10 => return DateTime::from_timestamp(s.parse().ok()?, 0),
            13 => return DateTime::from_timestamp_millis(s.parse().ok()?),
            8 => {}
            _ => return None,
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.and_utc());
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn load(text: &str) -> Result<Frame, LoadError> {
        read_financial_csv(text.as_bytes())
    }

    fn ymd(y: i32, m: u32, d: u32) -> Timestamp {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn example_drops_bad_row_and_normalizes() {
        let f = load("Date,Close\n2024-01-01,10\nnot-a-date,11\n2024-01-02,12\n").unwrap();
        assert_eq!(f.len(), 2);
        assert_eq!(f.index()[..], [ymd(2024, 1, 1), ymd(2024, 1, 2)]);
        assert!(f.has_column("close"));
        assert!(!f.has_column("Close"));
        assert_eq!(f.floats("close").unwrap(), vec![10.0, 12.0]);
    }

    #[test]
    fn column_names_are_trimmed_and_lowercased() {
        let f = load(" Date ,Close , VOLUME\n2024-01-01,1,2\n").unwrap();
        assert_eq!(f.index_name(), "date");
        assert_eq!(f.column_names(), vec!["close".to_string(), "volume".to_string()]);
    }

    #[test]
    fn missing_timestamp_column_is_fatal() {
        let err = load("open,close\n1,2\n").unwrap_err();
        assert!(matches!(err, LoadError::MissingTimestampColumn));
        assert_eq!(
            err.to_string(),
            "No datetime/date column detected. Expected one of: datetime, date, timestamp, time"
        );
    }

    #[test]
    fn candidate_priority_beats_column_order() {
        // "time" comes first in the file but "date" ranks higher.
        let f = load("time,date,close\n09:30,2024-01-02,1\n09:31,2024-01-01,2\n").unwrap();
        assert_eq!(f.index_name(), "date");
        assert!(f.has_column("time"));
        assert_eq!(f.floats("close").unwrap(), vec![2.0, 1.0]);
    }

    #[test]
    fn rows_are_sorted_ascending_and_stable() {
        let f = load("timestamp,v\n2024-03-01,1\n2024-01-01,2\n2024-03-01,3\n").unwrap();
        assert_eq!(f.floats("v").unwrap(), vec![2.0, 1.0, 3.0]);
        assert!(f.index().windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn row_count_equals_parseable_timestamps() {
        let f = load("date,v\n2024-01-01,1\n,2\nbogus,3\n2024-01-05,4\n13/45/2024,5\n").unwrap();
        assert_eq!(f.len(), 2);
    }

    #[test]
    fn all_unparseable_gives_empty_frame() {
        let f = load("date,v\nx,1\ny,2\n").unwrap();
        assert!(f.is_empty());
        assert_eq!(f.width(), 1);
    }

    #[test]
    fn mixed_cells_make_text_columns_and_blanks_make_nan() {
        let f = load("date,close,note\n2024-01-01,,up\n2024-01-02,3,down\n").unwrap();
        let close = f.floats("close").unwrap();
        assert!(close[0].is_nan());
        assert_eq!(f.column("note").unwrap().data.kind(), "text");
    }

    #[test]
    fn duplicate_names_after_normalization_get_suffixes() {
        let f = load("Date,Close,close \n2024-01-01,1,2\n").unwrap();
        assert_eq!(f.column_names(), vec!["close".to_string(), "close.1".to_string()]);
    }

    #[test]
    fn timestamp_formats() {
        let noon = Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-01-02T12:00:00Z"), Some(noon));
        assert_eq!(parse_timestamp("2024-01-02 14:00:00+02:00"), Some(noon));
        assert_eq!(parse_timestamp("2024-01-02 12:00:00"), Some(noon));
        assert_eq!(parse_timestamp("2024-01-02 12:00"), Some(noon));
        assert_eq!(parse_timestamp("2024-01-02T12:00:00.000"), Some(noon));
        assert_eq!(parse_timestamp("01/02/2024"), Some(ymd(2024, 1, 2)));
        assert_eq!(parse_timestamp("2024/01/02"), Some(ymd(2024, 1, 2)));
        assert_eq!(parse_timestamp("20240102"), Some(ymd(2024, 1, 2)));
        assert_eq!(parse_timestamp("1704196800"), Some(noon));
        assert_eq!(parse_timestamp("1704196800000"), Some(noon));
        assert_eq!(parse_timestamp("not-a-date"), None);
        assert_eq!(parse_timestamp("12345"), None);
        assert_eq!(parse_timestamp("  "), None);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_financial_csv("/definitely/not/here.csv").unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prices.csv");
        std::fs::write(&path, "Datetime,Open,Close\n2024-01-02 10:00,1,2\n2024-01-01 10:00,3,4\n").unwrap();
        let f = load_financial_csv(path.to_str().unwrap()).unwrap();
        assert_eq!(f.index_name(), "datetime");
        assert_eq!(f.floats("open").unwrap(), vec![3.0, 1.0]);
    }
}
