//! A small time-indexed column store.
//!
//! Every frame carries one `DateTime<Utc>` index shared (by `Arc`) with the
//! series cut from it, so column reads are cheap and two series can be
//! checked for alignment by pointer before falling back to comparing values.

use std::fmt;
use std::io;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum FrameError {
    #[error("unknown column '{name}' (available: {available})")]
    UnknownColumn { name: String, available: String },
    #[error("length mismatch: frame has {expected} rows, value has {got}")]
    Length { expected: usize, got: usize },
    #[error("series are indexed differently; align them on the same frame first")]
    IndexMismatch,
    #[error("column '{0}' is not numeric")]
    NotNumeric(String),
}

pub type Timestamp = DateTime<Utc>;

/// Renders a timestamp the way exports and tables show it.
pub fn format_timestamp(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Display form of a float: NaN spelled out, whole numbers without a
/// fractional part, everything else at most six decimals.
pub fn format_float(x: f64) -> String {
    if x.is_nan() {
        "NaN".to_string()
    } else if x.is_infinite() {
        if x > 0.0 { "inf".into() } else { "-inf".into() }
    } else if x.fract() == 0.0 && x.abs() < 1e15 {
        format!("{x:.0}")
    } else {
        let rounded = (x * 1e6).round() / 1e6;
        format!("{rounded}")
    }
}

// ---------------------------------------------------------------------------
// Column data
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    /// Missing values are NaN.
    Float(Vec<f64>),
    Bool(Vec<bool>),
    /// Missing values are empty strings.
    Text(Vec<String>),
}

/// One owned cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Float(f64),
    Bool(bool),
    Text(String),
}

impl Scalar {
    pub fn is_missing(&self) -> bool {
        match self {
            Scalar::Float(x) => x.is_nan(),
            Scalar::Bool(_) => false,
            Scalar::Text(s) => s.is_empty(),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Float(x) => f.write_str(&format_float(*x)),
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Float(v) => v.len(),
            ColumnData::Bool(v) => v.len(),
            ColumnData::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ColumnData::Float(_) => "float",
            ColumnData::Bool(_) => "bool",
            ColumnData::Text(_) => "text",
        }
    }

    pub fn get(&self, i: usize) -> Option<Scalar> {
        match self {
            ColumnData::Float(v) => v.get(i).map(|x| Scalar::Float(*x)),
            ColumnData::Bool(v) => v.get(i).map(|b| Scalar::Bool(*b)),
            ColumnData::Text(v) => v.get(i).map(|s| Scalar::Text(s.clone())),
        }
    }

    /// Numeric view. Booleans count as 0/1, text is refused.
    pub fn to_floats(&self) -> Option<Vec<f64>> {
        match self {
            ColumnData::Float(v) => Some(v.clone()),
            ColumnData::Bool(v) => Some(v.iter().map(|b| if *b { 1.0 } else { 0.0 }).collect()),
            ColumnData::Text(_) => None,
        }
    }

    pub fn is_missing(&self, i: usize) -> bool {
        match self {
            ColumnData::Float(v) => v[i].is_nan(),
            ColumnData::Bool(_) => false,
            ColumnData::Text(v) => v[i].is_empty(),
        }
    }

    pub fn count(&self) -> usize {
        (0..self.len()).filter(|&i| !self.is_missing(i)).count()
    }

    pub fn take(&self, rows: &[usize]) -> ColumnData {
        match self {
            ColumnData::Float(v) => ColumnData::Float(rows.iter().map(|&i| v[i]).collect()),
            ColumnData::Bool(v) => ColumnData::Bool(rows.iter().map(|&i| v[i]).collect()),
            ColumnData::Text(v) => ColumnData::Text(rows.iter().map(|&i| v[i].clone()).collect()),
        }
    }

    /// A column of `len` copies of one value.
    pub fn filled(value: &Scalar, len: usize) -> ColumnData {
        match value {
            Scalar::Float(x) => ColumnData::Float(vec![*x; len]),
            Scalar::Bool(b) => ColumnData::Bool(vec![*b; len]),
            Scalar::Text(s) => ColumnData::Text(vec![s.clone(); len]),
        }
    }
}

// ---------------------------------------------------------------------------
// Series
// ---------------------------------------------------------------------------

/// One named column together with the index it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub name: String,
    pub index: Arc<[Timestamp]>,
    pub data: ColumnData,
}

impl Series {
    pub fn new(name: impl Into<String>, index: Arc<[Timestamp]>, data: ColumnData) -> Self {
        Self {
            name: name.into(),
            index,
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn aligned_with(&self, index: &Arc<[Timestamp]>) -> bool {
        Arc::ptr_eq(&self.index, index) || self.index[..] == index[..]
    }

    pub fn floats(&self) -> Result<Vec<f64>, FrameError> {
        self.data
            .to_floats()
            .ok_or_else(|| FrameError::NotNumeric(self.name.clone()))
    }

    pub fn with_data(&self, data: ColumnData) -> Series {
        Series::new(self.name.clone(), Arc::clone(&self.index), data)
    }

    pub fn take(&self, rows: &[usize]) -> Series {
        let index: Vec<Timestamp> = rows.iter().map(|&i| self.index[i]).collect();
        Series::new(self.name.clone(), index.into(), self.data.take(rows))
    }

    pub fn head(&self, n: usize) -> Series {
        let rows: Vec<usize> = (0..n.min(self.len())).collect();
        self.take(&rows)
    }

    pub fn tail(&self, n: usize) -> Series {
        let len = self.len();
        let rows: Vec<usize> = (len.saturating_sub(n)..len).collect();
        self.take(&rows)
    }
}

impl fmt::Display for Series {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in visible_rows(self.len()) {
            match i {
                Some(i) => writeln!(
                    f,
                    "{}    {}",
                    format_timestamp(&self.index[i]),
                    self.data.get(i).map(|c| c.to_string()).unwrap_or_default()
                )?,
                None => writeln!(f, "...")?,
            }
        }
        write!(
            f,
            "Name: {}, Length: {}, dtype: {}",
            self.name,
            self.len(),
            self.data.kind()
        )
    }
}

/// Rows to render: everything up to 20, otherwise the first and last 5 with
/// a gap marker between.
fn visible_rows(len: usize) -> Vec<Option<usize>> {
    if len <= 20 {
        (0..len).map(Some).collect()
    } else {
        (0..5)
            .map(Some)
            .chain(std::iter::once(None))
            .chain((len - 5..len).map(Some))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn new(name: impl Into<String>, data: ColumnData) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

/// The tabular dataset: a time index plus named columns of equal length.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    index_name: String,
    index: Arc<[Timestamp]>,
    columns: Vec<Column>,
}

impl Frame {
    pub fn new(
        index_name: impl Into<String>,
        index: Vec<Timestamp>,
        columns: Vec<Column>,
    ) -> Result<Self, FrameError> {
        let rows = index.len();
        if let Some(bad) = columns.iter().find(|c| c.data.len() != rows) {
            return Err(FrameError::Length {
                expected: rows,
                got: bad.data.len(),
            });
        }
        Ok(Self {
            index_name: index_name.into(),
            index: index.into(),
            columns,
        })
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn index(&self) -> &Arc<[Timestamp]> {
        &self.index
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Result<&Column, FrameError> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| self.unknown(name))
    }

    pub fn series(&self, name: &str) -> Result<Series, FrameError> {
        let col = self.column(name)?;
        Ok(Series::new(
            col.name.clone(),
            Arc::clone(&self.index),
            col.data.clone(),
        ))
    }

    /// Numeric column values, NaN for missing.
    pub fn floats(&self, name: &str) -> Result<Vec<f64>, FrameError> {
        self.column(name)?
            .data
            .to_floats()
            .ok_or_else(|| FrameError::NotNumeric(name.to_string()))
    }

    fn unknown(&self, name: &str) -> FrameError {
        FrameError::UnknownColumn {
            name: name.to_string(),
            available: self.column_names().join(", "),
        }
    }

    /// Insert or replace a column.
    pub fn set_column(&mut self, name: impl Into<String>, data: ColumnData) -> Result<(), FrameError> {
        if data.len() != self.len() {
            return Err(FrameError::Length {
                expected: self.len(),
                got: data.len(),
            });
        }
        let name = name.into();
        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(existing) => existing.data = data,
            None => self.columns.push(Column::new(name, data)),
        }
        Ok(())
    }

    /// Insert or replace a column from a series on the same index.
    pub fn set_series(&mut self, name: impl Into<String>, series: Series) -> Result<(), FrameError> {
        if series.len() != self.len() {
            return Err(FrameError::Length {
                expected: self.len(),
                got: series.len(),
            });
        }
        if !series.aligned_with(&self.index) {
            return Err(FrameError::IndexMismatch);
        }
        self.set_column(name, series.data)
    }

    pub fn drop_columns(&self, names: &[String]) -> Result<Frame, FrameError> {
        for name in names {
            self.column(name)?;
        }
        let mut out = self.clone();
        out.columns.retain(|c| !names.contains(&c.name));
        Ok(out)
    }

    pub fn rename(&self, pairs: &[(String, String)]) -> Result<Frame, FrameError> {
        let mut out = self.clone();
        for (old, new) in pairs {
            if *old == out.index_name {
                out.index_name = new.clone();
                continue;
            }
            let col = out
                .columns
                .iter_mut()
                .find(|c| c.name == *old)
                .ok_or_else(|| self.unknown(old))?;
            col.name = new.clone();
        }
        Ok(out)
    }

    pub fn select(&self, names: &[String]) -> Result<Frame, FrameError> {
        let columns = names
            .iter()
            .map(|n| self.column(n).cloned())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Frame {
            index_name: self.index_name.clone(),
            index: Arc::clone(&self.index),
            columns,
        })
    }

    pub fn take_rows(&self, rows: &[usize]) -> Frame {
        let index: Vec<Timestamp> = rows.iter().map(|&i| self.index[i]).collect();
        Frame {
            index_name: self.index_name.clone(),
            index: index.into(),
            columns: self
                .columns
                .iter()
                .map(|c| Column::new(c.name.clone(), c.data.take(rows)))
                .collect(),
        }
    }

    pub fn head(&self, n: usize) -> Frame {
        let rows: Vec<usize> = (0..n.min(self.len())).collect();
        self.take_rows(&rows)
    }

    pub fn tail(&self, n: usize) -> Frame {
        let len = self.len();
        let rows: Vec<usize> = (len.saturating_sub(n)..len).collect();
        self.take_rows(&rows)
    }

    /// Keep rows where `mask` is true.
    pub fn filter(&self, mask: &[bool]) -> Result<Frame, FrameError> {
        if mask.len() != self.len() {
            return Err(FrameError::Length {
                expected: self.len(),
                got: mask.len(),
            });
        }
        let rows: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, keep)| keep.then_some(i))
            .collect();
        Ok(self.take_rows(&rows))
    }

    /// Drop rows with a missing value in any of `subset` (all columns when empty).
    pub fn dropna(&self, subset: &[String]) -> Result<Frame, FrameError> {
        let cols: Vec<&Column> = if subset.is_empty() {
            self.columns.iter().collect()
        } else {
            subset
                .iter()
                .map(|n| self.column(n))
                .collect::<Result<_, _>>()?
        };
        let rows: Vec<usize> = (0..self.len())
            .filter(|&i| cols.iter().all(|c| !c.data.is_missing(i)))
            .collect();
        Ok(self.take_rows(&rows))
    }

    pub fn row(&self, i: usize) -> Option<(Timestamp, Vec<(String, Scalar)>)> {
        let ts = *self.index.get(i)?;
        let cells = self
            .columns
            .iter()
            .filter_map(|c| c.data.get(i).map(|v| (c.name.clone(), v)))
            .collect();
        Some((ts, cells))
    }

    /// Write as CSV with the index as the first column.
    pub fn write_csv<W: io::Write>(&self, writer: W, with_index: bool) -> Result<(), csv::Error> {
        let mut out = csv::Writer::from_writer(writer);
        let mut header: Vec<&str> = Vec::with_capacity(self.width() + 1);
        if with_index {
            header.push(&self.index_name);
        }
        header.extend(self.columns.iter().map(|c| c.name.as_str()));
        out.write_record(&header)?;

        for i in 0..self.len() {
            let mut record: Vec<String> = Vec::with_capacity(header.len());
            if with_index {
                record.push(format_timestamp(&self.index[i]));
            }
            for c in &self.columns {
                record.push(match &c.data {
                    ColumnData::Float(v) if v[i].is_nan() => String::new(),
                    ColumnData::Float(v) => v[i].to_string(),
                    ColumnData::Bool(v) => v[i].to_string(),
                    ColumnData::Text(v) => v[i].clone(),
                });
            }
            out.write_record(&record)?;
        }
        out.flush()?;
        Ok(())
    }

    /// Column overview: name, kind, non-missing count.
    pub fn info(&self) -> String {
        let mut out = format!(
            "Frame: {} rows x {} columns\nIndex: {} ({} .. {})\n",
            self.len(),
            self.width(),
            self.index_name,
            self.index.first().map(format_timestamp).unwrap_or_default(),
            self.index.last().map(format_timestamp).unwrap_or_default(),
        );
        let width = self.columns.iter().map(|c| c.name.len()).max().unwrap_or(0);
        for c in &self.columns {
            out.push_str(&format!(
                " {:<width$}  {:>6} non-missing  {}\n",
                c.name,
                c.data.count(),
                c.data.kind()
            ));
        }
        out.trim_end().to_string()
    }

    /// Summary statistics of the numeric columns.
    pub fn describe(&self) -> String {
        let numeric: Vec<(&str, Vec<f64>)> = self
            .columns
            .iter()
            .filter_map(|c| match &c.data {
                ColumnData::Float(v) => Some((
                    c.name.as_str(),
                    v.iter().copied().filter(|x| !x.is_nan()).collect(),
                )),
                _ => None,
            })
            .collect();
        if numeric.is_empty() {
            return "no numeric columns".to_string();
        }

        let stats = ["count", "mean", "std", "min", "25%", "50%", "75%", "max"];
        let mut out = format!("{:<6}", "");
        for (name, _) in &numeric {
            out.push_str(&format!(" {name:>14}"));
        }
        for stat in stats {
            out.push('\n');
            out.push_str(&format!("{stat:<6}"));
            for (_, values) in &numeric {
                let v = match stat {
                    "count" => values.len() as f64,
                    "mean" => crate::data::stats::mean(values),
                    "std" => crate::data::stats::std(values),
                    "min" => crate::data::stats::quantile(values, 0.0),
                    "25%" => crate::data::stats::quantile(values, 0.25),
                    "50%" => crate::data::stats::quantile(values, 0.5),
                    "75%" => crate::data::stats::quantile(values, 0.75),
                    _ => crate::data::stats::quantile(values, 1.0),
                };
                out.push_str(&format!(" {:>14}", format_float(v)));
            }
        }
        out
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut header = vec![self.index_name.clone()];
        header.extend(self.column_names());

        let mut rows: Vec<Vec<String>> = Vec::new();
        for i in visible_rows(self.len()) {
            match i {
                Some(i) => {
                    let mut row = vec![format_timestamp(&self.index[i])];
                    row.extend(
                        self.columns
                            .iter()
                            .map(|c| c.data.get(i).map(|v| v.to_string()).unwrap_or_default()),
                    );
                    rows.push(row);
                }
                None => rows.push(vec!["...".to_string(); header.len()]),
            }
        }

        let widths: Vec<usize> = (0..header.len())
            .map(|j| {
                rows.iter()
                    .map(|r| r[j].len())
                    .chain(std::iter::once(header[j].len()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let line = |cells: &[String]| {
            cells
                .iter()
                .zip(&widths)
                .map(|(c, &w)| format!("{c:>w$}"))
                .collect::<Vec<_>>()
                .join("  ")
        };

        writeln!(f, "{}", line(&header))?;
        for row in &rows {
            writeln!(f, "{}", line(row))?;
        }
        write!(f, "[{} rows x {} columns]", self.len(), self.width())
    }
}
