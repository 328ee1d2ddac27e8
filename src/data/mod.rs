//! The analysis dataset: a time-indexed column store, the CSV loader that
//! builds it, and the indicator kernels the sandbox exposes.

mod frame;
pub mod indicators;
mod loader;
pub mod stats;

pub use frame::{
    Column, ColumnData, Frame, FrameError, Scalar, Series, Timestamp, format_float,
    format_timestamp,
};
pub use loader::{
    LoadError, TIMESTAMP_CANDIDATES, is_url, load_financial_csv, parse_timestamp,
    read_financial_csv,
};
