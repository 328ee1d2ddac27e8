//! Builtin functions, methods on frames/series/maps/strings, and the `ta`
//! indicator library.

use std::sync::Arc;

use tracing::info;

use super::EvalError;
use super::eval::{Interp, bools, position, series_values, truthy};
use super::value::{Value, Window};
use crate::data::{
    ColumnData, Frame, Series, format_timestamp, indicators, is_url, load_financial_csv, stats,
};
use crate::tools::file;

/// Largest magnitude a float holds as an exact whole number (2^53).
const MAX_WHOLE: f64 = 9_007_199_254_740_992.0;

/// `round` keeps values unchanged past this many digits.
const MAX_ROUND_DIGITS: usize = 15;

const FUNCTIONS: [&str; 18] = [
    "print", "len", "round", "abs", "min", "max", "sum", "str", "float", "int", "sqrt", "log",
    "exp", "isnan", "json", "write_json", "load_csv", "type",
];

const TA_FUNCTIONS: [&str; 12] = [
    "sma", "ema", "rsi", "macd", "bollinger", "vwap", "atr", "pct_change", "log_return",
    "rolling_std", "cum_return", "where",
];

pub(super) fn is_function(name: &str) -> bool {
    FUNCTIONS.contains(&name)
}

/// Evaluated call arguments.
pub(super) struct Args {
    func: String,
    pub(super) positional: Vec<Value>,
    pub(super) named: Vec<(String, Value)>,
}

impl Args {
    pub(super) fn new(func: &str) -> Self {
        Self {
            func: func.to_string(),
            positional: Vec::new(),
            named: Vec::new(),
        }
    }

    fn error(&self, message: impl std::fmt::Display) -> EvalError {
        EvalError::arg(format!("{}(): {message}", self.func))
    }

    /// Reject extra positionals and keywords not in `params`.
    fn check(&self, params: &[&str]) -> Result<(), EvalError> {
        if self.positional.len() > params.len() {
            return Err(self.error(format!(
                "takes at most {} arguments, got {}",
                params.len(),
                self.positional.len()
            )));
        }
        for (name, _) in &self.named {
            match params.iter().position(|p| p == name) {
                None => return Err(self.error(format!("unexpected keyword argument '{name}'"))),
                Some(i) if i < self.positional.len() => {
                    return Err(self.error(format!("got multiple values for '{name}'")));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    fn named(&self, name: &str) -> Option<&Value> {
        self.named.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    fn get(&self, pos: usize, name: &str) -> Option<&Value> {
        self.positional.get(pos).or_else(|| self.named(name))
    }

    fn required(&self, pos: usize, name: &str) -> Result<&Value, EvalError> {
        self.get(pos, name)
            .ok_or_else(|| self.error(format!("missing argument '{name}'")))
    }

    fn num(&self, pos: usize, name: &str, default: f64) -> Result<f64, EvalError> {
        match self.get(pos, name) {
            None | Some(Value::None) => Ok(default),
            Some(Value::Num(x)) => Ok(*x),
            Some(other) => Err(self.error(format!("'{name}' must be a number, not a {}", other.kind()))),
        }
    }

    fn int(&self, pos: usize, name: &str, default: i64) -> Result<i64, EvalError> {
        let x = self.num(pos, name, default as f64)?;
        if x.fract() != 0.0 || !x.is_finite() {
            return Err(self.error(format!("'{name}' must be a whole number")));
        }
        if x.abs() > MAX_WHOLE {
            return Err(self.error(format!("'{name}' is out of range")));
        }
        Ok(x as i64)
    }

    fn count(&self, pos: usize, name: &str, default: usize) -> Result<usize, EvalError> {
        let x = self.int(pos, name, default as i64)?;
        usize::try_from(x).map_err(|_| self.error(format!("'{name}' must not be negative")))
    }

    /// A window length: a positive whole number.
    fn size(&self, pos: usize, name: &str, default: Option<usize>) -> Result<usize, EvalError> {
        let n = match (self.get(pos, name), default) {
            (None, Some(d)) => d,
            (None, None) => return Err(self.error(format!("missing argument '{name}'"))),
            _ => self.count(pos, name, 0)?,
        };
        if n == 0 {
            return Err(self.error(format!("'{name}' must be at least 1")));
        }
        Ok(n)
    }

    fn flag(&self, pos: usize, name: &str, default: bool) -> Result<bool, EvalError> {
        match self.get(pos, name) {
            None => Ok(default),
            Some(v) => truthy(v),
        }
    }

    fn series(&self, pos: usize, name: &str) -> Result<Series, EvalError> {
        match self.required(pos, name)? {
            Value::Series(s) => Ok(s.clone()),
            other => Err(self.error(format!("'{name}' must be a series, not a {}", other.kind()))),
        }
    }

    fn frame(&self, pos: usize, name: &str) -> Result<Arc<Frame>, EvalError> {
        match self.required(pos, name)? {
            Value::Frame(f) => Ok(Arc::clone(f)),
            other => Err(self.error(format!("'{name}' must be a frame, not a {}", other.kind()))),
        }
    }

    fn string(&self, pos: usize, name: &str) -> Result<String, EvalError> {
        match self.required(pos, name)? {
            Value::Str(s) => Ok(s.clone()),
            other => Err(self.error(format!("'{name}' must be a string, not a {}", other.kind()))),
        }
    }

    /// A single name or a list of names.
    fn strings(&self, pos: usize, name: &str) -> Result<Vec<String>, EvalError> {
        match self.required(pos, name)? {
            Value::Str(s) => Ok(vec![s.clone()]),
            Value::List(items) => items
                .iter()
                .map(|v| match v {
                    Value::Str(s) => Ok(s.clone()),
                    other => Err(self.error(format!("'{name}' must hold strings, not {}", other.kind()))),
                })
                .collect(),
            other => Err(self.error(format!(
                "'{name}' must be a string or list of strings, not a {}",
                other.kind()
            ))),
        }
    }
}

fn io_error(path: &str, err: impl std::fmt::Display) -> EvalError {
    EvalError::Io {
        path: path.to_string(),
        message: err.to_string(),
    }
}

fn float_series(like: &Series, values: Vec<f64>) -> Value {
    Value::Series(like.with_data(ColumnData::Float(values)))
}

fn numbers(values: &[Value]) -> Result<Vec<f64>, EvalError> {
    values
        .iter()
        .map(|v| match v {
            Value::Num(x) => Ok(*x),
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            other => Err(EvalError::ty(format!("expected numbers, found a {}", other.kind()))),
        })
        .collect()
}

/// Apply `f` to a number or to every value of a series.
fn map_num(value: &Value, what: &str, f: impl Fn(f64) -> f64) -> Result<Value, EvalError> {
    match value {
        Value::Num(x) => Ok(Value::Num(f(*x))),
        Value::Series(s) => {
            let out = s.floats()?.into_iter().map(f).collect();
            Ok(float_series(s, out))
        }
        other => Err(EvalError::ty(format!(
            "{what}() needs a number or series, not a {}",
            other.kind()
        ))),
    }
}

fn round_to(x: f64, digits: usize) -> f64 {
    if digits > MAX_ROUND_DIGITS {
        return x;
    }
    let scale = 10f64.powi(digits as i32);
    (x * scale).round() / scale
}

fn reducer(name: &str) -> Option<fn(&[f64]) -> f64> {
    let f: fn(&[f64]) -> f64 = match name {
        "mean" => stats::mean,
        "sum" => stats::sum,
        "min" => stats::min,
        "max" => stats::max,
        "std" => stats::std,
        "median" => |v| stats::quantile(v, 0.5),
        "count" => |v| stats::count(v) as f64,
        _ => return None,
    };
    Some(f)
}

// ---------------------------------------------------------------------------
// Functions
// ---------------------------------------------------------------------------

pub(super) fn function(interp: &mut Interp<'_>, name: &str, args: Args) -> Result<Value, EvalError> {
    match name {
        "print" => {
            if let Some((bad, _)) = args.named.iter().find(|(n, _)| n != "sep") {
                return Err(args.error(format!("unexpected keyword argument '{bad}'")));
            }
            let sep = match args.named("sep") {
                Some(Value::Str(s)) => s.clone(),
                Some(other) => return Err(args.error(format!("'sep' must be a string, not a {}", other.kind()))),
                None => " ".to_string(),
            };
            let line: Vec<String> = args.positional.iter().map(Value::to_string).collect();
            interp.emit(&line.join(&sep));
            Ok(Value::None)
        }
        "len" => {
            args.check(&["obj"])?;
            let n = match args.required(0, "obj")? {
                Value::List(items) => items.len(),
                Value::Str(s) => s.chars().count(),
                Value::Map(pairs) => pairs.len(),
                Value::Series(s) => s.len(),
                Value::Frame(f) => f.len(),
                other => return Err(args.error(format!("a {} has no length", other.kind()))),
            };
            Ok(Value::Num(n as f64))
        }
        "round" => {
            args.check(&["x", "ndigits"])?;
            let digits = args.count(1, "ndigits", 0)?;
            map_num(args.required(0, "x")?, name, |x| round_to(x, digits))
        }
        "abs" => {
            args.check(&["x"])?;
            map_num(args.required(0, "x")?, name, f64::abs)
        }
        "sqrt" => {
            args.check(&["x"])?;
            map_num(args.required(0, "x")?, name, f64::sqrt)
        }
        "log" => {
            args.check(&["x"])?;
            map_num(args.required(0, "x")?, name, f64::ln)
        }
        "exp" => {
            args.check(&["x"])?;
            map_num(args.required(0, "x")?, name, f64::exp)
        }
        "min" | "max" => {
            if !args.named.is_empty() {
                return Err(args.error("takes no keyword arguments"));
            }
            let values = match args.positional.as_slice() {
                [] => return Err(args.error("expected at least one argument")),
                [Value::Series(s)] => s.floats()?,
                [Value::List(items)] => numbers(items)?,
                many => numbers(many)?,
            };
            if values.is_empty() {
                return Err(args.error("empty sequence"));
            }
            let f: fn(&[f64]) -> f64 = if name == "min" { stats::min } else { stats::max };
            Ok(Value::Num(f(&values)))
        }
        "sum" => {
            args.check(&["values"])?;
            match args.required(0, "values")? {
                Value::Series(s) => Ok(Value::Num(stats::sum(&s.floats()?))),
                Value::List(items) => Ok(Value::Num(numbers(items)?.iter().sum())),
                other => Err(args.error(format!("cannot sum a {}", other.kind()))),
            }
        }
        "str" => {
            args.check(&["obj"])?;
            Ok(Value::Str(args.required(0, "obj")?.to_string()))
        }
        "float" | "int" => {
            args.check(&["x"])?;
            let x = match args.required(0, "x")? {
                Value::Num(x) => *x,
                Value::Bool(b) => f64::from(u8::from(*b)),
                Value::Str(s) => s
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| args.error(format!("could not convert '{s}' to a number")))?,
                other => return Err(args.error(format!("cannot convert a {}", other.kind()))),
            };
            Ok(Value::Num(if name == "int" { x.trunc() } else { x }))
        }
        "isnan" => {
            args.check(&["x"])?;
            match args.required(0, "x")? {
                Value::Num(x) => Ok(Value::Bool(x.is_nan())),
                Value::None => Ok(Value::Bool(true)),
                Value::Series(s) => Ok(missing_mask(s, true)),
                other => Err(args.error(format!("expected a number or series, not a {}", other.kind()))),
            }
        }
        "type" => {
            args.check(&["obj"])?;
            Ok(Value::Str(args.required(0, "obj")?.kind().to_string()))
        }
        "json" => {
            args.check(&["value", "indent"])?;
            let json = args.required(0, "value")?.to_json();
            let text = if args.flag(1, "indent", false)? {
                serde_json::to_string_pretty(&json)
            } else {
                serde_json::to_string(&json)
            }
            .map_err(|e| args.error(e))?;
            Ok(Value::Str(text))
        }
        "write_json" => {
            args.check(&["path", "value"])?;
            let path = args.string(0, "path")?;
            let target = file::resolve_in(interp.session.workdir(), &path)?;
            let text = serde_json::to_string_pretty(&args.required(1, "value")?.to_json())
                .map_err(|e| args.error(e))?;
            file::write_file(&target, text.as_bytes()).map_err(|e| io_error(&path, e))?;
            info!(path = %target.display(), "snippet wrote JSON");
            Ok(Value::None)
        }
        "load_csv" => {
            args.check(&["source"])?;
            let source = args.string(0, "source")?;
            let frame = if is_url(&source) {
                if !interp.session.sources().contains(&source) {
                    return Err(EvalError::Policy(format!(
                        "URL '{source}' is not one of the session's sources"
                    )));
                }
                load_financial_csv(&source)?
            } else {
                let path = file::resolve_in(interp.session.workdir(), &source)?;
                load_financial_csv(&path.to_string_lossy())?
            };
            Ok(Value::Frame(Arc::new(frame)))
        }
        _ => Err(EvalError::UnknownName(name.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Methods
// ---------------------------------------------------------------------------

pub(super) fn method(
    interp: &mut Interp<'_>,
    target: Value,
    name: &str,
    args: Args,
) -> Result<Value, EvalError> {
    match target {
        Value::Frame(f) => frame_method(interp, f, name, &args),
        Value::Series(s) => series_method(&s, name, &args),
        Value::Window(s, w) => window_method(&s, &w, name, &args),
        Value::Module => ta_function(name, &args),
        map @ Value::Map(_) => map_method(&map, name, &args),
        Value::Str(s) => str_method(&s, name, &args),
        other => Err(EvalError::ty(format!(
            "a {} has no method '{name}'",
            other.kind()
        ))),
    }
}

fn frame_method(
    interp: &mut Interp<'_>,
    f: Arc<Frame>,
    name: &str,
    args: &Args,
) -> Result<Value, EvalError> {
    if let Some(reduce) = reducer(name) {
        args.check(&[])?;
        let pairs = f
            .columns()
            .iter()
            .filter_map(|c| match &c.data {
                ColumnData::Float(v) => Some((c.name.clone(), Value::Num(reduce(v)))),
                _ => None,
            })
            .collect();
        return Ok(Value::Map(pairs));
    }
    let frame = |out: Frame| Ok(Value::Frame(Arc::new(out)));
    match name {
        "head" | "tail" => {
            args.check(&["n"])?;
            let n = args.count(0, "n", 5)?;
            frame(if name == "head" { f.head(n) } else { f.tail(n) })
        }
        "info" => {
            args.check(&[])?;
            Ok(Value::Str(f.info()))
        }
        "describe" => {
            args.check(&[])?;
            Ok(Value::Str(f.describe()))
        }
        "copy" => {
            args.check(&[])?;
            // Frames are copy-on-write, so sharing is a copy.
            Ok(Value::Frame(f))
        }
        "dropna" => {
            args.check(&["subset"])?;
            let subset = match args.get(0, "subset") {
                None | Some(Value::None) => Vec::new(),
                Some(_) => args.strings(0, "subset")?,
            };
            frame(f.dropna(&subset)?)
        }
        "rename" => {
            args.check(&["columns"])?;
            let Value::Map(pairs) = args.required(0, "columns")? else {
                return Err(args.error("'columns' must be a map of old name to new name"));
            };
            let pairs = pairs
                .iter()
                .map(|(old, new)| match new {
                    Value::Str(new) => Ok((old.clone(), new.clone())),
                    other => Err(args.error(format!("new names must be strings, not {}", other.kind()))),
                })
                .collect::<Result<Vec<_>, _>>()?;
            frame(f.rename(&pairs)?)
        }
        "drop" => {
            args.check(&["columns"])?;
            frame(f.drop_columns(&args.strings(0, "columns")?)?)
        }
        "select" => {
            args.check(&["columns"])?;
            frame(f.select(&args.strings(0, "columns")?)?)
        }
        "to_csv" => {
            args.check(&["path", "index"])?;
            let path = args.string(0, "path")?;
            let with_index = args.flag(1, "index", true)?;
            let target = file::resolve_in(interp.session.workdir(), &path)?;
            let mut buf = Vec::new();
            f.write_csv(&mut buf, with_index)
                .map_err(|e| io_error(&path, e))?;
            file::write_file(&target, &buf).map_err(|e| io_error(&path, e))?;
            info!(path = %target.display(), rows = f.len(), "snippet wrote CSV");
            Ok(Value::None)
        }
        "row" => {
            args.check(&["i"])?;
            let pos = position(args.num(0, "i", 0.0)?, f.len())?;
            let Some((ts, cells)) = f.row(pos) else {
                return Ok(Value::None);
            };
            let mut pairs = vec![(f.index_name().to_string(), Value::Str(format_timestamp(&ts)))];
            pairs.extend(cells.into_iter().map(|(k, v)| (k, Value::from_scalar(v))));
            Ok(Value::Map(pairs))
        }
        _ => Err(EvalError::ty(format!("frame has no method '{name}'"))),
    }
}

fn missing_mask(s: &Series, missing: bool) -> Value {
    let data = (0..s.len()).map(|i| s.data.is_missing(i) == missing).collect();
    Value::Series(s.with_data(ColumnData::Bool(data)))
}

fn series_method(s: &Series, name: &str, args: &Args) -> Result<Value, EvalError> {
    if name == "count" {
        args.check(&[])?;
        return Ok(Value::Num(s.data.count() as f64));
    }
    if let Some(reduce) = reducer(name) {
        args.check(&[])?;
        return Ok(Value::Num(reduce(&s.floats()?)));
    }
    match name {
        "quantile" => {
            args.check(&["q"])?;
            Ok(Value::Num(stats::quantile(&s.floats()?, args.num(0, "q", 0.5)?)))
        }
        "first" | "last" => {
            args.check(&[])?;
            let i = if name == "first" { 0 } else { s.len().saturating_sub(1) };
            Ok(s.data.get(i).map(Value::from_scalar).unwrap_or(Value::None))
        }
        "head" | "tail" => {
            args.check(&["n"])?;
            let n = args.count(0, "n", 5)?;
            Ok(Value::Series(if name == "head" { s.head(n) } else { s.tail(n) }))
        }
        "shift" | "diff" | "pct_change" => {
            args.check(&["periods"])?;
            let periods = args.int(0, "periods", 1)?;
            let x = s.floats()?;
            let out = match name {
                "shift" => indicators::shift(&x, periods),
                "diff" => indicators::diff(&x, periods),
                _ => indicators::pct_change(&x, periods),
            };
            Ok(float_series(s, out))
        }
        "cumsum" => {
            args.check(&[])?;
            Ok(float_series(s, indicators::cumsum(&s.floats()?)))
        }
        "cumprod" => {
            args.check(&[])?;
            Ok(float_series(s, indicators::cumprod(&s.floats()?)))
        }
        "abs" => {
            args.check(&[])?;
            map_num(&Value::Series(s.clone()), name, f64::abs)
        }
        "round" => {
            args.check(&["decimals"])?;
            let digits = args.count(0, "decimals", 0)?;
            map_num(&Value::Series(s.clone()), name, |x| round_to(x, digits))
        }
        "rolling_mean" | "rolling_std" => {
            args.check(&["window"])?;
            let window = args.size(0, "window", None)?;
            let x = s.floats()?;
            Ok(float_series(
                s,
                if name == "rolling_mean" {
                    indicators::sma(&x, window)
                } else {
                    indicators::rolling_std(&x, window)
                },
            ))
        }
        "rolling" => {
            args.check(&["window"])?;
            Ok(Value::Window(s.clone(), Window::Rolling(args.size(0, "window", None)?)))
        }
        "ewm" => {
            args.check(&["span"])?;
            Ok(Value::Window(s.clone(), Window::Ewm(args.size(0, "span", None)?)))
        }
        "fillna" => {
            args.check(&["value"])?;
            let data = match (&s.data, args.required(0, "value")?) {
                (ColumnData::Float(v), Value::Num(fill)) => {
                    ColumnData::Float(v.iter().map(|x| if x.is_nan() { *fill } else { *x }).collect())
                }
                (ColumnData::Text(v), Value::Str(fill)) => ColumnData::Text(
                    v.iter()
                        .map(|x| if x.is_empty() { fill.clone() } else { x.clone() })
                        .collect(),
                ),
                (ColumnData::Bool(_), _) => s.data.clone(),
                (_, other) => {
                    return Err(args.error(format!(
                        "cannot fill a {} series with a {}",
                        s.data.kind(),
                        other.kind()
                    )));
                }
            };
            Ok(Value::Series(s.with_data(data)))
        }
        "ffill" => {
            args.check(&[])?;
            let data = match &s.data {
                ColumnData::Float(v) => {
                    let mut last = f64::NAN;
                    ColumnData::Float(
                        v.iter()
                            .map(|x| {
                                if !x.is_nan() {
                                    last = *x;
                                }
                                last
                            })
                            .collect(),
                    )
                }
                ColumnData::Text(v) => {
                    let mut last = String::new();
                    ColumnData::Text(
                        v.iter()
                            .map(|x| {
                                if !x.is_empty() {
                                    last = x.clone();
                                }
                                last.clone()
                            })
                            .collect(),
                    )
                }
                ColumnData::Bool(_) => s.data.clone(),
            };
            Ok(Value::Series(s.with_data(data)))
        }
        "dropna" => {
            args.check(&[])?;
            let rows: Vec<usize> = (0..s.len()).filter(|&i| !s.data.is_missing(i)).collect();
            Ok(Value::Series(s.take(&rows)))
        }
        "isna" | "notna" => {
            args.check(&[])?;
            Ok(missing_mask(s, name == "isna"))
        }
        "tolist" => {
            args.check(&[])?;
            Ok(Value::List(series_values(s)))
        }
        "any" | "all" => {
            args.check(&[])?;
            let mask = bools(s)?;
            Ok(Value::Bool(if name == "any" {
                mask.iter().any(|b| *b)
            } else {
                mask.iter().all(|b| *b)
            }))
        }
        "value_counts" => {
            args.check(&[])?;
            let mut counts: Vec<(String, usize)> = Vec::new();
            for i in (0..s.len()).filter(|&i| !s.data.is_missing(i)) {
                let key = s.data.get(i).map(|v| v.to_string()).unwrap_or_default();
                match counts.iter_mut().find(|(k, _)| *k == key) {
                    Some((_, n)) => *n += 1,
                    None => counts.push((key, 1)),
                }
            }
            counts.sort_by(|a, b| b.1.cmp(&a.1));
            Ok(Value::Map(
                counts
                    .into_iter()
                    .map(|(k, n)| (k, Value::Num(n as f64)))
                    .collect(),
            ))
        }
        "corr" => {
            args.check(&["other"])?;
            let other = args.series(0, "other")?;
            if other.len() != s.len() || !other.aligned_with(&s.index) {
                return Err(crate::data::FrameError::IndexMismatch.into());
            }
            Ok(Value::Num(stats::corr(&s.floats()?, &other.floats()?)))
        }
        "idxmax" | "idxmin" => {
            args.check(&[])?;
            let x = s.floats()?;
            let mut best: Option<usize> = None;
            for (i, v) in x.iter().enumerate().filter(|(_, v)| !v.is_nan()) {
                let better = match best {
                    None => true,
                    Some(b) if name == "idxmax" => *v > x[b],
                    Some(b) => *v < x[b],
                };
                if better {
                    best = Some(i);
                }
            }
            Ok(best
                .map(|i| Value::Str(format_timestamp(&s.index[i])))
                .unwrap_or(Value::None))
        }
        _ => Err(EvalError::ty(format!("series has no method '{name}'"))),
    }
}

fn window_method(s: &Series, window: &Window, name: &str, args: &Args) -> Result<Value, EvalError> {
    args.check(&[])?;
    let x = s.floats()?;
    let out = match window {
        Window::Rolling(n) => match reducer(name) {
            Some(f) => indicators::rolling_apply(&x, *n, f),
            None => return Err(EvalError::ty(format!("rolling window has no method '{name}'"))),
        },
        Window::Ewm(span) if name == "mean" => indicators::ema(&x, *span),
        Window::Ewm(_) => return Err(EvalError::ty(format!("ewm only supports mean(), not '{name}'"))),
    };
    Ok(float_series(s, out))
}

fn map_method(map: &Value, name: &str, args: &Args) -> Result<Value, EvalError> {
    let Value::Map(pairs) = map else {
        return Err(EvalError::ty("expected a map"));
    };
    match name {
        "get" => {
            args.check(&["key", "default"])?;
            let key = args.string(0, "key")?;
            Ok(map
                .map_get(&key)
                .or_else(|| args.get(1, "default"))
                .cloned()
                .unwrap_or(Value::None))
        }
        "keys" => {
            args.check(&[])?;
            Ok(Value::List(pairs.iter().map(|(k, _)| Value::Str(k.clone())).collect()))
        }
        "values" => {
            args.check(&[])?;
            Ok(Value::List(pairs.iter().map(|(_, v)| v.clone()).collect()))
        }
        _ => Err(EvalError::ty(format!("map has no method '{name}'"))),
    }
}

fn str_method(s: &str, name: &str, args: &Args) -> Result<Value, EvalError> {
    match name {
        "upper" | "lower" | "strip" => {
            args.check(&[])?;
            Ok(Value::Str(match name {
                "upper" => s.to_uppercase(),
                "lower" => s.to_lowercase(),
                _ => s.trim().to_string(),
            }))
        }
        "replace" => {
            args.check(&["old", "new"])?;
            Ok(Value::Str(s.replace(&args.string(0, "old")?, &args.string(1, "new")?)))
        }
        "startswith" | "endswith" => {
            args.check(&["prefix"])?;
            let p = args.string(0, "prefix")?;
            Ok(Value::Bool(if name == "startswith" { s.starts_with(&p) } else { s.ends_with(&p) }))
        }
        "split" => {
            args.check(&["sep"])?;
            let parts: Vec<Value> = match args.get(0, "sep") {
                None | Some(Value::None) => s.split_whitespace().map(|p| Value::Str(p.into())).collect(),
                Some(_) => {
                    let sep = args.string(0, "sep")?;
                    s.split(sep.as_str()).map(|p| Value::Str(p.into())).collect()
                }
            };
            Ok(Value::List(parts))
        }
        "join" => {
            args.check(&["items"])?;
            let Value::List(items) = args.required(0, "items")? else {
                return Err(args.error("'items' must be a list"));
            };
            let parts: Vec<String> = items.iter().map(Value::to_string).collect();
            Ok(Value::Str(parts.join(s)))
        }
        _ => Err(EvalError::ty(format!("str has no method '{name}'"))),
    }
}

// ---------------------------------------------------------------------------
// ta
// ---------------------------------------------------------------------------

fn ta_function(name: &str, args: &Args) -> Result<Value, EvalError> {
    match name {
        "sma" | "rolling_std" => {
            args.check(&["series", "window"])?;
            let s = args.series(0, "series")?;
            let window = args.size(1, "window", Some(20))?;
            let x = s.floats()?;
            Ok(float_series(
                &s,
                if name == "sma" {
                    indicators::sma(&x, window)
                } else {
                    indicators::rolling_std(&x, window)
                },
            ))
        }
        "ema" => {
            args.check(&["series", "span", "window"])?;
            let s = args.series(0, "series")?;
            let span = match args.named("window") {
                Some(_) => args.size(usize::MAX, "window", None)?,
                None => args.size(1, "span", Some(20))?,
            };
            Ok(float_series(&s, indicators::ema(&s.floats()?, span)))
        }
        "rsi" => {
            args.check(&["series", "period"])?;
            let s = args.series(0, "series")?;
            let period = args.size(1, "period", Some(14))?;
            Ok(float_series(&s, indicators::rsi(&s.floats()?, period)))
        }
        "macd" => {
            args.check(&["series", "fast", "slow", "signal"])?;
            let s = args.series(0, "series")?;
            let fast = args.size(1, "fast", Some(12))?;
            let slow = args.size(2, "slow", Some(26))?;
            let signal = args.size(3, "signal", Some(9))?;
            let m = indicators::macd(&s.floats()?, fast, slow, signal);
            Ok(Value::Map(vec![
                ("macd".into(), float_series(&s, m.line)),
                ("signal".into(), float_series(&s, m.signal)),
                ("hist".into(), float_series(&s, m.hist)),
            ]))
        }
        "bollinger" => {
            args.check(&["series", "window", "k"])?;
            let s = args.series(0, "series")?;
            let window = args.size(1, "window", Some(20))?;
            let k = args.num(2, "k", 2.0)?;
            let b = indicators::bollinger(&s.floats()?, window, k);
            Ok(Value::Map(vec![
                ("upper".into(), float_series(&s, b.upper)),
                ("middle".into(), float_series(&s, b.middle)),
                ("lower".into(), float_series(&s, b.lower)),
            ]))
        }
        "vwap" => {
            args.check(&["frame"])?;
            let f = args.frame(0, "frame")?;
            let out = indicators::vwap(
                f.index(),
                &f.floats("high")?,
                &f.floats("low")?,
                &f.floats("close")?,
                &f.floats("volume")?,
            );
            Ok(Value::Series(Series::new(
                "vwap",
                Arc::clone(f.index()),
                ColumnData::Float(out),
            )))
        }
        "atr" => {
            args.check(&["frame", "period"])?;
            let f = args.frame(0, "frame")?;
            let period = args.size(1, "period", Some(14))?;
            let out = indicators::atr(&f.floats("high")?, &f.floats("low")?, &f.floats("close")?, period);
            Ok(Value::Series(Series::new(
                "atr",
                Arc::clone(f.index()),
                ColumnData::Float(out),
            )))
        }
        "pct_change" => {
            args.check(&["series", "periods"])?;
            let s = args.series(0, "series")?;
            let periods = args.int(1, "periods", 1)?;
            Ok(float_series(&s, indicators::pct_change(&s.floats()?, periods)))
        }
        "log_return" | "cum_return" => {
            args.check(&["series"])?;
            let s = args.series(0, "series")?;
            let x = s.floats()?;
            Ok(float_series(
                &s,
                if name == "log_return" {
                    indicators::log_return(&x)
                } else {
                    indicators::cumulative_return(&x)
                },
            ))
        }
        "where" => {
            args.check(&["mask", "then", "otherwise"])?;
            let mask = args.series(0, "mask")?;
            let cond = bools(&mask)?;
            let n = cond.len();
            let then = where_branch(&args, 1, "then", &mask)?;
            let otherwise = where_branch(&args, 2, "otherwise", &mask)?;
            let data = match (then, otherwise) {
                (Branch::Float(a), Branch::Float(b)) => ColumnData::Float(pick(&cond, a, b)),
                (Branch::Float(a), Branch::Missing) => ColumnData::Float(pick(&cond, a, vec![f64::NAN; n])),
                (Branch::Missing, Branch::Float(b)) => ColumnData::Float(pick(&cond, vec![f64::NAN; n], b)),
                (Branch::Missing, Branch::Missing) => ColumnData::Float(vec![f64::NAN; n]),
                (Branch::Text(a), Branch::Text(b)) => ColumnData::Text(pick(&cond, a, b)),
                (Branch::Text(a), Branch::Missing) => ColumnData::Text(pick(&cond, a, vec![String::new(); n])),
                (Branch::Missing, Branch::Text(b)) => ColumnData::Text(pick(&cond, vec![String::new(); n], b)),
                (Branch::Float(_), Branch::Text(_)) | (Branch::Text(_), Branch::Float(_)) => {
                    return Err(args.error("'then' and 'otherwise' must both be numeric or both be text"));
                }
            };
            Ok(Value::Series(mask.with_data(data)))
        }
        _ => Err(EvalError::ty(format!(
            "ta has no function '{name}' (available: {})",
            TA_FUNCTIONS.join(", ")
        ))),
    }
}

/// One side of `ta.where`, broadcast to the mask's length. `None` fits
/// either kind.
enum Branch {
    Missing,
    Float(Vec<f64>),
    Text(Vec<String>),
}

fn where_branch(args: &Args, pos: usize, name: &str, mask: &Series) -> Result<Branch, EvalError> {
    let n = mask.len();
    match args.required(pos, name)? {
        Value::None => Ok(Branch::Missing),
        Value::Num(x) => Ok(Branch::Float(vec![*x; n])),
        Value::Str(s) => Ok(Branch::Text(vec![s.clone(); n])),
        Value::Series(s) if s.len() == n && s.aligned_with(&mask.index) => match &s.data {
            ColumnData::Text(v) => Ok(Branch::Text(v.clone())),
            _ => Ok(Branch::Float(s.floats()?)),
        },
        Value::Series(_) => Err(crate::data::FrameError::IndexMismatch.into()),
        other => Err(args.error(format!(
            "'{name}' must be a number, string or series, not {}",
            other.kind()
        ))),
    }
}

fn pick<T>(cond: &[bool], then: Vec<T>, otherwise: Vec<T>) -> Vec<T> {
    cond.iter()
        .zip(then.into_iter().zip(otherwise))
        .map(|(c, (a, b))| if *c { a } else { b })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::super::{SandboxError, Session};
    use super::*;
    use crate::data::read_financial_csv;

    const PRICES: &str = "\
date,high,low,close,volume,sector
2024-01-01,11,9,10,100,tech
2024-01-02,12,10,11,150,energy
2024-01-03,13,10,12,120,tech
2024-01-04,12,11,,90,tech
2024-01-05,14,11,13,200,energy
";

    fn session() -> (tempfile::TempDir, Session) {
        let dir = tempfile::tempdir().unwrap();
        let frame = read_financial_csv(PRICES.as_bytes()).unwrap();
        let s = Session::new(frame, dir.path());
        (dir, s)
    }

    fn run(s: &mut Session, code: &str) -> String {
        s.exec(code).unwrap()
    }

    fn eval_error(s: &mut Session, code: &str) -> EvalError {
        match s.exec(code) {
            Err(SandboxError::Runtime { source, .. }) => source,
            other => panic!("expected a runtime error, got {other:?}"),
        }
    }

    #[test]
    fn print_joins_arguments() {
        let (_d, mut s) = session();
        assert_eq!(run(&mut s, "print('a', 1, True, None)"), "a 1 True None\n");
        assert_eq!(run(&mut s, "print(1, 2, sep=', ')"), "1, 2\n");
        assert_eq!(run(&mut s, "print()"), "\n");
    }

    #[test]
    fn numeric_builtins() {
        let (_d, mut s) = session();
        assert_eq!(run(&mut s, "round(3.14159, 2)"), "3.14\n");
        assert_eq!(run(&mut s, "abs(-2) + sqrt(9) + exp(0) + log(1)"), "6\n");
        assert_eq!(run(&mut s, "min(3, 1, 2)"), "1\n");
        assert_eq!(run(&mut s, "max([4, 7])"), "7\n");
        assert_eq!(run(&mut s, "max(df.close)"), "13\n");
        assert_eq!(run(&mut s, "sum([1, 2, 3])"), "6\n");
        assert_eq!(run(&mut s, "float('2.5') + int(3.9)"), "5.5\n");
        assert_eq!(run(&mut s, "isnan(df.close[3])"), "True\n");
        assert_eq!(run(&mut s, "type(df)"), "frame\n");
        assert!(matches!(eval_error(&mut s, "float('abc')"), EvalError::Argument(_)));
        assert!(matches!(eval_error(&mut s, "round(1, x=2)"), EvalError::Argument(_)));
    }

    #[test]
    fn series_reductions_skip_missing() {
        let (_d, mut s) = session();
        assert_eq!(run(&mut s, "df.close.count()"), "4\n");
        assert_eq!(run(&mut s, "df.close.mean()"), "11.5\n");
        assert_eq!(run(&mut s, "df.close.median()"), "11.5\n");
        assert_eq!(run(&mut s, "df.close.first()"), "10\n");
        assert_eq!(run(&mut s, "df.close.last()"), "13\n");
        assert_eq!(run(&mut s, "df.sector.count()"), "5\n");
        assert_eq!(run(&mut s, "df.close.idxmax()"), "2024-01-05T00:00:00Z\n");
    }

    #[test]
    fn series_transforms() {
        let (_d, mut s) = session();
        assert_eq!(run(&mut s, "df.close.ffill().tolist()"), "[10, 11, 12, 12, 13]\n");
        assert_eq!(run(&mut s, "df.close.fillna(0).tolist()"), "[10, 11, 12, 0, 13]\n");
        assert_eq!(run(&mut s, "df.close.dropna().size"), "4\n");
        assert_eq!(run(&mut s, "df.close.isna().any()"), "True\n");
        assert_eq!(run(&mut s, "df.close.rolling(2).mean().tolist()"), "[NaN, 10.5, 11.5, NaN, NaN]\n");
        assert_eq!(run(&mut s, "df.close.rolling_mean(2).tolist()"), "[NaN, 10.5, 11.5, NaN, NaN]\n");
        assert_eq!(run(&mut s, "df.high.diff().tolist()"), "[NaN, 1, 1, -1, 2]\n");
        assert_eq!(run(&mut s, "df.high.cumsum().last()"), "62\n");
        assert_eq!(run(&mut s, "df.sector.value_counts()"), "{'tech': 3, 'energy': 2}\n");
        assert_eq!(run(&mut s, "round(df.high.corr(df.volume), 3) > 0"), "True\n");
    }

    #[test]
    fn frame_methods() {
        let (_d, mut s) = session();
        assert_eq!(run(&mut s, "len(df.dropna())"), "4\n");
        assert_eq!(run(&mut s, "df.drop('sector').columns"), "['high', 'low', 'close', 'volume']\n");
        assert_eq!(run(&mut s, "df.select(['close']).shape"), "[5, 1]\n");
        assert_eq!(run(&mut s, "df[['close', 'volume']].shape"), "[5, 2]\n");
        assert_eq!(
            run(&mut s, "df.rename(columns={'close': 'px'}).columns[2]"),
            "px\n"
        );
        assert_eq!(run(&mut s, "df.row(0)['date']"), "2024-01-01T00:00:00Z\n");
        assert_eq!(run(&mut s, "df.tail(2).close.tolist()"), "[NaN, 13]\n");
        assert_eq!(run(&mut s, "df.max()['high']"), "14\n");
        assert!(run(&mut s, "df.describe()").contains("mean"));
        assert!(run(&mut s, "df.info()").starts_with("Frame: 5 rows x 5 columns"));
    }

    #[test]
    fn ta_functions() {
        let (_d, mut s) = session();
        run(&mut s, "df['sma2'] = ta.sma(df.high, 2)\nm = ta.macd(df.high, fast=2, slow=3, signal=2)");
        assert_eq!(s.frame().floats("sma2").unwrap()[1], 11.5);
        assert_eq!(run(&mut s, "m.hist.size"), "5\n");
        assert_eq!(run(&mut s, "ta.bollinger(df.high, 2)['middle'][1]"), "11.5\n");
        assert_eq!(run(&mut s, "ta.vwap(df).size"), "5\n");
        assert_eq!(run(&mut s, "ta.atr(df, 2).count()"), "4\n");
        assert_eq!(run(&mut s, "ta.rsi(df.high, 2).count()"), "3\n");
        assert_eq!(run(&mut s, "ta.where(df.high > 12, 1, 0).tolist()"), "[0, 0, 1, 0, 1]\n");
        assert_eq!(run(&mut s, "ta.cum_return(df.high).first()"), "0\n");
        assert_eq!(run(&mut s, "round(ta.ema(df.high, window=1).last(), 2)"), "14\n");
        assert!(matches!(eval_error(&mut s, "ta.bogus(df.close)"), EvalError::Type(_)));
        assert!(matches!(eval_error(&mut s, "ta.sma(df.close, 0)"), EvalError::Argument(_)));
        assert!(matches!(eval_error(&mut s, "ta.vwap(df.drop('volume'))"), EvalError::Frame(_)));
    }

    #[test]
    fn where_builds_text_labels() {
        let (_d, mut s) = session();
        run(
            &mut s,
            "df['signal'] = ta.where(df.high > 13, 'overbought_fade', \
ta.where(df.low < 10, 'oversold_bounce', 'neutral'))",
        );
        assert_eq!(run(&mut s, "df.signal.first()"), "oversold_bounce\n");
        assert_eq!(run(&mut s, "df.signal[2]"), "neutral\n");
        assert_eq!(run(&mut s, "df.signal.last()"), "overbought_fade\n");
        assert_eq!(run(&mut s, "ta.where(df.high > 13, 'hot', None)[0]"), "\n");
        assert_eq!(run(&mut s, "ta.where(df.high > 13, None, 2).tolist()"), "[2, 2, 2, 2, NaN]\n");
        assert!(matches!(
            eval_error(&mut s, "ta.where(df.high > 13, 'hot', 0)"),
            EvalError::Argument(_)
        ));
    }

    #[test]
    fn huge_arguments_are_errors_not_panics() {
        let (_d, mut s) = session();
        assert!(matches!(eval_error(&mut s, "df.close.shift(-1e300)"), EvalError::Argument(_)));
        assert!(matches!(eval_error(&mut s, "df.close.diff(1e19)"), EvalError::Argument(_)));
        assert_eq!(run(&mut s, "df.high.shift(100).count()"), "0\n");
        assert_eq!(run(&mut s, "round(1.5, 400)"), "1.5\n");
        assert_eq!(run(&mut s, "round(df.high, 40).last()"), "14\n");
    }

    #[test]
    fn exports_stay_inside_workdir() {
        let (dir, mut s) = session();
        run(&mut s, "df.to_csv('out/prices.csv')\nwrite_json('summary.json', {'last': df.close.last(), 'gap': None})");
        let csv = std::fs::read_to_string(dir.path().join("out/prices.csv")).unwrap();
        assert!(csv.starts_with("date,high,low,close,volume,sector\n"));
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("summary.json")).unwrap()).unwrap();
        assert_eq!(json, serde_json::json!({"last": 13.0, "gap": null}));

        assert!(matches!(eval_error(&mut s, "df.to_csv('/tmp/escape.csv')"), EvalError::Path(_)));
        assert!(matches!(eval_error(&mut s, "write_json('../x.json', 1)"), EvalError::Path(_)));
    }

    #[test]
    fn load_csv_reads_workdir_files_and_allowed_urls_only() {
        let (dir, mut s) = session();
        std::fs::write(dir.path().join("other.csv"), "Date,Value\n2024-02-01,1\n").unwrap();
        assert_eq!(run(&mut s, "other = load_csv('other.csv')\nother.columns"), "['value']\n");
        run(&mut s, "df = load_csv('other.csv')");
        assert_eq!(s.frame().len(), 1);

        assert!(matches!(
            eval_error(&mut s, "load_csv('https://example.com/data.csv')"),
            EvalError::Policy(_)
        ));
        assert!(matches!(eval_error(&mut s, "load_csv('../secret.csv')"), EvalError::Path(_)));
    }

    #[test]
    fn json_renders_values() {
        let (_d, mut s) = session();
        assert_eq!(run(&mut s, "json({'a': [1, None]})"), "{\"a\":[1.0,null]}\n");
    }

    #[test]
    fn string_and_map_helpers() {
        let (_d, mut s) = session();
        assert_eq!(run(&mut s, "', '.join(['a', 'b'])"), "a, b\n");
        assert_eq!(run(&mut s, "'  X '.strip().lower()"), "x\n");
        assert_eq!(run(&mut s, "'a-b'.split('-')"), "['a', 'b']\n");
        assert_eq!(run(&mut s, "{'a': 1}.get('b', 2)"), "2\n");
        assert_eq!(run(&mut s, "{'a': 1}.keys()"), "['a']\n");
    }
}
