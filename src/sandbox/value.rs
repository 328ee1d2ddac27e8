use std::fmt;
use std::sync::Arc;

use serde_json::{Map as JsonMap, Number, Value as Json};

use crate::data::{ColumnData, Frame, Scalar, Series, format_float, format_timestamp};

/// A pending window computation: `s.rolling(20)` or `s.ewm(span=12)`,
/// waiting for its reduction (`.mean()`, `.std()`, ...).
#[derive(Debug, Clone, PartialEq)]
pub enum Window {
    Rolling(usize),
    Ewm(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Num(f64),
    Str(String),
    List(Vec<Value>),
    /// Insertion-ordered string-keyed map.
    Map(Vec<(String, Value)>),
    Series(Series),
    Frame(Arc<Frame>),
    Window(Series, Window),
    /// The `ta` library handle.
    Module,
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Num(_) => "number",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Series(_) => "series",
            Value::Frame(_) => "frame",
            Value::Window(..) => "window",
            Value::Module => "module",
        }
    }

    pub fn from_scalar(s: Scalar) -> Value {
        match s {
            Scalar::Float(x) => Value::Num(x),
            Scalar::Bool(b) => Value::Bool(b),
            Scalar::Text(t) => Value::Str(t),
        }
    }

    pub fn map_get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(pairs) => pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// JSON form used by `json()` and `write_json()`. Non-finite numbers
    /// become `null`; series map timestamps to values; frames become a list
    /// of row records.
    pub fn to_json(&self) -> Json {
        match self {
            Value::None | Value::Module | Value::Window(..) => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Num(x) => num(*x),
            Value::Str(s) => Json::String(s.clone()),
            Value::List(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(pairs) => Json::Object(
                pairs
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect::<JsonMap<_, _>>(),
            ),
            Value::Series(s) => Json::Object(
                (0..s.len())
                    .map(|i| (format_timestamp(&s.index[i]), cell(&s.data, i)))
                    .collect::<JsonMap<_, _>>(),
            ),
            Value::Frame(f) => Json::Array(
                (0..f.len())
                    .map(|i| {
                        let mut row = JsonMap::new();
                        row.insert(
                            f.index_name().to_string(),
                            Json::String(format_timestamp(&f.index()[i])),
                        );
                        for c in f.columns() {
                            row.insert(c.name.clone(), cell(&c.data, i));
                        }
                        Json::Object(row)
                    })
                    .collect(),
            ),
        }
    }

    /// Quoted form used inside lists and maps.
    fn repr(&self) -> String {
        match self {
            Value::Str(s) => format!("'{s}'"),
            other => other.to_string(),
        }
    }
}

fn num(x: f64) -> Json {
    Number::from_f64(x).map(Json::Number).unwrap_or(Json::Null)
}

fn cell(data: &ColumnData, i: usize) -> Json {
    match data.get(i) {
        Some(Scalar::Float(x)) => num(x),
        Some(Scalar::Bool(b)) => Json::Bool(b),
        Some(Scalar::Text(t)) if t.is_empty() => Json::Null,
        Some(Scalar::Text(t)) => Json::String(t),
        None => Json::Null,
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Num(x) => f.write_str(&format_float(*x)),
            Value::Str(s) => f.write_str(s),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(Value::repr).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Value::Map(pairs) => {
                let parts: Vec<String> = pairs
                    .iter()
                    .map(|(k, v)| format!("'{k}': {}", v.repr()))
                    .collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
            Value::Series(s) => write!(f, "{s}"),
            Value::Frame(frame) => write!(f, "{frame}"),
            Value::Window(s, Window::Rolling(w)) => write!(f, "<rolling window={w} over {}>", s.name),
            Value::Window(s, Window::Ewm(span)) => write!(f, "<ewm span={span} over {}>", s.name),
            Value::Module => f.write_str("<module ta>"),
        }
    }
}
