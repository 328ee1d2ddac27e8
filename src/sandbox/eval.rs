use std::sync::Arc;

use super::builtins::{self, Args};
use super::parser::{Arg, BinOp, Expr, FPart, Stmt, Target, UnaryOp};
use super::value::Value;
use super::{EvalError, Session};
use crate::data::{ColumnData, Frame, FrameError, Scalar, Series, format_timestamp};

/// Tree-walking evaluator bound to one session for one snippet.
pub(super) struct Interp<'s> {
    pub(super) session: &'s mut Session,
    output: String,
}

impl<'s> Interp<'s> {
    pub(super) fn new(session: &'s mut Session) -> Self {
        Self {
            session,
            output: String::new(),
        }
    }

    /// Append a line to the captured output.
    pub(super) fn emit(&mut self, text: &str) {
        self.output.push_str(text);
        self.output.push('\n');
    }

    pub(super) fn into_output(self) -> String {
        self.output
    }

    pub(super) fn statement(&mut self, stmt: &Stmt) -> Result<Value, EvalError> {
        match stmt {
            Stmt::Expr(expr) => self.eval(expr),
            Stmt::Assign(target, expr) => {
                let value = self.eval(expr)?;
                self.assign(target, value)?;
                Ok(Value::None)
            }
        }
    }

    fn assign(&mut self, target: &Target, value: Value) -> Result<(), EvalError> {
        match target {
            Target::Name(name) => self.bind(name, value),
            Target::Index(name, key) => {
                let key = self.eval(key)?;
                self.set_item(name, key, value)
            }
            Target::Attr(name, attr) => self.set_item(name, Value::Str(attr.clone()), value),
        }
    }

    fn bind(&mut self, name: &str, value: Value) -> Result<(), EvalError> {
        match (name, value) {
            ("df", Value::Frame(frame)) => {
                self.session.frame = frame;
                Ok(())
            }
            ("df", other) => Err(EvalError::ty(format!(
                "df must hold a frame, not a {}",
                other.kind()
            ))),
            ("ta", _) => Err(EvalError::Policy("'ta' is reserved".into())),
            (_, value) => {
                self.session.locals.insert(name.to_string(), value);
                Ok(())
            }
        }
    }

    fn set_item(&mut self, name: &str, key: Value, value: Value) -> Result<(), EvalError> {
        if name == "df" {
            let frame = Arc::make_mut(&mut self.session.frame);
            return set_column(frame, key, value);
        }
        if name == "ta" {
            return Err(EvalError::Policy("'ta' is reserved".into()));
        }
        let slot = self
            .session
            .locals
            .get_mut(name)
            .ok_or_else(|| EvalError::UnknownName(name.to_string()))?;
        match slot {
            Value::Frame(frame) => set_column(Arc::make_mut(frame), key, value),
            Value::Map(pairs) => {
                let Value::Str(key) = key else {
                    return Err(EvalError::ty("map keys must be strings"));
                };
                match pairs.iter_mut().find(|(k, _)| *k == key) {
                    Some((_, existing)) => *existing = value,
                    None => pairs.push((key, value)),
                }
                Ok(())
            }
            Value::List(items) => {
                let Value::Num(i) = key else {
                    return Err(EvalError::ty("list indices must be numbers"));
                };
                let pos = position(i, items.len())?;
                items[pos] = value;
                Ok(())
            }
            other => Err(EvalError::ty(format!(
                "'{name}' is a {} and does not support item assignment",
                other.kind()
            ))),
        }
    }

    fn lookup(&self, name: &str) -> Result<Value, EvalError> {
        match name {
            "df" => Ok(Value::Frame(Arc::clone(&self.session.frame))),
            "ta" => Ok(Value::Module),
            _ => match self.session.locals.get(name) {
                Some(value) => Ok(value.clone()),
                None if builtins::is_function(name) => Err(EvalError::ty(format!(
                    "'{name}' is a function; call it with ()"
                ))),
                None => Err(EvalError::UnknownName(name.to_string())),
            },
        }
    }

    pub(super) fn eval(&mut self, expr: &Expr) -> Result<Value, EvalError> {
        match expr {
            Expr::Num(n) => Ok(Value::Num(*n)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::None => Ok(Value::None),
            Expr::FStr(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FPart::Lit(text) => out.push_str(text),
                        FPart::Expr(expr, spec) => {
                            let value = self.eval(expr)?;
                            match spec {
                                Some(spec) => out.push_str(&format_spec(&value, spec)?),
                                None => out.push_str(&value.to_string()),
                            }
                        }
                    }
                }
                Ok(Value::Str(out))
            }
            Expr::Name(name) => self.lookup(name),
            Expr::List(items) => Ok(Value::List(
                items.iter().map(|e| self.eval(e)).collect::<Result<_, _>>()?,
            )),
            Expr::Map(pairs) => {
                let mut out: Vec<(String, Value)> = Vec::with_capacity(pairs.len());
                for (k, v) in pairs {
                    let key = match self.eval(k)? {
                        Value::Str(s) => s,
                        Value::Num(n) => crate::data::format_float(n),
                        other => {
                            return Err(EvalError::ty(format!(
                                "map keys must be strings, not {}",
                                other.kind()
                            )));
                        }
                    };
                    let value = self.eval(v)?;
                    match out.iter_mut().find(|(k, _)| *k == key) {
                        Some((_, existing)) => *existing = value,
                        None => out.push((key, value)),
                    }
                }
                Ok(Value::Map(out))
            }
            Expr::Unary(op, inner) => {
                let value = self.eval(inner)?;
                unary(*op, value)
            }
            Expr::Binary(BinOp::And, lhs, rhs) => {
                let l = self.eval(lhs)?;
                if !truthy(&l)? { Ok(l) } else { self.eval(rhs) }
            }
            Expr::Binary(BinOp::Or, lhs, rhs) => {
                let l = self.eval(lhs)?;
                if truthy(&l)? { Ok(l) } else { self.eval(rhs) }
            }
            Expr::Binary(op, lhs, rhs) => {
                let l = self.eval(lhs)?;
                let r = self.eval(rhs)?;
                binary(*op, l, r)
            }
            Expr::Index(object, key) => {
                let object = self.eval(object)?;
                let key = self.eval(key)?;
                index(object, key)
            }
            Expr::Attr(object, name) => {
                let object = self.eval(object)?;
                attr(object, name)
            }
            Expr::Call(callee, args) => self.call(callee, args),
        }
    }

    fn call(&mut self, callee: &Expr, args: &[Arg]) -> Result<Value, EvalError> {
        match callee {
            Expr::Attr(object, method) => {
                let target = self.eval(object)?;
                let args = self.args(method, args)?;
                builtins::method(self, target, method, args)
            }
            Expr::Name(name)
                if !self.session.locals.contains_key(name) && builtins::is_function(name) =>
            {
                let args = self.args(name, args)?;
                builtins::function(self, name, args)
            }
            other => {
                let value = self.eval(other)?;
                Err(EvalError::ty(format!("a {} is not callable", value.kind())))
            }
        }
    }

    fn args(&mut self, func: &str, args: &[Arg]) -> Result<Args, EvalError> {
        let mut out = Args::new(func);
        for arg in args {
            let value = self.eval(&arg.value)?;
            match &arg.name {
                Some(name) => out.named.push((name.clone(), value)),
                None => out.positional.push(value),
            }
        }
        Ok(out)
    }
}

/// Resolve a possibly negative position against `len`.
pub(super) fn position(i: f64, len: usize) -> Result<usize, EvalError> {
    if i.fract() != 0.0 {
        return Err(EvalError::arg(format!("index {i} is not a whole number")));
    }
    let idx = if i < 0.0 { len as f64 + i } else { i };
    if idx < 0.0 || idx >= len as f64 {
        return Err(EvalError::arg(format!(
            "index {} out of range for length {len}",
            crate::data::format_float(i)
        )));
    }
    Ok(idx as usize)
}

pub(super) fn truthy(value: &Value) -> Result<bool, EvalError> {
    Ok(match value {
        Value::None => false,
        Value::Bool(b) => *b,
        Value::Num(x) => *x != 0.0 && !x.is_nan(),
        Value::Str(s) => !s.is_empty(),
        Value::List(items) => !items.is_empty(),
        Value::Map(pairs) => !pairs.is_empty(),
        Value::Module => true,
        Value::Series(_) | Value::Frame(_) | Value::Window(..) => {
            return Err(EvalError::ty(format!(
                "the truth value of a {} is ambiguous; use & | ~ or .any()/.all()",
                value.kind()
            )));
        }
    })
}

/// Build column data for a frame of `len` rows from a list literal.
pub(super) fn column_from_list(items: &[Value], len: usize) -> Result<ColumnData, EvalError> {
    if items.len() != len {
        return Err(FrameError::Length {
            expected: len,
            got: items.len(),
        }
        .into());
    }
    if items.iter().all(|v| matches!(v, Value::Bool(_))) && !items.is_empty() {
        return Ok(ColumnData::Bool(
            items.iter().map(|v| matches!(v, Value::Bool(true))).collect(),
        ));
    }
    if items.iter().all(|v| matches!(v, Value::Num(_) | Value::None)) {
        return Ok(ColumnData::Float(
            items
                .iter()
                .map(|v| match v {
                    Value::Num(x) => *x,
                    _ => f64::NAN,
                })
                .collect(),
        ));
    }
    Ok(ColumnData::Text(
        items
            .iter()
            .map(|v| match v {
                Value::None => String::new(),
                other => other.to_string(),
            })
            .collect(),
    ))
}

fn set_column(frame: &mut Frame, key: Value, value: Value) -> Result<(), EvalError> {
    let Value::Str(name) = key else {
        return Err(EvalError::ty(format!(
            "column names must be strings, not {}",
            key.kind()
        )));
    };
    let len = frame.len();
    match value {
        Value::Series(series) => frame.set_series(name, series)?,
        Value::Num(x) => frame.set_column(name, ColumnData::filled(&Scalar::Float(x), len))?,
        Value::None => frame.set_column(name, ColumnData::filled(&Scalar::Float(f64::NAN), len))?,
        Value::Bool(b) => frame.set_column(name, ColumnData::filled(&Scalar::Bool(b), len))?,
        Value::Str(s) => frame.set_column(name, ColumnData::filled(&Scalar::Text(s), len))?,
        Value::List(items) => frame.set_column(name, column_from_list(&items, len)?)?,
        other => {
            return Err(EvalError::ty(format!(
                "cannot store a {} in a column",
                other.kind()
            )));
        }
    }
    Ok(())
}

fn symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Mod => "%",
        BinOp::Pow => "**",
        BinOp::Lt => "<",
        BinOp::Le => "<=",
        BinOp::Gt => ">",
        BinOp::Ge => ">=",
        BinOp::Eq => "==",
        BinOp::Ne => "!=",
        BinOp::And => "and",
        BinOp::Or => "or",
        BinOp::BitAnd => "&",
        BinOp::BitOr => "|",
    }
}

fn arith(op: BinOp) -> Option<fn(f64, f64) -> f64> {
    let f: fn(f64, f64) -> f64 = match op {
        BinOp::Add => |a, b| a + b,
        BinOp::Sub => |a, b| a - b,
        BinOp::Mul => |a, b| a * b,
        BinOp::Div => |a, b| a / b,
        BinOp::Mod => |a, b| a - b * (a / b).floor(),
        BinOp::Pow => f64::powf,
        _ => return None,
    };
    Some(f)
}

fn compare(op: BinOp) -> Option<fn(f64, f64) -> bool> {
    let f: fn(f64, f64) -> bool = match op {
        BinOp::Lt => |a, b| a < b,
        BinOp::Le => |a, b| a <= b,
        BinOp::Gt => |a, b| a > b,
        BinOp::Ge => |a, b| a >= b,
        BinOp::Eq => |a, b| a == b,
        BinOp::Ne => |a, b| a != b,
        _ => return None,
    };
    Some(f)
}

fn logic(op: BinOp) -> Option<fn(bool, bool) -> bool> {
    let f: fn(bool, bool) -> bool = match op {
        BinOp::BitAnd => |a, b| a && b,
        BinOp::BitOr => |a, b| a || b,
        _ => return None,
    };
    Some(f)
}

fn unsupported(op: BinOp, l: &Value, r: &Value) -> EvalError {
    EvalError::ty(format!(
        "unsupported operand types for {}: {} and {}",
        symbol(op),
        l.kind(),
        r.kind()
    ))
}

fn as_num(value: &Value) -> Option<f64> {
    match value {
        Value::Num(x) => Some(*x),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::None => Some(f64::NAN),
        _ => None,
    }
}

pub(super) fn bools(series: &Series) -> Result<Vec<bool>, EvalError> {
    match &series.data {
        ColumnData::Bool(v) => Ok(v.clone()),
        _ => Err(EvalError::ty(format!(
            "'{}' is not a boolean series; build a mask with a comparison",
            series.name
        ))),
    }
}

fn binary(op: BinOp, l: Value, r: Value) -> Result<Value, EvalError> {
    match (&l, &r) {
        (Value::Series(a), Value::Series(b)) => series_series(op, a, b),
        (Value::Series(a), _) => series_scalar(op, a, &r, false),
        (_, Value::Series(b)) => series_scalar(op, b, &l, true),
        (Value::Str(a), Value::Str(b)) => match op {
            BinOp::Add => Ok(Value::Str(format!("{a}{b}"))),
            BinOp::Eq => Ok(Value::Bool(a == b)),
            BinOp::Ne => Ok(Value::Bool(a != b)),
            BinOp::Lt => Ok(Value::Bool(a < b)),
            BinOp::Le => Ok(Value::Bool(a <= b)),
            BinOp::Gt => Ok(Value::Bool(a > b)),
            BinOp::Ge => Ok(Value::Bool(a >= b)),
            _ => Err(unsupported(op, &l, &r)),
        },
        (Value::List(a), Value::List(b)) if op == BinOp::Add => {
            Ok(Value::List(a.iter().chain(b).cloned().collect()))
        }
        (Value::Bool(a), Value::Bool(b)) if logic(op).is_some() => {
            Ok(Value::Bool(logic(op).is_some_and(|f| f(*a, *b))))
        }
        _ => {
            if let (Some(a), Some(b)) = (as_num(&l), as_num(&r))
                && !matches!((&l, &r), (Value::None, Value::None))
            {
                if let Some(f) = arith(op) {
                    return Ok(Value::Num(f(a, b)));
                }
                if let Some(f) = compare(op) {
                    return Ok(Value::Bool(f(a, b)));
                }
            }
            match op {
                BinOp::Eq => Ok(Value::Bool(l == r)),
                BinOp::Ne => Ok(Value::Bool(l != r)),
                _ => Err(unsupported(op, &l, &r)),
            }
        }
    }
}

fn series_series(op: BinOp, a: &Series, b: &Series) -> Result<Value, EvalError> {
    if a.len() != b.len() || !a.aligned_with(&b.index) {
        return Err(FrameError::IndexMismatch.into());
    }
    if let Some(f) = logic(op) {
        let (x, y) = (bools(a)?, bools(b)?);
        let data = x.iter().zip(&y).map(|(p, q)| f(*p, *q)).collect();
        return Ok(Value::Series(a.with_data(ColumnData::Bool(data))));
    }
    if let (ColumnData::Text(x), ColumnData::Text(y)) = (&a.data, &b.data)
        && matches!(op, BinOp::Eq | BinOp::Ne)
    {
        let eq = op == BinOp::Eq;
        let data = x.iter().zip(y).map(|(p, q)| (p == q) == eq).collect();
        return Ok(Value::Series(a.with_data(ColumnData::Bool(data))));
    }
    let (x, y) = (a.floats()?, b.floats()?);
    elementwise(op, a, &x, &y).ok_or_else(|| {
        EvalError::ty(format!("unsupported operator {} between series", symbol(op)))
    })
}

fn series_scalar(op: BinOp, s: &Series, scalar: &Value, reversed: bool) -> Result<Value, EvalError> {
    if let Some(f) = logic(op) {
        let Value::Bool(b) = scalar else {
            return Err(EvalError::ty(format!(
                "{} needs booleans on both sides",
                symbol(op)
            )));
        };
        let data = bools(s)?.into_iter().map(|x| f(x, *b)).collect();
        return Ok(Value::Series(s.with_data(ColumnData::Bool(data))));
    }
    if let (ColumnData::Text(v), Value::Str(text)) = (&s.data, scalar) {
        let eq = match op {
            BinOp::Eq => true,
            BinOp::Ne => false,
            _ => return Err(EvalError::ty("text series only support == and !=")),
        };
        let data = v.iter().map(|x| (x == text) == eq).collect();
        return Ok(Value::Series(s.with_data(ColumnData::Bool(data))));
    }
    let k = as_num(scalar).ok_or_else(|| {
        EvalError::ty(format!(
            "unsupported operand types for {}: series and {}",
            symbol(op),
            scalar.kind()
        ))
    })?;
    let x = s.floats()?;
    let y = vec![k; x.len()];
    let out = if reversed {
        elementwise(op, s, &y, &x)
    } else {
        elementwise(op, s, &x, &y)
    };
    out.ok_or_else(|| EvalError::ty(format!("unsupported operator {} on a series", symbol(op))))
}

fn elementwise(op: BinOp, like: &Series, x: &[f64], y: &[f64]) -> Option<Value> {
    if let Some(f) = arith(op) {
        let data = x.iter().zip(y).map(|(a, b)| f(*a, *b)).collect();
        return Some(Value::Series(like.with_data(ColumnData::Float(data))));
    }
    compare(op).map(|f| {
        let data = x.iter().zip(y).map(|(a, b)| f(*a, *b)).collect();
        Value::Series(like.with_data(ColumnData::Bool(data)))
    })
}

fn unary(op: UnaryOp, value: Value) -> Result<Value, EvalError> {
    match (op, value) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!truthy(&v)?)),
        (UnaryOp::Neg, Value::Num(x)) => Ok(Value::Num(-x)),
        (UnaryOp::Neg, Value::Bool(b)) => Ok(Value::Num(if b { -1.0 } else { 0.0 })),
        (UnaryOp::Neg, Value::Series(s)) => {
            let data = s.floats()?.into_iter().map(|x| -x).collect();
            Ok(Value::Series(s.with_data(ColumnData::Float(data))))
        }
        (UnaryOp::Invert, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Invert, Value::Series(s)) => {
            let data = bools(&s)?.into_iter().map(|b| !b).collect();
            Ok(Value::Series(s.with_data(ColumnData::Bool(data))))
        }
        (op, v) => Err(EvalError::ty(format!(
            "bad operand type for unary {}: {}",
            match op {
                UnaryOp::Neg => "-",
                UnaryOp::Invert => "~",
                UnaryOp::Not => "not",
            },
            v.kind()
        ))),
    }
}

fn index(object: Value, key: Value) -> Result<Value, EvalError> {
    match (object, key) {
        (Value::Frame(f), Value::Str(col)) => Ok(Value::Series(f.series(&col)?)),
        (Value::Frame(f), Value::List(cols)) => {
            let names = cols
                .into_iter()
                .map(|c| match c {
                    Value::Str(s) => Ok(s),
                    other => Err(EvalError::ty(format!(
                        "column names must be strings, not {}",
                        other.kind()
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Frame(Arc::new(f.select(&names)?)))
        }
        (Value::Frame(f), Value::Series(mask)) => {
            if !mask.aligned_with(f.index()) {
                return Err(FrameError::IndexMismatch.into());
            }
            Ok(Value::Frame(Arc::new(f.filter(&bools(&mask)?)?)))
        }
        (Value::Series(s), Value::Num(i)) => {
            let pos = position(i, s.len())?;
            Ok(s.data.get(pos).map(Value::from_scalar).unwrap_or(Value::None))
        }
        (Value::Series(s), Value::Series(mask)) => {
            if mask.len() != s.len() || !mask.aligned_with(&s.index) {
                return Err(FrameError::IndexMismatch.into());
            }
            let rows: Vec<usize> = bools(&mask)?
                .iter()
                .enumerate()
                .filter_map(|(i, keep)| keep.then_some(i))
                .collect();
            Ok(Value::Series(s.take(&rows)))
        }
        (Value::List(items), Value::Num(i)) => {
            let pos = position(i, items.len())?;
            Ok(items[pos].clone())
        }
        (Value::Str(s), Value::Num(i)) => {
            let chars: Vec<char> = s.chars().collect();
            let pos = position(i, chars.len())?;
            Ok(Value::Str(chars[pos].to_string()))
        }
        (map @ Value::Map(_), Value::Str(k)) => map
            .map_get(&k)
            .cloned()
            .ok_or_else(|| EvalError::arg(format!("key '{k}' not found"))),
        (object, key) => Err(EvalError::ty(format!(
            "cannot index a {} with a {}",
            object.kind(),
            key.kind()
        ))),
    }
}

pub(super) fn series_values(s: &Series) -> Vec<Value> {
    (0..s.len())
        .filter_map(|i| s.data.get(i).map(Value::from_scalar))
        .collect()
}

pub(super) fn timestamps(index: &[crate::data::Timestamp]) -> Value {
    Value::List(index.iter().map(|ts| Value::Str(format_timestamp(ts))).collect())
}

fn attr(object: Value, name: &str) -> Result<Value, EvalError> {
    match object {
        Value::Frame(f) => match name {
            "columns" => Ok(Value::List(
                f.column_names().into_iter().map(Value::Str).collect(),
            )),
            "shape" => Ok(Value::List(vec![
                Value::Num(f.len() as f64),
                Value::Num(f.width() as f64),
            ])),
            "index" => Ok(timestamps(f.index())),
            "empty" => Ok(Value::Bool(f.is_empty())),
            column => Ok(Value::Series(f.series(column)?)),
        },
        Value::Series(s) => match name {
            "name" => Ok(Value::Str(s.name.clone())),
            "values" => Ok(Value::List(series_values(&s))),
            "index" => Ok(timestamps(&s.index)),
            "size" => Ok(Value::Num(s.len() as f64)),
            "empty" => Ok(Value::Bool(s.is_empty())),
            "dtype" => Ok(Value::Str(s.data.kind().to_string())),
            _ => Err(EvalError::ty(format!("series has no attribute '{name}'"))),
        },
        map @ Value::Map(_) => map
            .map_get(name)
            .cloned()
            .ok_or_else(|| EvalError::arg(format!("key '{name}' not found"))),
        Value::Module => Err(EvalError::ty(format!(
            "ta.{name} is a function; call it with ()"
        ))),
        other => Err(EvalError::ty(format!(
            "a {} has no attribute '{name}'",
            other.kind()
        ))),
    }
}

/// Render a number with a format spec: `[align][sign][width][,][.precision][type]`
/// where type is one of `f`, `%`, `d`, `e`. Non-numbers ignore the spec.
pub(super) fn format_spec(value: &Value, spec: &str) -> Result<String, EvalError> {
    let x = match value {
        Value::Num(x) => *x,
        Value::Bool(b) => f64::from(u8::from(*b)),
        other => return Ok(other.to_string()),
    };
    let bad = || EvalError::arg(format!("unsupported format spec '{spec}'"));

    let mut rest = spec;
    let align = match rest.chars().next() {
        Some(c @ ('<' | '>' | '^')) => {
            rest = &rest[1..];
            c
        }
        _ => '>',
    };
    let plus = rest.starts_with('+');
    if plus || rest.starts_with('-') {
        rest = &rest[1..];
    }
    let digits = rest.chars().take_while(char::is_ascii_digit).count();
    let width: usize = if digits > 0 { rest[..digits].parse().map_err(|_| bad())? } else { 0 };
    rest = &rest[digits..];
    let grouping = rest.starts_with(',');
    if grouping {
        rest = &rest[1..];
    }
    let precision = match rest.strip_prefix('.') {
        Some(after) => {
            let n = after.chars().take_while(char::is_ascii_digit).count();
            if n == 0 {
                return Err(bad());
            }
            rest = &after[n..];
            Some(after[..n].parse::<usize>().map_err(|_| bad())?)
        }
        None => None,
    };
    let kind = match rest {
        "" => None,
        "f" | "F" | "%" | "d" | "e" | "E" => rest.chars().next(),
        _ => return Err(bad()),
    };

    let mut body = if x.is_nan() {
        "NaN".to_string()
    } else {
        match kind {
            Some('%') => format!("{:.*}%", precision.unwrap_or(6), x * 100.0),
            Some('d') => format!("{:.0}", x.round()),
            Some('e' | 'E') => format!("{:.*e}", precision.unwrap_or(6), x),
            Some(_) => format!("{:.*}", precision.unwrap_or(6), x),
            None => match precision {
                Some(p) => format!("{x:.p$}"),
                None => crate::data::format_float(x),
            },
        }
    };
    if grouping {
        body = group_thousands(&body);
    }
    if plus && x >= 0.0 {
        body.insert(0, '+');
    }

    let pad = width.saturating_sub(body.chars().count());
    Ok(match align {
        '<' => format!("{body}{}", " ".repeat(pad)),
        '^' => format!("{}{body}{}", " ".repeat(pad / 2), " ".repeat(pad - pad / 2)),
        _ => format!("{}{body}", " ".repeat(pad)),
    })
}

fn group_thousands(s: &str) -> String {
    let (sign, unsigned) = match s.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", s),
    };
    let split = unsigned
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(unsigned.len());
    let (int, tail) = unsigned.split_at(split);
    let mut grouped = String::new();
    for (i, c) in int.chars().enumerate() {
        if i > 0 && (int.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    format!("{sign}{grouped}{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::read_financial_csv;

    fn session() -> Session {
        let csv = "date,close,volume,sector\n\
                   2024-01-01,10,100,tech\n\
                   2024-01-02,12,200,energy\n\
                   2024-01-03,9,150,tech\n";
        Session::new(read_financial_csv(csv.as_bytes()).unwrap(), "/tmp")
    }

    fn run(s: &mut Session, code: &str) -> String {
        s.exec(code).unwrap()
    }

    #[test]
    fn arithmetic_and_comparisons() {
        let mut s = session();
        assert_eq!(run(&mut s, "1 + 2 * 3 - 4 / 2"), "5\n");
        assert_eq!(run(&mut s, "2 ** 3 ** 2"), "512\n");
        assert_eq!(run(&mut s, "-7 % 3"), "2\n");
        assert_eq!(run(&mut s, "1 < 2 and 'a' != 'b'"), "True\n");
        assert_eq!(run(&mut s, "not 0"), "True\n");
        assert_eq!(run(&mut s, "'a' + 'b'"), "ab\n");
        assert_eq!(run(&mut s, "[1] + [2]"), "[1, 2]\n");
    }

    #[test]
    fn series_broadcasting() {
        let mut s = session();
        assert_eq!(run(&mut s, "(df.close * 2).tolist()"), "[20, 24, 18]\n");
        assert_eq!(run(&mut s, "(100 / df.close).round(2).tolist()"), "[10, 8.33, 11.11]\n");
        assert_eq!(run(&mut s, "(df.close - df.close.shift(1)).tolist()"), "[NaN, 2, -3]\n");
        assert_eq!(run(&mut s, "(df.close > 9).tolist()"), "[True, True, False]\n");
    }

    #[test]
    fn masks_filter_rows() {
        let mut s = session();
        assert_eq!(run(&mut s, "len(df[(df.close > 9) & (df.volume > 150)])"), "1\n");
        assert_eq!(run(&mut s, "len(df[~(df.sector == 'tech')])"), "1\n");
        assert_eq!(run(&mut s, "df.close[df.volume < 200].tolist()"), "[10, 9]\n");
        assert!(s.exec("df[df.close]").is_err());
        assert!(s.exec("if_series = df.close > 1\nnot if_series").is_err());
    }

    #[test]
    fn column_assignment_forms() {
        let mut s = session();
        run(&mut s, "df['flag'] = true\ndf.one = 1\ndf['labels'] = ['a', 'b', None]");
        let f = s.frame();
        assert_eq!(f.column("flag").unwrap().data, ColumnData::Bool(vec![true; 3]));
        assert_eq!(f.floats("one").unwrap(), vec![1.0; 3]);
        assert_eq!(f.column("labels").unwrap().data.kind(), "text");
        assert!(s.exec("df['short'] = [1, 2]").is_err());
        // A filtered series no longer shares the frame index.
        assert!(s.exec("df['x'] = df.close.tail(2)").is_err());
    }

    #[test]
    fn frames_in_locals_are_copy_on_write() {
        let mut s = session();
        run(&mut s, "d = df.copy()\nd['extra'] = 1");
        assert!(!s.frame().has_column("extra"));
        match s.local("d") {
            Some(Value::Frame(f)) => assert!(f.has_column("extra")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn maps_and_lists() {
        let mut s = session();
        run(&mut s, "m = {'a': 1}\nm['b'] = 2\nl = [1, 2, 3]\nl[-1] = 9");
        assert_eq!(run(&mut s, "m"), "{'a': 1, 'b': 2}\n");
        assert_eq!(run(&mut s, "m.b + l[2]"), "11\n");
        assert!(s.exec("m['zz']").is_err());
        assert!(s.exec("l[5]").is_err());
    }

    #[test]
    fn frame_attributes() {
        let mut s = session();
        assert_eq!(run(&mut s, "df.shape"), "[3, 3]\n");
        assert_eq!(run(&mut s, "df.columns"), "['close', 'volume', 'sector']\n");
        assert_eq!(run(&mut s, "df.index[0]"), "2024-01-01T00:00:00Z\n");
        assert_eq!(run(&mut s, "df.close[-1]"), "9\n");
    }

    #[test]
    fn fstrings_apply_format_specs() {
        let mut s = session();
        assert_eq!(run(&mut s, r#"f"{df.close.mean():.2f}""#), "10.33\n");
        assert_eq!(run(&mut s, r#"f"{0.1234:.1%} {1234567.891:,.1f} {5:>3}|""#), "12.3% 1,234,567.9   5|\n");
        assert_eq!(run(&mut s, r#"f"{'x'} {{lit}}""#), "x {lit}\n");
        assert!(s.exec(r#"f"{1:q}""#).is_err());
    }

    #[test]
    fn function_names_are_not_values() {
        let mut s = session();
        assert!(matches!(
            s.exec("x = len"),
            Err(super::super::SandboxError::Runtime { source: EvalError::Type(_), .. })
        ));
        assert!(s.exec("5()").is_err());
    }

    #[test]
    fn group_thousands_handles_sign_and_fraction() {
        assert_eq!(group_thousands("-1234567.5"), "-1,234,567.5");
        assert_eq!(group_thousands("999"), "999");
    }
}
