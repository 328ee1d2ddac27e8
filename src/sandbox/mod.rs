//! The restricted analysis language.
//!
//! Snippets run against a [`Session`] that owns the shared dataset (`df`),
//! the indicator library handle (`ta`) and whatever locals earlier snippets
//! defined. The language has no imports and no system access; the only I/O
//! it can perform is through builtins that confine paths to the session's
//! working directory and URLs to its allowed sources.

mod builtins;
mod eval;
mod lexer;
mod parser;
mod value;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::data::{Frame, FrameError, LoadError, load_financial_csv};
use crate::tools::file::PathError;

pub use value::Value;

/// Names the session binds for every snippet.
pub const RESERVED: [&str; 2] = ["df", "ta"];

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("syntax error on line {line}: {message}")]
    Syntax { line: usize, message: String },
    /// A statement failed. Output printed before it is kept in `output`, and
    /// the effects of earlier statements stay in the session.
    #[error("error on line {line}: {source}")]
    Runtime {
        line: usize,
        output: String,
        #[source]
        source: EvalError,
    },
}

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("name '{0}' is not defined")]
    UnknownName(String),
    #[error("type error: {0}")]
    Type(String),
    #[error("bad argument: {0}")]
    Argument(String),
    #[error("not allowed: {0}")]
    Policy(String),
    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl EvalError {
    pub(crate) fn ty(message: impl Into<String>) -> Self {
        EvalError::Type(message.into())
    }

    pub(crate) fn arg(message: impl Into<String>) -> Self {
        EvalError::Argument(message.into())
    }
}

/// State shared by consecutive snippet executions.
#[derive(Debug, Clone)]
pub struct Session {
    frame: Arc<Frame>,
    locals: BTreeMap<String, Value>,
    workdir: PathBuf,
    sources: Vec<String>,
}

impl Session {
    pub fn new(frame: Frame, workdir: impl Into<PathBuf>) -> Self {
        Self {
            frame: Arc::new(frame),
            locals: BTreeMap::new(),
            workdir: workdir.into(),
            sources: Vec::new(),
        }
    }

    /// Load `source` and open a session on it. A URL source is added to
    /// the allowed sources so snippets may reload it.
    pub fn open(source: &str, workdir: impl Into<PathBuf>) -> Result<Self, LoadError> {
        let frame = load_financial_csv(source)?;
        let session = Self::new(frame, workdir);
        Ok(if crate::data::is_url(source) {
            session.with_sources(vec![source.to_string()])
        } else {
            session
        })
    }

    /// URLs `load_csv` may fetch, in addition to files under the workdir.
    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        for s in sources {
            if !self.sources.contains(&s) {
                self.sources.push(s);
            }
        }
        self
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn local(&self, name: &str) -> Option<&Value> {
        self.locals.get(name)
    }

    pub fn local_names(&self) -> impl Iterator<Item = &str> {
        self.locals.keys().map(String::as_str)
    }

    /// Run a snippet and return what it printed, followed by the rendered
    /// value of a trailing expression statement (if not `None`).
    ///
    /// The whole snippet is parsed before anything runs, so a syntax error
    /// leaves the session untouched.
    pub fn exec(&mut self, code: &str) -> Result<String, SandboxError> {
        let program = parser::parse_program(code)?;
        debug!(statements = program.len(), "executing snippet");

        let mut interp = eval::Interp::new(self);
        let last = program.len().saturating_sub(1);
        for (i, line) in program.iter().enumerate() {
            match interp.statement(&line.stmt) {
                Ok(value) => {
                    if i == last && !matches!(value, Value::None) {
                        interp.emit(&value.to_string());
                    }
                }
                Err(source) => {
                    return Err(SandboxError::Runtime {
                        line: line.line,
                        output: interp.into_output(),
                        source,
                    });
                }
            }
        }
        Ok(interp.into_output())
    }
}
