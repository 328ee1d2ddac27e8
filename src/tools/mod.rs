//! Tools agents can call, and the registry that hands them out.

pub mod analysis;
pub mod file;
pub mod http;
pub mod parse;
pub mod scrape;
pub mod search;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};

use crate::Ctx;
use crate::sandbox::SandboxError;

pub use analysis::RunAnalysis;
pub use parse::{mentioned_names, strip_code_fences};
pub use scrape::{ScrapeWebsite, html_to_text};
pub use search::WebSearch;

/// Tool output handed back to the model is capped at this many characters.
pub const MAX_TOOL_OUTPUT: usize = 50_000;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool '{0}'")]
    Unknown(String),
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("no dataset is loaded for this session")]
    NoSession,
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    #[error("request failed: {0}")]
    Http(#[from] ureq::Error),
    #[error("{0}")]
    Failed(String),
}

/// What the model sees of a tool: its name, what it does, and a JSON schema
/// of its arguments.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// The `{"type": "function", ...}` wrapper chat APIs expect.
    pub fn to_function(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// A callable capability. Tools get the run context so stateful ones (the
/// analysis session) can reach their state without globals.
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> Value;
    fn call(&self, args: &Value, ctx: &mut Ctx) -> Result<String, ToolError>;

    fn spec(&self) -> ToolSpec {
        ToolSpec::new(self.name(), self.description(), self.input_schema())
    }
}

/// Build an object schema from property definitions and required names.
pub fn json_schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Read a required string argument.
pub fn str_arg<'a>(args: &'a Value, name: &str) -> Result<&'a str, ToolError> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArgs(format!("missing string argument '{name}'")))
}

/// Cut `text` to at most `max` characters, marking the cut.
pub fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}\n\n[truncated at {max} chars]", &text[..cut]),
        None => text.to_string(),
    }
}

/// Registry of available tools, keyed by name.
#[derive(Clone, Default)]
pub struct ToolBox {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolBox {
    pub fn new() -> Self {
        Self::default()
    }

    /// The three standard tools: `web_search`, `scrape_website`, `run_analysis`.
    pub fn standard(search: WebSearch) -> Self {
        let mut tools = Self::new();
        tools.register(Arc::new(search));
        tools.register(Arc::new(ScrapeWebsite::default()));
        tools.register(Arc::new(RunAnalysis::default()));
        tools
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        debug!(tool = %name, "registering tool");
        self.tools.insert(name, tool);
    }

    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.register(Arc::new(tool));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Only the named tools, as a new registry.
    pub fn filter(&self, names: &[String]) -> ToolBox {
        ToolBox {
            tools: names
                .iter()
                .filter_map(|n| self.tools.get_key_value(n))
                .map(|(k, v)| (k.clone(), Arc::clone(v)))
                .collect(),
        }
    }

    /// Call a tool by name. Each call leaves a line in the run log.
    pub fn call(&self, name: &str, args: &Value, ctx: &mut Ctx) -> Result<String, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::Unknown(name.to_string()))?;
        debug!(tool = name, %args, "calling tool");
        match tool.call(args, ctx) {
            Ok(out) => {
                debug!(tool = name, bytes = out.len(), "tool succeeded");
                ctx.log(format!("{name}: ok"));
                Ok(out)
            }
            Err(err) => {
                warn!(tool = name, error = %err, "tool failed");
                ctx.log(format!("{name}: {err}"));
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for ToolBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolBox").field("tools", &self.names()).finish()
    }
}
