use std::time::Duration;

use serde_json::{Map, Value, json};
use tracing::info;

use super::{Tool, ToolError, http, json_schema, str_arg};
use crate::Ctx;

pub const DEFAULT_ENDPOINT: &str = "https://google.serper.dev/search";
pub const DEFAULT_KEY_ENV: &str = "SERPER_API_KEY";

/// `web_search`: Google results through the Serper API.
#[derive(Debug, Clone)]
pub struct WebSearch {
    endpoint: String,
    api_key_env: String,
    num_results: usize,
    timeout: Duration,
}

impl Default for WebSearch {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT, DEFAULT_KEY_ENV, 10)
    }
}

impl WebSearch {
    pub fn new(endpoint: impl Into<String>, api_key_env: impl Into<String>, num_results: usize) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key_env: api_key_env.into(),
            num_results,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn api_key(&self) -> Result<String, ToolError> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                ToolError::Failed(format!(
                    "search is not configured: set the {} environment variable",
                    self.api_key_env
                ))
            })
    }
}

/// Keep the parts of a Serper response worth showing a model.
pub fn summarize(query: &str, response: &Value, limit: usize) -> Value {
    let pick = |item: &Value, keys: &[&str]| -> Value {
        let mut out = Map::new();
        for key in keys {
            if let Some(v) = item.get(*key).filter(|v| !v.is_null()) {
                out.insert((*key).to_string(), v.clone());
            }
        }
        Value::Object(out)
    };

    let organic: Vec<Value> = response
        .get("organic")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .take(limit)
                .map(|item| pick(item, &["title", "link", "snippet", "date"]))
                .collect()
        })
        .unwrap_or_default();

    let mut out = json!({ "query": query, "organic": organic });
    if let Some(answer) = response.get("answerBox") {
        out["answer_box"] = pick(answer, &["title", "answer", "snippet", "link"]);
    }
    if let Some(graph) = response.get("knowledgeGraph") {
        out["knowledge_graph"] = pick(graph, &["title", "type", "description"]);
    }
    out
}

impl Tool for WebSearch {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for current information. Returns the top results with title, link, snippet and date."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            json!({"query": {"type": "string", "description": "The search query"}}),
            &["query"],
        )
    }

    fn call(&self, args: &Value, _ctx: &mut Ctx) -> Result<String, ToolError> {
        let query = str_arg(args, "query")?.trim();
        if query.is_empty() {
            return Err(ToolError::InvalidArgs("query must not be empty".into()));
        }
        let key = self.api_key()?;
        info!(query, "web search");
        let response = http::post_json(
            &self.endpoint,
            &[("X-API-KEY", key.as_str())],
            &json!({"q": query, "num": self.num_results}),
            self.timeout,
        )?;
        let summary = summarize(query, &response, self.num_results);
        serde_json::to_string_pretty(&summary).map_err(|e| ToolError::Failed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_keeps_selected_fields() {
        let response = json!({
            "searchParameters": {"q": "cpi"},
            "answerBox": {"answer": "3.1%", "title": "CPI", "extra": 1},
            "organic": [
                {"title": "A", "link": "https://a", "snippet": "s1", "position": 1},
                {"title": "B", "link": "https://b", "snippet": "s2", "date": "Jan 5, 2024"},
                {"title": "C", "link": "https://c"}
            ]
        });
        let out = summarize("cpi", &response, 2);
        assert_eq!(out["organic"].as_array().unwrap().len(), 2);
        assert_eq!(out["organic"][0], json!({"title": "A", "link": "https://a", "snippet": "s1"}));
        assert_eq!(out["organic"][1]["date"], "Jan 5, 2024");
        assert_eq!(out["answer_box"], json!({"title": "CPI", "answer": "3.1%"}));
        assert!(out.get("knowledge_graph").is_none());
    }

    #[test]
    fn missing_key_is_a_tool_failure() {
        let tool = WebSearch::new("http://localhost:1/search", "ECON_SWARM_TEST_UNSET_KEY", 5);
        let mut ctx = Ctx::new();
        let err = tool.call(&json!({"query": "gdp"}), &mut ctx).unwrap_err();
        assert!(err.to_string().contains("ECON_SWARM_TEST_UNSET_KEY"));
    }

    #[test]
    fn empty_query_is_rejected() {
        let tool = WebSearch::default();
        let mut ctx = Ctx::new();
        assert!(matches!(
            tool.call(&json!({"query": "  "}), &mut ctx),
            Err(ToolError::InvalidArgs(_))
        ));
    }
}
