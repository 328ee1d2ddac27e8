//! TOML configuration: the agent table plus model, team, data and search
//! settings. Built-in presets are embedded at compile time.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::data::LoadError;
use crate::llm::OllamaClient;
use crate::sandbox::Session;
use crate::team::{AssistantAgent, SELECTOR, SelectorAgent, Team, TeamError, TeamKind, Termination};
use crate::tools::{ToolBox, WebSearch, search};

/// Tool names an agent entry may list.
pub const KNOWN_TOOLS: [&str; 3] = ["web_search", "scrape_website", "run_analysis"];

/// `(name, document)` for each built-in preset.
pub const PRESETS: [(&str, &str); 3] = [
    ("economic_swarm", include_str!("../presets/economic_swarm.toml")),
    ("economic_selector", include_str!("../presets/economic_selector.toml")),
    ("csv_analyst", include_str!("../presets/csv_analyst.toml")),
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("unknown preset '{0}' (available: economic_swarm, economic_selector, csv_analyst)")]
    UnknownPreset(String),
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub team: TeamConfig,
    #[serde(default)]
    pub data: Option<DataConfig>,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: default_base_url(),
            temperature: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamConfig {
    #[serde(default)]
    pub kind: TeamKind,
    #[serde(default)]
    pub max_messages: Option<usize>,
    #[serde(default)]
    pub stop_phrase: Option<String>,
    #[serde(default)]
    pub max_turns: Option<usize>,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_true")]
    pub allow_repeated_speaker: bool,
    #[serde(default)]
    pub selector_prompt: Option<String>,
}

impl Default for TeamConfig {
    fn default() -> Self {
        Self {
            kind: TeamKind::default(),
            max_messages: None,
            stop_phrase: None,
            max_turns: None,
            max_steps: default_max_steps(),
            allow_repeated_speaker: true,
            selector_prompt: None,
        }
    }
}

fn default_max_steps() -> usize {
    100
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    /// Path or http(s) URL of the CSV to load.
    pub csv: String,
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,
    /// Extra URLs snippets may load with `load_csv`.
    #[serde(default)]
    pub sources: Vec<String>,
}

fn default_workdir() -> PathBuf {
    PathBuf::from(".")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_num_results")]
    pub num_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: default_search_endpoint(),
            api_key_env: default_api_key_env(),
            num_results: default_num_results(),
        }
    }
}

fn default_search_endpoint() -> String {
    search::DEFAULT_ENDPOINT.to_string()
}

fn default_api_key_env() -> String {
    search::DEFAULT_KEY_ENV.to_string()
}

fn default_num_results() -> usize {
    10
}

/// One row of the agent table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub system_prompt: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub handoffs: Vec<String>,
    #[serde(default)]
    pub reflect_on_tool_use: bool,
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: usize,
}

fn default_max_tool_iterations() -> usize {
    1
}

pub fn preset_names() -> impl Iterator<Item = &'static str> {
    PRESETS.iter().map(|(name, _)| *name)
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loading config");
        Self::from_toml(&text)
    }

    pub fn preset(name: &str) -> Result<Self, ConfigError> {
        let (_, text) = PRESETS
            .iter()
            .find(|(n, _)| *n == name)
            .ok_or_else(|| ConfigError::UnknownPreset(name.to_string()))?;
        Self::from_toml(text)
    }

    /// Point the data section at another CSV, keeping the other data settings.
    pub fn with_csv(mut self, csv: impl Into<String>) -> Self {
        let csv = csv.into();
        match &mut self.data {
            Some(data) => data.csv = csv,
            None => {
                self.data = Some(DataConfig {
                    csv,
                    workdir: default_workdir(),
                    sources: Vec::new(),
                })
            }
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.agents.is_empty() {
            return invalid("at least one [[agents]] entry is required".into());
        }
        let mut seen = HashSet::new();
        for agent in &self.agents {
            if agent.name.trim().is_empty() {
                return invalid("agent names must not be empty".into());
            }
            if !seen.insert(agent.name.as_str()) {
                return invalid(format!("duplicate agent name '{}'", agent.name));
            }
        }
        for agent in &self.agents {
            if let Some(tool) = agent.tools.iter().find(|t| !KNOWN_TOOLS.contains(&t.as_str())) {
                return invalid(format!(
                    "agent '{}' lists unknown tool '{tool}' (known: {})",
                    agent.name,
                    KNOWN_TOOLS.join(", ")
                ));
            }
            for target in &agent.handoffs {
                if *target == agent.name {
                    return invalid(format!("agent '{}' cannot hand off to itself", agent.name));
                }
                if !seen.contains(target.as_str()) {
                    return invalid(format!(
                        "agent '{}' hands off to unknown agent '{target}'",
                        agent.name
                    ));
                }
            }
            if agent.tools.iter().any(|t| t == "run_analysis") && self.data.is_none() {
                return invalid(format!(
                    "agent '{}' uses run_analysis but no [data] section is configured",
                    agent.name
                ));
            }
        }
        if self.team.kind == TeamKind::Selector {
            if self.agents.len() < 2 {
                return invalid("a selector team needs at least two agents".into());
            }
            if seen.contains(SELECTOR) {
                return invalid(format!("'{SELECTOR}' is reserved in selector teams"));
            }
        }
        if self.team.max_steps == 0 {
            return invalid("team.max_steps must be at least 1".into());
        }
        Ok(())
    }

    /// Every configured ceiling and the stop phrase, combined.
    pub fn termination(&self) -> Option<Termination> {
        let mut conditions = Vec::new();
        if let Some(phrase) = &self.team.stop_phrase {
            conditions.push(Termination::text(phrase.clone()));
        }
        if let Some(n) = self.team.max_messages {
            conditions.push(Termination::MaxMessages(n));
        }
        if let Some(n) = self.team.max_turns {
            conditions.push(Termination::MaxTurns(n));
        }
        match conditions.len() {
            0 => None,
            1 => conditions.pop(),
            _ => Some(Termination::Any(conditions)),
        }
    }

    pub fn chat_client(&self) -> OllamaClient {
        let client = OllamaClient::with_timeout(
            &self.model.base_url,
            &self.model.model,
            Duration::from_secs(self.model.timeout_secs),
        );
        match self.model.temperature {
            Some(t) => client.temperature(t),
            None => client,
        }
    }

    /// The standard tools with this config's search settings.
    pub fn tool_box(&self) -> ToolBox {
        ToolBox::standard(WebSearch::new(
            &self.search.endpoint,
            &self.search.api_key_env,
            self.search.num_results,
        ))
    }

    /// Load the configured dataset. `None` when there is no `[data]` section.
    pub fn open_session(&self) -> Result<Option<Session>, LoadError> {
        let Some(data) = &self.data else {
            return Ok(None);
        };
        let session = Session::open(&data.csv, &data.workdir)?.with_sources(data.sources.clone());
        Ok(Some(session))
    }

    /// Assemble the team from the agent table, binding each agent to its
    /// listed tools.
    pub fn build_team(&self, tools: &ToolBox) -> Result<Team, TeamError> {
        let agents = self.agents.iter().map(|a| {
            AssistantAgent::new(&a.name, &a.system_prompt)
                .description(&a.description)
                .tools(tools.filter(&a.tools))
                .handoffs(a.handoffs.iter().cloned())
                .reflect_on_tool_use(a.reflect_on_tool_use)
                .max_tool_iterations(a.max_tool_iterations)
        });

        let mut builder = Team::builder(self.team.kind)
            .agents(agents)
            .max_steps(self.team.max_steps);
        if self.team.kind == TeamKind::Selector {
            let participants = self
                .agents
                .iter()
                .map(|a| (a.name.clone(), a.description.clone()))
                .collect();
            let mut selector = SelectorAgent::new(participants)
                .allow_repeated_speaker(self.team.allow_repeated_speaker);
            if let Some(prompt) = &self.team.selector_prompt {
                selector = selector.prompt(prompt.clone());
            }
            builder = builder.selector(selector);
        }
        if let Some(termination) = self.termination() {
            builder = builder.termination(termination);
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [[agents]]
        name = "solo"
        system_prompt = "You help."
    "#;

    #[test]
    fn defaults_fill_missing_sections() {
        let config = Config::from_toml(MINIMAL).unwrap();
        assert_eq!(config.model.model, "llama3.1:8b");
        assert_eq!(config.model.base_url, "http://localhost:11434");
        assert_eq!(config.team.kind, TeamKind::Swarm);
        assert_eq!(config.team.max_steps, 100);
        assert_eq!(config.search.api_key_env, "SERPER_API_KEY");
        assert_eq!(config.agents[0].max_tool_iterations, 1);
        assert!(config.data.is_none());
        assert!(config.termination().is_none());
    }

    #[test]
    fn every_preset_loads_and_builds() {
        for name in preset_names() {
            let config = Config::preset(name).unwrap();
            let team = config.build_team(&config.tool_box()).unwrap();
            assert_eq!(team.agent_names().len(), config.agents.len(), "{name}");
        }
    }

    #[test]
    fn economic_swarm_hands_off_in_a_chain() {
        let config = Config::preset("economic_swarm").unwrap();
        let names: Vec<&str> = config.agents.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["data_gatherer", "economic_modeler", "data_analyzer", "synthesis"]);
        assert_eq!(config.agents[0].handoffs, ["economic_modeler"]);
        assert_eq!(config.agents[0].tools, ["web_search", "scrape_website"]);
        assert_eq!(
            config.termination(),
            Some(Termination::Any(vec![
                Termination::text("TERMINATE"),
                Termination::MaxMessages(50)
            ]))
        );
    }

    #[test]
    fn csv_analyst_has_data_and_turn_ceiling() {
        let config = Config::preset("csv_analyst").unwrap();
        assert_eq!(config.team.kind, TeamKind::RoundRobin);
        assert_eq!(config.team.max_turns, Some(4));
        assert_eq!(config.data.as_ref().unwrap().csv, "finance_economics_dataset.csv");
        let config = config.with_csv("other.csv");
        assert_eq!(config.data.unwrap().csv, "other.csv");
    }

    #[test]
    fn unknown_preset() {
        assert!(matches!(Config::preset("nope"), Err(ConfigError::UnknownPreset(_))));
    }

    fn rejects(doc: &str, needle: &str) {
        let err = Config::from_toml(doc).unwrap_err();
        assert!(err.to_string().contains(needle), "{err}");
    }

    #[test]
    fn validation_errors() {
        rejects("", "at least one");
        rejects(
            r#"
            [[agents]]
            name = "a"
            system_prompt = "p"
            [[agents]]
            name = "a"
            system_prompt = "p"
            "#,
            "duplicate agent name 'a'",
        );
        rejects(
            r#"
            [[agents]]
            name = "a"
            system_prompt = "p"
            tools = ["shell"]
            "#,
            "unknown tool 'shell'",
        );
        rejects(
            r#"
            [[agents]]
            name = "gatherer"
            system_prompt = "p"
            handoffs = ["economic_modeler_agent"]
            "#,
            "unknown agent 'economic_modeler_agent'",
        );
        rejects(
            r#"
            [[agents]]
            name = "a"
            system_prompt = "p"
            handoffs = ["a"]
            "#,
            "cannot hand off to itself",
        );
        rejects(
            r#"
            [[agents]]
            name = "a"
            system_prompt = "p"
            tools = ["run_analysis"]
            "#,
            "no [data] section",
        );
        rejects(
            r#"
            [team]
            kind = "selector"
            [[agents]]
            name = "a"
            system_prompt = "p"
            "#,
            "at least two agents",
        );
    }

    #[test]
    fn bad_toml_is_a_parse_error() {
        assert!(matches!(
            Config::from_toml("[team]\nkind = \"mesh\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("team.toml");
        std::fs::write(&path, MINIMAL).unwrap();
        assert_eq!(Config::load(&path).unwrap().agents[0].name, "solo");
        assert!(matches!(
            Config::load(&dir.path().join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn session_opens_from_data_section() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("prices.csv");
        std::fs::write(&csv, "Date,Close \n2024-01-02,11\nbad,12\n2024-01-01,10\n").unwrap();
        let config = Config::from_toml(MINIMAL)
            .unwrap()
            .with_csv(csv.to_string_lossy());
        let session = config.open_session().unwrap().unwrap();
        assert_eq!(session.frame().len(), 2);
        assert_eq!(session.frame().column_names(), ["close"]);
        assert!(Config::from_toml(MINIMAL).unwrap().open_session().unwrap().is_none());
    }
}
