//! The `economic_swarm` preset: gather -> model -> analyze -> synthesize.
//!
//! Runs against scripted model replies unless `--live` is given, in which
//! case it talks to the Ollama server from the preset and searches through
//! Serper (set `SERPER_API_KEY`).

use anyhow::Result;
use econ_swarm::llm::ChatMessage;
use econ_swarm::{Config, Ctx, ScriptedClient};
use serde_json::json;

fn script() -> ScriptedClient {
    ScriptedClient::new([
        ChatMessage::assistant(
            r#"{"source": "BLS", "date": "2024-06-12", "headline": "CPI cools to 3.3%",
"summary": "Headline inflation eased in May.", "key_data_points": ["CPI 3.3% y/y", "core 3.4% y/y"]}"#,
        ),
        ChatMessage::tool_call("transfer_to_economic_modeler", json!({})),
        ChatMessage::assistant(
            r#"{"model": "Taylor rule", "equation": "i = r* + pi + 0.5(pi - 2) + 0.5 gap",
"assumptions": ["r* = 0.5", "gap = 0"], "implied_rate": 5.45}"#,
        ),
        ChatMessage::tool_call("transfer_to_data_analyzer", json!({})),
        ChatMessage::assistant(
            r#"{"summary": "Disinflation continues", "key_insights": ["policy rate near rule"],
"recommendations": ["hold rates"]}"#,
        ),
        ChatMessage::tool_call("transfer_to_synthesis", json!({})),
        ChatMessage::assistant(
            r#"{"executive_summary": "Inflation is easing and policy is close to neutral-tight.",
"consensus_findings": ["CPI 3.3%"], "open_questions": ["labor market"],
"final_recommendations": ["hold"]} TERMINATE"#,
        ),
    ])
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let live = std::env::args().any(|a| a == "--live");

    let config = Config::preset("economic_swarm")?;
    let mut ctx = if live {
        Ctx::new().with_client(config.chat_client())
    } else {
        Ctx::new().with_client(script())
    };

    let mut team = config.build_team(&config.tool_box())?;
    let result = team.run("What is the current US inflation outlook?", &mut ctx)?;

    println!("{}", result.conversation);
    println!("\nstopped: {}", result.stop_reason);
    Ok(())
}
