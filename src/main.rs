use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use econ_swarm::config::{self, Config};
use econ_swarm::{Ctx, SandboxError, Session};

#[derive(Parser)]
#[command(name = "econ-swarm")]
#[command(version)]
#[command(about = "Multi-agent LLM workflows for economic research and CSV analysis")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a team on a task
    Run {
        #[command(flatten)]
        source: ConfigSource,

        /// CSV path or URL to analyze (overrides the config's [data] section)
        #[arg(long)]
        csv: Option<String>,

        /// The task given to the team
        #[arg(short, long)]
        task: String,
    },

    /// Execute analysis snippets against a CSV, sharing one session
    Exec {
        #[arg(long)]
        csv: String,

        /// Directory exports are written to
        #[arg(long, default_value = ".")]
        workdir: PathBuf,

        /// Snippet files, run after any inline snippets
        #[arg(short, long)]
        file: Vec<PathBuf>,

        /// Inline snippets
        code: Vec<String>,
    },

    /// Load a CSV and print its schema and summary statistics
    Inspect {
        #[arg(long)]
        csv: String,
    },

    /// Print the agent table of a preset or config file
    Agents {
        #[command(flatten)]
        source: ConfigSource,
    },

    /// List the built-in presets
    Presets,
}

#[derive(Args)]
struct ConfigSource {
    /// Built-in preset (default: economic_swarm)
    #[arg(long, conflicts_with = "config")]
    preset: Option<String>,

    /// Path to a TOML config file
    #[arg(long)]
    config: Option<PathBuf>,
}

impl ConfigSource {
    fn load(&self) -> Result<Config> {
        match (&self.config, &self.preset) {
            (Some(path), _) => {
                Config::load(path).with_context(|| format!("failed to load {}", path.display()))
            }
            (None, Some(name)) => Ok(Config::preset(name)?),
            (None, None) => Ok(Config::preset("economic_swarm")?),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run { source, csv, task } => cmd_run(&source, csv, &task),
        Commands::Exec {
            csv,
            workdir,
            file,
            code,
        } => cmd_exec(&csv, workdir, &file, code),
        Commands::Inspect { csv } => cmd_inspect(&csv),
        Commands::Agents { source } => cmd_agents(&source),
        Commands::Presets => cmd_presets(),
    }
}

fn cmd_run(source: &ConfigSource, csv: Option<String>, task: &str) -> Result<()> {
    let mut config = source.load()?;
    if let Some(csv) = csv {
        config = config.with_csv(csv);
    }

    let mut ctx = Ctx::new().with_client(config.chat_client());
    if let Some(session) = config.open_session().context("failed to load dataset")? {
        info!(rows = session.frame().len(), "dataset loaded");
        ctx = ctx.with_session(session);
    }

    let mut team = config
        .build_team(&config.tool_box())
        .context("failed to assemble team")?;
    let result = team.run(task, &mut ctx).context("team run failed")?;

    println!("{}", result.conversation);
    println!("\nstopped: {}", result.stop_reason);
    if !ctx.logs().is_empty() {
        println!("\ntool calls:");
        for line in ctx.logs() {
            println!("  {line}");
        }
    }
    if let Some(session) = ctx.session() {
        println!("\ndataset columns: {}", session.frame().column_names().join(", "));
    }
    Ok(())
}

fn cmd_exec(csv: &str, workdir: PathBuf, files: &[PathBuf], code: Vec<String>) -> Result<()> {
    let mut snippets = code;
    for path in files {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        snippets.push(text);
    }
    if snippets.is_empty() {
        bail!("nothing to run: pass a snippet or --file");
    }

    let mut session = Session::open(csv, workdir).with_context(|| format!("failed to load {csv}"))?;
    for snippet in &snippets {
        match session.exec(snippet) {
            Ok(out) if out.is_empty() => {}
            Ok(out) => println!("{}", out.trim_end()),
            Err(err) => {
                if let SandboxError::Runtime { output, .. } = &err
                    && !output.is_empty()
                {
                    println!("{}", output.trim_end());
                }
                return Err(err).context("snippet failed");
            }
        }
    }
    Ok(())
}

fn cmd_inspect(csv: &str) -> Result<()> {
    let frame = econ_swarm::load_financial_csv(csv).with_context(|| format!("failed to load {csv}"))?;
    println!(
        "{} rows x {} columns, indexed by '{}'\n",
        frame.len(),
        frame.width(),
        frame.index_name()
    );
    println!("{}\n", frame.info());
    println!("{}\n", frame.describe());
    println!("{}", frame.head(5));
    Ok(())
}

fn cmd_agents(source: &ConfigSource) -> Result<()> {
    let config = source.load()?;
    println!("team: {} (model {})", config.team.kind, config.model.model);
    if let Some(termination) = config.termination() {
        println!("stops on: {termination:?}");
    }
    for agent in &config.agents {
        println!("\n{}", agent.name);
        if !agent.description.is_empty() {
            println!("  {}", agent.description);
        }
        if !agent.tools.is_empty() {
            println!("  tools: {}", agent.tools.join(", "));
        }
        if !agent.handoffs.is_empty() {
            println!("  hands off to: {}", agent.handoffs.join(", "));
        }
    }
    Ok(())
}

fn cmd_presets() -> Result<()> {
    for name in config::preset_names() {
        let preset = Config::preset(name)?;
        let agents: Vec<&str> = preset.agents.iter().map(|a| a.name.as_str()).collect();
        println!("{name:<18} {:<12} {}", preset.team.kind.to_string(), agents.join(", "));
    }
    Ok(())
}
