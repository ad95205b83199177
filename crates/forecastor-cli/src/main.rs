use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use forecastor_agent::prompt::{build_task, instructions};
use forecastor_agent::{
    AgentDriver, AgentEvent, CompetitionRegistry, ExecuteCodeTool, ModelBackend, OllamaBackend,
    OpenAiBackend, PlotHarvester, SampleSubmissionValidator, SubmissionValidator, ToolRegistry,
    ValidateSubmissionTool,
};
use forecastor_core::{
    distinct_categories, filter_competitions, load_catalog_path, ForecastorConfig,
    DEFAULT_CATEGORIES, DEFAULT_SIZE_CEILING_GB,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_COMPETITION: &str = "ventilator-pressure-prediction";
const RESULT_PREVIEW_CHARS: usize = 2000;

#[derive(Parser)]
#[command(name = "forecastor")]
#[command(
    about = "Forecastor - tool-calling agent for Kaggle-style competitions",
    long_about = None
)]
struct Cli {
    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    Openai,
    Ollama,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent on one competition
    Run {
        /// Competition id
        #[arg(short, long, default_value = DEFAULT_COMPETITION)]
        competition: String,

        /// Directory holding prepared competitions
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Working directory for submission.csv and plots
        #[arg(short, long)]
        workspace: Option<PathBuf>,

        /// Model id
        #[arg(short, long)]
        model: Option<String>,

        /// Model backend
        #[arg(long, value_enum, default_value = "openai")]
        backend: Backend,

        /// Ollama host URL
        #[arg(long, env = "OLLAMA_HOST", default_value = "http://localhost:11434")]
        ollama_host: String,

        /// Maximum model turns
        #[arg(long)]
        max_steps: Option<u32>,

        /// Wall-clock budget in seconds
        #[arg(long)]
        max_duration_secs: Option<u64>,

        /// Per-snippet execution limit in seconds
        #[arg(long)]
        exec_timeout_secs: Option<u64>,

        /// Leaderboard scores shown in the task
        #[arg(long, default_value = "10")]
        leaderboard_rows: usize,

        /// Write the step log as JSON
        #[arg(long)]
        log_path: Option<PathBuf>,
    },

    /// Filter the competition catalog by category and dataset size
    Catalog {
        /// Catalog CSV (competition_id, category, dataset_size_GB)
        #[arg(short, long, default_value = "experiments/competition_categories.csv")]
        path: PathBuf,

        /// Allowed category, repeatable
        #[arg(short, long)]
        category: Vec<String>,

        /// Datasets must be strictly smaller than this
        #[arg(long, default_value_t = DEFAULT_SIZE_CEILING_GB)]
        max_size_gb: f64,

        /// Print the distinct categories and exit
        #[arg(long)]
        show_categories: bool,

        /// Ids appended after the filtered list
        #[arg(long)]
        extra: Vec<String>,
    },

    /// Validate a submission file against a competition
    Validate {
        #[arg(short, long, default_value = DEFAULT_COMPETITION)]
        competition: String,

        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Submission file (defaults to the workspace submission)
        #[arg(short, long)]
        submission: Option<PathBuf>,
    },

    /// Print the prompt the agent would receive
    Inspect {
        #[arg(short, long, default_value = DEFAULT_COMPETITION)]
        competition: String,

        #[arg(long)]
        data_dir: Option<PathBuf>,

        #[arg(long, default_value = "10")]
        leaderboard_rows: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("forecastor=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ForecastorConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            competition,
            data_dir,
            workspace,
            model,
            backend,
            ollama_host,
            max_steps,
            max_duration_secs,
            exec_timeout_secs,
            leaderboard_rows,
            log_path,
        } => {
            if let Some(dir) = data_dir {
                config.paths.data_dir = dir;
            }
            if let Some(dir) = workspace {
                config.paths.workspace = dir;
            }
            if let Some(model) = model {
                config.model.model_id = model;
            }
            if let Some(steps) = max_steps {
                config.budget.max_steps = steps;
            }
            if let Some(secs) = max_duration_secs {
                config.budget.max_duration_secs = secs;
            }
            if exec_timeout_secs.is_some() {
                config.sandbox.exec_timeout_secs = exec_timeout_secs;
            }
            cmd_run(
                &config,
                &competition,
                backend,
                &ollama_host,
                leaderboard_rows,
                log_path.as_deref(),
            )
            .await?
        }
        Commands::Catalog {
            path,
            category,
            max_size_gb,
            show_categories,
            extra,
        } => cmd_catalog(&path, category, max_size_gb, show_categories, &extra)?,
        Commands::Validate {
            competition,
            data_dir,
            submission,
        } => {
            if let Some(dir) = data_dir {
                config.paths.data_dir = dir;
            }
            let submission = submission.unwrap_or_else(|| config.paths.submission_path());
            cmd_validate(&config, &competition, &submission)?
        }
        Commands::Inspect {
            competition,
            data_dir,
            leaderboard_rows,
        } => {
            if let Some(dir) = data_dir {
                config.paths.data_dir = dir;
            }
            cmd_inspect(&config, &competition, leaderboard_rows)?
        }
    }

    Ok(())
}

fn registry(config: &ForecastorConfig) -> Result<CompetitionRegistry> {
    // Absolute so table paths survive the sandbox's working directory.
    let data_dir = config
        .paths
        .data_dir
        .canonicalize()
        .with_context(|| format!("data dir {} not found", config.paths.data_dir.display()))?;
    Ok(CompetitionRegistry::new(data_dir))
}

async fn cmd_run(
    config: &ForecastorConfig,
    competition_id: &str,
    backend_kind: Backend,
    ollama_host: &str,
    leaderboard_rows: usize,
    log_path: Option<&Path>,
) -> Result<()> {
    let registry = registry(config)?;
    let competition = registry.get_competition(competition_id)?;
    let context = registry.load_context(&competition)?;

    std::fs::create_dir_all(&config.paths.workspace)?;
    let workspace = config.paths.workspace.canonicalize()?;
    let submission = workspace.join(&config.paths.submission_file);

    let tools = ToolRegistry::new()
        .with(Arc::new(
            ExecuteCodeTool::for_competition(config.sandbox.clone(), &workspace, &context)?
                .with_submission_file(&config.paths.submission_file),
        ))
        .with(Arc::new(ValidateSubmissionTool::new(
            Arc::new(SampleSubmissionValidator::new()),
            competition.clone(),
            &submission,
        )));

    let backend: Arc<dyn ModelBackend> = match backend_kind {
        Backend::Openai => Arc::new(OpenAiBackend::new(&config.model)),
        Backend::Ollama => Arc::new(OllamaBackend::new(&config.model.model_id, ollama_host)),
    };

    let budget = config.budget();
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current call");
            ctrl_c.cancel();
        }
    });

    let (tx, rx) = mpsc::channel(64);
    let printer = tokio::spawn(print_events(rx));

    let driver = AgentDriver::new(backend, tools, instructions(&budget), budget)
        .with_callback(PlotHarvester::new(workspace.join(&config.paths.plot_file)))
        .with_events(tx)
        .with_cancel(cancel)
        .with_submission(&submission);

    info!("Running {} with {}", competition.id, config.model.model_id);
    let outcome = driver.run(&build_task(&context, leaderboard_rows)).await;
    drop(driver);
    printer.await?;
    let outcome = outcome?;

    println!();
    println!("=== Run Summary ===");
    println!("Competition:  {}", competition.name);
    println!("Terminated:   {}", outcome.reason.label());
    println!("Steps:        {}", outcome.steps_taken);
    println!("Elapsed:      {:.1}s", outcome.elapsed.as_secs_f64());
    println!(
        "Submission:   {}",
        if outcome.submission_present {
            submission.display().to_string()
        } else {
            "missing".to_string()
        }
    );
    if let Some(answer) = &outcome.final_answer {
        println!("Final answer: {}", answer);
    }

    if let Some(path) = log_path {
        let json = serde_json::to_string_pretty(&outcome)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        info!("Step log written to {}", path.display());
    }

    Ok(())
}

fn preview(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let head: String = text.chars().take(max).collect();
    format!("{}...", head)
}

async fn print_events(mut rx: mpsc::Receiver<AgentEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            AgentEvent::StepStarted { step, readout } => {
                println!();
                println!("--- Step {} ({}) ---", step, readout);
            }
            AgentEvent::ModelText { text, .. } => println!("{}", text),
            AgentEvent::ToolCalled { name, arguments, .. } => {
                println!("> {} {}", name, preview(&arguments, RESULT_PREVIEW_CHARS));
            }
            AgentEvent::ToolResult {
                name,
                success,
                output,
                ..
            } => {
                let mark = if success { "ok" } else { "FAILED" };
                println!("< {} [{}]\n{}", name, mark, preview(&output, RESULT_PREVIEW_CHARS));
            }
            AgentEvent::ArtifactAttached { path, bytes, .. } => {
                println!("[image] {} ({} bytes) attached", path.display(), bytes);
            }
            AgentEvent::Terminated { reason, steps_taken } => {
                println!("Run terminated after {} steps: {}", steps_taken, reason.label());
            }
        }
    }
}

fn cmd_catalog(
    path: &Path,
    categories: Vec<String>,
    max_size_gb: f64,
    show_categories: bool,
    extra: &[String],
) -> Result<()> {
    let entries =
        load_catalog_path(path).with_context(|| format!("reading catalog {}", path.display()))?;

    if show_categories {
        for category in distinct_categories(&entries) {
            println!("{}", category);
        }
        return Ok(());
    }

    let allow: Vec<String> = if categories.is_empty() {
        DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect()
    } else {
        categories
    };

    let mut ids = filter_competitions(&entries, &allow, max_size_gb);
    info!("{} of {} competitions selected", ids.len(), entries.len());
    for id in extra {
        if !ids.contains(id) {
            ids.push(id.clone());
        }
    }

    for id in ids {
        println!("{}", id);
    }
    Ok(())
}

fn cmd_validate(config: &ForecastorConfig, competition_id: &str, submission: &Path) -> Result<()> {
    let competition = registry(config)?.get_competition(competition_id)?;
    let verdict = SampleSubmissionValidator::new().validate(submission, &competition);
    if !verdict.valid {
        bail!("{}", verdict.message);
    }
    println!("{}", verdict.message);
    Ok(())
}

fn cmd_inspect(
    config: &ForecastorConfig,
    competition_id: &str,
    leaderboard_rows: usize,
) -> Result<()> {
    let registry = registry(config)?;
    let competition = registry.get_competition(competition_id)?;
    let context = registry.load_context(&competition)?;

    println!("{}", instructions(&config.budget()));
    println!("{}", build_task(&context, leaderboard_rows));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_defaults() {
        let cli = Cli::parse_from(["forecastor", "run"]);
        match cli.command {
            Commands::Run {
                competition,
                leaderboard_rows,
                ..
            } => {
                assert_eq!(competition, DEFAULT_COMPETITION);
                assert_eq!(leaderboard_rows, 10);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_catalog_repeatable_flags() {
        let cli = Cli::parse_from([
            "forecastor",
            "catalog",
            "-c",
            "Tabular",
            "-c",
            "Forecasting",
            "--extra",
            "spaceship-titanic",
        ]);
        match cli.command {
            Commands::Catalog { category, extra, max_size_gb, .. } => {
                assert_eq!(category, vec!["Tabular", "Forecasting"]);
                assert_eq!(extra, vec!["spaceship-titanic"]);
                assert_eq!(max_size_gb, 1.0);
            }
            _ => panic!("expected catalog"),
        }
    }
}
