//! CLI entrypoint: create a project, store a spec, and drive one run.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use fairplay::PipelineConfig;
use mystery_agents::{CmlMode, PipelineService, SpecDraft};

#[derive(Parser)]
#[command(name = "mystery-agents", about = "Fair-play mystery generation pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full pipeline for a spec file (TOML).
    Run {
        /// Path to the spec file.
        #[arg(long)]
        spec: PathBuf,
        /// Project name; created if it does not exist.
        #[arg(long, default_value = "default")]
        project: String,
    },
    /// Print run events for a project from an offset.
    Events {
        #[arg(long)]
        project: String,
        #[arg(long, default_value_t = 0)]
        offset: u64,
    },
    /// Export the reader-facing artifact bundle as JSON.
    Export {
        #[arg(long)]
        project: String,
        /// x-cml-mode equivalent: user, advanced, or expert.
        #[arg(long, default_value = "user")]
        mode: String,
    },
    /// Verify environment configuration without starting a run.
    CheckEnv,
}

fn init_tracing(config: &PipelineConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log.level.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = PipelineConfig::from_env();
    init_tracing(&config);

    let service = PipelineService::from_env().context("failed to initialize pipeline service")?;

    match cli.command {
        Command::Run { spec, project } => {
            let raw = std::fs::read_to_string(&spec)
                .with_context(|| format!("failed to read spec file {}", spec.display()))?;
            let draft: SpecDraft = toml::from_str(&raw).context("failed to parse spec file")?;

            let project = match service
                .list_projects()?
                .into_iter()
                .find(|p| p.name == project)
            {
                Some(existing) => existing,
                None => service.create_project(&project)?,
            };
            let spec = service.store_spec(&project.id, draft)?;
            info!(project = %project.name, spec = %spec.id, "starting run");

            let outcome = service.start_run(&project.id).await?;
            println!("run {} finished: {:?}", outcome.run_id, outcome.status);
            if let Some(report) = outcome.report {
                println!(
                    "score {:.1} (grade {}), cost ${:.4}, weakest phase: {}",
                    report.overall_score,
                    report.overall_grade,
                    report.total_cost,
                    report.weakest_phase.as_deref().unwrap_or("-"),
                );
            }
        }
        Command::Events { project, offset } => {
            let found = service
                .list_projects()?
                .into_iter()
                .find(|p| p.name == project)
                .with_context(|| format!("no project named {project}"))?;
            for event in service.project_events(&found.id, offset)? {
                println!(
                    "[{}] {:>4} {} — {}",
                    event.timestamp.format("%H:%M:%S"),
                    event.seq,
                    event.step,
                    event.message
                );
            }
        }
        Command::Export { project, mode } => {
            let found = service
                .list_projects()?
                .into_iter()
                .find(|p| p.name == project)
                .with_context(|| format!("no project named {project}"))?;
            let bundle = service.export(&found.id, CmlMode::from_header(Some(&mode)))?;
            println!("{}", serde_json::to_string_pretty(&bundle)?);
        }
        Command::CheckEnv => {
            println!(
                "novelty: threshold {:.2}, skip {}, hard fail {}",
                config.novelty_threshold, config.novelty_skip, config.novelty_hard_fail
            );
            println!("fair-play cost ceiling: ${:.2}", config.fair_play_cost_ceiling);
            println!(
                "persistence: {}",
                config
                    .json_db_path
                    .as_ref()
                    .map(|p| format!("json file {}", p.display()))
                    .unwrap_or_else(|| "in-memory".into())
            );
            match mystery_agents::AgentsConfig::from_env().endpoint {
                Some(endpoint) => println!("llm endpoint: {} ({})", endpoint.url, endpoint.model),
                None => println!("llm endpoint: NOT CONFIGURED (runs will fail with 503)"),
            }
        }
    }
    Ok(())
}
