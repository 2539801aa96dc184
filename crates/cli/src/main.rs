//! `pipeline-runner` CLI entry-point.
//!
//! Available sub-commands:
//! - `serve`: start the API server backed by Postgres.
//! - `migrate`: run pending database migrations.
//! - `run`: queue one pipeline run, wait for it and print the result.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use db::PgStore;
use engine::{Orchestrator, OrchestratorConfig, RunRequest, RunStatus, TriggerKind};
use remote::CommandExecutor;

#[derive(Parser)]
#[command(
    name = "pipeline-runner",
    about = "Runs staged pipelines of scripts against remote hosts",
    version
)]
struct Cli {
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the REST API server.
    Serve {
        #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
        bind: String,
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Run pending database migrations.
    Migrate,
    /// Queue a single run and wait until it is terminal.
    Run {
        pipeline_id: Uuid,
        /// Substitution variable as KEY=VALUE. May be repeated.
        #[arg(long = "var", value_parser = parse_variable)]
        variables: Vec<(String, String)>,
        #[arg(long, default_value = "cli")]
        triggered_by: String,
        #[command(flatten)]
        engine: EngineArgs,
    },
}

#[derive(Args)]
struct EngineArgs {
    #[arg(long, env = "MAX_CONCURRENT_RUNS", default_value_t = 1)]
    max_concurrent_runs: usize,
    #[arg(long, env = "STEP_LOG_DIR", default_value = "logs")]
    log_dir: PathBuf,
    /// Finished run snapshots kept in memory for status queries.
    #[arg(long, env = "RETAINED_RUNS", default_value_t = 1000)]
    retained_runs: usize,
    /// Program that runs a script on a host, reading the script on stdin.
    #[arg(long, env = "REMOTE_LAUNCHER", default_value = "ssh")]
    launcher: String,
    /// Launcher argument; `{host}` and `{username}` are filled in per step.
    #[arg(long = "launcher-arg", allow_hyphen_values = true)]
    launcher_args: Vec<String>,
}

impl EngineArgs {
    fn orchestrator(&self, store: PgStore) -> Orchestrator {
        let launcher_args = if self.launcher_args.is_empty() {
            vec!["{username}@{host}".to_owned(), "sh".to_owned(), "-s".to_owned()]
        } else {
            self.launcher_args.clone()
        };
        let executor = CommandExecutor::new(self.launcher.clone(), launcher_args);
        let config = OrchestratorConfig::default()
            .with_max_concurrent_runs(self.max_concurrent_runs)
            .with_log_dir(self.log_dir.clone())
            .with_retained_runs(self.retained_runs);
        Orchestrator::new(Arc::new(store), Arc::new(executor), config)
    }
}

fn parse_variable(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_owned(), value.to_owned())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

async fn connect(database_url: Option<&str>, max_connections: u32) -> Result<PgStore> {
    let url = database_url.context("DATABASE_URL is not set")?;
    PgStore::connect(url, max_connections)
        .await
        .context("failed to connect to database")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let database_url = cli.database_url.as_deref();

    match cli.command {
        Command::Serve { bind, engine } => {
            let store = connect(database_url, 10).await?;
            let orchestrator = engine.orchestrator(store);
            let state = api::AppState { orchestrator: orchestrator.clone() };

            info!("Starting API server on {bind}");
            tokio::select! {
                served = api::serve(&bind, state) => served?,
                _ = tokio::signal::ctrl_c() => {
                    let cancelled = orchestrator.shutdown().await?;
                    info!(
                        cancelled,
                        active = orchestrator.active_workers(),
                        "interrupted, waiting for in-flight runs to finish"
                    );
                    orchestrator.wait_idle().await;
                    info!("all runs finalised, exiting");
                }
            }
        }
        Command::Migrate => {
            let store = connect(database_url, 2).await?;
            store.migrate().await.context("migration failed")?;
            info!("Migrations applied successfully");
        }
        Command::Run { pipeline_id, variables, triggered_by, engine } => {
            let store = connect(database_url, 2).await?;
            let orchestrator = engine.orchestrator(store);

            let request = RunRequest {
                pipeline_id,
                triggered_by,
                trigger_type: TriggerKind::Manual,
                variables: variables.into_iter().collect::<BTreeMap<_, _>>(),
            };
            let run_id = orchestrator.queue_run(request).await?;
            let snapshot = orchestrator
                .wait_for_run(run_id)
                .await
                .with_context(|| format!("run {run_id} vanished from the registry"))?;

            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            if snapshot.status != RunStatus::Succeeded {
                bail!("run {run_id} ended as {}", snapshot.status);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variables_split_on_first_equals() {
        assert_eq!(
            parse_variable("QUERY=a=b").unwrap(),
            ("QUERY".to_owned(), "a=b".to_owned())
        );
        assert_eq!(parse_variable("EMPTY=").unwrap(), ("EMPTY".to_owned(), String::new()));
        assert!(parse_variable("novalue").is_err());
        assert!(parse_variable("=x").is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
