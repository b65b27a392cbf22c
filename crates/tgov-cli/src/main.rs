use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tgov_pipeline::scheduler::{build_scheduler, spawn_miss_watch};
use tgov_pipeline::{AppConfig, Pipeline, PipelineError};
use tgov_web::AppState;
use tracing::{error, info, warn};

const EXIT_OK: u8 = 0;
const EXIT_INFRA_FAILURE: u8 = 1;
const EXIT_VALIDATION_FAILURE: u8 = 2;
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Debug, Parser)]
#[command(name = "tgov")]
#[command(about = "Transfer Gov ingestion pipeline")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Execute one pipeline run now.
    Run {
        /// Parse and validate only; skip every database write.
        #[arg(long)]
        dry_run: bool,

        /// Ingest this directory instead of the latest dated one.
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Start the daily scheduler and the health publisher.
    Serve,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            error!(error = ?err, "configuration failed to load");
            return ExitCode::from(EXIT_INFRA_FAILURE);
        }
    };

    let code = match cli.command.unwrap_or(Commands::Run {
        dry_run: false,
        data_dir: None,
    }) {
        Commands::Run { dry_run, data_dir } => run_command(config, dry_run, data_dir).await,
        Commands::Serve => serve_command(config).await,
    };
    ExitCode::from(code)
}

fn init_tracing(verbosity: u8) {
    let default_filter = match verbosity {
        0 => "info,sqlx=warn",
        1 => "debug,sqlx=info",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

async fn run_command(config: AppConfig, dry_run: bool, data_dir: Option<PathBuf>) -> u8 {
    if dry_run {
        // Dry runs open no transaction and need no schema, so a lazy
        // pool is enough even against an unreachable database.
        let pool = match tgov_store_pool(&config) {
            Ok(pool) => pool,
            Err(err) => {
                error!(error = ?err, "could not build database pool");
                return EXIT_INFRA_FAILURE;
            }
        };
        let (pipeline, _cancel) = Pipeline::with_pool(config, pool);
        return match pipeline.dry_run(data_dir.as_deref()).await {
            Ok(report) => {
                println!("{}", report.render());
                if report.has_validation_errors() {
                    EXIT_VALIDATION_FAILURE
                } else {
                    EXIT_OK
                }
            }
            Err(err) => {
                error!(error = %err, "dry run failed");
                EXIT_INFRA_FAILURE
            }
        };
    }

    let (pipeline, cancel) = match Pipeline::connect(config).await {
        Ok(pair) => pair,
        Err(err) => {
            error!(error = %err, "could not initialize pipeline");
            return EXIT_INFRA_FAILURE;
        }
    };

    let run = pipeline.run_once(data_dir.as_deref());
    tokio::pin!(run);

    let result = tokio::select! {
        result = &mut run => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupt received, finishing current file group then rolling back");
            cancel.cancel();
            run.await
        }
    };

    match result {
        Ok(summary) => {
            info!(
                run_id = %summary.run_id,
                status = summary.status.as_str(),
                records = summary.total_records(),
                "run complete"
            );
            EXIT_OK
        }
        Err(PipelineError::Cancelled) => EXIT_INTERRUPTED,
        Err(PipelineError::AlreadyRunning) => {
            warn!("another run is already in progress");
            EXIT_INFRA_FAILURE
        }
        Err(err) => {
            error!(error = %err, "run failed");
            EXIT_INFRA_FAILURE
        }
    }
}

async fn serve_command(config: AppConfig) -> u8 {
    let port = config.web.port;
    let (pipeline, _cancel) = match Pipeline::connect(config).await {
        Ok(pair) => pair,
        Err(err) => {
            error!(error = %err, "could not initialize pipeline");
            return EXIT_INFRA_FAILURE;
        }
    };
    let pipeline = Arc::new(pipeline);

    let scheduler = match build_scheduler(pipeline.clone()).await {
        Ok(mut scheduler) => match scheduler.start().await {
            Ok(()) => scheduler,
            Err(err) => {
                error!(error = %err, "scheduler failed to start");
                return EXIT_INFRA_FAILURE;
            }
        },
        Err(err) => {
            error!(error = %err, "scheduler failed to build");
            return EXIT_INFRA_FAILURE;
        }
    };
    let miss_watch = spawn_miss_watch(pipeline.clone());

    let web_state = AppState::new(pipeline.pool().clone());
    let web = tokio::spawn(async move { tgov_web::serve(web_state, port).await });

    info!("serving until interrupted");
    let code = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            EXIT_INTERRUPTED
        }
        result = web => {
            match result {
                Ok(Ok(())) => EXIT_OK,
                Ok(Err(err)) => {
                    error!(error = %err, "health publisher failed");
                    EXIT_INFRA_FAILURE
                }
                Err(err) => {
                    error!(error = %err, "health publisher task panicked");
                    EXIT_INFRA_FAILURE
                }
            }
        }
    };

    miss_watch.abort();
    let mut scheduler = scheduler;
    if let Err(err) = scheduler.shutdown().await {
        warn!(error = %err, "scheduler did not shut down cleanly");
    }
    code
}

fn tgov_store_pool(config: &AppConfig) -> anyhow::Result<sqlx::PgPool> {
    tgov_store::connect_lazy(&config.database.url, config.database.max_connections)
        .context("building lazy database pool")
}
