//! guidecast - XMLTV guide fetcher, transformer and server.

/// Application configuration (TOML).
mod config;
/// One fetch-build-publish update.
mod cycle;
/// Cron-driven update trigger.
mod scheduler;
/// HTTP server.
mod server;
/// Single-slot update guard.
mod supervisor;
/// Transform pipeline assembly.
mod transform;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use tracing::instrument;
use tracing_subscriber::filter::EnvFilter;
#[cfg(not(feature = "otel"))]
use tracing_subscriber::fmt;
#[cfg(feature = "otel")]
use tracing_subscriber::layer::SubscriberExt;
#[cfg(feature = "otel")]
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{AppConfig, resolve_config_path};
use crate::cycle::UpdateCycle;
use crate::server::AppState;
use crate::transform::{TransformOptions, build_pipeline, fetch_roster};

/// CLI argument parser.
#[derive(Parser)]
#[command(name = "guidecast", about, version)]
struct Cli {
    /// Override config/data directory.
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Fetch the guide from the device and publish a new version.
    Fetch,
    /// Filter and/or fill an XMLTV file.
    Transform(TransformArgs),
    /// Serve the published guide and refresh it on a schedule.
    Serve(ServeArgs),
    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Arguments for the `transform` subcommand.
#[derive(clap::Args)]
struct TransformArgs {
    /// XMLTV file to read.
    #[arg(long)]
    input: PathBuf,

    /// File to write (default: stdout).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Keep only programmes starting within this many days of today.
    #[arg(long)]
    days: Option<u32>,

    /// Placeholder block duration for channels without programmes,
    /// e.g. "1hr", "30min", "true". "false" disables.
    #[arg(long)]
    dummy: Option<String>,

    /// Do not ask the device for its channel lineup.
    #[arg(long)]
    no_lineup: bool,
}

/// Arguments for the `serve` subcommand.
#[derive(clap::Args)]
struct ServeArgs {
    /// Listen address (default: `server.bind` from config).
    #[arg(long)]
    bind: Option<String>,
}

/// Loads config from the resolved config path.
fn load_config(dir: Option<&PathBuf>) -> Result<AppConfig> {
    let path = resolve_config_path(dir)?;
    tracing::debug!(path = %path.display(), "Loading config");
    AppConfig::load(&path)
}

/// Runs the `fetch` subcommand.
///
/// # Errors
///
/// Returns an error if the config is incomplete or the update fails.
#[instrument(skip_all)]
async fn run_fetch(dir: Option<&PathBuf>) -> Result<()> {
    let config = load_config(dir)?;
    let cycle = UpdateCycle::new(
        Arc::new(config.guide_client()?),
        Arc::new(config.guide_store(dir)?),
        config.fetch_plan(),
        config.offset()?,
    );

    let path = cycle.run().await?;
    tracing::info!(path = %path.display(), "Guide published");
    Ok(())
}

/// Runs the `transform` subcommand.
///
/// # Errors
///
/// Returns an error if the input cannot be read, the output cannot be
/// written, or the input is malformed.
#[instrument(skip_all)]
async fn run_transform(args: &TransformArgs, dir: Option<&PathBuf>) -> Result<()> {
    let config = load_config(dir)?;
    let options = TransformOptions {
        days: args.days,
        placeholder: args
            .dummy
            .as_deref()
            .and_then(|token| config.placeholder_spec(token)),
    };

    let roster = if options.needs_roster() && !args.no_lineup {
        match config.guide_client() {
            Ok(client) => fetch_roster(&client).await,
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "Channel lineup unavailable");
                None
            }
        }
    } else {
        None
    };

    let input = File::open(&args.input)
        .with_context(|| format!("failed to open {}", args.input.display()))?;
    let pipeline = build_pipeline(&options, config.clock()?, roster);

    match &args.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            let result = pipeline
                .run(input, &mut writer)
                .map_err(anyhow::Error::new)
                .and_then(|written| {
                    writer.flush()?;
                    Ok(written)
                });
            match result {
                Ok(written) => {
                    tracing::info!(bytes = written, path = %path.display(), "Transform complete");
                    Ok(())
                }
                Err(e) => {
                    drop(writer);
                    if let Err(remove) = std::fs::remove_file(path) {
                        tracing::warn!(error = %remove, "Failed to remove partial output");
                    }
                    Err(e.context(format!("failed to transform {}", args.input.display())))
                }
            }
        }
        None => {
            let stdout = io::stdout();
            let mut writer = BufWriter::new(stdout.lock());
            pipeline
                .run(input, &mut writer)
                .with_context(|| format!("failed to transform {}", args.input.display()))?;
            writer.flush().context("failed to flush stdout")?;
            Ok(())
        }
    }
}

/// Runs the `serve` subcommand.
///
/// # Errors
///
/// Returns an error if the config is incomplete or the server fails.
#[instrument(skip_all)]
async fn run_serve(args: &ServeArgs, dir: Option<&PathBuf>) -> Result<()> {
    let config = load_config(dir)?;
    let schedule = scheduler::parse_schedule(&config.server.schedule)?;
    let bind = args
        .bind
        .clone()
        .unwrap_or_else(|| config.server.bind.clone());
    let refresh_on_start = config.server.refresh_on_start;

    let state = AppState::new(
        Arc::new(config.guide_client()?),
        Arc::new(config.guide_store(dir)?),
        Arc::new(config),
    )?;

    if refresh_on_start {
        state.trigger_update();
    }

    let scheduled = state.clone();
    tokio::spawn(scheduler::run_schedule(schedule, move || {
        let state = scheduled.clone();
        async move { state.scheduled_update().await }
    }));

    server::serve(state, &bind).await
}

/// Entry point.
///
/// # Errors
///
/// Returns an error if subcommand execution fails.
#[tokio::main]
async fn main() -> Result<()> {
    #[cfg(not(feature = "otel"))]
    {
        fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_target(false)
            .with_writer(io::stderr)
            .init();
    }

    #[cfg(feature = "otel")]
    {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(io::stderr);

        let otel_layer = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .ok()
            .and_then(|_| {
                let exporter = opentelemetry_otlp::SpanExporter::builder()
                    .with_http()
                    .build()
                    .ok()?;

                let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
                    .with_simple_exporter(exporter)
                    .build();

                let tracer = opentelemetry::trace::TracerProvider::tracer(
                    &tracer_provider,
                    env!("CARGO_PKG_NAME"),
                );
                opentelemetry::global::set_tracer_provider(tracer_provider);

                Some(tracing_opentelemetry::layer().with_tracer(tracer))
            });

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(otel_layer)
            .init();
    }

    let cli = Cli::parse();
    match cli.command {
        Commands::Fetch => run_fetch(cli.dir.as_ref()).await,
        Commands::Transform(args) => run_transform(&args, cli.dir.as_ref()).await,
        Commands::Serve(args) => run_serve(&args, cli.dir.as_ref()).await,
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "guidecast", &mut io::stdout());
            Ok(())
        }
    }
}
