//! pertitle - per-title encoding dataset generator
//!
//! Encodes every source video with every catalog profile across a bitrate
//! ladder, then records source/encode/output metadata and VMAF per encode.

use anyhow::Result;
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pertitle::catalog::{Catalog, TomlCatalog};
use pertitle::cli::{Args, Commands};
use pertitle::compiler::{profile_resolution, CommandCompiler};
use pertitle::config::Config;
use pertitle::dataset::CsvDatasetSink;
use pertitle::ladder::ResolutionClass;
use pertitle::media::ExecutorFactory;
use pertitle::metadata::reparse;
use pertitle::workflow::{load_ladder, Pipeline, Toolchain};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if Path::new("config.toml").exists() {
                Config::from_file("config.toml")?
            } else {
                Config::default()
            }
        }
    };
    if let Some(catalog) = &args.catalog {
        config.paths.catalog = catalog.clone();
    }

    setup_logging(args.verbose, &config.paths.log_dir)?;

    let tools = Toolchain::new(&config, ExecutorFactory::create_default());

    match args.command {
        Commands::Run {
            jobs,
            source_dir,
            dataset,
        } => {
            if let Some(jobs) = jobs {
                config.pipeline.jobs = jobs;
            }
            if let Some(source_dir) = source_dir {
                config.paths.source_dir = source_dir;
            }
            if let Some(dataset) = dataset {
                config.paths.dataset = dataset;
            }

            info!("Starting encoding process");
            let catalog = Arc::new(TomlCatalog::from_file(&config.paths.catalog)?);
            let sink = Arc::new(CsvDatasetSink::new(&config.paths.dataset));
            let pipeline = Pipeline::new(config, catalog, sink, tools).with_progress(true);

            let summary = pipeline.run().await?;
            println!("{}", summary);
        }
        Commands::Compile { codec, profile } => {
            let catalog = TomlCatalog::from_file(&config.paths.catalog)?;
            let params = catalog.profile_params(&codec, &profile);
            if params.is_empty() {
                warn!("Profile {}/{} has no parameters", codec, profile);
            }

            let compiler = CommandCompiler::new(load_ladder(&config, &catalog));
            for compiled in compiler.compile_profile(&codec, &profile, &params) {
                println!("{}: {}", compiled, compiled.argument_string());
            }
        }
        Commands::Check => {
            match tools.runner.check_availability().await {
                Ok(version) => println!("Encoder: {}", version),
                Err(e) => println!("Encoder unavailable: {}", e),
            }

            let catalog = TomlCatalog::from_file(&config.paths.catalog)?;
            let families = catalog.codec_families();
            let ladder = load_ladder(&config, &catalog);

            let gaps = ladder.coverage_gaps(&families);
            if gaps.is_empty() {
                println!("Ladder covers every class of {} codec(s)", families.len());
            }
            for (family, class) in gaps {
                println!("No ladder entry: {} {}", family, class);
            }

            for family in &families {
                for profile in catalog.profile_names(family) {
                    let params = catalog.profile_params(family, &profile);
                    let resolution = profile_resolution(&params).unwrap_or("N/A");
                    if ResolutionClass::classify(resolution).is_none() {
                        println!(
                            "Unclassified resolution '{}' in {}/{}: encodes without rate control",
                            resolution, family, profile
                        );
                    }
                }
            }
        }
        Commands::Reparse { args } => {
            let metadata = reparse(&args.join(" "));
            println!("{}", serde_json::to_string_pretty(&metadata)?);
        }
        Commands::Probe { file } => {
            let outcome = tools.extractor.probe(&file, "input").await;
            if let Some(reason) = outcome.reason() {
                warn!("Probe degraded: {}", reason);
            }
            println!("{}", serde_json::to_string_pretty(outcome.value())?);
        }
        Commands::Score { source, encoded } => {
            let outcome = tools.scorer.score(&source, &encoded).await;
            match outcome.value() {
                Some(score) => println!("VMAF: {}", score),
                None => println!("VMAF: N/A ({})", outcome.reason().unwrap_or("no score")),
            }
        }
        Commands::InitConfig { path } => {
            config.save_to_file(&path)?;
            println!("Wrote default configuration to {}", path.display());
        }
    }

    Ok(())
}

/// Setup logging to both console and a daily-rolling file
fn setup_logging(verbose: bool, log_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = rolling::daily(log_dir, "pertitle.log");
    let (non_blocking_file, _guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(_guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("pertitle.log").display()
    );

    Ok(())
}
