//! LocalOuvert Ingest - dataset aggregation tool

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use localouvert_common::config::{AggregatorConfig, Config};
use localouvert_common::logging::{init_logging, LogConfig, LogLevel};
use localouvert_ingest::normalize::transforms;
use localouvert_ingest::{Aggregator, FileList, LoadOptions, LoaderRegistry, TabularNormalizer};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "localouvert-ingest")]
#[command(author, version, about = "LocalOuvert dataset aggregation tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download, normalize and combine every file of a listing
    Aggregate {
        #[command(flatten)]
        target: Target,

        /// Column every normalized file must have (repeatable)
        #[arg(long = "required-column")]
        required_columns: Vec<String>,

        /// Listing column copied onto every normalized row (repeatable)
        #[arg(long = "metadata-column", default_values_t = ["url".to_string()])]
        metadata_columns: Vec<String>,

        /// Do not draw a progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Show progress from disk state, without downloading anything
    Status {
        #[command(flatten)]
        target: Target,
    },
}

#[derive(Args, Debug)]
struct Target {
    /// File listing with at least a `url` column (CSV or any supported format)
    #[arg(short, long)]
    files: PathBuf,

    /// Aggregator name under `aggregators:` in the configuration file
    #[arg(short, long)]
    name: String,

    /// Value substituted for the topic placeholder in configured paths
    #[arg(short, long)]
    topic: Option<String>,

    /// YAML configuration file
    #[arg(short, long, env = "LOCALOUVERT_CONFIG", default_value = "localouvert.yaml")]
    config: PathBuf,
}

impl Target {
    fn load(&self) -> Result<(Config, AggregatorConfig, FileList)> {
        let config = Config::from_yaml_file(&self.config)
            .with_context(|| format!("Failed to load configuration from {}", self.config.display()))?;

        let aggregator = config.aggregator(&self.name)?;
        let aggregator = match self.topic {
            Some(ref topic) => aggregator.for_topic(topic),
            None => aggregator.clone(),
        };

        let listing = LoaderRegistry::with_defaults()
            .load_path(&self.files, None, &LoadOptions::default())
            .map_err(|e| anyhow::anyhow!("Cannot read file list {}: {}", self.files.display(), e))?;
        let files = FileList::from_frame(&listing).context("Invalid file list")?;

        Ok((config, aggregator, files))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("localouvert-ingest")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    match cli.command {
        Command::Aggregate {
            target,
            required_columns,
            metadata_columns,
            no_progress,
        } => {
            let (config, aggregator_config, files) = target.load()?;
            info!(name = %target.name, files = files.len(), "Aggregating");

            let normalizer = TabularNormalizer::new()
                .with_transform(transforms::normalize_column_names)
                .with_transform(|frame| transforms::merge_duplicate_columns(frame, " / "))
                .with_required_columns(required_columns)
                .with_metadata_columns(metadata_columns);

            let mut aggregator = Aggregator::new(
                files,
                &aggregator_config,
                &config.http,
                LoaderRegistry::with_defaults(),
                normalizer,
            )?
            .with_progress(!no_progress);

            let report = aggregator.run()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        },
        Command::Status { target } => {
            let (config, aggregator_config, files) = target.load()?;
            let aggregator = Aggregator::new(
                files,
                &aggregator_config,
                &config.http,
                LoaderRegistry::with_defaults(),
                TabularNormalizer::new(),
            )?;

            let status = aggregator.status()?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        },
    }

    info!("Done");
    Ok(())
}
