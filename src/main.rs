mod cli;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use hsdl::utils::{get_filename_from_url, get_unique_filepath, sanitize_filename};
use hsdl::{ConsoleReporter, Dispatcher, DownloadConfig, NoopReporter, ProgressReporter};
use indicatif::{HumanBytes, HumanDuration};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use crate::cli::Args;

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&args)?;
    let output = match &args.output {
        Some(path) => path.clone(),
        None => {
            let filename = sanitize_filename(&get_filename_from_url(&args.url)?);
            let cwd = std::env::current_dir().context("Failed to read current directory")?;
            get_unique_filepath(&cwd, &filename)
        }
    };

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(args, config, output))
}

fn load_config(args: &Args) -> Result<DownloadConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {:?}", path))?;
            serde_json::from_str(&content).with_context(|| format!("Failed to parse config file {:?}", path))?
        }
        None => DownloadConfig::default(),
    };

    if let Some(threads) = args.threads {
        config.thread_count = threads;
    }
    if let Some(chunk_size) = args.chunk_size {
        config.chunk_size = chunk_size;
    }
    if let Some(min_split) = args.min_split {
        config.min_insertion_interval = min_split;
    }
    if let Some(secs) = args.timeout {
        config.timeout = Some(Duration::try_from_secs_f64(secs).context("Invalid timeout")?);
    }
    if let Some(temp_dir) = &args.temp_dir {
        config.temp_dir = temp_dir.clone();
    }
    for raw in &args.headers {
        let (name, value) = raw
            .split_once(':')
            .ok_or_else(|| anyhow!("Header must look like 'Name: value', got {:?}", raw))?;
        config.headers.insert(name.trim().to_string(), value.trim().to_string());
    }

    config.validate()?;
    Ok(config)
}

async fn run(args: Args, config: DownloadConfig, output: PathBuf) -> Result<()> {
    let precision_ms = config.precision_ms;
    let dispatcher = Dispatcher::new(config)?;

    let info = dispatcher
        .probe(&args.url)
        .await
        .with_context(|| format!("Pre-check failed for {}", args.url))?;

    let console = (!args.quiet).then(|| ConsoleReporter::new(info.total_size, precision_ms));
    let reporter: Arc<dyn ProgressReporter> = match &console {
        Some(console) => console.clone(),
        None => Arc::new(NoopReporter),
    };
    let refresher = console.as_ref().map(|c| c.spawn_refresher());

    let result = dispatcher.dispatch(&args.url, &output, info, reporter).await;

    if let Some(console) = &console {
        console.finish();
    }
    if let Some(refresher) = refresher {
        let _ = refresher.await;
    }

    let summary = result.with_context(|| format!("Failed to download {}", args.url))?;
    println!(
        "Saved {} to {:?} in {} using {} workers",
        HumanBytes(summary.total_bytes),
        output,
        HumanDuration(summary.elapsed),
        summary.workers
    );
    Ok(())
}
