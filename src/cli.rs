use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// URL to download
    #[arg(index = 1)]
    pub url: String,

    /// Destination file (defaults to the last URL segment in the current directory)
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Number of workers (defaults to min(32, logical CPUs + 4))
    #[arg(short = 't', long)]
    pub threads: Option<usize>,

    /// Bytes handled per read step
    #[arg(long = "chunk-size")]
    pub chunk_size: Option<usize>,

    /// Smallest gap in bytes that a running range may be split at
    #[arg(long = "min-split")]
    pub min_split: Option<u64>,

    /// Request timeout in seconds
    #[arg(long)]
    pub timeout: Option<f64>,

    /// Extra request header, e.g. -H 'Referer: https://example.com'
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// JSON configuration file; flags override its values
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Directory for temporary debris files
    #[arg(long = "temp-dir")]
    pub temp_dir: Option<PathBuf>,

    /// Do not draw progress bars
    #[arg(short = 'q', long)]
    pub quiet: bool,
}
