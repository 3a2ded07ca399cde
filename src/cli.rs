use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "fetchcore")]
#[command(about = "fetchcore CLI", long_about = None)]
pub struct Cli {
    /// Configuration file (overrides FETCHCORE_CONFIG)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download URLs into a directory as one composite task
    Fetch(FetchArgs),
}

#[derive(clap::Args, Debug)]
pub struct FetchArgs {
    /// URLs to download
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Directory the files are written to
    #[arg(long, short, default_value = ".")]
    pub out: PathBuf,

    /// Attempts per URL (defaults to downloader.max_attempts)
    #[arg(long)]
    pub tries: Option<u32>,

    /// Fail the whole fetch as soon as one URL fails
    #[arg(long)]
    pub fail_fast: bool,

    /// Serve repeated URLs from the configured cache and store new bodies
    /// in it
    #[arg(long)]
    pub cache: bool,
}
