use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::localizer::validate_asset_dir;
use crate::mirror::MirrorConfig;
use crate::references::ReferenceMap;

#[derive(Parser, Debug)]
#[command(
    name = "page-mirror",
    about = "A CLI utility to mirror single web pages with their assets",
    version,
    long_about = "Downloads each given page, stores its images, stylesheets and scripts next to it, rewrites the page to use the local copies, and records link/image counts and fetch time per URL in a CSV ledger."
)]
pub struct MirrorCommand {
    /// The URLs of the pages to mirror
    #[arg(required = true, value_parser = parse_page_url)]
    pub urls: Vec<Url>,

    /// Output directory for mirrored pages
    #[arg(short, long, default_value = "./mirrored_pages")]
    pub output_dir: PathBuf,

    /// CSV ledger recording per-URL fetch metadata
    #[arg(short, long, default_value = "metadata.csv")]
    pub ledger: PathBuf,

    /// Asset directory, relative to each saved page
    #[arg(short, long, default_value = "assets", value_parser = parse_asset_dir)]
    pub asset_dir: String,

    /// Print the stored metadata for the URLs instead of fetching them
    #[arg(short, long)]
    pub metadata: bool,

    /// Print metadata as JSON (with --metadata)
    #[arg(long, requires = "metadata")]
    pub json: bool,

    /// Number of pages mirrored at the same time
    #[arg(short, long, default_value = "1", value_parser = parse_jobs)]
    pub jobs: usize,

    /// User agent string to use for requests
    #[arg(long, default_value = "WebsiteMirror/1.0")]
    pub user_agent: String,

    /// Timeout for requests in seconds
    #[arg(long, default_value = "30")]
    pub timeout: u64,

    /// Stop at the first page that fails instead of continuing with the rest
    #[arg(long)]
    pub fail_fast: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl MirrorCommand {
    pub fn config(&self) -> MirrorConfig {
        MirrorConfig {
            output_dir: self.output_dir.clone(),
            ledger_path: self.ledger.clone(),
            asset_dir: self.asset_dir.clone(),
            jobs: self.jobs,
            user_agent: self.user_agent.clone(),
            timeout: Duration::from_secs(self.timeout),
            fail_fast: self.fail_fast,
            references: ReferenceMap::default(),
        }
    }
}

fn parse_page_url(value: &str) -> Result<Url, String> {
    let url = Url::parse(value).map_err(|e| format!("invalid URL '{}': {}", value, e))?;

    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        "http" | "https" => Err(format!("URL '{}' has no host", value)),
        scheme => Err(format!("unsupported scheme '{}' in '{}'", scheme, value)),
    }
}

fn parse_asset_dir(value: &str) -> Result<String, String> {
    validate_asset_dir(value)
        .map(str::to_string)
        .map_err(|e| e.to_string())
}

fn parse_jobs(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("jobs must be at least 1".to_string()),
        Ok(jobs) => Ok(jobs),
        Err(e) => Err(e.to_string()),
    }
}
