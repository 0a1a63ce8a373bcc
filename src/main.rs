use anyhow::{bail, Result};
use clap::Parser;
use colored::*;
use tracing_subscriber::EnvFilter;

use page_mirror::{Ledger, MirrorCommand, UpsertOutcome, WebsiteMirror};

#[tokio::main]
async fn main() -> Result<()> {
    let args = MirrorCommand::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if args.metadata {
        return print_metadata(&args);
    }

    let mirror = WebsiteMirror::new(args.config())?;

    println!("🚀 Mirroring {} page(s)", args.urls.len());
    println!("📁 Output directory: {:?}", args.output_dir);
    println!("📒 Ledger: {:?}", mirror.ledger_path());

    let summary = mirror.mirror_all(&args.urls).await?;

    for page in &summary.pages {
        let action = match page.ledger {
            UpsertOutcome::Inserted(_) => "new",
            UpsertOutcome::Updated(_) => "updated",
        };
        println!(
            "✅ {} -> {:?} ({} assets, {} images, {} links, ledger {})",
            page.url.as_str().blue(),
            page.html_path,
            page.assets.downloaded,
            page.stats.num_images,
            page.stats.num_links,
            action
        );
    }
    for (url, error) in &summary.failures {
        eprintln!("❌ {}: {:#}", url.as_str().red(), error);
    }
    for url in &summary.not_attempted {
        eprintln!("⏭️  Not attempted: {}", url);
    }

    if !summary.is_success() {
        bail!(
            "{} page(s) failed, {} not attempted, {} mirrored",
            summary.failures.len(),
            summary.not_attempted.len(),
            summary.pages.len()
        );
    }

    println!("✅ Page mirroring completed successfully!");
    Ok(())
}

fn print_metadata(args: &MirrorCommand) -> Result<()> {
    let ledger = Ledger::open(&args.ledger);
    let mut records = Vec::new();

    for url in &args.urls {
        match ledger.lookup(url.as_str())? {
            Some(record) => records.push(record),
            None => eprintln!("⚠️  No metadata recorded for {}", url.as_str().yellow()),
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        for record in &records {
            println!("📄 {}", record);
        }
    }

    Ok(())
}
