use anyhow::{Context, Result};
use futures::stream::{FuturesOrdered, StreamExt};
use std::collections::HashSet;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::downloader::{fetch_page, HttpClient, ReqwestClient};
use crate::file_manager::{FileManager, PAGE_FILE_NAME};
use crate::html_parser::PageStats;
use crate::ledger::{Ledger, LedgerRecord, UpsertOutcome};
use crate::localizer::{AssetLocalizer, LocalizeReport};
use crate::references::ReferenceMap;

#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub output_dir: PathBuf,
    pub ledger_path: PathBuf,
    /// Asset directory name, relative to each page directory.
    pub asset_dir: String,
    pub jobs: usize,
    pub user_agent: String,
    pub timeout: Duration,
    pub fail_fast: bool,
    pub references: ReferenceMap,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./mirrored_pages"),
            ledger_path: PathBuf::from("metadata.csv"),
            asset_dir: "assets".to_string(),
            jobs: 1,
            user_agent: "WebsiteMirror/1.0".to_string(),
            timeout: Duration::from_secs(30),
            fail_fast: false,
            references: ReferenceMap::default(),
        }
    }
}

/// Result of mirroring one page.
#[derive(Debug, Clone)]
pub struct PageReport {
    pub url: Url,
    pub status: u16,
    pub html_path: PathBuf,
    pub stats: PageStats,
    pub assets: LocalizeReport,
    pub ledger: UpsertOutcome,
}

/// Outcome of a multi-URL run, in input order.
#[derive(Debug, Default)]
pub struct MirrorSummary {
    pub pages: Vec<PageReport>,
    pub failures: Vec<(Url, anyhow::Error)>,
    /// URLs never started because a page failed under `fail_fast`. Pages
    /// already running at that point finish and land in `pages` or `failures`.
    pub not_attempted: Vec<Url>,
}

impl MirrorSummary {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.not_attempted.is_empty()
    }
}

pub struct WebsiteMirror<C> {
    config: MirrorConfig,
    client: C,
    file_manager: FileManager,
    ledger: Mutex<Ledger>,
}

impl WebsiteMirror<ReqwestClient> {
    pub fn new(config: MirrorConfig) -> Result<Self> {
        let client = ReqwestClient::new(&config.user_agent, config.timeout)?;
        Self::with_client(config, client)
    }
}

impl<C: HttpClient> WebsiteMirror<C> {
    pub fn with_client(config: MirrorConfig, client: C) -> Result<Self> {
        let file_manager = FileManager::new(&config.output_dir)?;
        let ledger = Mutex::new(Ledger::open(&config.ledger_path));

        Ok(Self {
            config,
            client,
            file_manager,
            ledger,
        })
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    /// Where the saved HTML for `url` lives.
    pub fn html_path(&self, url: &Url) -> PathBuf {
        self.file_manager.page_dir(url).join(PAGE_FILE_NAME)
    }

    pub fn ledger_path(&self) -> &Path {
        &self.config.ledger_path
    }

    /// Keeps the first URL for each page directory, so no two pipelines
    /// write the same `index.html` or asset directory.
    fn dedup_urls(&self, urls: &[Url]) -> Vec<Url> {
        let mut seen = HashSet::new();
        urls.iter()
            .filter(|url| {
                let fresh = seen.insert(self.file_manager.page_dir(url));
                if !fresh {
                    debug!(%url, "skipping duplicate page");
                }
                fresh
            })
            .cloned()
            .collect()
    }

    /// Fetches `url`, localizes its assets, saves the page and records it in the ledger.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn mirror_page(&self, url: &Url) -> Result<PageReport> {
        info!("mirroring page");

        let mut page = fetch_page(&self.client, url).await?;
        let page_dir = self.file_manager.page_dir(url);

        let assets = AssetLocalizer::new(&self.client, &self.config.references)
            .localize(&mut page.document, url, &page_dir, &self.config.asset_dir)
            .await
            .with_context(|| format!("Failed to localize assets for {}", url))?;

        let html_path = FileManager::save_html(&page.document, &page_dir.join(PAGE_FILE_NAME))?;

        let ledger = {
            let ledger = self.ledger.lock().await;
            ledger
                .upsert(url.as_str(), page.stats.num_images, page.stats.num_links)
                .with_context(|| format!("Failed to record {} in the ledger", url))?
        };

        info!(
            downloaded = assets.downloaded,
            rewritten = assets.rewritten,
            path = ?html_path,
            "page mirrored"
        );

        Ok(PageReport {
            url: page.url,
            status: page.status,
            html_path,
            stats: page.stats,
            assets,
            ledger,
        })
    }

    /// Mirrors every URL, running up to `jobs` pages at once.
    ///
    /// URLs that map to the same page directory are mirrored once. Failures
    /// are collected per URL. With `fail_fast` no new page is started after
    /// the first failure; the rest are reported as not attempted.
    pub async fn mirror_all(&self, urls: &[Url]) -> Result<MirrorSummary> {
        let urls = self.dedup_urls(urls);
        let jobs = self.config.jobs.max(1);
        let progress_bar = ProgressBar::new(urls.len() as u64);
        progress_bar.set_style(ProgressStyle::default_bar().template("{spinner} [{pos}/{len}] {msg}")?);

        let mut summary = MirrorSummary::default();
        let mut in_flight = FuturesOrdered::new();
        let mut started = 0;
        let mut stopped = false;

        loop {
            while !stopped && started < urls.len() && in_flight.len() < jobs {
                let url = &urls[started];
                in_flight.push_back(async move { (url, self.mirror_page(url).await) });
                started += 1;
            }

            let Some((url, result)) = in_flight.next().await else {
                break;
            };
            progress_bar.inc(1);
            progress_bar.set_message(url.to_string());

            match result {
                Ok(report) => summary.pages.push(report),
                Err(e) => {
                    warn!(%url, "page failed: {:#}", e);
                    summary.failures.push((url.clone(), e));
                    if self.config.fail_fast {
                        stopped = true;
                    }
                }
            }
        }

        summary.not_attempted = urls[started..].to_vec();
        progress_bar.finish_and_clear();

        Ok(summary)
    }

    /// Stored ledger record for `url`, without fetching anything.
    pub async fn lookup(&self, url: &Url) -> Result<Option<LedgerRecord>> {
        let ledger = self.ledger.lock().await;
        ledger
            .lookup(url.as_str())
            .with_context(|| format!("Failed to read ledger {:?}", ledger.path()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::{HttpResponse, MockHttpClient};
    use tempfile::tempdir;

    fn config_in(dir: &Path) -> MirrorConfig {
        MirrorConfig {
            output_dir: dir.join("out"),
            ledger_path: dir.join("metadata.csv"),
            ..MirrorConfig::default()
        }
    }

    fn response(body: &str) -> HttpResponse {
        HttpResponse {
            status: 200,
            content_type: None,
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_dedup_urls_keeps_first_occurrence() {
        let temp_dir = tempdir().unwrap();
        let mirror =
            WebsiteMirror::with_client(config_in(temp_dir.path()), MockHttpClient::new()).unwrap();
        let parse = |s: &str| Url::parse(s).unwrap();

        let urls = vec![
            parse("https://a.com/"),
            parse("https://b.com/x"),
            parse("https://a.com/"),
            parse("https://b.com/x#details"),
            parse("https://b.com/x/"),
            parse("https://b.com/x?y"),
            parse("https://b.com/x_y"),
        ];
        let deduped = mirror.dedup_urls(&urls);

        assert_eq!(
            deduped,
            vec![
                parse("https://a.com/"),
                parse("https://b.com/x"),
                parse("https://b.com/x/"),
                parse("https://b.com/x?y"),
                parse("https://b.com/x_y"),
            ]
        );
    }

    #[tokio::test]
    async fn test_mirror_page_records_pre_rewrite_counts() {
        let temp_dir = tempdir().unwrap();
        let mut client = MockHttpClient::new();
        client.expect_get().returning(|url| match url.path() {
            "/" => Ok(response(
                r#"<html><body><img src="/a.png"><a href="/next">next</a></body></html>"#,
            )),
            _ => Ok(response("image")),
        });

        let mirror = WebsiteMirror::with_client(config_in(temp_dir.path()), client).unwrap();
        let url = Url::parse("https://example.com/").unwrap();

        let report = mirror.mirror_page(&url).await.unwrap();

        assert_eq!(report.stats, PageStats { num_links: 1, num_images: 1 });
        assert_eq!(report.assets.downloaded, 1);
        assert_eq!(report.html_path, mirror.html_path(&url));
        assert!(matches!(report.ledger, UpsertOutcome::Inserted(_)));

        let saved = std::fs::read_to_string(&report.html_path).unwrap();
        assert!(saved.contains(r#"src="assets/a.png""#));
        assert!(saved.contains(r#"href="/next""#));

        let record = mirror.lookup(&url).await.unwrap().unwrap();
        assert_eq!((record.num_images, record.num_links), (1, 1));
    }

    #[tokio::test]
    async fn test_mirror_all_fail_fast_stops() {
        let temp_dir = tempdir().unwrap();
        let mut client = MockHttpClient::new();
        client
            .expect_get()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("timed out")));

        let config = MirrorConfig {
            fail_fast: true,
            ..config_in(temp_dir.path())
        };
        let mirror = WebsiteMirror::with_client(config, client).unwrap();
        let urls = vec![
            Url::parse("https://down.example/").unwrap(),
            Url::parse("https://up.example/").unwrap(),
        ];

        let summary = mirror.mirror_all(&urls).await.unwrap();

        assert!(!summary.is_success());
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.not_attempted, vec![urls[1].clone()]);
        assert!(!temp_dir.path().join("metadata.csv").exists());
    }
}
