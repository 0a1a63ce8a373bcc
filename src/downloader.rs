use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::html_parser::{HtmlDocument, PageStats};

/// Response as seen by the pipeline. The body is used whatever the status is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, url: &Url) -> Result<HttpResponse>;
}

#[derive(Clone)]
pub struct ReqwestClient {
    client: Client,
}

impl ReqwestClient {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = ClientBuilder::new()
            .use_rustls_tls()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, url: &Url) -> Result<HttpResponse> {
        debug!(%url, "sending request");
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("Request failed for {}", url))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read response body from {}", url))?
            .to_vec();

        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}

/// A fetched page: the mutable document plus counts taken before any rewriting.
pub struct FetchedPage {
    pub url: Url,
    pub status: u16,
    pub document: HtmlDocument,
    pub stats: PageStats,
}

pub async fn fetch_page<C>(client: &C, url: &Url) -> Result<FetchedPage>
where
    C: HttpClient + ?Sized,
{
    let response = client
        .get(url)
        .await
        .with_context(|| format!("Failed to fetch page {}", url))?;

    if !response.is_success() {
        warn!(%url, status = response.status, "page returned a non-success status");
    }

    let html_content = String::from_utf8_lossy(&response.body);
    let stats = PageStats::from_html(&html_content);
    let document = HtmlDocument::parse(&html_content);

    debug!(
        %url,
        links = stats.num_links,
        images = stats.num_images,
        "parsed page"
    );

    Ok(FetchedPage {
        url: url.clone(),
        status: response.status,
        document,
        stats,
    })
}
