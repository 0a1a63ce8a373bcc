use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path};
use tracing::{debug, warn};
use url::Url;

use crate::downloader::HttpClient;
use crate::file_manager::{FileManager, PAGE_FILE_NAME};
use crate::html_parser::{asset_file_name, resolve_reference, url_digest, HtmlDocument};
use crate::references::ReferenceMap;

/// What a localization pass did to one page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalizeReport {
    /// Distinct asset URLs fetched and written to disk.
    pub downloaded: usize,
    /// Attribute values replaced with a local path.
    pub rewritten: usize,
    /// References left untouched (empty, unresolvable, or not HTTP).
    pub skipped: usize,
}

/// Downloads the assets a page references and points the page at the local copies.
pub struct AssetLocalizer<'a, C: ?Sized> {
    client: &'a C,
    references: &'a ReferenceMap,
}

impl<'a, C> AssetLocalizer<'a, C>
where
    C: HttpClient + ?Sized,
{
    pub fn new(client: &'a C, references: &'a ReferenceMap) -> Self {
        Self { client, references }
    }

    /// Localizes every reference in `document`.
    ///
    /// Assets land in `page_dir/asset_dir` and attributes are rewritten to the
    /// relative `asset_dir/<file>`. A failed download stops the pass; files
    /// already written and attributes already rewritten are kept.
    pub async fn localize(
        &self,
        document: &mut HtmlDocument,
        base_url: &Url,
        page_dir: &Path,
        asset_dir: &str,
    ) -> Result<LocalizeReport> {
        let asset_dir = validate_asset_dir(asset_dir)?;
        let target_dir = page_dir.join(asset_dir);
        fs::create_dir_all(&target_dir)
            .with_context(|| format!("Failed to create asset directory: {:?}", target_dir))?;

        let mut report = LocalizeReport::default();
        let mut localized: HashMap<Url, String> = HashMap::new();
        let mut claimed: HashMap<String, Url> = HashMap::new();

        for (tag, attribute) in self.references.iter() {
            for element in document.find_all(tag) {
                let Some(value) = element.attr(attribute) else {
                    continue;
                };

                if value.trim().is_empty() {
                    report.skipped += 1;
                    continue;
                }

                let mut resolved = match resolve_reference(base_url, &value) {
                    Ok(url) => url,
                    Err(e) => {
                        warn!(tag, attribute, value = %value, "skipping reference: {:#}", e);
                        report.skipped += 1;
                        continue;
                    }
                };
                resolved.set_fragment(None);

                if !matches!(resolved.scheme(), "http" | "https") {
                    debug!(tag, attribute, url = %resolved, "leaving non-HTTP reference in place");
                    report.skipped += 1;
                    continue;
                }

                let local_reference = match localized.get(&resolved).cloned() {
                    Some(existing) => existing,
                    None => {
                        let file_name = self
                            .download_asset(&resolved, &target_dir, &mut claimed)
                            .await?;
                        report.downloaded += 1;

                        let local_reference = format!("{}/{}", asset_dir, file_name);
                        localized.insert(resolved.clone(), local_reference.clone());
                        local_reference
                    }
                };

                element.set_attr(attribute, &local_reference);
                report.rewritten += 1;
            }
        }

        Ok(report)
    }

    async fn download_asset(
        &self,
        url: &Url,
        target_dir: &Path,
        claimed: &mut HashMap<String, Url>,
    ) -> Result<String> {
        let response = self
            .client
            .get(url)
            .await
            .with_context(|| format!("Failed to download asset {}", url))?;

        if !response.is_success() {
            warn!(%url, status = response.status, "asset returned a non-success status");
        }

        let file_name = claim_file_name(
            claimed,
            url,
            with_content_extension(asset_file_name(url), response.content_type.as_deref()),
        );

        let path = FileManager::write_asset(target_dir, &file_name, &response.body)
            .with_context(|| format!("Failed to store asset {}", url))?;
        debug!(%url, path = ?path, bytes = response.body.len(), "stored asset");

        Ok(file_name)
    }
}

/// Checks that `asset_dir` is a relative path that stays inside the page
/// directory, and returns it without trailing slashes.
pub fn validate_asset_dir(asset_dir: &str) -> Result<&str> {
    let trimmed = asset_dir.trim_end_matches('/');

    if trimmed.is_empty() {
        bail!("asset directory must not be empty or the root");
    }
    if trimmed.contains('\\') {
        bail!("asset directory '{}' must use '/' as separator", asset_dir);
    }
    if trimmed.starts_with('/') || Path::new(trimmed).is_absolute() {
        bail!("asset directory '{}' must be relative to the page", asset_dir);
    }

    let mut components = Path::new(trimmed).components().peekable();
    if components.peek() == Some(&Component::Normal(PAGE_FILE_NAME.as_ref())) {
        bail!("asset directory '{}' would replace the saved page", asset_dir);
    }
    for component in components {
        if !matches!(component, Component::Normal(_)) {
            bail!(
                "asset directory '{}' must not contain '.', '..' or a root",
                asset_dir
            );
        }
    }

    Ok(trimmed)
}

/// Extension for the content types pages usually reference.
fn preferred_extension(essence: &str) -> Option<&'static str> {
    match essence {
        "image/jpeg" | "image/pjpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/avif" => Some("avif"),
        "image/svg+xml" => Some("svg"),
        "image/x-icon" | "image/vnd.microsoft.icon" => Some("ico"),
        "text/css" => Some("css"),
        "text/html" => Some("html"),
        "text/plain" => Some("txt"),
        "text/javascript" | "application/javascript" | "application/x-javascript" => Some("js"),
        "application/json" => Some("json"),
        "font/woff" => Some("woff"),
        "font/woff2" => Some("woff2"),
        "font/ttf" => Some("ttf"),
        _ => None,
    }
}

/// Appends an extension guessed from the content type when the name has none.
fn with_content_extension(file_name: String, content_type: Option<&str>) -> String {
    if Path::new(&file_name).extension().is_some() {
        return file_name;
    }

    let extension = content_type
        .and_then(|ct| ct.parse::<mime::Mime>().ok())
        .and_then(|mime| {
            preferred_extension(mime.essence_str()).or_else(|| {
                mime_guess::get_mime_extensions_str(mime.essence_str())
                    .and_then(|extensions| extensions.first().copied())
            })
        });

    match extension {
        Some(extension) => format!("{}.{}", file_name, extension),
        None => file_name,
    }
}

/// Reserves `candidate` for `url`, hash-qualifying it when a different URL
/// already holds that name in this pass.
fn claim_file_name(claimed: &mut HashMap<String, Url>, url: &Url, candidate: String) -> String {
    let file_name = match claimed.get(&candidate) {
        Some(owner) if owner != url => qualify_file_name(&candidate, url),
        _ => candidate,
    };

    claimed.insert(file_name.clone(), url.clone());
    file_name
}

fn qualify_file_name(file_name: &str, url: &Url) -> String {
    let tag = url_digest(url, 8);

    match file_name.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() => format!("{}-{}.{}", stem, tag, extension),
        _ => format!("{}-{}", file_name, tag),
    }
}
