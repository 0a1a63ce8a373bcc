use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use url::Url;

use crate::html_parser::{sanitize_segment, url_digest, HtmlDocument};

/// File name of the persisted page inside its page directory.
pub const PAGE_FILE_NAME: &str = "index.html";

const ROOT_SLUG: &str = "_root";
const MAX_SLUG_LEN: usize = 120;

#[derive(Clone)]
pub struct FileManager {
    base_dir: PathBuf,
}

impl FileManager {
    pub fn new(base_dir: &Path) -> Result<Self> {
        let base_dir = base_dir.to_path_buf();
        fs::create_dir_all(&base_dir)
            .with_context(|| format!("Failed to create base directory: {:?}", base_dir))?;

        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Directory that holds the saved page and its assets for `url`.
    ///
    /// Layout is `<base>/<host>[_port]/<slug>`. Every page directory sits
    /// directly under its host directory, so no page lives inside another
    /// page's asset directory. The slug is the path segments joined with `_`
    /// (`_root` for `/`) when the URL is an https URL whose host and segments
    /// only use `[A-Za-z0-9.-]`, with no query and no trailing slash. Any
    /// other URL gets a readable slug followed by `~` and a digest of the URL,
    /// which keeps distinct URLs in distinct directories. The fragment is ignored.
    pub fn page_dir(&self, url: &Url) -> PathBuf {
        let host = url.host_str().unwrap_or("unknown-host");
        let mut host_dir = sanitize_segment(host);
        if let Some(port) = url.port() {
            host_dir.push_str(&format!("_{}", port));
        }

        let segments: Vec<&str> = url
            .path_segments()
            .map(|segments| segments.collect())
            .unwrap_or_default();
        let is_root = segments.iter().all(|s| s.is_empty());

        let mut exact = url.scheme() == "https"
            && is_plain(host)
            && url.query().is_none()
            && (is_root || segments.iter().all(|s| is_plain(s)));

        let mut slug = segments
            .iter()
            .filter(|s| !s.is_empty())
            .map(|s| sanitize_segment(s))
            .collect::<Vec<_>>()
            .join("_");
        if let Some(query) = url.query() {
            slug.push('_');
            slug.push_str(&sanitize_segment(query));
        }
        if slug.len() > MAX_SLUG_LEN {
            slug.truncate(MAX_SLUG_LEN);
            exact = false;
        }
        if slug.is_empty() {
            slug = ROOT_SLUG.to_string();
        }

        if !exact {
            let mut key = url.clone();
            key.set_fragment(None);
            slug.push('~');
            slug.push_str(&url_digest(&key, 12));
        }

        self.base_dir.join(host_dir).join(slug)
    }

    /// Serializes `document` to `path`, creating parent directories and
    /// overwriting whatever was there.
    pub fn save_html(document: &HtmlDocument, path: &Path) -> Result<PathBuf> {
        let html = document.to_html()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        fs::write(path, html.as_bytes())
            .with_context(|| format!("Failed to write HTML to file: {:?}", path))?;

        Ok(path.to_path_buf())
    }

    /// Writes an asset body to `dir/file_name`, truncating any existing file.
    pub fn write_asset(dir: &Path, file_name: &str, content: &[u8]) -> Result<PathBuf> {
        let file_path = dir.join(file_name);

        let mut file = fs::File::create(&file_path)
            .with_context(|| format!("Failed to create file: {:?}", file_path))?;
        file.write_all(content)
            .with_context(|| format!("Failed to write to file: {:?}", file_path))?;

        Ok(file_path)
    }
}

/// True when `s` is non-empty and survives [`sanitize_segment`] unchanged
/// without containing the `_` it substitutes.
fn is_plain(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
}

/// Replaces `path` with `content` through a sibling temp file and a rename,
/// so readers see either the old or the new file and never a truncated one.
pub fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn digest_of(url: &str) -> String {
        url_digest(&Url::parse(url).unwrap(), 12)
    }

    #[test]
    fn test_page_dir_layout() {
        let temp_dir = tempdir().unwrap();
        let manager = FileManager::new(temp_dir.path()).unwrap();
        let base = temp_dir.path();

        let test_cases = vec![
            ("https://www.wikipedia.org/", base.join("www.wikipedia.org").join("_root")),
            ("https://ex.com/a/b", base.join("ex.com").join("a_b")),
            ("https://ex.com/a/b#section", base.join("ex.com").join("a_b")),
            (
                "https://ex.com/a/b/",
                base.join("ex.com").join(format!("a_b~{}", digest_of("https://ex.com/a/b/"))),
            ),
            (
                "http://ex.com:8080/x",
                base.join("ex.com_8080").join(format!("x~{}", digest_of("http://ex.com:8080/x"))),
            ),
            (
                "https://ex.com/search?q=rust",
                base.join("ex.com")
                    .join(format!("search_q_rust~{}", digest_of("https://ex.com/search?q=rust"))),
            ),
        ];

        for (input, expected) in test_cases {
            let url = Url::parse(input).unwrap();
            assert_eq!(manager.page_dir(&url), expected, "Failed for input: {}", input);
        }
    }

    #[test]
    fn test_page_dir_keeps_distinct_urls_apart() {
        let temp_dir = tempdir().unwrap();
        let manager = FileManager::new(temp_dir.path()).unwrap();

        let groups = [
            ["https://ex.com/a", "https://ex.com/a/", "https://ex.com/a/index"],
            ["https://ex.com/a?b", "https://ex.com/a_b", "https://ex.com/a/b"],
            ["https://ex.com/", "https://ex.com/_root", "https://ex.com/?"],
            ["https://ex.com/x", "http://ex.com/x", "https://ex.com:8443/x"],
            ["https://ex.com/?q=a%20b", "https://ex.com/?q=a_b", "https://ex.com/?q=a+b"],
        ];

        for group in groups {
            let dirs: Vec<PathBuf> = group
                .iter()
                .map(|u| manager.page_dir(&Url::parse(u).unwrap()))
                .collect();
            for i in 0..dirs.len() {
                for j in (i + 1)..dirs.len() {
                    assert_ne!(dirs[i], dirs[j], "{} and {} share a directory", group[i], group[j]);
                }
            }
        }
    }

    #[test]
    fn test_page_dirs_are_not_nested() {
        let temp_dir = tempdir().unwrap();
        let manager = FileManager::new(temp_dir.path()).unwrap();

        let outer = manager.page_dir(&Url::parse("https://ex.com/a").unwrap());
        let inner = manager.page_dir(&Url::parse("https://ex.com/a/assets").unwrap());

        assert!(!inner.starts_with(&outer));
        assert_eq!(inner.parent(), outer.parent());
    }

    #[test]
    fn test_long_paths_are_truncated_and_qualified() {
        let temp_dir = tempdir().unwrap();
        let manager = FileManager::new(temp_dir.path()).unwrap();
        let long = format!("https://ex.com/{}", "x".repeat(400));

        let dir = manager.page_dir(&Url::parse(&long).unwrap());
        let slug = dir.file_name().unwrap().to_str().unwrap().to_string();

        assert_eq!(slug.len(), MAX_SLUG_LEN + 1 + 12);
        assert!(slug.ends_with(&format!("~{}", digest_of(&long))));
    }

    #[test]
    fn test_save_html_creates_parents() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("deep").join("nested").join(PAGE_FILE_NAME);
        let document = HtmlDocument::parse("<html><body><p>saved</p></body></html>");

        let saved = FileManager::save_html(&document, &path).unwrap();

        assert_eq!(saved, path);
        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("<p>saved</p>"));
    }

    #[test]
    fn test_write_asset_overwrites() {
        let temp_dir = tempdir().unwrap();

        FileManager::write_asset(temp_dir.path(), "logo.png", b"first version").unwrap();
        let path = FileManager::write_asset(temp_dir.path(), "logo.png", b"v2").unwrap();

        assert_eq!(fs::read(path).unwrap(), b"v2");
    }

    #[test]
    fn test_write_atomic_replaces_content() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("ledger.csv");

        write_atomic(&path, b"old\ncontent\n").unwrap();
        write_atomic(&path, b"new\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "new\n");
        let leftovers = fs::read_dir(temp_dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}
