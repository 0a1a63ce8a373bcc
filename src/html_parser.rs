use anyhow::{Context, Result};
use html5ever::serialize::{serialize, SerializeOpts};
use html5ever::tendril::{StrTendril, TendrilSink};
use html5ever::{namespace_url, ns, parse_document, Attribute, LocalName, QualName};
use markup5ever_rcdom::{Handle, NodeData, RcDom, SerializableHandle};
use select::document::Document;
use select::predicate::Name;
use sha2::{Digest, Sha256};
use url::Url;

/// Parsed, mutable HTML page.
///
/// The tree is owned by the pipeline run that parsed it. Attribute writes go
/// through the node's interior `RefCell`, but callers that rewrite references
/// take the document by `&mut` so a page is never mutated from two places.
pub struct HtmlDocument {
    dom: RcDom,
}

/// A single element node inside an [`HtmlDocument`].
#[derive(Clone)]
pub struct Element {
    handle: Handle,
}

/// Structural counts taken from the fetched HTML before any rewriting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageStats {
    pub num_links: usize,
    pub num_images: usize,
}

impl HtmlDocument {
    pub fn parse(html: &str) -> Self {
        let dom = parse_document(RcDom::default(), Default::default()).one(html);
        Self { dom }
    }

    /// Every element named `tag`, in document order.
    pub fn find_all(&self, tag: &str) -> Vec<Element> {
        let mut found = Vec::new();
        let mut stack = vec![self.dom.document.clone()];

        while let Some(node) = stack.pop() {
            if let NodeData::Element { ref name, .. } = node.data {
                let local: &str = &name.local;
                if local.eq_ignore_ascii_case(tag) {
                    found.push(Element {
                        handle: node.clone(),
                    });
                }
            }

            for child in node.children.borrow().iter().rev() {
                stack.push(child.clone());
            }
        }

        found
    }

    pub fn to_html(&self) -> Result<String> {
        let mut buffer = Vec::new();
        let document: SerializableHandle = self.dom.document.clone().into();
        serialize(&mut buffer, &document, SerializeOpts::default())
            .context("Failed to serialize HTML document")?;

        String::from_utf8(buffer).context("Serialized HTML is not valid UTF-8")
    }
}

impl Element {
    pub fn tag(&self) -> String {
        match self.handle.data {
            NodeData::Element { ref name, .. } => name.local.to_string(),
            _ => String::new(),
        }
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    pub fn attr(&self, name: &str) -> Option<String> {
        match self.handle.data {
            NodeData::Element { ref attrs, .. } => attrs
                .borrow()
                .iter()
                .find(|attr| attr_matches(attr, name))
                .map(|attr| attr.value.to_string()),
            _ => None,
        }
    }

    /// Sets `name` to `value`, adding the attribute if the element lacks it.
    pub fn set_attr(&self, name: &str, value: &str) {
        if let NodeData::Element { ref attrs, .. } = self.handle.data {
            let mut attrs = attrs.borrow_mut();
            match attrs.iter_mut().find(|attr| attr_matches(attr, name)) {
                Some(attr) => attr.value = StrTendril::from_slice(value),
                None => attrs.push(Attribute {
                    name: QualName::new(None, ns!(), LocalName::from(name)),
                    value: StrTendril::from_slice(value),
                }),
            }
        }
    }
}

fn attr_matches(attr: &Attribute, name: &str) -> bool {
    let local: &str = &attr.name.local;
    local.eq_ignore_ascii_case(name)
}

impl PageStats {
    pub fn from_html(html_content: &str) -> Self {
        let document = Document::from(html_content);

        Self {
            num_links: document.find(Name("a")).count(),
            num_images: document.find(Name("img")).count(),
        }
    }
}

/// Resolves a reference found in a page against the page's URL.
///
/// Absolute references pass through; scheme-relative and path-relative ones
/// are joined onto `base_url`.
pub fn resolve_reference(base_url: &Url, reference: &str) -> Result<Url> {
    base_url
        .join(reference.trim())
        .with_context(|| format!("Failed to resolve {} against {}", reference, base_url))
}

/// Local filename for an asset: the last path segment, made safe for the filesystem.
pub fn asset_file_name(url: &Url) -> String {
    let segment = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or("");

    let name = sanitize_segment(segment);
    if name.trim_matches('.').is_empty() {
        "index".to_string()
    } else {
        name
    }
}

/// First `len` hex characters of the SHA-256 of `url`.
pub fn url_digest(url: &Url, len: usize) -> String {
    let digest = format!("{:x}", Sha256::digest(url.as_str().as_bytes()));
    digest[..len.min(digest.len())].to_string()
}

/// Replaces everything outside `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_segment(segment: &str) -> String {
    segment
        .chars()
        .map(|c| match c {
            c if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' => c,
            _ => '_',
        })
        .collect()
}
