/// Ordered mapping from an element tag to the attribute that carries its resource URL.
///
/// Each tag maps to exactly one attribute. Iteration follows insertion order,
/// which is also the order in which the localizer visits the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceMap {
    entries: Vec<(String, String)>,
}

impl ReferenceMap {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Builder form of [`ReferenceMap::insert`].
    pub fn with(mut self, tag: &str, attribute: &str) -> Self {
        self.insert(tag, attribute);
        self
    }

    /// Maps `tag` to `attribute`. An existing mapping for `tag` is replaced in place.
    pub fn insert(&mut self, tag: &str, attribute: &str) {
        let tag = tag.to_ascii_lowercase();
        let attribute = attribute.to_ascii_lowercase();

        match self.entries.iter_mut().find(|(existing, _)| *existing == tag) {
            Some(entry) => entry.1 = attribute,
            None => self.entries.push((tag, attribute)),
        }
    }

    pub fn attribute_for(&self, tag: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(tag))
            .map(|(_, attribute)| attribute.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(tag, attribute)| (tag.as_str(), attribute.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ReferenceMap {
    fn default() -> Self {
        Self::new()
            .with("img", "src")
            .with("link", "href")
            .with("script", "src")
    }
}
