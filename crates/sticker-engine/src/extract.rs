use std::fmt;

use crate::error::{PipelineError, Result};

const EMPTY_CONTENT_MESSAGE: &str = "API returned empty content";
const NO_IMAGE_MESSAGE: &str =
    "no image detected in response; the model must return an image link or base64 data";

/// Where the generated image lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageReference {
    Url(String),
    DataUri(String),
}

impl ImageReference {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.to_ascii_lowercase().starts_with("data:") {
            ImageReference::DataUri(trimmed.to_string())
        } else {
            ImageReference::Url(trimmed.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ImageReference::Url(value) | ImageReference::DataUri(value) => value,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ImageReference::Url(_) => "url",
            ImageReference::DataUri(_) => "data_uri",
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered concatenation of every delta seen during one generation call.
#[derive(Debug, Default)]
pub struct ContentAccumulator {
    content: String,
    deltas: usize,
}

impl ContentAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, delta: &str) {
        self.content.push_str(delta);
        self.deltas += 1;
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn delta_count(&self) -> usize {
        self.deltas
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn finish(self) -> Result<ImageReference> {
        extract_image_reference(&self.content)
    }
}

/// Locates the generated image in a fully assembled response.
///
/// Order: first markdown image link, then a body that is itself a URL or
/// image data URI, else failure.
pub fn extract_image_reference(content: &str) -> Result<ImageReference> {
    if content.is_empty() {
        return Err(PipelineError::Extraction(EMPTY_CONTENT_MESSAGE.to_string()));
    }

    if let Some(url) = find_markdown_image_url(content) {
        return Ok(ImageReference::parse(url));
    }

    let trimmed = content.trim();
    if trimmed.starts_with("http") || trimmed.starts_with("data:image") {
        return Ok(ImageReference::parse(trimmed));
    }

    Err(PipelineError::Extraction(NO_IMAGE_MESSAGE.to_string()))
}

/// URL of the first `![alt](url)` whose parts stay on one line.
///
/// Alt text and URL are matched lazily: the alt text ends at the first `](`
/// and the URL at the first `)` after it. An empty URL counts as no match.
fn find_markdown_image_url(content: &str) -> Option<&str> {
    let mut search_from = 0;
    while let Some(offset) = content[search_from..].find("![") {
        let start = search_from + offset;
        if let Some(url) = markdown_link_at(&content[start + 2..]) {
            return if url.is_empty() { None } else { Some(url) };
        }
        search_from = start + 2;
    }
    None
}

fn markdown_link_at(after_bang: &str) -> Option<&str> {
    let line = after_bang
        .split(['\n', '\r', '\u{2028}', '\u{2029}'])
        .next()
        .unwrap_or_default();
    let mut alt_search = 0;
    while let Some(offset) = line[alt_search..].find("](") {
        let url_start = alt_search + offset + 2;
        if let Some(url_len) = line[url_start..].find(')') {
            return Some(&line[url_start..url_start + url_len]);
        }
        alt_search += offset + 1;
    }
    None
}
