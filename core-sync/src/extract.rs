//! HTML extraction for page content
//!
//! Produces the plain text stored next to the raw HTML and the ordered list
//! of `<img>` references the orchestrator downloads.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use scraper::{Html, Node, Selector};
use tracing::warn;

/// One `<img>` element in document order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub src: Option<String>,
    pub alt: Option<String>,
    pub fullres_src: Option<String>,
}

impl ImageRef {
    /// URL to download, `src` first
    pub fn download_url(&self) -> Option<&str> {
        self.src
            .as_deref()
            .or(self.fullres_src.as_deref())
            .filter(|url| !url.trim().is_empty())
    }
}

/// Plain text of a page with `script`/`style` removed and whitespace collapsed
pub fn extract_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut words: Vec<&str> = Vec::new();

    for node in document.tree.nodes() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            matches!(ancestor.value(), Node::Element(element)
                if matches!(element.name(), "script" | "style" | "noscript"))
        });
        if hidden {
            continue;
        }
        words.extend(text.split_whitespace());
    }

    words.join(" ")
}

/// Every `<img>` in document order
pub fn extract_images(html: &str) -> Vec<ImageRef> {
    let selector = match Selector::parse("img") {
        Ok(selector) => selector,
        Err(e) => {
            warn!(error = ?e, "Invalid image selector");
            return Vec::new();
        }
    };

    let document = Html::parse_document(html);
    document
        .select(&selector)
        .map(|img| {
            let attr = |name: &str| {
                img.value()
                    .attr(name)
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(str::to_string)
            };
            ImageRef {
                src: attr("src"),
                alt: attr("alt"),
                fullres_src: attr("data-fullres-src"),
            }
        })
        .collect()
}

/// Decode an inline `data:image/...;base64,` URL
///
/// Returns `None` for other URLs and for malformed payloads.
pub fn decode_data_url(url: &str) -> Option<Vec<u8>> {
    let rest = url.strip_prefix("data:image")?;
    let (_, payload) = rest.split_once("base64,")?;
    let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    match STANDARD.decode(cleaned) {
        Ok(bytes) if !bytes.is_empty() => Some(bytes),
        Ok(_) => None,
        Err(e) => {
            warn!(error = %e, "Malformed inline image");
            None
        }
    }
}

pub fn is_data_url(url: &str) -> bool {
    url.starts_with("data:")
}
