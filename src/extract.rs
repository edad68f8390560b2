use crate::config::ARTICLE_NAMESPACE;
use crate::models::{RawRecord, WikiPage};
use crate::parser::WikiReader;
use anyhow::Result;
use tracing::info;

/// Turns a dump into a lazy, single-pass stream of [`RawRecord`]s.
#[derive(Debug, Clone)]
pub struct Extractor {
    namespaces: Vec<i32>,
}

impl Default for Extractor {
    fn default() -> Self {
        Self {
            namespaces: vec![ARTICLE_NAMESPACE],
        }
    }
}

impl Extractor {
    pub fn new(namespaces: Vec<i32>) -> Self {
        if namespaces.is_empty() {
            Self::default()
        } else {
            Self { namespaces }
        }
    }

    /// Pages without an `<ns>` element are treated as main namespace.
    pub fn accepts(&self, page: &WikiPage) -> bool {
        let ns = page.ns.unwrap_or(ARTICLE_NAMESPACE);
        self.namespaces.contains(&ns)
    }

    /// Read errors are passed through as `Err` items; the stream ends after one.
    pub fn stream(&self, path: &str) -> Result<impl Iterator<Item = Result<RawRecord>>> {
        let reader = WikiReader::new(path)?;
        let this = self.clone();

        info!(path, namespaces = ?self.namespaces, "Streaming records from dump");

        Ok(reader
            .filter(move |page| page.as_ref().map_or(true, |p| this.accepts(p)))
            .map(|page| {
                page.map(|p| RawRecord {
                    title: p.title,
                    body: p.text,
                    source_id: i64::from(p.id),
                })
            }))
    }
}
