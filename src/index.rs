use crate::config::REDIRECT_MAX_DEPTH;
use crate::models::RecordOutcome;
use rustc_hash::FxHashMap;
use tracing::debug;

/// Pending alias discovered in pass one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectEdge {
    pub target: String,
    pub source_id: i64,
}

/// Canonical titles and redirect edges accumulated during pass one.
///
/// Only the coordinating thread mutates the index, one merged outcome at a time.
#[derive(Debug, Default)]
pub struct WikiIndex {
    title_to_body: FxHashMap<String, i64>,
    redirects: FxHashMap<String, RedirectEdge>,
    skipped: u64,
}

impl WikiIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(
        articles: impl IntoIterator<Item = (String, i64)>,
        redirects: impl IntoIterator<Item = (String, RedirectEdge)>,
    ) -> Self {
        Self {
            title_to_body: articles.into_iter().collect(),
            redirects: redirects.into_iter().collect(),
            skipped: 0,
        }
    }

    pub fn record(&mut self, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Direct { title, body_id } => {
                self.title_to_body.insert(title, body_id);
            }
            RecordOutcome::Alias {
                title,
                target,
                source_id,
            } => {
                self.redirects
                    .insert(title, RedirectEdge { target, source_id });
            }
            RecordOutcome::Skipped => self.skipped += 1,
        }
    }

    pub fn body_id(&self, title: &str) -> Option<i64> {
        self.title_to_body.get(title).copied()
    }

    pub fn redirects(&self) -> impl Iterator<Item = (&str, &RedirectEdge)> {
        self.redirects.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// (canonical titles, redirects, skipped records)
    pub fn stats(&self) -> (usize, usize, u64) {
        (self.title_to_body.len(), self.redirects.len(), self.skipped)
    }

    /// Follows redirect edges from `title` to a canonical body id.
    ///
    /// Missing targets, cycles and chains longer than [`REDIRECT_MAX_DEPTH`] hops
    /// resolve to `None`.
    pub fn resolve(&self, title: &str) -> Option<i64> {
        let mut current = title;
        let mut depth = 0;

        while depth <= REDIRECT_MAX_DEPTH {
            if let Some(id) = self.title_to_body.get(current) {
                return Some(*id);
            }
            if let Some(edge) = self.redirects.get(current) {
                debug!(from = current, to = %edge.target, "Following redirect");
                current = &edge.target;
                depth += 1;
            } else {
                return None;
            }
        }
        debug!(title = title, "Redirect chain too deep");
        None
    }
}
