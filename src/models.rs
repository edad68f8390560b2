/// A `<page>` element as read from the dump.
#[derive(Debug, Clone)]
pub struct WikiPage {
    pub id: u32,
    pub title: String,
    pub ns: Option<i32>,
    pub text: String,
}

/// A record handed from the extractor to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub title: String,
    pub body: String,
    pub source_id: i64,
}

/// Result of processing a single record in pass one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Body and article rows written; `body_id` is the generated body id.
    Direct { title: String, body_id: i64 },
    /// Redirect awaiting resolution in pass two.
    Alias {
        title: String,
        target: String,
        source_id: i64,
    },
    /// The body write failed and the failure was suppressed.
    Skipped,
}
