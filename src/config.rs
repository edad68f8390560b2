/// Maximum depth for following redirect chains
pub const REDIRECT_MAX_DEPTH: u32 = 8;

/// Progress update interval (tick every N records)
pub const PROGRESS_INTERVAL: u64 = 1000;

/// Attempts made by the store before a transient failure is surfaced
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Fixed backoff between reconnect attempts
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// SQLite busy handler timeout before a lock conflict is reported
pub const BUSY_TIMEOUT_MS: u64 = 5000;

/// Chunk size in parallel mode is `workers * CHUNK_MULTIPLIER`
pub const CHUNK_MULTIPLIER: usize = 64;

/// Rounds of the inner markup rule set per pass
pub const MARKUP_ROUNDS: usize = 3;

/// Main (article) namespace
pub const ARTICLE_NAMESPACE: i32 = 0;

pub const DEFAULT_INIT_SCRIPT: &str = "sql/init.sql";

pub const BODIES_TABLE: &str = "bodies";
pub const ARTICLES_TABLE: &str = "articles";
