//! wikidb: Wikipedia dump ingestion into a relational store
//!
//! This crate streams a MediaWiki XML dump and loads it into two tables, `bodies`
//! (normalized article text) and `articles` (title to body pointers). Ingestion
//! runs in two passes:
//!
//! 1. **Dispatch** -- Every record is either recognised as a redirect (kept in
//!    memory as an alias) or filtered and written as a body plus article row.
//!    Runs sequentially or on a fixed pool of isolated workers.
//! 2. **Redirect resolution** -- Once every canonical article is known, each alias
//!    is followed through its redirect chain and stored as an extra article row
//!    pointing at the canonical body.
//!
//! # Architecture
//!
//! - **Streaming XML parsing** -- The dump is never loaded into memory
//! - **Worker isolation** -- Each worker owns its filter and database connection;
//!   only per-record outcomes travel back to the coordinating thread
//! - **Resilient writes** -- Transient connection loss is retried with a fixed
//!   backoff; rejected rows are logged and skipped
//! - **Bounded resolution** -- Redirect chains are followed for a fixed number of
//!   hops, so cycles terminate
//!
//! # Key Modules
//!
//! - [`parser`] -- Streaming XML parser with BZ2 decompression
//! - [`extract`] -- Namespace selection and [`models::RawRecord`] streaming
//! - [`markup`] -- Wiki markup and HTML entity removal
//! - [`filter`] -- Body normalization and character range filtering
//! - [`store`] -- Retrying store over a pluggable connection
//! - [`sqlite`] -- SQLite backend
//! - [`pipeline`] -- Per-record processing, dispatch and the `ingest` entry point
//! - [`index`] -- Title-to-body mapping with redirect resolution
//! - [`redirects`] -- Second pass writing resolved aliases
//! - [`stats`] -- Atomic counters for a run
//! - [`config`] -- Defaults and limits
//!
//! # Example Usage
//!
//! ```bash
//! # Reset the schema and load a dump with 8 workers
//! wikidb -v load --src enwiki-latest-pages-articles.xml.bz2 --db wiki.db --workers 8 -y
//!
//! # Keep only Latin-1 and general punctuation
//! wikidb load --src dump.xml.bz2 --db wiki.db --valid-unichrs 0x20,0xff --valid-unichrs 0x2000,0x206f
//! ```

pub mod config;
pub mod extract;
pub mod filter;
pub mod index;
pub mod markup;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod redirects;
pub mod sqlite;
pub mod stats;
pub mod store;
