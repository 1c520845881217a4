//! Ariadne: streaming Wikipedia SQL dump ingestion into a resolved link graph
//!
//! This crate reads the `page`, `redirect`, `linktarget` and `pagelinks` SQL
//! dumps of one wiki and turns them into a graph whose edges only ever point at
//! canonical (non-redirect) pages:
//!
//! 1. **Page Pass** -- Index every main-namespace title to its page id and
//!    redirect flag, handing page records to the sink
//! 2. **Redirect Pass** -- Emit an edge from every redirect to its terminal page,
//!    deferring chains until the redirect table is complete
//! 3. **Link Target Pass** -- Load the `linktarget` id to title table (current dump layout)
//! 4. **Link Pass** -- Resolve every link through the redirect table, bounded to
//!    a fixed number of hops, and emit edges to terminal pages
//!
//! # Architecture
//!
//! - **Resumable transport** -- Pull-based HTTP `Range` streaming with bounded
//!   retries; the gzip decoder outlives reconnects
//! - **Chunk-agnostic tokenizer** -- A byte state machine that survives any split,
//!   including inside escapes and multi-byte characters
//! - **Schema discovery** -- Columns are located by name from the `CREATE TABLE`
//!   header, so dump column order changes are harmless
//! - **Bounded write pipeline** -- One sink write in flight per pass while the next
//!   batch is parsed; failed batches are retried, then counted
//!
//! # Key Modules
//!
//! - [`transport`] -- HTTP/file byte sources and streaming gzip decoding
//! - [`tokenizer`] -- Schema discovery and tuple extraction
//! - [`tables`] -- Per-table column projections and row parsers
//! - [`index`] -- Page, redirect and link-target indexes with chain resolution
//! - [`resolve`] -- The ingestion passes
//! - [`batch`] -- Batched, ordered sink dispatch with retries
//! - [`sink`] -- The sink trait and the CSV sink
//! - [`neo4j`] -- Bolt sink for Neo4j and Memgraph
//! - [`progress`] -- Progress reporting
//! - [`stats`] -- Atomic counters for accepted and dropped records
//! - [`config`] -- Constants and run configuration
//!
//! # Example Usage
//!
//! ```bash
//! # Stream the English dumps into neo4j-admin CSV files
//! ariadne ingest --lang en -o output/
//!
//! # Write straight into a running Memgraph or Neo4j
//! ariadne ingest --lang fr --sink neo4j --bolt-uri bolt://localhost:7687
//! ariadne ingest --lang fr --sink neo4j --bolt-flavor memgraph
//!
//! # Check which columns a dump declares
//! ariadne schema pagelinks --dump-dir dumps/
//!
//! # Download each dump once and reuse it on later runs
//! ariadne ingest --lang de --cache-dir cache/
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod index;
pub mod models;
pub mod neo4j;
pub mod progress;
pub mod resolve;
pub mod sink;
pub mod stats;
pub mod tables;
pub mod tokenizer;
pub mod transport;
