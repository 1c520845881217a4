//! Destinations for resolved pages and edges.
//!
//! The resolver only talks to [`GraphSink`]. [`CsvSink`] writes neo4j-admin
//! import files; the Bolt adapter lives in [`crate::neo4j`].

use crate::error::SinkError;
use crate::models::{Edge, PageRecord};
use std::fs::{self, File};
use std::future::Future;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;

pub const PAGE_LABEL: &str = "Page";
pub const REDIRECT_TYPE: &str = "REDIRECTS_TO";
pub const LINK_TYPE: &str = "LINKS_TO";

/// Buffer size for CSV writers
const CSV_BUFFER_SIZE: usize = 128 * 1024;

/// Receives batches of resolved records.
///
/// Batches are written from spawned tasks, so implementations must be
/// shareable across tasks and return `Send` futures. Inserting a key that is
/// already present must not fail the batch.
pub trait GraphSink: Send + Sync + 'static {
    fn insert_pages(&self, batch: &[PageRecord]) -> impl Future<Output = Result<(), SinkError>> + Send;

    fn insert_redirects(&self, batch: &[Edge]) -> impl Future<Output = Result<(), SinkError>> + Send;

    fn insert_links(&self, batch: &[Edge]) -> impl Future<Output = Result<(), SinkError>> + Send;

    /// Called once after the last phase.
    fn flush(&self) -> impl Future<Output = Result<(), SinkError>> + Send {
        async { Ok(()) }
    }
}

type CsvFile = csv::Writer<BufWriter<File>>;

/// Writes `pages.csv`, `redirects.csv` and `links.csv` in neo4j-admin import format.
pub struct CsvSink {
    dir: PathBuf,
    pages: Mutex<CsvFile>,
    redirects: Mutex<CsvFile>,
    links: Mutex<CsvFile>,
}

fn create_writer(path: &Path, header: &[&str]) -> Result<CsvFile, SinkError> {
    let file = File::create(path)?;
    let mut writer = csv::Writer::from_writer(BufWriter::with_capacity(CSV_BUFFER_SIZE, file));
    writer.write_record(header)?;
    Ok(writer)
}

fn lock(writer: &Mutex<CsvFile>) -> Result<std::sync::MutexGuard<'_, CsvFile>, SinkError> {
    writer
        .lock()
        .map_err(|_| SinkError::Other("CSV writer lock poisoned".to_string()))
}

impl CsvSink {
    pub fn create(dir: &Path) -> Result<Self, SinkError> {
        fs::create_dir_all(dir)?;
        let edge_header = [":START_ID", ":END_ID", ":TYPE"];
        let sink = Self {
            dir: dir.to_path_buf(),
            pages: Mutex::new(create_writer(
                &dir.join("pages.csv"),
                &["id:ID", "title", "is_redirect:boolean", ":LABEL"],
            )?),
            redirects: Mutex::new(create_writer(&dir.join("redirects.csv"), &edge_header)?),
            links: Mutex::new(create_writer(&dir.join("links.csv"), &edge_header)?),
        };
        info!(dir = %dir.display(), "Writing CSV output");
        Ok(sink)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_edges(writer: &Mutex<CsvFile>, batch: &[Edge], rel_type: &str) -> Result<(), SinkError> {
        let mut writer = lock(writer)?;
        let mut from = itoa::Buffer::new();
        let mut to = itoa::Buffer::new();
        for edge in batch {
            writer.write_record([from.format(edge.from), to.format(edge.to), rel_type])?;
        }
        Ok(())
    }
}

impl GraphSink for CsvSink {
    async fn insert_pages(&self, batch: &[PageRecord]) -> Result<(), SinkError> {
        let mut writer = lock(&self.pages)?;
        let mut id = itoa::Buffer::new();
        for page in batch {
            let is_redirect = if page.is_redirect { "true" } else { "false" };
            writer.write_record([id.format(page.id), page.title.as_str(), is_redirect, PAGE_LABEL])?;
        }
        Ok(())
    }

    async fn insert_redirects(&self, batch: &[Edge]) -> Result<(), SinkError> {
        Self::write_edges(&self.redirects, batch, REDIRECT_TYPE)
    }

    async fn insert_links(&self, batch: &[Edge]) -> Result<(), SinkError> {
        Self::write_edges(&self.links, batch, LINK_TYPE)
    }

    async fn flush(&self) -> Result<(), SinkError> {
        for writer in [&self.pages, &self.redirects, &self.links] {
            lock(writer)?.flush()?;
        }
        Ok(())
    }
}
