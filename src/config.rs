use crate::models::TableKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Maximum number of redirect hops followed before a chain is dropped
pub const REDIRECT_MAX_DEPTH: u32 = 10;

/// Records per sink batch
pub const DEFAULT_BATCH_SIZE: usize = 32_768;

/// Progress report interval (every N accepted records)
pub const PROGRESS_INTERVAL: u64 = 65_536;

/// Namespace id of main-content articles
pub const MAIN_NAMESPACE: i32 = 0;

pub const DEFAULT_LANG: &str = "en";

pub const DEFAULT_DUMP_BASE_URL: &str = "https://dumps.wikimedia.org";

/// Read size for local dump files
pub const READ_CHUNK_SIZE: usize = 64 * 1024;

pub const TRANSPORT_MAX_RETRIES: u32 = 8;
pub const TRANSPORT_INITIAL_BACKOFF_MS: u64 = 500;
pub const TRANSPORT_MAX_BACKOFF_MS: u64 = 30_000;
pub const HTTP_CONNECT_TIMEOUT_SECS: u64 = 30;

pub const SINK_MAX_RETRIES: u32 = 3;
pub const SINK_INITIAL_BACKOFF_MS: u64 = 250;
pub const SINK_MAX_BACKOFF_MS: u64 = 10_000;

pub const DEFAULT_BOLT_URI: &str = "bolt://localhost:7687";
pub const SINK_CONNECT_RETRIES: u32 = 30;
pub const SINK_CONNECT_DELAY_SECS: u64 = 2;

/// Bounded exponential backoff schedule shared by the transport and sink retry loops.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn transport() -> Self {
        Self {
            max_retries: TRANSPORT_MAX_RETRIES,
            initial_backoff: Duration::from_millis(TRANSPORT_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(TRANSPORT_MAX_BACKOFF_MS),
            multiplier: 2.0,
        }
    }

    pub fn sink() -> Self {
        Self {
            max_retries: SINK_MAX_RETRIES,
            initial_backoff: Duration::from_millis(SINK_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(SINK_MAX_BACKOFF_MS),
            multiplier: 2.0,
        }
    }

    /// Delay before retry number `attempt` (1-based), capped at `max_backoff`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32) as i32;
        let millis = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exp);
        Duration::from_millis(millis.round() as u64).min(self.max_backoff)
    }
}

/// Where the per-table dump files come from.
#[derive(Debug, Clone, PartialEq)]
pub enum DumpLocation {
    Remote { base_url: String },
    Local { dir: PathBuf },
    /// Remote dumps kept under `dir/<lang>/`, downloaded on first use
    Cached { base_url: String, dir: PathBuf },
}

impl Default for DumpLocation {
    fn default() -> Self {
        DumpLocation::Remote {
            base_url: DEFAULT_DUMP_BASE_URL.to_string(),
        }
    }
}

pub fn dump_file_name(lang: &str, kind: TableKind) -> String {
    format!("{lang}wiki-latest-{}.sql.gz", kind.dump_name())
}

/// Path of one table's dump inside a download cache.
pub fn cache_path(dir: &Path, lang: &str, kind: TableKind) -> PathBuf {
    dir.join(lang).join(dump_file_name(lang, kind))
}

pub fn dump_url(base_url: &str, lang: &str, kind: TableKind) -> String {
    format!(
        "{}/{lang}wiki/latest/{}",
        base_url.trim_end_matches('/'),
        dump_file_name(lang, kind)
    )
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub lang: String,
    pub location: DumpLocation,
    pub batch_size: usize,
    pub namespace: i32,
    /// Link targets live in a separate `linktarget` table (current dump layout)
    pub link_targets: bool,
    pub max_redirect_depth: u32,
    pub progress_interval: u64,
    pub transport_retry: RetryPolicy,
    pub sink_retry: RetryPolicy,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            lang: DEFAULT_LANG.to_string(),
            location: DumpLocation::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            namespace: MAIN_NAMESPACE,
            link_targets: true,
            max_redirect_depth: REDIRECT_MAX_DEPTH,
            progress_interval: PROGRESS_INTERVAL,
            transport_retry: RetryPolicy::transport(),
            sink_retry: RetryPolicy::sink(),
        }
    }
}

impl IngestConfig {
    /// Human-readable location of one table's dump (URL or file path).
    pub fn describe(&self, kind: TableKind) -> String {
        match &self.location {
            DumpLocation::Remote { base_url } => dump_url(base_url, &self.lang, kind),
            DumpLocation::Local { dir } => dir
                .join(dump_file_name(&self.lang, kind))
                .to_string_lossy()
                .to_string(),
            DumpLocation::Cached { base_url, dir } => format!(
                "{} (cached at {})",
                dump_url(base_url, &self.lang, kind),
                cache_path(dir, &self.lang, kind).display()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_url_follows_wikimedia_layout() {
        assert_eq!(
            dump_url("https://dumps.wikimedia.org", "fr", TableKind::PageLinks),
            "https://dumps.wikimedia.org/frwiki/latest/frwiki-latest-pagelinks.sql.gz"
        );
    }

    #[test]
    fn dump_url_trims_trailing_slash() {
        assert_eq!(
            dump_url("http://mirror/", "en", TableKind::Page),
            "http://mirror/enwiki/latest/enwiki-latest-page.sql.gz"
        );
    }

    #[test]
    fn describe_local_location() {
        let config = IngestConfig {
            lang: "de".to_string(),
            location: DumpLocation::Local {
                dir: PathBuf::from("/data/dumps"),
            },
            ..IngestConfig::default()
        };
        assert_eq!(
            config.describe(TableKind::Redirect),
            "/data/dumps/dewiki-latest-redirect.sql.gz"
        );
    }

    #[test]
    fn cache_path_is_grouped_by_language() {
        assert_eq!(
            cache_path(Path::new("cache"), "fr", TableKind::LinkTarget),
            PathBuf::from("cache/fr/frwiki-latest-linktarget.sql.gz")
        );
        let config = IngestConfig {
            lang: "fr".to_string(),
            location: DumpLocation::Cached {
                base_url: "http://mirror".to_string(),
                dir: PathBuf::from("cache"),
            },
            ..IngestConfig::default()
        };
        assert_eq!(
            config.describe(TableKind::Page),
            "http://mirror/frwiki/latest/frwiki-latest-page.sql.gz (cached at cache/fr/frwiki-latest-page.sql.gz)"
        );
    }

    #[test]
    fn retry_delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            multiplier: 2.0,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for(30), Duration::from_millis(350));
    }

    #[test]
    fn defaults_match_constants() {
        let config = IngestConfig::default();
        assert_eq!(config.max_redirect_depth, REDIRECT_MAX_DEPTH);
        assert_eq!(config.namespace, MAIN_NAMESPACE);
        assert!(config.link_targets);
    }
}
