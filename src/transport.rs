//! Resumable dump byte sources with streaming gzip decompression.
//!
//! A [`DumpStream`] is pull-based: nothing is read from the network (or disk)
//! and nothing is decompressed until the consumer asks for the next chunk, so a
//! slow consumer simply stops the transfer. Memory use is one raw chunk plus its
//! decompressed expansion regardless of the dump size.
//!
//! Remote sources resume after transient failures with an HTTP `Range` request
//! starting at the number of compressed bytes already consumed. The gzip
//! decoder lives outside the connection, so a reconnect continues the same
//! deflate stream.
//!
//! With a download cache, the compressed bytes of a remote dump are also
//! written to `<file>.part` as they are consumed and renamed into place once
//! the transfer completes; later opens read the cached file instead.

use crate::config::{
    cache_path, dump_url, DumpLocation, IngestConfig, RetryPolicy, HTTP_CONNECT_TIMEOUT_SECS,
    READ_CHUNK_SIZE,
};
use crate::error::TransportError;
use crate::models::TableKind;
use flate2::write::GzDecoder;
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::StatusCode;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

/// A suspension-capable sequence of decompressed dump chunks.
pub trait ChunkSource {
    /// Next decompressed chunk, or `None` once the dump is exhausted.
    fn next_chunk(&mut self) -> impl Future<Output = Result<Option<Vec<u8>>, TransportError>>;

    /// Compressed bytes consumed so far.
    fn bytes_read(&self) -> u64;

    /// Compressed size of the dump, 0 if unknown.
    fn total_size(&self) -> u64;
}

/// Position of one dump transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpSource {
    pub url: String,
    pub total_size: u64,
    pub bytes_read: u64,
}

impl DumpSource {
    fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            total_size: 0,
            bytes_read: 0,
        }
    }

    fn is_complete(&self) -> bool {
        self.total_size > 0 && self.bytes_read >= self.total_size
    }
}

/// Incremental gzip decoder fed with arbitrarily split input.
pub struct GzChunkDecoder {
    inner: GzDecoder<Vec<u8>>,
}

impl Default for GzChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl GzChunkDecoder {
    pub fn new() -> Self {
        Self {
            inner: GzDecoder::new(Vec::new()),
        }
    }

    /// Decompresses `input`, returning whatever output it completed.
    pub fn decode(&mut self, input: &[u8]) -> Result<Vec<u8>, TransportError> {
        self.inner
            .write_all(input)
            .map_err(TransportError::Decompress)?;
        Ok(std::mem::take(self.inner.get_mut()))
    }

    /// Flushes the tail and verifies the gzip trailer.
    pub fn finish(&mut self) -> Result<Vec<u8>, TransportError> {
        self.inner.try_finish().map_err(TransportError::Decompress)?;
        Ok(std::mem::take(self.inner.get_mut()))
    }
}

pub fn build_client() -> Result<reqwest::Client, TransportError> {
    // No overall timeout: a dump transfer can take hours.
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
        .user_agent(concat!("ariadne/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

/// Extracts the complete length from a `Content-Range: bytes a-b/total` value.
pub fn parse_content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.rsplit_once('/')?;
    total.trim().parse().ok()
}

/// Raw compressed bytes over HTTP, resuming with `Range` after transient faults.
pub struct HttpSource {
    client: reqwest::Client,
    source: DumpSource,
    retry: RetryPolicy,
    response: Option<reqwest::Response>,
    // Prefix to discard when a server ignores the range on resume.
    skip: u64,
    cache: Option<CacheFile>,
}

/// A download in progress, renamed to `dest` once complete.
struct CacheFile {
    writer: BufWriter<tokio::fs::File>,
    part: PathBuf,
    dest: PathBuf,
}

impl CacheFile {
    async fn create(dest: &Path) -> Result<Self, TransportError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut part = dest.as_os_str().to_owned();
        part.push(".part");
        let part = PathBuf::from(part);
        let file = tokio::fs::File::create(&part).await?;
        Ok(Self {
            writer: BufWriter::with_capacity(READ_CHUNK_SIZE, file),
            part,
            dest: dest.to_path_buf(),
        })
    }

    async fn commit(mut self) -> Result<(), TransportError> {
        self.writer.flush().await?;
        self.writer.get_ref().sync_all().await?;
        drop(self.writer);
        tokio::fs::rename(&self.part, &self.dest).await?;
        info!(path = %self.dest.display(), "Cached dump");
        Ok(())
    }
}

impl HttpSource {
    /// Connects and reads the response headers, retrying transient failures.
    pub async fn open(
        client: reqwest::Client,
        url: impl Into<String>,
        retry: RetryPolicy,
    ) -> Result<Self, TransportError> {
        let mut http = Self {
            client,
            source: DumpSource::new(url),
            retry,
            response: None,
            skip: 0,
            cache: None,
        };
        let mut attempts = 0u32;
        loop {
            match http.connect().await {
                Ok(response) => {
                    http.response = response;
                    break;
                }
                Err(e) => http.backoff(e, &mut attempts).await?,
            }
        }
        info!(
            url = %http.source.url,
            total_bytes = http.source.total_size,
            "Opened remote dump"
        );
        Ok(http)
    }

    pub fn source(&self) -> &DumpSource {
        &self.source
    }

    /// Also writes every consumed byte to `dest`, which appears only once the
    /// transfer has completed.
    pub async fn cache_to(mut self, dest: &Path) -> Result<Self, TransportError> {
        self.cache = Some(CacheFile::create(dest).await?);
        Ok(self)
    }

    /// Sends one request for the bytes from the current offset on.
    /// `None` means the server has nothing left to send.
    async fn connect(&mut self) -> Result<Option<reqwest::Response>, TransportError> {
        let offset = self.source.bytes_read;
        debug!(url = %self.source.url, offset, "Requesting dump bytes");

        let response = self
            .client
            .get(&self.source.url)
            .header(RANGE, format!("bytes={offset}-"))
            .send()
            .await?;

        let status = response.status();
        let at_end = self.source.total_size == 0 || offset >= self.source.total_size;
        if status == StatusCode::RANGE_NOT_SATISFIABLE && offset > 0 && at_end {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(TransportError::HttpStatus {
                url: self.source.url.clone(),
                status,
            });
        }

        if self.source.total_size == 0 {
            self.source.total_size = if status == StatusCode::PARTIAL_CONTENT {
                response
                    .headers()
                    .get(CONTENT_RANGE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_content_range_total)
                    .unwrap_or(0)
            } else {
                response.content_length().unwrap_or(0)
            };
        }

        self.skip = if status == StatusCode::PARTIAL_CONTENT {
            0
        } else {
            offset
        };
        if self.skip > 0 {
            warn!(
                url = %self.source.url,
                offset,
                "Server ignored range request, skipping already consumed bytes"
            );
        }
        Ok(Some(response))
    }

    /// Records a failed attempt; sleeps before the next one or gives up.
    async fn backoff(&mut self, error: TransportError, attempts: &mut u32) -> Result<(), TransportError> {
        self.response = None;
        if error.is_fatal() {
            return Err(error);
        }
        *attempts += 1;
        if *attempts > self.retry.max_retries {
            return Err(TransportError::RetriesExhausted {
                url: self.source.url.clone(),
                attempts: *attempts,
                offset: self.source.bytes_read,
                source: Box::new(error),
            });
        }
        let delay = self.retry.delay_for(*attempts);
        warn!(
            url = %self.source.url,
            offset = self.source.bytes_read,
            attempt = *attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Dump transfer interrupted, resuming"
        );
        tokio::time::sleep(delay).await;
        Ok(())
    }

    /// Next raw chunk. The attempt counter resets with every chunk received.
    pub async fn next_raw(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut attempts = 0u32;
        let chunk = loop {
            match self.try_next_raw().await {
                Ok(chunk) => break chunk,
                Err(e) => self.backoff(e, &mut attempts).await?,
            }
        };
        match &chunk {
            Some(data) => {
                if let Some(cache) = self.cache.as_mut() {
                    cache.writer.write_all(data).await?;
                }
            }
            None => {
                if let Some(cache) = self.cache.take() {
                    cache.commit().await?;
                }
            }
        }
        Ok(chunk)
    }

    async fn try_next_raw(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            if self.response.is_none() {
                if self.source.is_complete() {
                    return Ok(None);
                }
                match self.connect().await? {
                    Some(response) => self.response = Some(response),
                    None => return Ok(None),
                }
            }
            let Some(response) = self.response.as_mut() else {
                return Ok(None);
            };

            match response.chunk().await? {
                Some(chunk) => {
                    let mut data = &chunk[..];
                    if self.skip > 0 {
                        let n = self.skip.min(data.len() as u64) as usize;
                        data = &data[n..];
                        self.skip -= n as u64;
                        if data.is_empty() {
                            continue;
                        }
                    }
                    self.source.bytes_read += data.len() as u64;
                    return Ok(Some(data.to_vec()));
                }
                None => {
                    self.response = None;
                    if self.source.total_size > 0 && self.source.bytes_read < self.source.total_size {
                        return Err(TransportError::Truncated {
                            offset: self.source.bytes_read,
                            total: self.source.total_size,
                        });
                    }
                    return Ok(None);
                }
            }
        }
    }
}

/// Raw compressed bytes from a pre-downloaded dump file.
pub struct FileSource {
    file: tokio::fs::File,
    source: DumpSource,
}

impl FileSource {
    pub async fn open(path: &Path) -> Result<Self, TransportError> {
        let file = tokio::fs::File::open(path).await?;
        let mut source = DumpSource::new(path.to_string_lossy());
        source.total_size = file.metadata().await?.len();
        info!(path = %path.display(), total_bytes = source.total_size, "Opened local dump");
        Ok(Self { file, source })
    }

    pub fn source(&self) -> &DumpSource {
        &self.source
    }

    pub async fn next_raw(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        let n = self.file.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        self.source.bytes_read += n as u64;
        Ok(Some(buf))
    }
}

enum RawSource {
    Http(HttpSource),
    File(FileSource),
}

impl RawSource {
    async fn next_raw(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        match self {
            RawSource::Http(s) => s.next_raw().await,
            RawSource::File(s) => s.next_raw().await,
        }
    }

    fn source(&self) -> &DumpSource {
        match self {
            RawSource::Http(s) => s.source(),
            RawSource::File(s) => s.source(),
        }
    }
}

/// Decompressed chunks of one table dump.
pub struct DumpStream {
    raw: RawSource,
    decoder: GzChunkDecoder,
    done: bool,
}

impl DumpStream {
    pub fn from_http(source: HttpSource) -> Self {
        Self::new(RawSource::Http(source))
    }

    pub fn from_file(source: FileSource) -> Self {
        Self::new(RawSource::File(source))
    }

    fn new(raw: RawSource) -> Self {
        Self {
            raw,
            decoder: GzChunkDecoder::new(),
            done: false,
        }
    }

    /// Opens the dump of `kind` at the configured location.
    pub async fn open(
        config: &IngestConfig,
        kind: TableKind,
        client: &reqwest::Client,
    ) -> Result<Self, TransportError> {
        match &config.location {
            DumpLocation::Remote { base_url } => {
                let url = dump_url(base_url, &config.lang, kind);
                let http = HttpSource::open(client.clone(), url, config.transport_retry).await?;
                Ok(Self::from_http(http))
            }
            DumpLocation::Local { .. } => {
                let path = config.describe(kind);
                let file = FileSource::open(Path::new(&path)).await?;
                Ok(Self::from_file(file))
            }
            DumpLocation::Cached { base_url, dir } => {
                let path = cache_path(dir, &config.lang, kind);
                if tokio::fs::try_exists(&path).await? {
                    return Ok(Self::from_file(FileSource::open(&path).await?));
                }
                let url = dump_url(base_url, &config.lang, kind);
                let http = HttpSource::open(client.clone(), url, config.transport_retry)
                    .await?
                    .cache_to(&path)
                    .await?;
                Ok(Self::from_http(http))
            }
        }
    }

    pub fn source(&self) -> &DumpSource {
        self.raw.source()
    }
}

impl ChunkSource for DumpStream {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        while !self.done {
            match self.raw.next_raw().await? {
                Some(raw) => {
                    let decoded = self.decoder.decode(&raw)?;
                    if !decoded.is_empty() {
                        return Ok(Some(decoded));
                    }
                }
                None => {
                    self.done = true;
                    let tail = self.decoder.finish()?;
                    if !tail.is_empty() {
                        return Ok(Some(tail));
                    }
                }
            }
        }
        Ok(None)
    }

    fn bytes_read(&self) -> u64 {
        self.raw.source().bytes_read
    }

    fn total_size(&self) -> u64 {
        self.raw.source().total_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::NamedTempFile;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn sample_text() -> Vec<u8> {
        (0..2000)
            .map(|i| format!("({i},0,'Title_{i}',0),"))
            .collect::<String>()
            .into_bytes()
    }

    #[test]
    fn decoder_handles_arbitrary_splits() {
        let text = sample_text();
        let compressed = gzip(&text);

        for split in [1usize, 7, 64, 1000] {
            let mut decoder = GzChunkDecoder::new();
            let mut out = Vec::new();
            for piece in compressed.chunks(split) {
                out.extend(decoder.decode(piece).unwrap());
            }
            out.extend(decoder.finish().unwrap());
            assert_eq!(out, text, "split size {split}");
        }
    }

    #[test]
    fn decoder_rejects_garbage() {
        let mut decoder = GzChunkDecoder::new();
        let result = decoder
            .decode(b"definitely not gzip data at all")
            .and_then(|_| decoder.finish());
        assert!(matches!(result, Err(TransportError::Decompress(_))));
    }

    #[test]
    fn decoder_rejects_truncated_stream() {
        let compressed = gzip(&sample_text());
        let mut decoder = GzChunkDecoder::new();
        let result = decoder
            .decode(&compressed[..compressed.len() / 2])
            .and_then(|_| decoder.finish());
        assert!(result.is_err());
    }

    #[test]
    fn content_range_total() {
        assert_eq!(parse_content_range_total("bytes 100-999/1000"), Some(1000));
        assert_eq!(parse_content_range_total("bytes 0-0/1"), Some(1));
        assert_eq!(parse_content_range_total("bytes */1000"), Some(1000));
        assert_eq!(parse_content_range_total("bytes 0-10/*"), None);
        assert_eq!(parse_content_range_total("garbage"), None);
    }

    #[tokio::test]
    async fn file_stream_decodes_whole_dump() {
        let text = sample_text();
        let compressed = gzip(&text);
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(&compressed).unwrap();
        tmp.flush().unwrap();

        let file = FileSource::open(tmp.path()).await.unwrap();
        let mut stream = DumpStream::from_file(file);
        assert_eq!(stream.total_size(), compressed.len() as u64);

        let mut out = Vec::new();
        let mut last_read = 0;
        while let Some(chunk) = stream.next_chunk().await.unwrap() {
            assert!(stream.bytes_read() >= last_read);
            last_read = stream.bytes_read();
            out.extend(chunk);
        }
        assert_eq!(out, text);
        assert_eq!(stream.bytes_read(), compressed.len() as u64);
        assert!(stream.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_file_is_fatal() {
        let result = FileSource::open(Path::new("/nonexistent/enwiki-latest-page.sql.gz")).await;
        match result {
            Err(e) => assert!(e.is_fatal()),
            Ok(_) => panic!("expected an error"),
        }
    }
}
