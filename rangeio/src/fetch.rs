use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub use reqwest::{Client, IntoUrl};

use crate::cancel::Cancel;
use crate::request::RequestTemplate;
use crate::schedule::{Plan, Scheduler};
use crate::{pipe, size, Error, RemoteFile};

/// Default number of concurrent range fetches.
pub const DEFAULT_CONCURRENCY: usize = 5;
/// Default chunk size, 5 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1_024 * 1_024;

/// Fetch options and entry point.
///
/// # Example
/// ```no_run
/// # tokio_test::block_on(async {
/// use rangeio::Fetcher;
/// use tokio::io::AsyncReadExt;
///
/// let fetcher = Fetcher::new().with_concurrency(8).with_chunk_size(1_024 * 1_024);
/// let mut file = fetcher.get("https://example.com/archive.tar").await?;
///
/// let mut data = vec![];
/// file.read_to_end(&mut data).await?;
/// # Ok::<_, Box<dyn std::error::Error>>(())
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    headers: HeaderMap,
    concurrency: usize,
    chunk_size: u64,
    timeout: Option<Duration>,
}

impl Default for Fetcher {
    fn default() -> Self {
        Self {
            client: Client::default(),
            headers: HeaderMap::new(),
            concurrency: DEFAULT_CONCURRENCY,
            chunk_size: DEFAULT_CHUNK_SIZE,
            timeout: None,
        }
    }
}

impl Fetcher {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn with_client(self, client: Client) -> Self {
        Self { client, ..self }
    }

    /// Add a header sent with the size probe and every range request.
    pub fn with_header(mut self, key: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(key, value);
        self
    }

    /// Limit the number of concurrent range fetches, at least 1.
    #[inline]
    pub fn with_concurrency(self, concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            ..self
        }
    }

    /// Set the chunk size, a zero size falls back to [`DEFAULT_CHUNK_SIZE`].
    #[inline]
    pub fn with_chunk_size(self, chunk_size: u64) -> Self {
        Self {
            chunk_size: if chunk_size == 0 { DEFAULT_CHUNK_SIZE } else { chunk_size },
            ..self
        }
    }

    /// Bound the whole fetch operation, from the size probe to the last write, by a deadline.
    #[inline]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..self
        }
    }

    #[inline]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    #[inline]
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Fetch `url` concurrently in chunks.
    ///
    /// See [`Fetcher::get_with_cancel()`].
    pub async fn get(&self, url: impl IntoUrl) -> Result<RemoteFile, Error> {
        self.get_with_cancel(url, CancellationToken::new()).await
    }

    /// Fetch `url` concurrently in chunks until done or `token` is canceled.
    ///
    /// The total length is probed first, any failure at this stage is returned right away. Chunks are then fetched in the
    /// background and the returned [`RemoteFile`] yields their bytes in order.
    pub async fn get_with_cancel(&self, url: impl IntoUrl, token: CancellationToken) -> Result<RemoteFile, Error> {
        let url = url.into_url()?;

        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);
        let cancel = Cancel::new(token.child_token(), deadline);

        let request = RequestTemplate::new(self.client.clone(), url.clone(), self.headers.clone());

        let size = tokio::select! {
            biased;
            err = cancel.wait() => return Err(err),
            size = size::resolve(&request) => size?,
        };

        tracing::debug!("Fetching `{url}` with length: {size}");

        let (writer, reader) = pipe::pipe();
        let guard = cancel.drop_guard();

        Scheduler::new(request, Plan::new(size, self.chunk_size), self.concurrency, writer, cancel).spawn();

        Ok(RemoteFile::new(url, size, reader, guard))
    }
}
