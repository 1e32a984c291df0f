//! A remote HTTP resource read as one ordered byte stream, fetched as concurrent ranged requests.
//!
//! The total length of the resource is probed first, then the resource is split into fixed-size chunks that are fetched in
//! parallel, each with its own `Range` request. The number of concurrent fetches is bounded by a permit pool, and bytes are handed
//! over to the reader strictly in offset order whatever the order fetches complete in.
//!
//! Nothing is buffered beyond the frame being handed over: the reading side and the chunk tasks meet through an unbuffered pipe,
//! so a slow reader holds chunk tasks back, which in turn hold their permits and prevent further fetches from starting.
//!
//! ```text
//!   coordinator ── permit ──> chunk #0 ── fetch ── turn ── write ─┐
//!               ── permit ──> chunk #1 ── fetch ── turn ── write ─┤── pipe ──> RemoteFile::read()
//!               ── permit ──> chunk #2 ── fetch ── turn ── write ─┘
//!               ── turn ────> end-of-stream
//! ```
//!
//! Any failure is fatal to the whole stream: the failing chunk closes the pipe with its error right away, without waiting for
//! earlier chunks to be written. There are no retries.
//!
//! # Example
//! ```no_run
//! # tokio_test::block_on(async {
//! use tokio::io::AsyncReadExt;
//!
//! let mut file = rangeio::get("https://example.com/archive.tar").await?;
//!
//! let mut data = vec![];
//! file.read_to_end(&mut data).await?;
//! # Ok::<_, Box<dyn std::error::Error>>(())
//! # });
//! ```
//!
//! Resources whose length cannot be determined are fetched chunk after chunk until the server answers
//! `416 Range Not Satisfiable`.

mod cancel;
mod error;
mod fetch;
mod order;
mod pipe;
mod remote;
mod request;
mod schedule;
mod size;

pub use error::Error;
pub use fetch::*;
pub use remote::RemoteFile;
pub use size::ResourceSize;

pub use reqwest::header;
pub use tokio_util::sync::CancellationToken;

/// Fetch `url` concurrently in chunks with default options.
///
/// See [`Fetcher::get()`].
#[inline]
pub async fn get(url: impl IntoUrl) -> Result<RemoteFile, Error> {
    Fetcher::default().get(url).await
}

/// Fetch `url` concurrently in chunks with default options, until done or `token` is canceled.
///
/// See [`Fetcher::get_with_cancel()`].
#[inline]
pub async fn get_with_cancel(url: impl IntoUrl, token: CancellationToken) -> Result<RemoteFile, Error> {
    Fetcher::default().get_with_cancel(url, token).await
}
