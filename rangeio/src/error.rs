use std::io;
use std::sync::Arc;

use reqwest::StatusCode;
use thiserror::Error;

/// Errors surfaced by a fetch operation, either from [`Fetcher::get()`](crate::Fetcher::get) or through the read side of a
/// [`RemoteFile`](crate::RemoteFile).
///
/// The type is `Clone` so the terminal condition of a closed stream can be reported to every subsequent read.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("request failed: {0}")]
    Request(#[source] Arc<reqwest::Error>),
    #[error("unexpected status code: {0}")]
    Status(StatusCode),
    #[error("invalid content length: `{0}`")]
    InvalidContentLength(String),
    #[error("invalid content range: `{0}`")]
    InvalidContentRange(String),
    #[error("operation canceled")]
    Canceled,
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("read/write on closed pipe")]
    ClosedPipe,
    #[error("chunk task panicked")]
    Panicked,
}

impl From<reqwest::Error> for Error {
    #[inline]
    fn from(err: reqwest::Error) -> Self {
        Self::Request(Arc::new(err))
    }
}

/// Cancellation maps to [`io::ErrorKind::Other`], never to [`io::ErrorKind::Interrupted`] which `std::io` helpers retry; recover it
/// with [`Error::from_io()`].
impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = match err {
            Error::DeadlineExceeded => io::ErrorKind::TimedOut,
            Error::ClosedPipe => io::ErrorKind::BrokenPipe,
            _ => io::ErrorKind::Other,
        };

        io::Error::new(kind, err)
    }
}

impl Error {
    /// Recover the fetch error wrapped in an [`io::Error`] returned by a read.
    pub fn from_io(err: &io::Error) -> Option<&Self> {
        err.get_ref().and_then(|inner| inner.downcast_ref())
    }

    /// Whether this error reports a cancellation or an expired deadline.
    #[inline]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled | Self::DeadlineExceeded)
    }
}
