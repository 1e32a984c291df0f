use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::io::SyncIoBridge;
use tokio_util::sync::DropGuard;
use url::Url;

use crate::pipe::PipeReader;
use crate::ResourceSize;

/// A remote resource read as a single ordered byte stream.
///
/// Chunks are fetched concurrently in the background while reads return their bytes strictly in offset order. A failing chunk,
/// a cancellation or an expired deadline is reported by the next read as an [`io::Error`] wrapping the originating
/// [`Error`](crate::Error), see [`Error::from_io()`](crate::Error::from_io).
///
/// Dropping a `RemoteFile` cancels every outstanding chunk task.
#[derive(Debug)]
pub struct RemoteFile {
    url: Url,
    size: ResourceSize,
    reader: PipeReader,
    _cancel: DropGuard,
}

impl RemoteFile {
    pub(crate) fn new(url: Url, size: ResourceSize, reader: PipeReader, cancel: DropGuard) -> Self {
        Self {
            url,
            size,
            reader,
            _cancel: cancel,
        }
    }

    #[inline]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Total length as resolved by the size probe.
    #[inline]
    pub fn size(&self) -> ResourceSize {
        self.size
    }

    /// Turn into a blocking [`std::io::Read`] implementor.
    ///
    /// Must be called from within a Tokio runtime, while reads must happen outside of it, eg. in
    /// [`spawn_blocking()`](tokio::task::spawn_blocking).
    pub fn into_blocking(self) -> SyncIoBridge<Self> {
        SyncIoBridge::new(self)
    }
}

impl AsyncRead for RemoteFile {
    #[inline]
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}
