//! An unbuffered, in-memory pipe between the chunk tasks and the consumer.
//!
//! A [`PipeWriter::write()`] completes only once the [`PipeReader`] has consumed every byte of it, so the writing side can never
//! run ahead of the consumer by more than the frame currently being handed over. The pipe is closed exactly once, either cleanly
//! (end-of-stream) or with an [`Error`]; the first close wins and every later close is ignored.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::task::AtomicWaker;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::Error;

/// Create a connected pair of pipe ends.
pub(crate) fn pipe() -> (PipeWriter, PipeReader) {
    let (sender, receiver) = mpsc::channel(1);
    let shared = Arc::new(Shared::default());

    let writer = PipeWriter {
        sender,
        shared: Arc::clone(&shared),
    };
    let reader = PipeReader {
        receiver,
        shared,
        frame: None,
    };

    (writer, reader)
}

/// A frame in transit, acknowledged once fully read.
#[derive(Debug)]
struct Frame {
    data: Bytes,
    ack: oneshot::Sender<()>,
}

#[derive(Debug, Default)]
struct Shared {
    /// `None` stands for a clean end-of-stream.
    closure: OnceLock<Option<Error>>,
    /// Wakes writers waiting on a frame hand-over.
    done: CancellationToken,
    /// Wakes the reader waiting on the next frame.
    waker: AtomicWaker,
}

impl Shared {
    fn close(&self, closure: Option<Error>) -> bool {
        let closed = self.closure.set(closure).is_ok();

        if closed {
            self.done.cancel();
            self.waker.wake();
        }

        closed
    }
}

/// The writing end of a [`pipe()`].
///
/// Clones share the same pipe; the chunk scheduler makes sure only one of them writes at a time.
#[derive(Debug, Clone)]
pub(crate) struct PipeWriter {
    sender: mpsc::Sender<Frame>,
    shared: Arc<Shared>,
}

impl PipeWriter {
    /// Hand `data` over to the reader, waiting until it has been entirely consumed.
    pub(crate) async fn write(&self, data: Bytes) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::ClosedPipe);
        }
        if data.is_empty() {
            return Ok(());
        }

        let (ack, consumed) = oneshot::channel();

        tokio::select! {
            biased;
            _ = self.shared.done.cancelled() => return Err(Error::ClosedPipe),
            sent = self.sender.send(Frame { data, ack }) => sent.map_err(|_| Error::ClosedPipe)?,
        }

        tokio::select! {
            biased;
            _ = self.shared.done.cancelled() => Err(Error::ClosedPipe),
            read = consumed => read.map_err(|_| Error::ClosedPipe),
        }
    }

    /// Close the pipe with an end-of-stream, returning whether this call actually closed it.
    #[inline]
    pub(crate) fn close(&self) -> bool {
        self.shared.close(None)
    }

    /// Close the pipe with `err`, returning whether this call actually closed it.
    #[inline]
    pub(crate) fn close_with_error(&self, err: Error) -> bool {
        self.shared.close(Some(err))
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.shared.closure.get().is_some()
    }

    /// Resolve once the pipe is closed, from either end.
    pub(crate) async fn closed(&self) {
        self.shared.done.cancelled().await
    }
}

/// The reading end of a [`pipe()`].
///
/// Dropping it closes the pipe with [`Error::ClosedPipe`], failing any pending or future write.
#[derive(Debug)]
pub(crate) struct PipeReader {
    receiver: mpsc::Receiver<Frame>,
    shared: Arc<Shared>,
    /// Partially read frame.
    frame: Option<Frame>,
}

impl PipeReader {
    fn poll_closure(&self) -> Poll<io::Result<()>> {
        match self.shared.closure.get() {
            Some(None) => Poll::Ready(Ok(())),
            Some(Some(err)) => Poll::Ready(Err(err.clone().into())),
            None => Poll::Pending,
        }
    }
}

impl AsyncRead for PipeReader {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            if let Poll::Ready(closure) = this.poll_closure() {
                return Poll::Ready(closure);
            }

            if let Some(frame) = this.frame.as_mut() {
                let len = frame.data.len().min(buf.remaining());
                buf.put_slice(&frame.data.split_to(len));

                if frame.data.is_empty() {
                    if let Some(frame) = this.frame.take() {
                        let _ = frame.ack.send(());
                    }
                }

                return Poll::Ready(Ok(()));
            }

            // register before checking again, a close may happen in between
            this.shared.waker.register(cx.waker());

            if this.shared.closure.get().is_some() {
                continue;
            }

            match this.receiver.poll_recv(cx) {
                Poll::Ready(Some(frame)) => this.frame = Some(frame),
                Poll::Ready(None) => {
                    return match this.poll_closure() {
                        Poll::Ready(closure) => Poll::Ready(closure),
                        Poll::Pending => Poll::Ready(Err(io::ErrorKind::UnexpectedEof.into())),
                    };
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        if self.shared.close(Some(Error::ClosedPipe)) {
            tracing::trace!("Pipe reader dropped before the stream was closed");
        }
    }
}
