//! Chunk scheduling.
//!
//! A coordinator task walks the chunks of a resource in offset order. For each chunk it acquires a permit from the pool bounding
//! concurrent fetches, links a new [`Turn`] for the next chunk and spawns the chunk task. Chunk tasks fetch in parallel but only
//! write into the sink once their turn has been granted, which happens when the previous chunk task returns. Once the chunks are
//! exhausted, the coordinator waits for the last turn and closes the sink with an end-of-stream.
//!
//! Any failing chunk closes the sink right away, without waiting for its turn. Later chunks then fail to write into the closed
//! sink and the coordinator stops dispatching.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use reqwest::{Response, StatusCode};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};

use crate::cancel::Cancel;
use crate::order::{self, Handoff, Turn};
use crate::pipe::PipeWriter;
use crate::request::RequestTemplate;
use crate::{Error, ResourceSize};

/// A contiguous byte range of the resource, fetched by a single ranged request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Chunk {
    pub(crate) index: u64,
    /// First byte, inclusive.
    pub(crate) start: u64,
    /// Last byte, inclusive.
    pub(crate) end: u64,
}

impl Chunk {
    #[inline]
    pub(crate) fn range_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// How a resource is split into chunks.
///
/// Chunk boundaries sit on multiples of the chunk size: chunk `i` covers `[i * size + 1, (i + 1) * size]`, except the first one
/// which starts at `0`. The last chunk of a resource of known length is clipped to that length.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Plan {
    size: ResourceSize,
    chunk_size: u64,
}

impl Plan {
    pub(crate) fn new(size: ResourceSize, chunk_size: u64) -> Self {
        debug_assert!(chunk_size > 0);

        Self { size, chunk_size }
    }

    /// The chunk at `index`, if it starts within the resource.
    pub(crate) fn chunk(&self, index: u64) -> Option<Chunk> {
        let start = match index {
            0 => 0,
            _ => index.checked_mul(self.chunk_size)?.checked_add(1)?,
        };
        let end = index.checked_add(1)?.checked_mul(self.chunk_size)?;

        match self.size {
            ResourceSize::Exact(size) if start >= size => None,
            ResourceSize::Exact(size) => Some(Chunk {
                index,
                start,
                end: end.min(size),
            }),
            ResourceSize::Unbounded => Some(Chunk { index, start, end }),
        }
    }

    /// All chunks, in offset order.
    pub(crate) fn chunks(self) -> impl Iterator<Item = Chunk> {
        (0..).map_while(move |index| self.chunk(index))
    }

    #[inline]
    pub(crate) fn size(&self) -> ResourceSize {
        self.size
    }
}

/// State shared by the coordinator and every chunk task of one fetch operation.
#[derive(Debug)]
struct Context {
    request: RequestTemplate,
    size: ResourceSize,
    sink: PipeWriter,
    cancel: Cancel,
}

/// Drives the chunk tasks of one fetch operation.
#[derive(Debug)]
pub(crate) struct Scheduler {
    ctx: Arc<Context>,
    plan: Plan,
    permits: Arc<Semaphore>,
}

impl Scheduler {
    pub(crate) fn new(request: RequestTemplate, plan: Plan, concurrency: usize, sink: PipeWriter, cancel: Cancel) -> Self {
        Self {
            ctx: Arc::new(Context {
                request,
                size: plan.size(),
                sink,
                cancel,
            }),
            plan,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Start the coordinator in the background.
    pub(crate) fn spawn(self) {
        tokio::spawn(self.run());
    }

    async fn run(self) {
        let Self { ctx, plan, permits } = self;

        let mut tasks = JoinSet::new();
        let mut chunks = plan.chunks();
        let mut turn = Turn::first();

        loop {
            let Some(chunk) = chunks.next() else {
                ctx.finish(turn).await;
                break;
            };

            let permit = tokio::select! {
                biased;
                err = ctx.cancel.wait() => {
                    ctx.sink.close_with_error(err);
                    break;
                }
                () = ctx.sink.closed() => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let (handoff, next) = order::link();

            tracing::trace!("Dispatching chunk #{} of `{}`: {}", chunk.index, ctx.request.url(), chunk.range_header());

            tasks.spawn(Arc::clone(&ctx).run_chunk(chunk, permit, turn, handoff));
            turn = next;

            while let Some(joined) = tasks.try_join_next() {
                reap(joined);
            }
        }

        // no chunk will ever need a permit again
        permits.close();

        while let Some(joined) = tasks.join_next().await {
            reap(joined);
        }

        tracing::debug!("All chunk tasks completed for `{}`", ctx.request.url());
    }
}

fn reap(joined: Result<(), JoinError>) {
    if let Err(err) = joined {
        tracing::debug!("Chunk task did not complete: {err}");
    }
}

impl Context {
    async fn run_chunk(self: Arc<Self>, chunk: Chunk, permit: OwnedSemaphorePermit, turn: Turn, handoff: Handoff) {
        self.guard(&chunk, self.fetch_chunk(&chunk, turn), permit, handoff).await;
    }

    /// Run the work of a chunk task, then grant the next chunk its turn and give the permit back.
    async fn guard(&self, chunk: &Chunk, work: impl Future<Output = ()>, _permit: OwnedSemaphorePermit, handoff: Handoff) {
        // the sink must be closed before any later chunk is granted its turn
        if AssertUnwindSafe(work).catch_unwind().await.is_err() {
            self.fail(chunk, Error::Panicked);
        }

        handoff.release();
    }

    async fn fetch_chunk(&self, chunk: &Chunk, turn: Turn) {
        let response = tokio::select! {
            biased;
            err = self.cancel.wait() => return self.fail(chunk, err),
            () = self.sink.closed() => return,
            response = self.request.fetch(chunk) => response,
        };

        let response = match response {
            Ok(response) => response,
            Err(err) => return self.fail(chunk, err),
        };

        let status = response.status();

        if status == StatusCode::RANGE_NOT_SATISFIABLE && self.size.is_unbounded() {
            tracing::debug!("Chunk #{} starts past the end of `{}`", chunk.index, self.request.url());

            return self.finish(turn).await;
        }
        if !status.is_success() {
            return self.fail(chunk, Error::Status(status));
        }

        tokio::select! {
            biased;
            err = self.cancel.wait() => return self.fail(chunk, err),
            () = turn.granted() => {}
        }

        // past the first chunk, a whole resource would land after bytes already written
        if status == StatusCode::OK && chunk.index > 0 {
            return self.fail(chunk, Error::Status(status));
        }

        match self.write(response).await {
            Ok(written) => {
                tracing::trace!("Wrote chunk #{} of `{}`: {written} bytes", chunk.index, self.request.url());

                // a server ignoring ranges sends the whole resource at once
                if status == StatusCode::OK {
                    self.close();
                }
            }
            Err(err) => self.fail(chunk, err),
        }
    }

    /// Copy the body into the sink, returning the number of bytes written.
    async fn write(&self, response: Response) -> Result<u64, Error> {
        let mut body = response.bytes_stream();
        let mut written = 0;

        loop {
            let frame = tokio::select! {
                biased;
                err = self.cancel.wait() => return Err(err),
                frame = body.next() => frame,
            };

            let Some(frame) = frame.transpose()? else {
                return Ok(written);
            };
            let len = frame.len() as u64;

            tokio::select! {
                biased;
                err = self.cancel.wait() => return Err(err),
                res = self.sink.write(frame) => res?,
            }

            written += len;
        }
    }

    /// Terminal step: wait for the last turn, then close the sink.
    async fn finish(&self, turn: Turn) {
        tokio::select! {
            biased;
            err = self.cancel.wait() => {
                self.sink.close_with_error(err);
            }
            () = turn.granted() => self.close(),
        }
    }

    fn close(&self) {
        if self.sink.close() {
            tracing::debug!("Completed stream of `{}`", self.request.url());
        }
    }

    fn fail(&self, chunk: &Chunk, err: Error) {
        let reason = err.to_string();

        if self.sink.close_with_error(err) {
            tracing::debug!("Closing stream of `{}` on chunk #{}: {reason}", self.request.url(), chunk.index);
        } else {
            tracing::trace!("Chunk #{} of `{}` aborted: {reason}", chunk.index, self.request.url());
        }
    }
}
