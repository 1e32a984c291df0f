//! Cancellation signal shared by every task of one fetch operation.

use tokio::time::{self, Instant};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::Error;

/// An explicit cancellation token, optionally bounded by a deadline.
#[derive(Debug, Clone)]
pub(crate) struct Cancel {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Cancel {
    pub(crate) fn new(token: CancellationToken, deadline: Option<Instant>) -> Self {
        Self { token, deadline }
    }

    /// Resolve once the operation is canceled or its deadline expires, returning the matching error.
    pub(crate) async fn wait(&self) -> Error {
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                _ = self.token.cancelled() => Error::Canceled,
                _ = time::sleep_until(deadline) => Error::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                Error::Canceled
            }
        }
    }

    /// Cancel the operation when the returned guard is dropped.
    #[inline]
    pub(crate) fn drop_guard(&self) -> DropGuard {
        self.token.clone().drop_guard()
    }
}
