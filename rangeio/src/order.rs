//! Chained single-use signals serializing chunk writes.
//!
//! Each chunk task owns the [`Turn`] it must wait on before writing and the [`Handoff`] granting the next chunk its turn.
//! A handoff is released either explicitly or when dropped, so a task passes write authority on every exit path.

use tokio::sync::oneshot;

/// The right to write, granted once the previous chunk released its [`Handoff`].
#[derive(Debug)]
pub(crate) struct Turn(Option<oneshot::Receiver<()>>);

impl Turn {
    /// The turn of the very first chunk, granted from the start.
    #[inline]
    pub(crate) fn first() -> Self {
        Self(None)
    }

    /// Wait for this turn to be granted.
    pub(crate) async fn granted(self) {
        if let Some(receiver) = self.0 {
            // a dropped sender grants the turn as well
            let _ = receiver.await;
        }
    }
}

/// Grants the next chunk its [`Turn`] when released or dropped.
#[derive(Debug)]
pub(crate) struct Handoff(oneshot::Sender<()>);

impl Handoff {
    #[inline]
    pub(crate) fn release(self) {
        let _ = self.0.send(());
    }
}

/// Create the link between a chunk and its successor.
pub(crate) fn link() -> (Handoff, Turn) {
    let (sender, receiver) = oneshot::channel();

    (Handoff(sender), Turn(Some(receiver)))
}
