//! Bounded channel connecting one producer task to one or more consumers.
//!
//! Every value is a `Result<T, E>`; an error is an ordinary value and does not close the pipe.
//! A reader sees the end of the stream as `None` once the writer is closed and the buffer is
//! drained.

mod copy;
mod reader;

pub use reader::Reader;
use tokio::sync::mpsc;

/// Creates a linked reader/writer pair buffering at most `capacity` values.
///
/// A capacity of zero is treated as one.
pub fn pipe<T, E>(capacity: usize) -> (Reader<T, E>, Writer<T, E>) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));

    (Reader::from_receiver(receiver), Writer { sender: Some(sender) })
}

/// Producer half of a [`pipe`].
///
/// Dropping the writer closes it.
pub struct Writer<T, E> {
    sender: Option<mpsc::Sender<Result<T, E>>>,
}

impl<T, E> Writer<T, E> {
    /// Sends one value, waiting while the buffer is full.
    ///
    /// Returns `true` when the value could not be delivered because every reader is gone or
    /// the writer was closed. The producer should stop on `true`.
    pub async fn send(&self, item: Result<T, E>) -> bool {
        match &self.sender {
            Some(sender) => sender.send(item).await.is_err(),
            None => true,
        }
    }

    /// Signals that no more values will arrive. Calling it again has no effect.
    pub fn close(&mut self) {
        self.sender = None;
    }

    pub fn is_closed(&self) -> bool {
        self.sender.as_ref().is_none_or(mpsc::Sender::is_closed)
    }

    /// Resolves once the reader side is gone.
    pub async fn closed(&self) {
        if let Some(sender) = &self.sender {
            sender.closed().await;
        }
    }
}

impl<T, E> std::fmt::Debug for Writer<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writer").field("closed", &self.is_closed()).finish()
    }
}
