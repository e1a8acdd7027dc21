use std::collections::VecDeque;

use futures::Stream;
use tokio::sync::mpsc;

use crate::copy::CopyReader;

/// Consumer half of a [`pipe`](crate::pipe).
///
/// Dropping the reader closes it, which makes the next [`Writer::send`](crate::Writer::send)
/// return `true`.
pub struct Reader<T, E> {
    inner: Inner<T, E>,
}

enum Inner<T, E> {
    Channel(mpsc::Receiver<Result<T, E>>),
    Buffered(VecDeque<Result<T, E>>),
    Copy(CopyReader<T, E>),
    Closed,
}

impl<T, E> Reader<T, E> {
    pub(crate) fn from_receiver(receiver: mpsc::Receiver<Result<T, E>>) -> Self {
        Self {
            inner: Inner::Channel(receiver),
        }
    }

    /// A reader yielding `items` in order and then ending.
    pub fn from_items(items: Vec<Result<T, E>>) -> Self {
        Self {
            inner: Inner::Buffered(items.into()),
        }
    }

    /// Stops consuming. Values still buffered are discarded. Calling it again has no effect.
    pub fn close(&mut self) {
        self.inner = Inner::Closed;
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.inner, Inner::Closed)
    }
}

impl<T, E> Reader<T, E>
where
    T: Send,
    E: Send,
{
    /// Waits for the next value. `None` means the stream has ended.
    pub async fn recv(&mut self) -> Option<Result<T, E>> {
        match &mut self.inner {
            Inner::Channel(receiver) => receiver.recv().await,
            Inner::Buffered(items) => items.pop_front(),
            Inner::Copy(copy) => copy.recv().await,
            Inner::Closed => None,
        }
    }

    /// Drains the reader, returning every value or the first error.
    pub async fn collect(mut self) -> Result<Vec<T>, E> {
        let mut items = Vec::new();

        while let Some(item) = self.recv().await {
            items.push(item?);
        }

        Ok(items)
    }

    /// Adapts the reader into a [`Stream`].
    pub fn into_stream(self) -> impl Stream<Item = Result<T, E>> + Send {
        futures::stream::unfold(self, |mut reader| async move {
            let item = reader.recv().await?;
            Some((item, reader))
        })
    }
}

impl<T, E> Reader<T, E>
where
    T: Clone + Send,
    E: Clone + Send,
{
    /// Splits this reader into `n` readers that each observe the same sequence of values.
    ///
    /// The source is only read when a copy asks for a value none of the copies has seen yet.
    /// Values stay buffered until every open copy has read them, so each copy can be drained
    /// at its own pace. Closing a copy stops retaining values for it; closing the last copy
    /// closes this reader.
    pub fn copy(self, n: usize) -> Vec<Reader<T, E>> {
        match n {
            0 => Vec::new(),
            1 => vec![self],
            _ => CopyReader::split(self, n)
                .into_iter()
                .map(|copy| Reader {
                    inner: Inner::Copy(copy),
                })
                .collect(),
        }
    }
}

impl<T, E> std::fmt::Debug for Reader<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.inner {
            Inner::Channel(_) => "channel",
            Inner::Buffered(_) => "buffered",
            Inner::Copy(_) => "copy",
            Inner::Closed => "closed",
        };

        f.debug_struct("Reader").field("kind", &kind).finish()
    }
}
