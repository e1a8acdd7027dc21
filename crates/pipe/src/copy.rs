use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use futures::{FutureExt, future::BoxFuture};

use crate::Reader;

/// One of several readers sharing a single source.
pub(crate) struct CopyReader<T, E> {
    shared: Arc<Shared<T, E>>,
    id: usize,
}

struct Shared<T, E> {
    /// Held while pulling, so only one copy reads from the source at a time.
    source: tokio::sync::Mutex<Reader<T, E>>,
    state: Mutex<State<T, E>>,
    clone_item: fn(&Result<T, E>) -> Result<T, E>,
}

struct State<T, E> {
    /// Values not yet read by every open copy. `buffer[0]` sits at position `offset`.
    buffer: VecDeque<Result<T, E>>,
    offset: usize,
    /// Next position per copy, `None` once the copy is closed.
    cursors: Vec<Option<usize>>,
    finished: bool,
}

enum Buffered<T, E> {
    Item(Result<T, E>),
    End,
    Pending,
}

fn clone_result<T: Clone, E: Clone>(item: &Result<T, E>) -> Result<T, E> {
    item.clone()
}

impl<T, E> CopyReader<T, E> {
    pub(crate) fn split(source: Reader<T, E>, n: usize) -> Vec<Self>
    where
        T: Clone,
        E: Clone,
    {
        let shared = Arc::new(Shared {
            source: tokio::sync::Mutex::new(source),
            state: Mutex::new(State {
                buffer: VecDeque::new(),
                offset: 0,
                cursors: vec![Some(0); n],
                finished: false,
            }),
            clone_item: clone_result::<T, E>,
        });

        (0..n)
            .map(|id| CopyReader {
                shared: shared.clone(),
                id,
            })
            .collect()
    }

    fn state(&self) -> MutexGuard<'_, State<T, E>> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_buffered(&self) -> Buffered<T, E> {
        let mut state = self.state();

        let Some(position) = state.cursors[self.id] else {
            return Buffered::End;
        };

        if position < state.offset + state.buffer.len() {
            let item = (self.shared.clone_item)(&state.buffer[position - state.offset]);
            state.cursors[self.id] = Some(position + 1);
            state.trim();

            return Buffered::Item(item);
        }

        if state.finished {
            Buffered::End
        } else {
            Buffered::Pending
        }
    }
}

impl<T, E> CopyReader<T, E>
where
    T: Send,
    E: Send,
{
    pub(crate) fn recv(&mut self) -> BoxFuture<'_, Option<Result<T, E>>> {
        async move {
            loop {
                match self.take_buffered() {
                    Buffered::Item(item) => return Some(item),
                    Buffered::End => return None,
                    Buffered::Pending => (),
                }

                let mut source = self.shared.source.lock().await;

                // Another copy may have pulled while we waited for the lock.
                match self.take_buffered() {
                    Buffered::Item(item) => return Some(item),
                    Buffered::End => return None,
                    Buffered::Pending => (),
                }

                let next = source.recv().await;
                let mut state = self.state();

                match next {
                    Some(item) => state.buffer.push_back(item),
                    None => state.finished = true,
                }
            }
        }
        .boxed()
    }
}

impl<T, E> Drop for CopyReader<T, E> {
    fn drop(&mut self) {
        let all_closed = {
            let mut state = self.state();
            state.cursors[self.id] = None;
            state.trim();
            state.cursors.iter().all(Option::is_none)
        };

        if all_closed && let Ok(mut source) = self.shared.source.try_lock() {
            source.close();
        }
    }
}

impl<T, E> State<T, E> {
    fn trim(&mut self) {
        let Some(lowest) = self.cursors.iter().flatten().min().copied() else {
            self.offset += self.buffer.len();
            self.buffer.clear();
            return;
        };

        while self.offset < lowest && self.buffer.pop_front().is_some() {
            self.offset += 1;
        }
    }
}
