//! Background producers turning a provider's native stream into a [`MessageReader`].
//!
//! Each call to [`spawn_stream`] starts one task that reads native chunks, converts them to
//! deltas and sends them into a pipe with a single slot. The task ends on the end-of-stream
//! sentinel, on the first error, on a panic, or once the reader is gone. In every case it closes
//! the native stream and then the pipe.

use std::{marker::PhantomData, panic::AssertUnwindSafe};

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{FutureExt, StreamExt, stream::BoxStream};
use pipe::Writer;
use schema::Message;
use serde::de::DeserializeOwned;

use crate::{
    MessageReader,
    error::{LlmError, PanicError},
};

/// Capacity of the pipe between a producer and its reader.
const PIPE_CAPACITY: usize = 1;

/// A provider's native chunk stream.
#[async_trait]
pub trait NativeStream: Send {
    type Chunk: Send;

    /// Next chunk, or `None` once the provider signalled the end of the stream.
    async fn recv(&mut self) -> crate::Result<Option<Self::Chunk>>;

    /// Releases the underlying connection. Calling it again has no effect.
    fn close(&mut self);
}

/// Converts native chunks into deltas.
pub trait ChunkConverter: Send {
    type Chunk;

    /// Converts one chunk. `None` skips the chunk.
    fn convert(&mut self, chunk: Self::Chunk) -> crate::Result<Option<Message>>;

    /// Called once when the stream ends or fails, to flush anything still buffered.
    fn finish(&mut self) -> crate::Result<Option<Message>> {
        Ok(None)
    }
}

/// Server-sent events carrying one JSON chunk each.
///
/// Blank events are skipped and `[DONE]` ends the stream.
pub struct SseStream<C> {
    provider: String,
    events: Option<BoxStream<'static, Result<eventsource_stream::Event, String>>>,
    _chunk: PhantomData<fn() -> C>,
}

impl<C> SseStream<C> {
    pub fn new(provider: impl Into<String>, response: reqwest::Response) -> Self {
        let events = response
            .bytes_stream()
            .eventsource()
            .map(|event| event.map_err(|err| err.to_string()))
            .boxed();

        Self {
            provider: provider.into(),
            events: Some(events),
            _chunk: PhantomData,
        }
    }
}

#[async_trait]
impl<C> NativeStream for SseStream<C>
where
    C: DeserializeOwned + Send,
{
    type Chunk = C;

    async fn recv(&mut self) -> crate::Result<Option<C>> {
        loop {
            let next = match self.events.as_mut() {
                Some(events) => events.next().await,
                None => return Ok(None),
            };

            let Some(event) = next else {
                log::debug!("{} stream ended without a [DONE] marker", self.provider);
                return Ok(None);
            };

            let event = event.map_err(|err| {
                LlmError::StreamError(format!("Failed to read {} event stream: {err}", self.provider))
            })?;

            let data = event.data.trim();

            if data.is_empty() {
                continue;
            }

            if data == "[DONE]" {
                self.close();
                return Ok(None);
            }

            let chunk = sonic_rs::from_str(data).map_err(|err| {
                log::debug!("Unparseable {} chunk, length: {} bytes", self.provider, data.len());
                LlmError::InvalidResponse(format!("Failed to parse {} streaming chunk: {err}", self.provider))
            })?;

            return Ok(Some(chunk));
        }
    }

    fn close(&mut self) {
        self.events = None;
    }
}

/// Starts the producer task and returns the reader it feeds.
///
/// The reader yields converted deltas in chunk order. A transport error, conversion error or
/// panic is delivered as the last item. Closing or dropping the reader stops the task, which
/// then closes `native`.
pub fn spawn_stream<S, C>(provider: impl Into<String>, native: S, converter: C) -> MessageReader
where
    S: NativeStream + 'static,
    C: ChunkConverter<Chunk = S::Chunk> + 'static,
{
    let (reader, writer) = pipe::pipe(PIPE_CAPACITY);

    tokio::spawn(produce(provider.into(), native, converter, writer));

    reader
}

async fn produce<S, C>(provider: String, mut native: S, mut converter: C, mut writer: Writer<Message, LlmError>)
where
    S: NativeStream,
    C: ChunkConverter<Chunk = S::Chunk>,
{
    let outcome = AssertUnwindSafe(pump(&provider, &mut native, &mut converter, &writer))
        .catch_unwind()
        .await;

    if let Err(payload) = outcome {
        let error = PanicError::new(payload);
        log::error!("{provider} stream producer panicked: {}", error.payload);

        writer.send(Err(LlmError::Panic(error))).await;
    }

    native.close();
    writer.close();

    log::debug!("{provider} stream producer finished");
}

async fn pump<S, C>(provider: &str, native: &mut S, converter: &mut C, writer: &Writer<Message, LlmError>)
where
    S: NativeStream,
    C: ChunkConverter<Chunk = S::Chunk>,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = writer.closed() => {
                log::debug!("{provider} stream reader closed before the stream ended");
                return;
            }
            next = native.recv() => next,
        };

        let converted = match next {
            Ok(Some(chunk)) => converter.convert(chunk),
            Ok(None) => {
                flush(provider, converter, writer).await;
                return;
            }
            Err(error) => {
                log::warn!("{provider} stream failed: {error}");

                if flush(provider, converter, writer).await {
                    writer.send(Err(error)).await;
                }

                return;
            }
        };

        match converted {
            Ok(Some(message)) => {
                if writer.send(Ok(message)).await {
                    log::debug!("{provider} stream reader closed before the stream ended");
                    return;
                }
            }
            Ok(None) => (),
            Err(error) => {
                log::warn!("{provider} stream chunk conversion failed: {error}");

                if flush(provider, converter, writer).await {
                    writer.send(Err(error)).await;
                }

                return;
            }
        }
    }
}

/// Sends whatever the converter still buffers. Returns `false` once nothing more can be sent.
async fn flush<C>(provider: &str, converter: &mut C, writer: &Writer<Message, LlmError>) -> bool
where
    C: ChunkConverter,
{
    let item = match converter.finish() {
        Ok(Some(message)) => Ok(message),
        Ok(None) => return true,
        Err(error) => {
            log::warn!("{provider} stream flush failed: {error}");
            Err(error)
        }
    };

    let failed = item.is_err();

    !writer.send(item).await && !failed
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, time::Duration};

    use schema::{ResponseMeta, TokenUsage};
    use tokio::sync::oneshot;

    use super::*;

    /// Replays scripted results, then waits forever.
    struct ScriptedStream {
        script: VecDeque<crate::Result<Option<Vec<u32>>>>,
        closed: Option<oneshot::Sender<()>>,
    }

    impl ScriptedStream {
        fn new(script: Vec<crate::Result<Option<Vec<u32>>>>) -> (Self, oneshot::Receiver<()>) {
            let (sender, receiver) = oneshot::channel();

            let stream = Self {
                script: script.into(),
                closed: Some(sender),
            };

            (stream, receiver)
        }
    }

    #[async_trait]
    impl NativeStream for ScriptedStream {
        type Chunk = Vec<u32>;

        async fn recv(&mut self) -> crate::Result<Option<Vec<u32>>> {
            match self.script.pop_front() {
                Some(next) => next,
                None => futures::future::pending().await,
            }
        }

        fn close(&mut self) {
            if let Some(closed) = self.closed.take() {
                let _ = closed.send(());
            }
        }
    }

    /// Each chunk lists numbers; an empty chunk carries usage only. Reads `chunk[9]` for chunks
    /// starting with 99, which panics on short chunks.
    #[derive(Default)]
    struct NumberConverter {
        held_back: Option<Message>,
    }

    impl ChunkConverter for NumberConverter {
        type Chunk = Vec<u32>;

        fn convert(&mut self, chunk: Vec<u32>) -> crate::Result<Option<Message>> {
            match chunk.first() {
                None => {
                    let mut message = Message::assistant("", Vec::new());
                    message.response_meta = Some(ResponseMeta::with_usage(TokenUsage::new(1, 2, 3)));
                    Ok(Some(message))
                }
                Some(0) => Ok(None),
                Some(77) => {
                    self.held_back = Some(Message::assistant("held", Vec::new()));
                    Ok(None)
                }
                Some(88) => Err(LlmError::InvalidResponse("bad chunk".to_string())),
                Some(99) => Ok(Some(Message::assistant(chunk[9].to_string(), Vec::new()))),
                Some(_) => {
                    let text: Vec<_> = chunk.iter().map(u32::to_string).collect();
                    Ok(Some(Message::assistant(text.join(","), Vec::new())))
                }
            }
        }

        fn finish(&mut self) -> crate::Result<Option<Message>> {
            Ok(self.held_back.take())
        }
    }

    async fn drain(mut reader: MessageReader) -> Vec<Result<String, String>> {
        let mut items = Vec::new();

        while let Some(item) = reader.recv().await {
            items.push(item.map(|message| message.content).map_err(|error| error.to_string()));
        }

        items
    }

    #[tokio::test]
    async fn converted_chunks_arrive_in_order_and_skipped_chunks_vanish() {
        let (native, closed) = ScriptedStream::new(vec![
            Ok(Some(vec![1, 2])),
            Ok(Some(vec![0])),
            Ok(Some(vec![3])),
            Ok(None),
        ]);

        let reader = spawn_stream("test", native, NumberConverter::default());

        assert_eq!(drain(reader).await, vec![Ok("1,2".to_string()), Ok("3".to_string())]);
        tokio::time::timeout(Duration::from_secs(1), closed).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn usage_only_chunk_is_delivered() {
        let (native, _closed) = ScriptedStream::new(vec![Ok(Some(vec![5])), Ok(Some(Vec::new())), Ok(None)]);

        let messages = spawn_stream("test", native, NumberConverter::default())
            .collect()
            .await
            .unwrap();

        assert_eq!(messages.len(), 2);
        assert!(messages[1].content.is_empty());
        assert_eq!(messages[1].usage(), Some(&TokenUsage::new(1, 2, 3)));
    }

    #[tokio::test]
    async fn finish_flushes_buffered_delta() {
        let (native, _closed) = ScriptedStream::new(vec![Ok(Some(vec![77])), Ok(None)]);

        let reader = spawn_stream("test", native, NumberConverter::default());

        assert_eq!(drain(reader).await, vec![Ok("held".to_string())]);
    }

    #[tokio::test]
    async fn transport_error_is_terminal() {
        let (native, closed) = ScriptedStream::new(vec![
            Ok(Some(vec![1])),
            Err(LlmError::ConnectionError("reset by peer".to_string())),
            Ok(Some(vec![2])),
        ]);

        let reader = spawn_stream("test", native, NumberConverter::default());

        assert_eq!(
            drain(reader).await,
            vec![
                Ok("1".to_string()),
                Err("Connection error: reset by peer".to_string())
            ]
        );
        tokio::time::timeout(Duration::from_secs(1), closed).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn buffered_delta_is_delivered_before_a_transport_error() {
        let (native, closed) = ScriptedStream::new(vec![
            Ok(Some(vec![1])),
            Ok(Some(vec![77])),
            Err(LlmError::ConnectionError("reset".to_string())),
        ]);

        let reader = spawn_stream("test", native, NumberConverter::default());

        assert_eq!(
            drain(reader).await,
            vec![
                Ok("1".to_string()),
                Ok("held".to_string()),
                Err("Connection error: reset".to_string())
            ]
        );
        tokio::time::timeout(Duration::from_secs(1), closed).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn conversion_error_is_terminal() {
        let (native, _closed) = ScriptedStream::new(vec![Ok(Some(vec![88])), Ok(Some(vec![1]))]);

        let reader = spawn_stream("test", native, NumberConverter::default());

        assert_eq!(
            drain(reader).await,
            vec![Err("Invalid response: bad chunk".to_string())]
        );
    }

    #[tokio::test]
    async fn panic_becomes_a_terminal_error() {
        let (native, closed) = ScriptedStream::new(vec![Ok(Some(vec![1])), Ok(Some(vec![99])), Ok(Some(vec![2]))]);

        let mut reader = spawn_stream("test", native, NumberConverter::default());

        assert_eq!(reader.recv().await.unwrap().unwrap().content, "1");

        let Some(Err(LlmError::Panic(error))) = reader.recv().await else {
            unreachable!("expected a panic error");
        };

        assert!(error.payload.contains("index out of bounds"));
        assert!(!error.backtrace.is_empty());

        assert!(reader.recv().await.is_none());
        assert!(reader.recv().await.is_none());

        tokio::time::timeout(Duration::from_secs(1), closed).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn dropping_the_reader_closes_the_native_stream() {
        let (native, closed) = ScriptedStream::new(vec![Ok(Some(vec![1])), Ok(Some(vec![2]))]);

        let mut reader = spawn_stream("test", native, NumberConverter::default());
        assert_eq!(reader.recv().await.unwrap().unwrap().content, "1");

        drop(reader);

        tokio::time::timeout(Duration::from_secs(1), closed).await.unwrap().unwrap();
    }
}
