//! In-process stream written on one end and read on the other

use std::time::{Duration, Instant};

use crossbeam::channel::{after, select, unbounded, Receiver, Sender};
use tracing::trace;

use crate::context::Context;
use crate::error::{Result, RuntimeError};
use crate::pattern::Pattern;
use crate::signal::Signal;
use crate::value::{IntRange, Value};

use super::{check_chunk_data, collect_chunk, ChunkKind, DataChunk, ReadableStream, WritableStream};

/// A writable stream whose values are read through [`ReadableStream`].
///
/// Element streams accept sharable values, byte streams accept bytes.
/// Stopping the stream rejects further writes; readers drain the buffered
/// values and then see the end of the stream.
pub struct ChannelStream {
    kind: ChunkKind,
    sender: Sender<Value>,
    receiver: Receiver<Value>,
    stopped: Signal,
}

impl ChannelStream {
    /// Create a stream of `kind`.
    pub fn new(kind: ChunkKind) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            kind,
            sender,
            receiver,
            stopped: Signal::new(),
        }
    }

    fn check_element(&self, value: &Value) -> Result<()> {
        let valid = match self.kind {
            ChunkKind::Elements => value.is_sharable(),
            ChunkKind::Bytes => matches!(value, Value::Byte(_)),
        };
        if valid {
            Ok(())
        } else {
            Err(RuntimeError::InvalidStreamElement)
        }
    }
}

impl WritableStream for ChannelStream {
    fn write(&self, ctx: &Context, value: Value) -> Result<()> {
        if ctx.is_done() {
            return Err(RuntimeError::DoneContext);
        }
        if self.stopped.is_fired() {
            return Err(RuntimeError::StoppedWritableStream);
        }
        self.check_element(&value)?;
        self.sender
            .send(value)
            .map_err(|_| RuntimeError::StoppedWritableStream)
    }

    fn write_chunk(&self, ctx: &Context, chunk: DataChunk) -> Result<()> {
        if ctx.is_done() {
            return Err(RuntimeError::DoneContext);
        }
        if self.stopped.is_fired() {
            return Err(RuntimeError::StoppedWritableStream);
        }
        let values = check_chunk_data(self.kind, &chunk)?;
        if values.iter().any(|v| self.check_element(v).is_err()) {
            return Err(RuntimeError::InvalidStreamChunkData);
        }
        trace!(len = values.len(), "chunk written");
        for v in values {
            self.sender
                .send(v)
                .map_err(|_| RuntimeError::StoppedWritableStream)?;
        }
        Ok(())
    }

    fn stop(&self) {
        self.stopped.fire();
    }

    fn is_stopped(&self) -> bool {
        self.stopped.is_fired()
    }
}

impl ReadableStream for ChannelStream {
    fn wait_next(&self, ctx: &Context, filter: Option<&Pattern>, timeout: Duration) -> Result<Value> {
        let deadline = Instant::now() + timeout;
        let done = ctx.done();
        let stopped = self.stopped.receiver();
        loop {
            let accept = |v: Value| match filter {
                Some(f) if !f.test(ctx, &v) => None,
                _ => Some(v),
            };
            if let Ok(v) = self.receiver.try_recv() {
                match accept(v) {
                    Some(v) => return Ok(v),
                    None => continue,
                }
            }
            if self.stopped.is_fired() {
                return Err(RuntimeError::EndOfStream);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            select! {
                recv(self.receiver) -> v => {
                    let Ok(v) = v else {
                        return Err(RuntimeError::EndOfStream);
                    };
                    if let Some(v) = accept(v) {
                        return Ok(v);
                    }
                }
                recv(done) -> _ => return Err(RuntimeError::DoneContext),
                // drained on the next turn
                recv(stopped) -> _ => {}
                recv(after(remaining)) -> _ => return Err(RuntimeError::StreamElemWaitTimeout),
            }
        }
    }

    fn wait_next_chunk(
        &self,
        ctx: &Context,
        filter: Option<&Pattern>,
        size_range: IntRange,
        timeout: Duration,
    ) -> Result<DataChunk> {
        collect_chunk(self.kind, size_range, timeout, |remaining| {
            ReadableStream::wait_next(self, ctx, filter, remaining)
        })
    }

    fn stop(&self) {
        self.stopped.fire();
    }

    fn is_stopped(&self) -> bool {
        self.stopped.is_fired()
    }

    fn is_mainly_chunked(&self) -> bool {
        self.kind == ChunkKind::Bytes
    }

    fn chunk_data_type(&self) -> ChunkKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextConfig;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::thread;

    fn ctx() -> Context {
        Context::new(ContextConfig::new()).unwrap()
    }

    #[test]
    fn test_write_then_read() {
        let ctx = ctx();
        let stream = ChannelStream::new(ChunkKind::Elements);
        stream.write(&ctx, Value::Int(1)).unwrap();
        stream.write_chunk(&ctx, DataChunk::elements(vec![Value::Int(2), Value::Int(3)])).unwrap();
        let chunk = stream
            .wait_next_chunk(&ctx, None, IntRange::new(1, 10), Duration::from_millis(10))
            .unwrap();
        assert_eq!(chunk.data(), &Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]));
    }

    #[test]
    fn test_invalid_writes() {
        let ctx = ctx();
        let bytes = ChannelStream::new(ChunkKind::Bytes);
        assert!(matches!(bytes.write(&ctx, Value::Int(1)), Err(RuntimeError::InvalidStreamElement)));
        assert!(matches!(
            bytes.write_chunk(&ctx, DataChunk::elements(vec![Value::Int(1)])),
            Err(RuntimeError::InvalidStreamChunkData)
        ));
        bytes.write_chunk(&ctx, DataChunk::bytes(b"ok".to_vec())).unwrap();

        let elements = ChannelStream::new(ChunkKind::Elements);
        assert!(matches!(
            elements.write_chunk(&ctx, DataChunk::new(Value::Int(1))),
            Err(RuntimeError::InvalidStreamChunkData)
        ));
        WritableStream::stop(&elements);
        assert!(matches!(
            elements.write(&ctx, Value::Int(1)),
            Err(RuntimeError::StoppedWritableStream)
        ));
    }

    #[test]
    fn test_stop_drains_then_ends() {
        let ctx = ctx();
        let stream = ChannelStream::new(ChunkKind::Bytes);
        stream.write(&ctx, Value::Byte(1)).unwrap();
        WritableStream::stop(&stream);
        let timeout = Duration::from_millis(10);
        assert_eq!(ReadableStream::wait_next(&stream, &ctx, None, timeout).unwrap(), Value::Byte(1));
        assert!(matches!(
            ReadableStream::wait_next(&stream, &ctx, None, timeout),
            Err(RuntimeError::EndOfStream)
        ));
    }

    #[test]
    fn test_reader_wakes_up_on_write() {
        let ctx = ctx();
        let stream = Arc::new(ChannelStream::new(ChunkKind::Elements));
        let writer = {
            let stream = stream.clone();
            let ctx = ctx.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                stream.write(&ctx, Value::string("hi")).unwrap();
            })
        };
        let v = ReadableStream::wait_next(&*stream, &ctx, None, Duration::from_secs(2)).unwrap();
        assert_eq!(v, Value::string("hi"));
        writer.join().unwrap();
    }
}
