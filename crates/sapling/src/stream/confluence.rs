//! Merge of several streams

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use crate::context::Context;
use crate::error::{Result, RuntimeError};
use crate::pattern::Pattern;
use crate::value::{IntRange, Value};

use super::{chunk_bounds, ChunkKind, DataChunk, ReadableStream};

/// A stream merging the values of at least two streams of the same kind.
///
/// Each component gets an equal share of the timeout. A merged chunk never
/// exceeds the requested maximum: each component is only asked for the
/// room left. The confluence ends once every component has ended.
pub struct ConfluenceStream {
    streams: Vec<Arc<dyn ReadableStream>>,
    ended: Mutex<Vec<bool>>,
    next: AtomicUsize,
    chunked: bool,
    kind: ChunkKind,
}

impl ConfluenceStream {
    /// Merge `streams`; they must agree on chunkedness and chunk data type.
    pub fn new(streams: Vec<Arc<dyn ReadableStream>>) -> Result<Self> {
        let [first, rest @ ..] = streams.as_slice() else {
            return Err(RuntimeError::InvalidConfluence("no streams".into()));
        };
        if rest.is_empty() {
            return Err(RuntimeError::InvalidConfluence(
                "at least two streams are required".into(),
            ));
        }
        let chunked = first.is_mainly_chunked();
        let kind = first.chunk_data_type();
        if rest.iter().any(|s| s.is_mainly_chunked() != chunked) {
            return Err(RuntimeError::InvalidConfluence(
                "streams differ in chunkedness".into(),
            ));
        }
        if rest.iter().any(|s| s.chunk_data_type() != kind) {
            return Err(RuntimeError::InvalidConfluence(
                "streams differ in chunk data type".into(),
            ));
        }
        let ended = Mutex::new(vec![false; streams.len()]);
        Ok(Self {
            streams,
            ended,
            next: AtomicUsize::new(0),
            chunked,
            kind,
        })
    }

    /// Indices of the components that have not ended, starting with the
    /// next one in round-robin order.
    fn active(&self) -> Vec<usize> {
        let ended = self.ended.lock();
        let n = self.streams.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed) % n;
        (0..n).map(|i| (start + i) % n).filter(|i| !ended[*i]).collect()
    }

    fn mark_ended(&self, index: usize) {
        trace!(index, "confluence component ended");
        self.ended.lock()[index] = true;
    }

    fn all_ended(&self) -> bool {
        self.ended.lock().iter().all(|e| *e)
    }

    fn share(&self, timeout: Duration) -> Duration {
        timeout / self.streams.len() as u32
    }
}

impl ReadableStream for ConfluenceStream {
    fn wait_next(&self, ctx: &Context, filter: Option<&Pattern>, timeout: Duration) -> Result<Value> {
        let share = self.share(timeout);
        for index in self.active() {
            match self.streams[index].wait_next(ctx, filter, share) {
                Ok(v) => return Ok(v),
                Err(RuntimeError::EndOfStream) => self.mark_ended(index),
                Err(RuntimeError::StreamElemWaitTimeout) => {}
                Err(e) => return Err(e),
            }
        }
        if self.all_ended() {
            Err(RuntimeError::EndOfStream)
        } else {
            Err(RuntimeError::StreamElemWaitTimeout)
        }
    }

    fn wait_next_chunk(
        &self,
        ctx: &Context,
        filter: Option<&Pattern>,
        size_range: IntRange,
        timeout: Duration,
    ) -> Result<DataChunk> {
        let share = self.share(timeout);
        let (_, max) = chunk_bounds(size_range);
        let mut merged: Option<DataChunk> = None;
        for index in self.active() {
            let remaining = max - merged.as_ref().map_or(0, DataChunk::len);
            if remaining == 0 {
                break;
            }
            let budget = IntRange::new(1, remaining as i64);
            match self.streams[index].wait_next_chunk(ctx, filter, budget, share) {
                Ok(chunk) => match &mut merged {
                    Some(m) => m.merge(chunk)?,
                    None => merged = Some(chunk),
                },
                Err(RuntimeError::EndOfStream) => self.mark_ended(index),
                Err(RuntimeError::StreamChunkWaitTimeout) => {}
                Err(e) => return Err(e),
            }
        }
        match merged {
            Some(chunk) => Ok(chunk),
            None if self.all_ended() => Err(RuntimeError::EndOfStream),
            None => Err(RuntimeError::StreamChunkWaitTimeout),
        }
    }

    fn stop(&self) {
        for s in &self.streams {
            s.stop();
        }
    }

    fn is_stopped(&self) -> bool {
        self.streams.iter().all(|s| s.is_stopped())
    }

    fn is_mainly_chunked(&self) -> bool {
        self.chunked
    }

    fn chunk_data_type(&self) -> ChunkKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextConfig;
    use crate::stream::{ElementsStream, MemoryByteSource, ReadableByteStream};
    use pretty_assertions::assert_eq;

    fn ctx() -> Context {
        Context::new(ContextConfig::new()).unwrap()
    }

    fn elements(values: &[i64]) -> Arc<dyn ReadableStream> {
        Arc::new(ElementsStream::new(values.iter().copied().map(Value::Int).collect()))
    }

    #[test]
    fn test_invalid_confluences() {
        assert!(matches!(
            ConfluenceStream::new(vec![elements(&[1])]),
            Err(RuntimeError::InvalidConfluence(_))
        ));
        let bytes: Arc<dyn ReadableStream> =
            Arc::new(ReadableByteStream::new(Arc::new(MemoryByteSource::new(vec![1]))));
        assert!(matches!(
            ConfluenceStream::new(vec![elements(&[1]), bytes]),
            Err(RuntimeError::InvalidConfluence(_))
        ));
    }

    #[test]
    fn test_yields_union_then_ends() {
        let ctx = ctx();
        let stream = ConfluenceStream::new(vec![elements(&[1, 2]), elements(&[3])]).unwrap();
        let mut seen = Vec::new();
        loop {
            match stream.wait_next(&ctx, None, Duration::from_millis(10)) {
                Ok(v) => seen.push(v.as_int().unwrap()),
                Err(RuntimeError::EndOfStream) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        seen.sort();
        assert_eq!(seen, vec![1, 2, 3]);
        assert!(matches!(
            stream.wait_next(&ctx, None, Duration::from_millis(10)),
            Err(RuntimeError::EndOfStream)
        ));
    }

    #[test]
    fn test_chunks_are_merged() {
        let ctx = ctx();
        let stream = ConfluenceStream::new(vec![elements(&[1, 2]), elements(&[3])]).unwrap();
        let chunk = stream
            .wait_next_chunk(&ctx, None, IntRange::new(1, 10), Duration::from_millis(10))
            .unwrap();
        assert_eq!(chunk.len(), 3);
        assert!(matches!(
            stream.wait_next_chunk(&ctx, None, IntRange::new(1, 10), Duration::from_millis(10)),
            Err(RuntimeError::EndOfStream)
        ));
    }

    #[test]
    fn test_merged_chunk_respects_maximum() {
        let ctx = ctx();
        let stream = ConfluenceStream::new(vec![elements(&[1, 2, 3]), elements(&[4, 5, 6])]).unwrap();
        let mut total = 0;
        loop {
            match stream.wait_next_chunk(&ctx, None, IntRange::new(1, 4), Duration::from_millis(10)) {
                Ok(chunk) => {
                    assert!(chunk.len() <= 4, "chunk of {} elements", chunk.len());
                    total += chunk.len();
                }
                Err(RuntimeError::EndOfStream) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(total, 6);
    }
}
