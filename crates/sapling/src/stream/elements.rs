//! Stream over a finite sequence of values

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;

use crate::context::Context;
use crate::error::{Result, RuntimeError};
use crate::pattern::Pattern;
use crate::signal::Signal;
use crate::value::{IntRange, Value};

use super::{chunk_bounds, ChunkKind, DataChunk, ReadableStream};

/// A readable stream over in-memory values. It never waits: once the values
/// are consumed every read fails with [`RuntimeError::EndOfStream`].
pub struct ElementsStream {
    elements: Mutex<VecDeque<Value>>,
    filter: Option<Pattern>,
    stopped: Signal,
}

impl ElementsStream {
    /// Stream over `elements`.
    pub fn new(elements: Vec<Value>) -> Self {
        Self {
            elements: Mutex::new(elements.into()),
            filter: None,
            stopped: Signal::new(),
        }
    }

    /// Stream over the elements accepted by `filter`.
    pub fn with_filter(elements: Vec<Value>, filter: Pattern) -> Self {
        Self {
            filter: Some(filter),
            ..Self::new(elements)
        }
    }

    /// Number of values not consumed yet (filters ignored).
    pub fn remaining(&self) -> usize {
        self.elements.lock().len()
    }

    fn pop(&self, ctx: &Context, filter: Option<&Pattern>) -> Option<Value> {
        let mut elements = self.elements.lock();
        while let Some(v) = elements.pop_front() {
            let accepted = self.filter.iter().chain(filter).all(|f| f.test(ctx, &v));
            if accepted {
                return Some(v);
            }
        }
        None
    }
}

impl ReadableStream for ElementsStream {
    fn wait_next(&self, ctx: &Context, filter: Option<&Pattern>, _timeout: Duration) -> Result<Value> {
        if ctx.is_done() {
            return Err(RuntimeError::DoneContext);
        }
        if self.stopped.is_fired() {
            return Err(RuntimeError::EndOfStream);
        }
        self.pop(ctx, filter).ok_or(RuntimeError::EndOfStream)
    }

    fn wait_next_chunk(
        &self,
        ctx: &Context,
        filter: Option<&Pattern>,
        size_range: IntRange,
        _timeout: Duration,
    ) -> Result<DataChunk> {
        if ctx.is_done() {
            return Err(RuntimeError::DoneContext);
        }
        if self.stopped.is_fired() {
            return Err(RuntimeError::EndOfStream);
        }
        let (_, max) = chunk_bounds(size_range);
        let mut values = Vec::new();
        while values.len() < max {
            match self.pop(ctx, filter) {
                Some(v) => values.push(v),
                None => break,
            }
        }
        if values.is_empty() {
            return Err(RuntimeError::EndOfStream);
        }
        Ok(DataChunk::elements(values))
    }

    fn stop(&self) {
        self.stopped.fire();
    }

    fn is_stopped(&self) -> bool {
        self.stopped.is_fired()
    }

    fn is_mainly_chunked(&self) -> bool {
        false
    }

    fn chunk_data_type(&self) -> ChunkKind {
        ChunkKind::Elements
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextConfig;
    use pretty_assertions::assert_eq;

    fn ctx() -> Context {
        Context::new(ContextConfig::new()).unwrap()
    }

    #[test]
    fn test_delivers_in_order_then_ends() {
        let ctx = ctx();
        let stream = ElementsStream::new(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let timeout = Duration::from_millis(10);
        for i in 1..=3 {
            assert_eq!(stream.wait_next(&ctx, None, timeout).unwrap(), Value::Int(i));
        }
        assert!(matches!(stream.wait_next(&ctx, None, timeout), Err(RuntimeError::EndOfStream)));
        assert!(matches!(stream.wait_next(&ctx, None, timeout), Err(RuntimeError::EndOfStream)));
    }

    #[test]
    fn test_filters() {
        let ctx = ctx();
        let values = vec![Value::Int(1), Value::string("a"), Value::Int(2)];
        let stream = ElementsStream::with_filter(values, Pattern::int());
        let two = Pattern::int_range(IntRange::new(2, 2));
        assert_eq!(stream.wait_next(&ctx, Some(&two), Duration::ZERO).unwrap(), Value::Int(2));
        assert_eq!(stream.remaining(), 0);
    }

    #[test]
    fn test_chunks() {
        let ctx = ctx();
        let values = (0..5).map(Value::Int).collect();
        let stream = ElementsStream::new(values);
        let first = stream
            .wait_next_chunk(&ctx, None, IntRange::new(1, 3), Duration::ZERO)
            .unwrap();
        assert_eq!(first.len(), 3);
        let second = stream
            .wait_next_chunk(&ctx, None, IntRange::new(1, 3), Duration::ZERO)
            .unwrap();
        assert_eq!(second.data(), &Value::list(vec![Value::Int(3), Value::Int(4)]));
        assert!(matches!(
            stream.wait_next_chunk(&ctx, None, IntRange::new(1, 3), Duration::ZERO),
            Err(RuntimeError::EndOfStream)
        ));
    }

    #[test]
    fn test_stopped_stream_ends() {
        let ctx = ctx();
        let stream = ElementsStream::new(vec![Value::Int(1)]);
        stream.stop();
        assert!(stream.is_stopped());
        assert!(matches!(stream.wait_next(&ctx, None, Duration::ZERO), Err(RuntimeError::EndOfStream)));
    }
}
