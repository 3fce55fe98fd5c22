//! Stream reading the values delivered to a watcher

use std::sync::Arc;
use std::time::Duration;

use crate::context::Context;
use crate::error::{Result, RuntimeError};
use crate::pattern::Pattern;
use crate::value::{IntRange, Value};
use crate::watch::Watcher;

use super::{collect_chunk, ChunkKind, DataChunk, ReadableStream};

/// Adapts a watcher to the stream interface: a stopped watcher is the end
/// of the stream and a watch timeout is an element wait timeout.
pub struct WrappedWatcherStream {
    watcher: Arc<dyn Watcher>,
}

impl WrappedWatcherStream {
    /// Wrap a watcher.
    pub fn new(watcher: Arc<dyn Watcher>) -> Self {
        Self { watcher }
    }

    /// The wrapped watcher.
    pub fn watcher(&self) -> &Arc<dyn Watcher> {
        &self.watcher
    }
}

impl ReadableStream for WrappedWatcherStream {
    fn wait_next(&self, ctx: &Context, filter: Option<&Pattern>, timeout: Duration) -> Result<Value> {
        self.watcher
            .wait_next(ctx, filter, timeout)
            .map_err(|e| match e {
                RuntimeError::StoppedWatcher => RuntimeError::EndOfStream,
                RuntimeError::WatchTimeout => RuntimeError::StreamElemWaitTimeout,
                other => other,
            })
    }

    fn wait_next_chunk(
        &self,
        ctx: &Context,
        filter: Option<&Pattern>,
        size_range: IntRange,
        timeout: Duration,
    ) -> Result<DataChunk> {
        collect_chunk(ChunkKind::Elements, size_range, timeout, |remaining| {
            self.wait_next(ctx, filter, remaining)
        })
    }

    fn stop(&self) {
        self.watcher.stop();
    }

    fn is_stopped(&self) -> bool {
        self.watcher.is_stopped()
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
    use crate::watch::{GenericWatcher, WatcherConfiguration};
    use pretty_assertions::assert_eq;

    fn setup() -> (Context, Arc<GenericWatcher>, WrappedWatcherStream) {
        let ctx = Context::new(ContextConfig::new()).unwrap();
        let watcher = Arc::new(GenericWatcher::new(WatcherConfiguration::new()));
        let stream = WrappedWatcherStream::new(watcher.clone());
        (ctx, watcher, stream)
    }

    #[test]
    fn test_error_mapping() {
        let (ctx, watcher, stream) = setup();
        let timeout = Duration::from_millis(5);
        assert!(matches!(
            stream.wait_next(&ctx, None, timeout),
            Err(RuntimeError::StreamElemWaitTimeout)
        ));
        watcher.inform_about_async(&ctx, Value::Int(1));
        assert_eq!(stream.wait_next(&ctx, None, timeout).unwrap(), Value::Int(1));
        stream.stop();
        assert!(matches!(stream.wait_next(&ctx, None, timeout), Err(RuntimeError::EndOfStream)));
    }

    #[test]
    fn test_partial_chunk_on_timeout() {
        let (ctx, watcher, stream) = setup();
        watcher.inform_about_async(&ctx, Value::Int(1));
        watcher.inform_about_async(&ctx, Value::Int(2));
        let chunk = stream
            .wait_next_chunk(&ctx, None, IntRange::new(5, 10), Duration::from_millis(20))
            .unwrap();
        assert_eq!(chunk.data(), &Value::list(vec![Value::Int(1), Value::Int(2)]));
        assert!(matches!(
            stream.wait_next_chunk(&ctx, None, IntRange::new(5, 10), Duration::from_millis(5)),
            Err(RuntimeError::StreamChunkWaitTimeout)
        ));
    }
}
