//! Byte streams pulling from a byte source

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{after, select, Receiver};
use parking_lot::Mutex;
use tracing::trace;

use crate::context::Context;
use crate::error::{Result, RuntimeError};
use crate::pattern::Pattern;
use crate::signal::Signal;
use crate::value::{IntRange, Value};

use super::{chunk_bounds, ChunkKind, DataChunk, ReadableStream};

/// Minimum pause before reading again from a temporarily dried up source
/// that offers no recharge notification.
pub const MIN_DRIED_UP_SOURCE_SLEEP: Duration = Duration::from_micros(100);

const READ_ALL_CHUNK_SIZE: i64 = 4096;
const READ_ALL_CHUNK_TIMEOUT: Duration = Duration::from_secs(1);

/// Where a byte stream reads its data from.
///
/// Reads fail with [`RuntimeError::TempDriedUpSource`] when no data is
/// available right now and with [`RuntimeError::DefDriedUpSource`] once the
/// source is exhausted.
pub trait ByteSource: Send + Sync {
    /// Read up to `buf.len()` bytes, returning how many were read.
    fn read_bytes(&self, ctx: &Context, buf: &mut [u8]) -> Result<usize>;

    /// Read a single byte.
    fn read_byte(&self, ctx: &Context) -> Result<u8> {
        let mut buf = [0u8; 1];
        match self.read_bytes(ctx, &mut buf)? {
            0 => Err(RuntimeError::TempDriedUpSource),
            _ => Ok(buf[0]),
        }
    }

    /// Receiver notified when a temporarily dried up source has data again.
    fn recharged(&self) -> Option<Receiver<()>> {
        None
    }
}

/// A byte source over an in-memory buffer.
pub struct MemoryByteSource {
    data: Mutex<(Vec<u8>, usize)>,
}

impl MemoryByteSource {
    /// Source yielding `data`, then [`RuntimeError::DefDriedUpSource`].
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: Mutex::new((data, 0)),
        }
    }
}

impl ByteSource for MemoryByteSource {
    fn read_bytes(&self, _ctx: &Context, buf: &mut [u8]) -> Result<usize> {
        let mut guard = self.data.lock();
        let (data, pos) = &mut *guard;
        if *pos >= data.len() {
            return Err(RuntimeError::DefDriedUpSource);
        }
        let n = buf.len().min(data.len() - *pos);
        buf[..n].copy_from_slice(&data[*pos..*pos + n]);
        *pos += n;
        Ok(n)
    }
}

/// A readable stream of bytes.
pub struct ReadableByteStream {
    source: Arc<dyn ByteSource>,
    ended: AtomicBool,
    stopped: Signal,
}

impl ReadableByteStream {
    /// Stream reading from `source`.
    pub fn new(source: Arc<dyn ByteSource>) -> Self {
        Self {
            source,
            ended: AtomicBool::new(false),
            stopped: Signal::new(),
        }
    }

    /// Read until the end of the stream. Waits for a temporarily dried up
    /// source at most `READ_ALL_CHUNK_TIMEOUT` per chunk.
    pub fn read_all(&self, ctx: &Context) -> Result<Vec<u8>> {
        let mut content = Vec::new();
        loop {
            match self.wait_next_chunk(ctx, None, IntRange::new(1, READ_ALL_CHUNK_SIZE), READ_ALL_CHUNK_TIMEOUT) {
                Ok(chunk) => content.extend(chunk.data().to_bytes().unwrap_or_default()),
                Err(RuntimeError::EndOfStream) => return Ok(content),
                Err(e) => return Err(e),
            }
        }
    }

    fn is_over(&self) -> bool {
        self.stopped.is_fired() || self.ended.load(Ordering::Acquire)
    }

    fn end(&self) -> RuntimeError {
        self.ended.store(true, Ordering::Release);
        RuntimeError::EndOfStream
    }

    /// Wait until the source may have data again.
    fn wait_recharge(&self, ctx: &Context, deadline: Instant, timeout_error: RuntimeError) -> Result<()> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(timeout_error);
        }
        let done = ctx.done();
        let stopped = self.stopped.receiver();
        match self.source.recharged() {
            Some(recharged) => select! {
                recv(recharged) -> _ => Ok(()),
                recv(done) -> _ => Err(RuntimeError::DoneContext),
                recv(stopped) -> _ => Ok(()),
                recv(after(remaining)) -> _ => Err(timeout_error),
            },
            None => select! {
                recv(done) -> _ => Err(RuntimeError::DoneContext),
                recv(stopped) -> _ => Ok(()),
                recv(after(MIN_DRIED_UP_SOURCE_SLEEP.min(remaining))) -> _ => Ok(()),
            },
        }
    }
}

impl ReadableStream for ReadableByteStream {
    fn wait_next(&self, ctx: &Context, filter: Option<&Pattern>, timeout: Duration) -> Result<Value> {
        let deadline = Instant::now() + timeout;
        loop {
            if ctx.is_done() {
                return Err(RuntimeError::DoneContext);
            }
            if self.is_over() {
                return Err(RuntimeError::EndOfStream);
            }
            match self.source.read_byte(ctx) {
                Ok(b) => {
                    let v = Value::Byte(b);
                    match filter {
                        Some(f) if !f.test(ctx, &v) => continue,
                        _ => return Ok(v),
                    }
                }
                Err(RuntimeError::DefDriedUpSource) => return Err(self.end()),
                Err(RuntimeError::TempDriedUpSource) => {
                    trace!("byte source temporarily dried up");
                    self.wait_recharge(ctx, deadline, RuntimeError::StreamElemWaitTimeout)?;
                }
                Err(e) => return Err(e),
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
        let (min, max) = chunk_bounds(size_range);
        let deadline = Instant::now() + timeout;
        let mut data: Vec<u8> = Vec::new();
        let mut step = min;

        while data.len() < max {
            if ctx.is_done() {
                return Err(RuntimeError::DoneContext);
            }
            if self.is_over() {
                break;
            }
            let mut buf = vec![0u8; step.min(max - data.len())];
            let dried_up = match self.source.read_bytes(ctx, &mut buf) {
                Ok(0) => true,
                Ok(n) => {
                    data.extend(buf[..n].iter().copied().filter(|b| {
                        filter.map_or(true, |f| f.test(ctx, &Value::Byte(*b)))
                    }));
                    if n == buf.len() {
                        step = (step * 2).min(max);
                    }
                    false
                }
                Err(RuntimeError::DefDriedUpSource) => {
                    self.ended.store(true, Ordering::Release);
                    break;
                }
                Err(RuntimeError::TempDriedUpSource) => true,
                Err(e) => return Err(e),
            };
            if dried_up {
                if data.len() >= min {
                    break;
                }
                match self.wait_recharge(ctx, deadline, RuntimeError::StreamChunkWaitTimeout) {
                    Ok(()) => {}
                    Err(RuntimeError::StreamChunkWaitTimeout) if !data.is_empty() => break,
                    Err(e) => return Err(e),
                }
            }
        }

        if data.is_empty() {
            return Err(RuntimeError::EndOfStream);
        }
        Ok(DataChunk::bytes(data))
    }

    fn stop(&self) {
        self.stopped.fire();
    }

    fn is_stopped(&self) -> bool {
        self.stopped.is_fired()
    }

    fn is_mainly_chunked(&self) -> bool {
        true
    }

    fn chunk_data_type(&self) -> ChunkKind {
        ChunkKind::Bytes
    }
}
