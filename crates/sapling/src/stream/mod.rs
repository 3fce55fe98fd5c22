//! Readable and writable streams
//!
//! A readable stream hands out values one at a time ([`ReadableStream::wait_next`])
//! or in batches ([`ReadableStream::wait_next_chunk`]). Every wait is bounded by
//! a timeout and by the cancellation of the calling context. A chunk wait that
//! accumulated data before reaching the end of the stream or the timeout
//! returns the partial chunk; the following call surfaces the terminal error.

mod bytes;
mod channel;
mod confluence;
mod elements;
mod watcher;

pub use bytes::{ByteSource, MemoryByteSource, ReadableByteStream, MIN_DRIED_UP_SOURCE_SLEEP};
pub use channel::ChannelStream;
pub use confluence::ConfluenceStream;
pub use elements::ElementsStream;
pub use watcher::WrappedWatcherStream;

use std::fmt;
use std::time::{Duration, Instant};

use crate::context::Context;
use crate::error::{type_name, Result, RuntimeError};
use crate::pattern::Pattern;
use crate::value::{ByteSlice, IntRange, List, ListData, Value};

/// Kind of data carried by the chunks of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// A list of values
    Elements,
    /// A byte slice
    Bytes,
}

/// Merges `other` into `data` in place.
pub type ChunkMergeFn = fn(&mut Value, Value) -> Result<()>;

/// A batch of stream elements.
#[derive(Clone)]
pub struct DataChunk {
    data: Value,
    merge: Option<ChunkMergeFn>,
}

impl DataChunk {
    /// Chunk without merge support.
    pub fn new(data: Value) -> Self {
        Self { data, merge: None }
    }

    /// Chunk holding a list of values.
    pub fn elements(values: Vec<Value>) -> Self {
        Self {
            data: Value::List(List::from_values(values)),
            merge: Some(merge_elements),
        }
    }

    /// Chunk holding bytes.
    pub fn bytes(bytes: Vec<u8>) -> Self {
        Self {
            data: Value::ByteSlice(ByteSlice::immutable(bytes)),
            merge: Some(merge_bytes),
        }
    }

    /// The chunk's data.
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Consume the chunk, returning its data.
    pub fn into_data(self) -> Value {
        self.data
    }

    /// Number of elements (or bytes) in the chunk.
    pub fn len(&self) -> usize {
        match &self.data {
            Value::List(l) => l.len(),
            Value::ByteSlice(b) => b.len(),
            Value::Tuple(t) => t.len(),
            _ => 1,
        }
    }

    /// Check whether the chunk is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append the data of `other` to this chunk.
    pub fn merge(&mut self, other: DataChunk) -> Result<()> {
        let Some(merge) = self.merge else {
            return Err(RuntimeError::InvalidStreamChunkData);
        };
        merge(&mut self.data, other.data)
    }
}

impl fmt::Debug for DataChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataChunk")
            .field("data", &self.data)
            .field("mergeable", &self.merge.is_some())
            .finish()
    }
}

fn concat_list_data(left: ListData, right: ListData) -> Result<ListData> {
    match (left, right) {
        (ListData::Values(mut a), ListData::Values(b)) => {
            a.extend(b);
            Ok(ListData::Values(a))
        }
        (ListData::Ints(mut a), ListData::Ints(b)) => {
            a.extend(b);
            Ok(ListData::Ints(a))
        }
        (ListData::Bools(mut a), ListData::Bools(b)) => {
            a.extend(b);
            Ok(ListData::Bools(a))
        }
        (ListData::Strings(mut a), ListData::Strings(b)) => {
            a.extend(b);
            Ok(ListData::Strings(a))
        }
        (left, right) => Err(RuntimeError::IncompatibleListElement {
            list_kind: left.kind_name(),
            got: right.kind_name().to_string(),
        }),
    }
}

fn merge_elements(data: &mut Value, other: Value) -> Result<()> {
    match (&*data, &other) {
        (Value::List(a), Value::List(b)) => {
            let merged = concat_list_data(a.data(), b.data())?;
            *data = Value::List(List::new(merged));
            Ok(())
        }
        (Value::List(_), other) => Err(RuntimeError::type_error("list", other)),
        _ => Err(RuntimeError::InvalidStreamChunkData),
    }
}

fn merge_bytes(data: &mut Value, other: Value) -> Result<()> {
    let (Some(mut a), Some(b)) = (data.to_bytes(), other.to_bytes()) else {
        return Err(RuntimeError::InvalidStreamChunkData);
    };
    a.extend(b);
    *data = Value::ByteSlice(ByteSlice::immutable(a));
    Ok(())
}

/// A stream of values that can be read.
pub trait ReadableStream: Send + Sync {
    /// Wait for the next value accepted by `filter`.
    ///
    /// Fails with [`RuntimeError::EndOfStream`] once the stream is exhausted
    /// or stopped and with [`RuntimeError::StreamElemWaitTimeout`] when the
    /// timeout elapses.
    fn wait_next(&self, ctx: &Context, filter: Option<&Pattern>, timeout: Duration)
        -> Result<Value>;

    /// Wait for a chunk whose size lies in `size_range`.
    ///
    /// Fails with [`RuntimeError::EndOfStream`] or
    /// [`RuntimeError::StreamChunkWaitTimeout`] when no data at all could be
    /// read.
    fn wait_next_chunk(
        &self,
        ctx: &Context,
        filter: Option<&Pattern>,
        size_range: IntRange,
        timeout: Duration,
    ) -> Result<DataChunk>;

    /// Stop the stream.
    fn stop(&self);

    /// Check whether the stream is stopped.
    fn is_stopped(&self) -> bool;

    /// Check whether the stream is meant to be read by chunks.
    fn is_mainly_chunked(&self) -> bool;

    /// Kind of data carried by chunks.
    fn chunk_data_type(&self) -> ChunkKind;
}

/// A stream of values that can be written.
pub trait WritableStream: Send + Sync {
    /// Write a value.
    fn write(&self, ctx: &Context, value: Value) -> Result<()>;

    /// Write every element of a chunk.
    fn write_chunk(&self, ctx: &Context, chunk: DataChunk) -> Result<()>;

    /// Stop the stream; readers see the end of the stream once the buffered
    /// values are consumed.
    fn stop(&self);

    /// Check whether the stream is stopped.
    fn is_stopped(&self) -> bool;
}

/// Minimum and maximum chunk sizes of a size range. The minimum is at least
/// one element.
pub(crate) fn chunk_bounds(size_range: IntRange) -> (usize, usize) {
    let min = size_range.start.max(1) as usize;
    let max = (size_range.end.max(0) as usize).max(min);
    (min, max)
}

/// Build a chunk by repeatedly pulling single values with `next`.
///
/// `next` receives the time left before the deadline and follows the
/// [`ReadableStream::wait_next`] error contract.
pub(crate) fn collect_chunk(
    kind: ChunkKind,
    size_range: IntRange,
    timeout: Duration,
    mut next: impl FnMut(Duration) -> Result<Value>,
) -> Result<DataChunk> {
    let (min, max) = chunk_bounds(size_range);
    let deadline = Instant::now() + timeout;
    let mut values = Vec::new();

    while values.len() < min {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match next(remaining) {
            Ok(v) => values.push(v),
            Err(RuntimeError::EndOfStream | RuntimeError::StreamElemWaitTimeout)
                if !values.is_empty() =>
            {
                break
            }
            Err(RuntimeError::StreamElemWaitTimeout) => {
                return Err(RuntimeError::StreamChunkWaitTimeout)
            }
            Err(e) => return Err(e),
        }
    }
    // take what is immediately available
    while values.len() < max {
        match next(Duration::ZERO) {
            Ok(v) => values.push(v),
            Err(_) => break,
        }
    }
    pack(kind, values)
}

pub(crate) fn pack(kind: ChunkKind, values: Vec<Value>) -> Result<DataChunk> {
    match kind {
        ChunkKind::Elements => Ok(DataChunk::elements(values)),
        ChunkKind::Bytes => {
            let bytes = values
                .iter()
                .map(|v| match v {
                    Value::Byte(b) => Ok(*b),
                    other => Err(RuntimeError::type_error("byte", other)),
                })
                .collect::<Result<Vec<u8>>>()?;
            Ok(DataChunk::bytes(bytes))
        }
    }
}

pub(crate) fn check_chunk_data(kind: ChunkKind, chunk: &DataChunk) -> Result<Vec<Value>> {
    match (kind, chunk.data()) {
        (ChunkKind::Elements, Value::List(l)) => Ok(l.elements()),
        (ChunkKind::Elements, Value::Tuple(t)) => Ok(t.elements().to_vec()),
        (ChunkKind::Bytes, data) => match data.to_bytes() {
            Some(bytes) => Ok(bytes.into_iter().map(Value::Byte).collect()),
            None => Err(RuntimeError::InvalidStreamChunkData),
        },
        (ChunkKind::Elements, other) => {
            tracing::trace!(got = type_name(other), "rejected chunk data");
            Err(RuntimeError::InvalidStreamChunkData)
        }
    }
}
