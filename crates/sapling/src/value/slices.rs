//! Rune and byte slices, and lazy concatenations

use std::sync::Arc;

use parking_lot::RwLock;

use crate::context::Context;
use crate::error::{Result, RuntimeError};

use super::{SmartLock, Value};

/// A mutable sequence of runes.
pub struct RuneSlice {
    runes: RwLock<Vec<char>>,
    lock: SmartLock,
    constraint_id: u64,
}

impl RuneSlice {
    /// Create a rune slice.
    pub fn new(runes: Vec<char>) -> Arc<RuneSlice> {
        Self::with_constraint(runes, 0)
    }

    /// Create a constrained rune slice.
    pub fn with_constraint(runes: Vec<char>, constraint_id: u64) -> Arc<RuneSlice> {
        Arc::new(RuneSlice {
            runes: RwLock::new(runes),
            lock: SmartLock::new(),
            constraint_id,
        })
    }

    /// Id of the constraint the slice is bound to (0 for none).
    pub fn constraint_id(&self) -> u64 {
        self.constraint_id
    }

    /// The slice's smart lock.
    pub fn lock(&self) -> &SmartLock {
        &self.lock
    }

    /// Snapshot of the runes.
    pub fn runes(&self) -> Vec<char> {
        self.runes.read().clone()
    }

    /// Number of runes.
    pub fn len(&self) -> usize {
        self.runes.read().len()
    }

    /// Check whether the slice is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rune at `index`.
    pub fn get(&self, index: usize) -> Result<char> {
        let runes = self.runes.read();
        runes.get(index).copied().ok_or(RuntimeError::IndexOutOfBounds {
            index,
            len: runes.len(),
        })
    }

    /// Replace the rune at `index`.
    pub fn set(&self, ctx: &Context, index: usize, rune: char) -> Result<()> {
        let _guard = self.lock.lock(ctx.state_id());
        let mut runes = self.runes.write();
        let len = runes.len();
        let slot = runes
            .get_mut(index)
            .ok_or(RuntimeError::IndexOutOfBounds { index, len })?;
        *slot = rune;
        Ok(())
    }

    /// Append runes.
    pub fn extend(&self, ctx: &Context, more: &[char]) {
        let _guard = self.lock.lock(ctx.state_id());
        self.runes.write().extend_from_slice(more);
    }
}

impl std::fmt::Display for RuneSlice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s: String = self.runes.read().iter().collect();
        f.write_str(&s)
    }
}

/// A sequence of bytes. Immutable slices refuse every modification.
pub struct ByteSlice {
    bytes: RwLock<Vec<u8>>,
    mutable: bool,
    lock: SmartLock,
    constraint_id: u64,
}

impl ByteSlice {
    /// Create a mutable byte slice.
    pub fn new(bytes: Vec<u8>) -> Arc<ByteSlice> {
        Self::build(bytes, true, 0)
    }

    /// Create an immutable byte slice.
    pub fn immutable(bytes: Vec<u8>) -> Arc<ByteSlice> {
        Self::build(bytes, false, 0)
    }

    /// Create a constrained byte slice.
    pub fn with_constraint(bytes: Vec<u8>, constraint_id: u64) -> Arc<ByteSlice> {
        Self::build(bytes, true, constraint_id)
    }

    fn build(bytes: Vec<u8>, mutable: bool, constraint_id: u64) -> Arc<ByteSlice> {
        Arc::new(ByteSlice {
            bytes: RwLock::new(bytes),
            mutable,
            lock: SmartLock::new(),
            constraint_id,
        })
    }

    /// Check whether the slice accepts modifications.
    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    /// Id of the constraint the slice is bound to (0 for none).
    pub fn constraint_id(&self) -> u64 {
        self.constraint_id
    }

    /// The slice's smart lock.
    pub fn lock(&self) -> &SmartLock {
        &self.lock
    }

    /// Snapshot of the bytes.
    pub fn bytes(&self) -> Vec<u8> {
        self.bytes.read().clone()
    }

    /// Number of bytes.
    pub fn len(&self) -> usize {
        self.bytes.read().len()
    }

    /// Check whether the slice is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the byte at `index`.
    pub fn set(&self, ctx: &Context, index: usize, byte: u8) -> Result<()> {
        if !self.mutable {
            return Err(RuntimeError::ImmutableValue("byte slice"));
        }
        let _guard = self.lock.lock(ctx.state_id());
        let mut bytes = self.bytes.write();
        let len = bytes.len();
        let slot = bytes
            .get_mut(index)
            .ok_or(RuntimeError::IndexOutOfBounds { index, len })?;
        *slot = byte;
        Ok(())
    }

    /// Append bytes.
    pub fn extend(&self, ctx: &Context, more: &[u8]) -> Result<()> {
        if !self.mutable {
            return Err(RuntimeError::ImmutableValue("byte slice"));
        }
        let _guard = self.lock.lock(ctx.state_id());
        self.bytes.write().extend_from_slice(more);
        Ok(())
    }
}

/// Lazy concatenation of string-like values.
#[derive(Debug, Clone)]
pub struct StringConcatenation {
    /// Concatenated parts
    pub parts: Vec<Value>,
}

impl StringConcatenation {
    /// Create a concatenation.
    pub fn new(parts: Vec<Value>) -> Self {
        Self { parts }
    }

    /// Build the concatenated string.
    pub fn concatenate(&self) -> String {
        let mut s = String::new();
        for part in &self.parts {
            match part {
                Value::Str(p) => s.push_str(p),
                Value::RuneSlice(r) => s.push_str(&r.to_string()),
                Value::StringConcat(c) => s.push_str(&c.concatenate()),
                other => s.push_str(&other.to_string()),
            }
        }
        s
    }

    /// Length in bytes of the concatenated string.
    pub fn len(&self) -> usize {
        self.concatenate().len()
    }

    /// Check whether the concatenation is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lazy concatenation of byte sequences.
#[derive(Debug, Clone)]
pub struct BytesConcatenation {
    /// Concatenated parts (byte slices or nested concatenations)
    pub parts: Vec<Value>,
}

impl BytesConcatenation {
    /// Create a concatenation.
    pub fn new(parts: Vec<Value>) -> Self {
        Self { parts }
    }

    /// The concatenation is mutable when one of its parts is.
    pub fn is_mutable(&self) -> bool {
        self.parts.iter().any(|p| p.is_mutable())
    }

    /// Build the concatenated bytes.
    pub fn concatenate(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for part in &self.parts {
            match part {
                Value::ByteSlice(b) => out.extend(b.bytes()),
                Value::BytesConcat(c) => out.extend(c.concatenate()),
                Value::Byte(b) => out.push(*b),
                _ => {}
            }
        }
        out
    }
}
