//! Buffered write handle bound to one stream.

use std::sync::{Arc, Weak};

use crate::connection::Stream;
use crate::error::{Result, StrataError};
use crate::store::{SharedBatch, lock_batch};
use crate::value::{Point, Timestamp, Value, ValueKind};

/// Writes points into one stream.
///
/// Points are collected in a local batch and moved into the stream's write
/// buffer once the batch reaches the connection's
/// [`inserter_batch_size`](crate::config::Options::inserter_batch_size), so
/// the store's lock is taken once per batch rather than once per point.
///
/// The batch is registered with the stream's store: scans prepared while
/// the inserter is live see its points, and a flush of the store (including
/// the one run by [`Connection::close`](crate::Connection::close)) moves
/// them into the write buffer first. Only [`Inserter::flush`] and
/// [`Inserter::close`] make points durable. Dropping an inserter moves its
/// pending batch into the write buffer without flushing.
#[derive(Debug)]
pub struct Inserter {
    stream: Weak<Stream>,
    kind: ValueKind,
    selector: String,
    batch: SharedBatch,
    batch_size: usize,
}

impl Inserter {
    pub(crate) fn new(stream: &Arc<Stream>, batch_size: usize) -> Self {
        Self {
            stream: Arc::downgrade(stream),
            kind: stream.kind(),
            selector: stream.info().canonical.clone(),
            batch: stream.store().register_batch(batch_size),
            batch_size,
        }
    }

    /// Value kind of the bound stream.
    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Canonical selector of the bound stream.
    pub fn selector(&self) -> &str {
        &self.selector
    }

    /// Points batched locally and not yet handed to the store.
    pub fn pending(&self) -> usize {
        lock_batch(&self.batch).len()
    }

    /// Inserts one point.
    ///
    /// # Errors
    ///
    /// - [`StrataError::UseAfterClose`] if the connection was closed
    /// - [`StrataError::TypeMismatch`] if `value` is not of the stream's kind;
    ///   nothing is inserted
    /// - a storage error if pushing a full batch triggers a failed auto-flush
    pub fn insert(&mut self, timestamp: Timestamp, value: Value) -> Result<()> {
        if self.stream.strong_count() == 0 {
            return Err(StrataError::UseAfterClose { handle: "inserter" });
        }
        if value.kind() != self.kind {
            return Err(StrataError::TypeMismatch {
                expected: self.kind,
                found: value.kind(),
            });
        }

        let full = {
            let mut batch = lock_batch(&self.batch);
            batch.push(Point { timestamp, value });
            batch.len() >= self.batch_size
        };
        if full {
            self.push_batch()?;
        }
        Ok(())
    }

    /// Inserts an unsigned integer point.
    ///
    /// # Errors
    ///
    /// See [`Inserter::insert`].
    pub fn insert_unsigned(&mut self, timestamp: Timestamp, value: u64) -> Result<()> {
        self.insert(timestamp, Value::UnsignedInteger(value))
    }

    /// Inserts a signed integer point.
    ///
    /// # Errors
    ///
    /// See [`Inserter::insert`].
    pub fn insert_signed(&mut self, timestamp: Timestamp, value: i64) -> Result<()> {
        self.insert(timestamp, Value::SignedInteger(value))
    }

    /// Inserts a float point.
    ///
    /// # Errors
    ///
    /// See [`Inserter::insert`].
    pub fn insert_float(&mut self, timestamp: Timestamp, value: f64) -> Result<()> {
        self.insert(timestamp, Value::Float(value))
    }

    /// Pushes the local batch and durably flushes the stream's write buffer.
    ///
    /// # Errors
    ///
    /// [`StrataError::UseAfterClose`] if the connection was closed, or a
    /// storage error if the segment cannot be written. A failed flush keeps
    /// the points buffered.
    pub fn flush(&mut self) -> Result<()> {
        let stream = self.upgrade()?;
        stream.store().flush()?;
        Ok(())
    }

    /// Flushes and releases the inserter.
    ///
    /// # Errors
    ///
    /// See [`Inserter::flush`].
    pub fn close(mut self) -> Result<()> {
        self.flush()
    }

    fn push_batch(&mut self) -> Result<()> {
        let stream = self.upgrade()?;
        stream.store().append_shared(&self.batch)
    }

    fn upgrade(&self) -> Result<Arc<Stream>> {
        self.stream
            .upgrade()
            .ok_or(StrataError::UseAfterClose { handle: "inserter" })
    }
}

impl Drop for Inserter {
    fn drop(&mut self) {
        let pending = self.pending();
        if pending == 0 {
            return;
        }
        match self.stream.upgrade() {
            Some(stream) => {
                if let Err(e) = stream.store().append_shared(&self.batch) {
                    tracing::warn!("dropping inserter for {}: {e}", self.selector);
                }
            }
            None => tracing::warn!(
                "discarding {pending} unsent point(s) for {}: connection closed",
                self.selector
            ),
        }
    }
}
