//! Per-stream point store: an in-memory write buffer in front of immutable
//! durable segments.
//!
//! # Design
//!
//! - Appends push onto the write buffer under a brief write lock; there is
//!   no ordering requirement on insert.
//! - Inserters collect points in a local batch registered with the store.
//!   Registered batches are part of every scan snapshot, and a flush moves
//!   them into the write buffer first.
//! - [`PointStore::flush`] copies the buffered points, sorts them stably by
//!   timestamp, and publishes them as a new [`Segment`]. The segment file is
//!   written without holding the state lock; only the final swap (push the
//!   segment, drain the flushed points) takes the write lock. Scans therefore
//!   see either the pre-flush or the post-flush state.
//! - A separate mutex serializes flushes on the same store.
//! - [`PointStore::scan`] snapshots the segment list and the in-range
//!   buffered and batched points under a read lock and hands back an owned
//!   [`ScanCursor`].
//!
//! Locks are taken in the order state, batch registry, single batch.
//!
//! # File Layout
//!
//! ```text
//! stream_<id>/
//! ├── segment_00000000.seg
//! ├── segment_00000001.seg
//! └── ...
//! ```

use std::path::{Path, PathBuf};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
};

use crate::config::Options;
use crate::error::{Result, StorageError, StrataError};
use crate::scan::{ScanCursor, SegmentSlice};
use crate::segment::{SEGMENT_EXTENSION, Segment, TMP_EXTENSION};
use crate::value::{Point, TimeRange, ValueKind};

/// File name prefix of segment files.
const SEGMENT_PREFIX: &str = "segment_";

/// An inserter's local batch, shared with the store it writes to.
pub(crate) type SharedBatch = Arc<Mutex<Vec<Point>>>;

/// Point counts and disk usage of a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of durable segments.
    pub segments: usize,
    /// Points held in durable segments.
    pub durable_points: usize,
    /// Points waiting in the write buffer.
    pub buffered_points: usize,
    /// Points held in the local batches of live inserters.
    pub batched_points: usize,
    /// Total size of the segment files in bytes.
    pub disk_bytes: u64,
}

#[derive(Debug, Default)]
struct StoreState {
    /// Published segments in flush order.
    segments: Vec<Arc<Segment>>,
    /// Unflushed points in insertion order.
    buffer: Vec<Point>,
}

/// Storage for the points of one stream.
#[derive(Debug)]
pub struct PointStore {
    dir: PathBuf,
    kind: ValueKind,
    sync_on_flush: bool,
    auto_flush_threshold: Option<usize>,
    state: RwLock<StoreState>,
    /// Local batches of live inserters, in registration order.
    batches: Mutex<Vec<Weak<Mutex<Vec<Point>>>>>,
    /// Guards the sequence number of the next segment file.
    flush_lock: Mutex<u64>,
}

impl PointStore {
    /// Opens the store in `dir`, creating the directory if needed.
    ///
    /// Existing segments are loaded in sequence order. Temporary files left
    /// by an interrupted flush are removed.
    ///
    /// # Errors
    ///
    /// - [`StorageError::DirectoryAccess`] if the directory cannot be created
    ///   or listed
    /// - [`StorageError::CorruptedSegment`] if a segment fails validation or
    ///   holds a different value kind
    pub fn open<P: AsRef<Path>>(dir: P, kind: ValueKind, options: &Options) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let dir_error = |source| StorageError::DirectoryAccess {
            path: dir.clone(),
            source,
        };

        std::fs::create_dir_all(&dir).map_err(dir_error)?;

        let mut numbered = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(dir_error)? {
            let path = entry.map_err(dir_error)?.path();

            if path.extension().is_some_and(|ext| ext == TMP_EXTENSION) {
                tracing::warn!("removing incomplete segment {}", path.display());
                std::fs::remove_file(&path).map_err(|source| StorageError::WriteFailed {
                    path: path.clone(),
                    source,
                })?;
                continue;
            }

            if let Some(sequence) = segment_sequence(&path) {
                numbered.push((sequence, path));
            }
        }
        numbered.sort_by_key(|(sequence, _)| *sequence);

        let mut segments = Vec::with_capacity(numbered.len());
        for (_, path) in &numbered {
            let segment = Segment::open(path)?;
            if segment.kind() != kind {
                return Err(StorageError::CorruptedSegment {
                    path: path.clone(),
                    reason: format!("segment holds {} values, stream is {kind}", segment.kind()),
                }
                .into());
            }
            segments.push(Arc::new(segment));
        }

        let next_sequence = numbered.last().map_or(0, |(sequence, _)| sequence + 1);

        tracing::debug!(
            "opened store {} with {} segment(s)",
            dir.display(),
            segments.len()
        );

        Ok(Self {
            dir,
            kind,
            sync_on_flush: options.sync_on_flush,
            auto_flush_threshold: options.auto_flush_threshold,
            state: RwLock::new(StoreState {
                segments,
                buffer: Vec::new(),
            }),
            batches: Mutex::new(Vec::new()),
            flush_lock: Mutex::new(next_sequence),
        })
    }

    /// The value kind every point must have.
    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// The directory holding this store's segments.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Appends one point to the write buffer.
    ///
    /// # Errors
    ///
    /// See [`PointStore::append_batch`].
    pub fn append(&self, point: Point) -> Result<()> {
        self.append_batch(&mut vec![point])
    }

    /// Moves every point of `points` into the write buffer under a single
    /// lock acquisition, leaving `points` empty.
    ///
    /// If an auto-flush threshold is configured and the buffer reaches it,
    /// the store flushes before returning.
    ///
    /// # Errors
    ///
    /// - [`StrataError::TypeMismatch`] if any point has the wrong kind; in
    ///   that case nothing is appended and `points` is left untouched
    /// - a storage error from an auto-flush; the points remain buffered
    pub fn append_batch(&self, points: &mut Vec<Point>) -> Result<()> {
        if let Some(bad) = points.iter().find(|p| p.value.kind() != self.kind) {
            return Err(StrataError::TypeMismatch {
                expected: self.kind,
                found: bad.value.kind(),
            });
        }
        if points.is_empty() {
            return Ok(());
        }

        let buffered = {
            let mut state = self.write_state();
            state.buffer.append(points);
            state.buffer.len()
        };

        if self.auto_flush_threshold.is_some_and(|threshold| buffered >= threshold) {
            self.flush()?;
        }
        Ok(())
    }

    /// Registers a new local batch whose points scans will see.
    pub(crate) fn register_batch(&self, capacity: usize) -> SharedBatch {
        let batch = Arc::new(Mutex::new(Vec::with_capacity(capacity)));
        let mut batches = self.lock_batches();
        batches.retain(|weak| weak.strong_count() > 0);
        batches.push(Arc::downgrade(&batch));
        batch
    }

    /// Moves the points of a registered batch into the write buffer.
    ///
    /// Both locks are held together, so a concurrent scan sees the points
    /// in exactly one place. Triggers an auto-flush like
    /// [`PointStore::append_batch`].
    ///
    /// # Errors
    ///
    /// A storage error from an auto-flush; the points remain buffered.
    pub(crate) fn append_shared(&self, batch: &Mutex<Vec<Point>>) -> Result<()> {
        let buffered = {
            let mut state = self.write_state();
            state.buffer.append(&mut lock_batch(batch));
            state.buffer.len()
        };

        if self.auto_flush_threshold.is_some_and(|threshold| buffered >= threshold) {
            self.flush()?;
        }
        Ok(())
    }

    /// Writes the current write buffer as a new durable segment.
    ///
    /// The local batches of live inserters are moved into the write buffer
    /// first. Returns `false` without touching the disk if nothing is
    /// buffered.
    /// On failure the buffer is left intact so the flush can be retried.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the segment cannot be written.
    pub fn flush(&self) -> Result<bool> {
        let mut next_sequence = self.flush_lock.lock().unwrap_or_else(PoisonError::into_inner);

        {
            let mut state = self.write_state();
            let mut batches = self.lock_batches();
            batches.retain(|weak| match weak.upgrade() {
                Some(batch) => {
                    state.buffer.append(&mut lock_batch(&batch));
                    true
                }
                None => false,
            });
        }

        // Flushes are serialized and appends only push to the back, so the
        // first `count` buffered points stay put until we drain them.
        let mut points = self.read_state().buffer.clone();
        if points.is_empty() {
            return Ok(false);
        }
        let count = points.len();
        points.sort_by_key(|p| p.timestamp);

        let path = self.dir.join(segment_file_name(*next_sequence));
        let segment = Segment::write(&path, self.kind, &points, self.sync_on_flush)?;
        *next_sequence += 1;

        {
            let mut state = self.write_state();
            state.segments.push(Arc::new(segment));
            state.buffer.drain(..count);
        }

        tracing::debug!("flushed {count} point(s) to {}", path.display());
        Ok(true)
    }

    /// Returns a cursor over every point in `range`, in timestamp order.
    ///
    /// The cursor is a snapshot: points appended or flushed afterwards are
    /// not visible to it. It covers the durable segments, the write buffer
    /// and the local batches of live inserters.
    ///
    /// Segments that only partly overlap `range` are decoded here; segments
    /// inside it are decoded when first pulled from.
    ///
    /// # Errors
    ///
    /// [`StorageError::CorruptedSegment`] if a segment fails to decode.
    pub fn scan(&self, range: TimeRange) -> Result<ScanCursor> {
        if range.is_empty() {
            return Ok(ScanCursor::empty());
        }

        let (segments, mut buffered) = {
            let state = self.read_state();
            let segments: Vec<Arc<Segment>> = state
                .segments
                .iter()
                .filter(|segment| range.overlaps(segment.min_timestamp(), segment.max_timestamp()))
                .cloned()
                .collect();
            let mut buffered: Vec<Point> = state
                .buffer
                .iter()
                .filter(|p| range.contains(p.timestamp))
                .copied()
                .collect();
            for batch in self.lock_batches().iter().filter_map(Weak::upgrade) {
                buffered.extend(
                    lock_batch(&batch)
                        .iter()
                        .filter(|p| range.contains(p.timestamp)),
                );
            }
            (segments, buffered)
        };

        let mut slices = Vec::with_capacity(segments.len());
        for segment in segments {
            if segment.is_covered_by(&range) {
                slices.push(SegmentSlice::whole(segment));
            } else {
                let columns = segment.columns()?;
                let window = columns.window(&range);
                slices.push(SegmentSlice::window(segment, columns, window));
            }
        }

        buffered.sort_by_key(|p| p.timestamp);
        Ok(ScanCursor::new(slices, buffered))
    }

    /// Current point counts and disk usage.
    pub fn stats(&self) -> StoreStats {
        let state = self.read_state();
        let batched_points = self
            .lock_batches()
            .iter()
            .filter_map(Weak::upgrade)
            .map(|batch| lock_batch(&batch).len())
            .sum();
        StoreStats {
            segments: state.segments.len(),
            durable_points: state.segments.iter().map(|s| s.len()).sum(),
            buffered_points: state.buffer.len(),
            batched_points,
            disk_bytes: state.segments.iter().map(|s| s.file_size()).sum(),
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_batches(&self) -> MutexGuard<'_, Vec<Weak<Mutex<Vec<Point>>>>> {
        self.batches.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    fn lock_flush(&self) -> MutexGuard<'_, u64> {
        self.flush_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Locks one inserter batch.
pub(crate) fn lock_batch(batch: &Mutex<Vec<Point>>) -> MutexGuard<'_, Vec<Point>> {
    batch.lock().unwrap_or_else(PoisonError::into_inner)
}

fn segment_file_name(sequence: u64) -> String {
    format!("{SEGMENT_PREFIX}{sequence:08}.{SEGMENT_EXTENSION}")
}

fn segment_sequence(path: &Path) -> Option<u64> {
    if path.extension()? != SEGMENT_EXTENSION {
        return None;
    }
    path.file_stem()?
        .to_str()?
        .strip_prefix(SEGMENT_PREFIX)?
        .parse()
        .ok()
}
