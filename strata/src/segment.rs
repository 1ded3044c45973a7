//! Immutable, memory-mapped segment files.
//!
//! A segment holds one flush worth of points for a single stream, sorted by
//! timestamp and stored column-wise.
//!
//! # File Format
//!
//! Version 2, written by every flush:
//!
//! ```text
//! [0..4)     magic "STSG"
//! [4..8)     format version (u32, 2)
//! [8]        value kind (u8)
//! [9..16)    reserved
//! [16..24)   point count (u64, > 0)
//! [24..32)   minimum timestamp
//! [32..40)   maximum timestamp
//! [40..44)   CRC-32 of the data region
//! [44..48)   reserved
//! [48..56)   byte length of the encoded timestamp column
//! [56..64)   sum of all values (raw bits)
//! [64..72)   minimum value (raw bits)
//! [72..80)   maximum value (raw bits)
//! [80..96)   reserved
//! [96..)     timestamp column, then value column
//! ```
//!
//! Timestamps are delta-of-delta encoded. Integer values use the same
//! encoding on their raw bits; floats use XOR encoding (see
//! [`codec`](crate::codec)). The value aggregates let whole-segment `sum`,
//! `count`, `min` and `max` be answered from the header alone.
//!
//! Version 1 files are still readable. They have a 64-byte header with no
//! aggregates, followed by the raw little-endian timestamp column
//! (count × u64) and value column (count × 8 bytes).
//!
//! All header integers are little-endian. Values are stored as the raw
//! bits produced by [`Value::to_bits`].
//!
//! # Decoding
//!
//! Opening a segment validates the header, the file size and the checksum.
//! The columns are decoded on first use by [`Segment::columns`] and cached
//! for the life of the segment.
//!
//! # Publishing
//!
//! [`Segment::write`] writes `<name>.tmp`, syncs it, and renames it into
//! place, so a reader that lists the directory never sees a partial
//! segment. Leftover `.tmp` files from an interrupted flush are removed by
//! the store when it opens.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use memmap2::Mmap;

use crate::codec::{self, CodecError};
use crate::error::{Result, StorageError, StrataError};
use crate::value::{Point, TimeRange, Timestamp, Value, ValueKind};

/// Magic bytes identifying a segment file.
const SEGMENT_MAGIC: [u8; 4] = *b"STSG";

/// Raw fixed-width columns, no header aggregates.
const VERSION_RAW: u32 = 1;

/// Encoded columns with header aggregates.
const VERSION_ENCODED: u32 = 2;

/// Version written by [`Segment::write`].
pub const SEGMENT_VERSION: u32 = VERSION_ENCODED;

/// Header size of version 1 segments.
const RAW_HEADER_SIZE: usize = 64;

/// Header size of version 2 segments.
pub const HEADER_SIZE: usize = 96;

/// Bytes per entry of a raw column.
const RAW_ENTRY_SIZE: usize = 8;

/// Extension of published segment files.
pub const SEGMENT_EXTENSION: &str = "seg";

/// Extension appended while a segment is being written.
pub const TMP_EXTENSION: &str = "tmp";

/// Aggregates over every value of a segment, kept in its header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentSummary {
    /// Number of points.
    pub count: u64,
    /// Sum in the kind's native arithmetic, folded in timestamp order.
    pub sum: Value,
    /// Smallest value.
    pub min: Value,
    /// Largest value.
    pub max: Value,
}

impl SegmentSummary {
    fn of(points: &[Point]) -> Result<Option<Self>> {
        let Some(first) = points.first() else {
            return Ok(None);
        };
        let mut summary = Self {
            count: 1,
            sum: first.value,
            min: first.value,
            max: first.value,
        };
        for point in &points[1..] {
            summary.count += 1;
            summary.sum = summary.sum.wrapping_add(point.value)?;
            summary.min = summary.min.min_of(point.value)?;
            summary.max = summary.max.max_of(point.value)?;
        }
        Ok(Some(summary))
    }
}

/// Decoded segment header.
#[derive(Debug, Clone, Copy, PartialEq)]
struct SegmentHeader {
    version: u32,
    kind: ValueKind,
    count: u64,
    min_timestamp: Timestamp,
    max_timestamp: Timestamp,
    checksum: u32,
    /// Length of the encoded timestamp column; 0 for version 1.
    timestamp_bytes: u64,
    /// Present from version 2 on.
    summary: Option<SegmentSummary>,
}

impl SegmentHeader {
    fn size(&self) -> usize {
        if self.version == VERSION_RAW {
            RAW_HEADER_SIZE
        } else {
            HEADER_SIZE
        }
    }

    /// Encodes a version 2 header.
    fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&SEGMENT_MAGIC);
        bytes[4..8].copy_from_slice(&VERSION_ENCODED.to_le_bytes());
        bytes[8] = self.kind as u8;
        bytes[16..24].copy_from_slice(&self.count.to_le_bytes());
        bytes[24..32].copy_from_slice(&self.min_timestamp.to_le_bytes());
        bytes[32..40].copy_from_slice(&self.max_timestamp.to_le_bytes());
        bytes[40..44].copy_from_slice(&self.checksum.to_le_bytes());
        bytes[48..56].copy_from_slice(&self.timestamp_bytes.to_le_bytes());
        if let Some(summary) = &self.summary {
            bytes[56..64].copy_from_slice(&summary.sum.to_bits().to_le_bytes());
            bytes[64..72].copy_from_slice(&summary.min.to_bits().to_le_bytes());
            bytes[72..80].copy_from_slice(&summary.max.to_bits().to_le_bytes());
        }
        bytes
    }

    fn decode(bytes: &[u8], path: &Path) -> Result<Self> {
        let corrupted = |reason: String| -> StrataError {
            StorageError::CorruptedSegment {
                path: path.to_path_buf(),
                reason,
            }
            .into()
        };

        if bytes.len() < RAW_HEADER_SIZE {
            return Err(corrupted(format!(
                "file too small: {} bytes, expected at least {RAW_HEADER_SIZE}",
                bytes.len()
            )));
        }

        if bytes[0..4] != SEGMENT_MAGIC {
            return Err(corrupted(format!(
                "invalid magic bytes: expected {SEGMENT_MAGIC:?}, found {:?}",
                &bytes[0..4]
            )));
        }

        let version = read_u32(bytes, 4);
        if version != VERSION_RAW && version != VERSION_ENCODED {
            return Err(corrupted(format!(
                "unsupported version: expected {VERSION_RAW} or {VERSION_ENCODED}, found {version}"
            )));
        }
        if version == VERSION_ENCODED && bytes.len() < HEADER_SIZE {
            return Err(corrupted(format!(
                "file too small: {} bytes, expected at least {HEADER_SIZE}",
                bytes.len()
            )));
        }

        let kind = ValueKind::try_from(bytes[8])
            .map_err(|raw| corrupted(format!("unknown value kind {raw}")))?;
        let count = read_u64(bytes, 16);

        let (timestamp_bytes, summary) = if version == VERSION_ENCODED {
            let summary = SegmentSummary {
                count,
                sum: Value::from_bits(kind, read_u64(bytes, 56)),
                min: Value::from_bits(kind, read_u64(bytes, 64)),
                max: Value::from_bits(kind, read_u64(bytes, 72)),
            };
            (read_u64(bytes, 48), Some(summary))
        } else {
            (0, None)
        };

        Ok(Self {
            version,
            kind,
            count,
            min_timestamp: read_u64(bytes, 24),
            max_timestamp: read_u64(bytes, 32),
            checksum: read_u32(bytes, 40),
            timestamp_bytes,
            summary,
        })
    }
}

/// The decoded timestamp and value columns of a segment.
#[derive(Debug)]
pub struct Columns {
    kind: ValueKind,
    timestamps: Vec<Timestamp>,
    values: Vec<u64>,
}

impl Columns {
    /// Number of points.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Always `false` for columns of a valid segment.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Timestamp of the point at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    #[inline]
    pub fn timestamp(&self, index: usize) -> Timestamp {
        self.timestamps[index]
    }

    /// Value of the point at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    #[inline]
    pub fn value(&self, index: usize) -> Value {
        Value::from_bits(self.kind, self.values[index])
    }

    /// Point at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    #[inline]
    pub fn point(&self, index: usize) -> Point {
        Point {
            timestamp: self.timestamp(index),
            value: self.value(index),
        }
    }

    /// Index of the first point with a timestamp `>= timestamp`.
    pub fn lower_bound(&self, timestamp: Timestamp) -> usize {
        self.timestamps.partition_point(|&ts| ts < timestamp)
    }

    /// Index window of the points inside `range`.
    pub fn window(&self, range: &TimeRange) -> Range<usize> {
        let lo = self.lower_bound(range.start);
        let hi = range.end.map_or(self.len(), |end| self.lower_bound(end));
        lo..hi.max(lo)
    }
}

/// A read-only, memory-mapped segment.
///
/// Segments are immutable once published, so a `Segment` can be shared
/// freely between scans behind an `Arc`.
#[derive(Debug)]
pub struct Segment {
    mmap: Mmap,
    path: PathBuf,
    header: SegmentHeader,
    len: usize,
    timestamp_bytes: usize,
    columns: OnceLock<Arc<Columns>>,
}

impl Segment {
    /// Writes `points` as a new version 2 segment at `path` and opens it.
    ///
    /// `points` must already be sorted by timestamp and all be of `kind`.
    /// When `sync` is set the file and its directory are fsynced before and
    /// after the rename.
    ///
    /// # Errors
    ///
    /// - [`StrataError::TypeMismatch`] if a point is not of `kind`
    /// - [`StorageError::CorruptedSegment`] if `points` is empty or unsorted
    /// - [`StorageError::WriteFailed`] if the file cannot be written or
    ///   renamed
    pub fn write<P: AsRef<Path>>(
        path: P,
        kind: ValueKind,
        points: &[Point],
        sync: bool,
    ) -> Result<Self> {
        let path = path.as_ref();

        if points.windows(2).any(|w| w[0].timestamp > w[1].timestamp) {
            return Err(StorageError::CorruptedSegment {
                path: path.to_path_buf(),
                reason: "points are not sorted by timestamp".to_string(),
            }
            .into());
        }
        if let Some(bad) = points.iter().find(|p| p.value.kind() != kind) {
            return Err(StrataError::TypeMismatch {
                expected: kind,
                found: bad.value.kind(),
            });
        }

        let (Some(first), Some(last), Some(summary)) =
            (points.first(), points.last(), SegmentSummary::of(points)?)
        else {
            return Err(StorageError::CorruptedSegment {
                path: path.to_path_buf(),
                reason: "a segment must contain at least one point".to_string(),
            }
            .into());
        };

        let timestamps: Vec<u64> = points.iter().map(|p| p.timestamp).collect();
        let bits: Vec<u64> = points.iter().map(|p| p.value.to_bits()).collect();

        let mut data = Vec::with_capacity(points.len() * 2);
        codec::encode_deltas(&timestamps, &mut data);
        let timestamp_bytes = data.len() as u64;
        match kind {
            ValueKind::Float => codec::encode_xor(&bits, &mut data),
            ValueKind::UnsignedInteger | ValueKind::SignedInteger => {
                codec::encode_deltas(&bits, &mut data);
            }
        }

        let header = SegmentHeader {
            version: VERSION_ENCODED,
            kind,
            count: points.len() as u64,
            min_timestamp: first.timestamp,
            max_timestamp: last.timestamp,
            checksum: crc32fast::hash(&data),
            timestamp_bytes,
            summary: Some(summary),
        };

        let tmp_path = tmp_path_for(path);
        let write_failed = |source| StorageError::WriteFailed {
            path: tmp_path.clone(),
            source,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&tmp_path)
            .map_err(write_failed)?;
        file.write_all(&header.encode()).map_err(write_failed)?;
        file.write_all(&data).map_err(write_failed)?;
        if sync {
            file.sync_all().map_err(write_failed)?;
        }
        drop(file);

        std::fs::rename(&tmp_path, path).map_err(|source| StorageError::WriteFailed {
            path: path.to_path_buf(),
            source,
        })?;

        if sync {
            if let Some(parent) = path.parent() {
                sync_dir(parent)?;
            }
        }

        Self::open(path)
    }

    /// Opens and validates an existing segment of either version.
    ///
    /// The columns are not decoded until [`Segment::columns`] is called.
    ///
    /// # Errors
    ///
    /// - [`StorageError::ReadFailed`] or [`StorageError::MemoryMap`] if the
    ///   file cannot be opened or mapped
    /// - [`StorageError::CorruptedSegment`] if the header, length or
    ///   checksum do not validate
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = File::open(path).map_err(|source| StorageError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;

        // SAFETY: Published segments are never modified or truncated after the
        // rename that makes them visible, so the mapping cannot change under us.
        let mmap = unsafe {
            Mmap::map(&file).map_err(|source| StorageError::MemoryMap {
                path: path.to_path_buf(),
                source,
            })?
        };

        let header = SegmentHeader::decode(&mmap, path)?;
        let corrupted = |reason: String| StorageError::CorruptedSegment {
            path: path.to_path_buf(),
            reason,
        };

        let len = usize::try_from(header.count)
            .ok()
            .filter(|&count| count > 0)
            .ok_or_else(|| corrupted(format!("invalid point count {}", header.count)))?;

        let data_len = mmap.len() - header.size();
        let timestamp_bytes = if header.version == VERSION_RAW {
            let expected = len
                .checked_mul(RAW_ENTRY_SIZE * 2)
                .ok_or_else(|| corrupted(format!("point count {len} overflows")))?;
            if data_len != expected {
                return Err(corrupted(format!(
                    "file size mismatch: {} bytes, expected {}",
                    mmap.len(),
                    expected + RAW_HEADER_SIZE
                ))
                .into());
            }
            len * RAW_ENTRY_SIZE
        } else {
            // every encoded entry takes at least one byte
            usize::try_from(header.timestamp_bytes)
                .ok()
                .filter(|&bytes| bytes >= len && bytes <= data_len.saturating_sub(len))
                .ok_or_else(|| {
                    corrupted(format!(
                        "file size mismatch: {data_len} data bytes cannot hold {len} points \
                         with a {}-byte timestamp column",
                        header.timestamp_bytes
                    ))
                })?
        };

        let checksum = crc32fast::hash(&mmap[header.size()..]);
        if checksum != header.checksum {
            return Err(corrupted(format!(
                "checksum mismatch: header {:#010x}, data {checksum:#010x}",
                header.checksum
            ))
            .into());
        }

        Ok(Self {
            mmap,
            path: path.to_path_buf(),
            header,
            len,
            timestamp_bytes,
            columns: OnceLock::new(),
        })
    }

    /// Value kind of every point in the segment.
    pub fn kind(&self) -> ValueKind {
        self.header.kind
    }

    /// On-disk format version.
    pub fn version(&self) -> u32 {
        self.header.version
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always `false`; empty segments are never written.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Smallest timestamp in the segment.
    pub fn min_timestamp(&self) -> Timestamp {
        self.header.min_timestamp
    }

    /// Largest timestamp in the segment.
    pub fn max_timestamp(&self) -> Timestamp {
        self.header.max_timestamp
    }

    /// Header aggregates; `None` for version 1 segments.
    pub fn summary(&self) -> Option<&SegmentSummary> {
        self.header.summary.as_ref()
    }

    /// Returns `true` if every point of the segment lies inside `range`.
    pub fn is_covered_by(&self, range: &TimeRange) -> bool {
        range.start <= self.header.min_timestamp
            && range.end.is_none_or(|end| self.header.max_timestamp < end)
    }

    /// Path of the segment file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the segment file in bytes.
    pub fn file_size(&self) -> u64 {
        self.mmap.len() as u64
    }

    /// The decoded columns, decoding them on first use.
    ///
    /// # Errors
    ///
    /// [`StorageError::CorruptedSegment`] if a column does not decode or
    /// disagrees with the header.
    pub fn columns(&self) -> Result<Arc<Columns>> {
        if let Some(columns) = self.columns.get() {
            return Ok(Arc::clone(columns));
        }
        let decoded = Arc::new(self.decode()?);
        Ok(Arc::clone(self.columns.get_or_init(|| decoded)))
    }

    fn decode(&self) -> Result<Columns> {
        let corrupted = |reason: String| -> StrataError {
            StorageError::CorruptedSegment {
                path: self.path.clone(),
                reason,
            }
            .into()
        };
        let column_error =
            |column: &str, err: CodecError| corrupted(format!("{column} column: {err}"));

        let (timestamp_column, value_column) =
            self.mmap[self.header.size()..].split_at(self.timestamp_bytes);

        let (timestamps, values) = if self.header.version == VERSION_RAW {
            (read_raw_column(timestamp_column), read_raw_column(value_column))
        } else {
            let timestamps = codec::decode_deltas(timestamp_column, self.len)
                .map_err(|err| column_error("timestamp", err))?;
            let values = match self.header.kind {
                ValueKind::Float => codec::decode_xor(value_column, self.len),
                ValueKind::UnsignedInteger | ValueKind::SignedInteger => {
                    codec::decode_deltas(value_column, self.len)
                }
            }
            .map_err(|err| column_error("value", err))?;
            (timestamps, values)
        };

        if timestamps.first() != Some(&self.header.min_timestamp)
            || timestamps.last() != Some(&self.header.max_timestamp)
        {
            return Err(corrupted("timestamp bounds disagree with header".to_string()));
        }
        if timestamps.windows(2).any(|w| w[0] > w[1]) {
            return Err(corrupted("timestamps are not sorted".to_string()));
        }

        Ok(Columns {
            kind: self.header.kind,
            timestamps,
            values,
        })
    }
}

/// Returns the temporary path a segment is written to before publishing.
pub fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(TMP_EXTENSION);
    PathBuf::from(name)
}

/// Fsyncs a directory so that renames inside it are durable.
///
/// A no-op on platforms that cannot open directories as files.
pub(crate) fn sync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        let handle = File::open(dir).map_err(|source| StorageError::DirectoryAccess {
            path: dir.to_path_buf(),
            source,
        })?;
        handle.sync_all().map_err(|source| StorageError::DirectoryAccess {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

fn read_raw_column(bytes: &[u8]) -> Vec<u64> {
    bytes
        .chunks_exact(RAW_ENTRY_SIZE)
        .map(|chunk| read_u64(chunk, 0))
        .collect()
}

#[inline]
fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(buf)
}

#[inline]
fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(buf)
}
