//! Time-ordered merge over a store snapshot.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::ops::Range;
use std::sync::Arc;

use crate::error::Result;
use crate::query::aggregate::Accumulator;
use crate::segment::{Columns, Segment};
use crate::value::{Point, Timestamp};

/// The part of one segment a scan reads.
#[derive(Debug)]
pub(crate) struct SegmentSlice {
    segment: Arc<Segment>,
    /// `None` until the segment is first pulled from.
    columns: Option<Arc<Columns>>,
    window: Range<usize>,
}

impl SegmentSlice {
    /// Every point of `segment`, decoded on first pull.
    pub(crate) fn whole(segment: Arc<Segment>) -> Self {
        let window = 0..segment.len();
        Self {
            segment,
            columns: None,
            window,
        }
    }

    /// The points of `window` in already decoded `columns`.
    pub(crate) fn window(
        segment: Arc<Segment>,
        columns: Arc<Columns>,
        window: Range<usize>,
    ) -> Self {
        Self {
            segment,
            columns: Some(columns),
            window,
        }
    }

    fn is_whole(&self) -> bool {
        self.window.start == 0 && self.window.end == self.segment.len()
    }

    fn columns(&mut self) -> Result<&Columns> {
        let columns = match self.columns.take() {
            Some(columns) => columns,
            None => self.segment.columns()?,
        };
        Ok(&**self.columns.insert(columns))
    }
}

/// One sorted input of a scan.
#[derive(Debug)]
enum Source {
    Segment(SegmentSlice),
    Buffer { points: Vec<Point>, next: usize },
}

impl Source {
    fn peek_timestamp(&self) -> Option<Timestamp> {
        match self {
            Self::Segment(slice) if slice.window.is_empty() => None,
            Self::Segment(slice) => Some(match &slice.columns {
                Some(columns) => columns.timestamp(slice.window.start),
                // only whole segments are left undecoded
                None => slice.segment.min_timestamp(),
            }),
            Self::Buffer { points, next } => points.get(*next).map(|p| p.timestamp),
        }
    }

    fn take(&mut self) -> Result<Option<Point>> {
        match self {
            Self::Segment(slice) => {
                if slice.window.is_empty() {
                    return Ok(None);
                }
                let index = slice.window.start;
                let point = slice.columns()?.point(index);
                slice.window.start += 1;
                Ok(Some(point))
            }
            Self::Buffer { points, next } => {
                let point = points.get(*next).copied();
                *next += usize::from(point.is_some());
                Ok(point)
            }
        }
    }

    fn remaining(&self) -> usize {
        match self {
            Self::Segment(slice) => slice.window.len(),
            Self::Buffer { points, next } => points.len() - next,
        }
    }
}

/// Owned cursor over the points of one scan, in non-decreasing timestamp
/// order.
///
/// The cursor holds its own references to the segments and a private copy
/// of the buffered points it covers, so later inserts and flushes on the
/// store do not affect it. Points with equal timestamps come out in source
/// order: segments in flush order, then the write buffer.
///
/// Segments that lie entirely inside the scanned range are not decoded
/// until their first point is pulled, and [`ScanCursor::fold_into`] can
/// answer them from their header aggregates without decoding at all.
#[derive(Debug)]
pub struct ScanCursor {
    sources: Vec<Source>,
    heap: BinaryHeap<Reverse<(Timestamp, usize)>>,
}

impl ScanCursor {
    /// Builds a cursor from segment slices (in flush order) and a
    /// timestamp-sorted copy of the buffered points.
    pub(crate) fn new(segments: Vec<SegmentSlice>, buffered: Vec<Point>) -> Self {
        let mut sources: Vec<Source> = segments
            .into_iter()
            .filter(|slice| !slice.window.is_empty())
            .map(Source::Segment)
            .collect();
        if !buffered.is_empty() {
            sources.push(Source::Buffer {
                points: buffered,
                next: 0,
            });
        }

        let heap = sources
            .iter()
            .enumerate()
            .filter_map(|(index, source)| source.peek_timestamp().map(|ts| Reverse((ts, index))))
            .collect();

        Self { sources, heap }
    }

    /// A cursor that yields nothing.
    pub fn empty() -> Self {
        Self {
            sources: Vec::new(),
            heap: BinaryHeap::new(),
        }
    }

    /// Number of points left to yield.
    pub fn remaining(&self) -> usize {
        self.sources.iter().map(Source::remaining).sum()
    }

    /// Pulls the next point in timestamp order.
    ///
    /// # Errors
    ///
    /// [`StorageError::CorruptedSegment`](crate::error::StorageError::CorruptedSegment)
    /// if a segment fails to decode.
    pub fn next_point(&mut self) -> Result<Option<Point>> {
        let Some(Reverse((_, index))) = self.heap.pop() else {
            return Ok(None);
        };
        let source = &mut self.sources[index];
        let point = source.take()?;
        if let Some(timestamp) = source.peek_timestamp() {
            self.heap.push(Reverse((timestamp, index)));
        }
        Ok(point)
    }

    /// Feeds every remaining point into `accumulator`.
    ///
    /// When the result does not depend on folding order, each source is
    /// folded on its own and whole segments contribute their header
    /// aggregates. Otherwise points are folded in timestamp order.
    ///
    /// # Errors
    ///
    /// Decode errors from a segment, or a type mismatch from the
    /// accumulator.
    pub fn fold_into(mut self, accumulator: &mut Accumulator) -> Result<()> {
        if !accumulator.is_order_insensitive() {
            while let Some(point) = self.next_point()? {
                accumulator.push(point.value)?;
            }
            return Ok(());
        }

        for source in self.sources {
            match source {
                Source::Segment(mut slice) => {
                    if slice.is_whole() {
                        if let Some(summary) = slice.segment.summary() {
                            accumulator.merge_summary(summary)?;
                            continue;
                        }
                    }
                    let window = slice.window.clone();
                    let columns = slice.columns()?;
                    for index in window {
                        accumulator.push(columns.value(index))?;
                    }
                }
                Source::Buffer { points, next } => {
                    for point in &points[next..] {
                        accumulator.push(point.value)?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl Iterator for ScanCursor {
    type Item = Result<Point>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_point().transpose()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining()))
    }
}
