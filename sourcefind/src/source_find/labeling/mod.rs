//! Connected component labeling using union-find over pixel runs.
//!
//! - Run-length encoding: each row of the bit mask is reduced to maximal
//!   horizontal runs by scanning word-level edge bits
//! - Every run starts as its own set; overlapping runs of adjacent rows are
//!   merged with union-find
//! - Large masks are merged strip-parallel with a lock-free union-find
//! - Final labels are numbered 1..n in raster order of each component's
//!   first pixel, for both the sequential and the parallel path


use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};

use rayon::prelude::*;

use crate::common::bit_buffer2::BITS_PER_WORD;
use crate::common::{BitBuffer2, Buffer2};
use crate::source_find::config::Connectivity;

/// Pixel count below which sequential CCL is faster than parallel.
pub(crate) const PARALLEL_CCL_THRESHOLD: usize = 65_000;

/// Minimum rows per strip in parallel CCL to avoid excessive strip overhead.
const MIN_ROWS_PER_STRIP: usize = 64;

// ============================================================================
// Run-Length Encoding
// ============================================================================

/// A horizontal run of foreground pixels: columns `start..end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Run {
    pub start: u32,
    pub end: u32,
}

impl Run {
    /// Columns of the previous row a run may touch.
    #[inline]
    fn reach(&self, connectivity: Connectivity) -> (u32, u32) {
        match connectivity {
            Connectivity::Four => (self.start, self.end),
            Connectivity::Eight => (self.start.saturating_sub(1), self.end + 1),
        }
    }
}

/// Append the runs of one mask row.
///
/// An edge bit is set wherever a pixel differs from its left neighbour, so
/// edges alternate between run starts and run ends. Padding bits past the
/// row width are zero, which closes any run touching the right border.
pub(super) fn extract_row_runs(row_words: &[u64], width: usize, runs: &mut Vec<Run>) {
    let mut carry = 0u64;
    let mut open: Option<u32> = None;

    for (word_idx, &word) in row_words.iter().enumerate() {
        let mut edges = word ^ ((word << 1) | carry);
        carry = word >> (BITS_PER_WORD - 1);
        let base = (word_idx * BITS_PER_WORD) as u32;

        while edges != 0 {
            let x = base + edges.trailing_zeros();
            edges &= edges - 1;
            match open.take() {
                None => open = Some(x),
                Some(start) => runs.push(Run { start, end: x }),
            }
        }
    }

    if let Some(start) = open {
        runs.push(Run {
            start,
            end: width as u32,
        });
    }
}

/// All runs of a mask in raster order, indexed by row.
///
/// The position of a run in `runs` is its provisional label.
#[derive(Debug, Default)]
pub(super) struct RunTable {
    runs: Vec<Run>,
    /// `row_offsets[y]..row_offsets[y + 1]` are the runs of row `y`.
    row_offsets: Vec<usize>,
}

impl RunTable {
    fn from_rows(rows: Vec<Vec<Run>>) -> Self {
        let mut row_offsets = Vec::with_capacity(rows.len() + 1);
        let total = rows.iter().map(Vec::len).sum();
        let mut runs = Vec::with_capacity(total);
        row_offsets.push(0);
        for row in rows {
            runs.extend(row);
            row_offsets.push(runs.len());
        }
        Self { runs, row_offsets }
    }

    fn extract(mask: &BitBuffer2, parallel: bool) -> Self {
        let width = mask.width();
        let words_per_row = mask.words_per_row();
        let row_runs = |row_words: &[u64]| {
            let mut runs = Vec::new();
            extract_row_runs(row_words, width, &mut runs);
            runs
        };

        let rows: Vec<Vec<Run>> = if parallel {
            mask.words().par_chunks(words_per_row).map(row_runs).collect()
        } else {
            mask.words().chunks(words_per_row).map(row_runs).collect()
        };
        Self::from_rows(rows)
    }

    #[inline]
    fn len(&self) -> usize {
        self.runs.len()
    }

    #[inline]
    fn row_range(&self, y: usize) -> Range<usize> {
        self.row_offsets[y]..self.row_offsets[y + 1]
    }

    #[inline]
    pub(super) fn row(&self, y: usize) -> &[Run] {
        &self.runs[self.row_range(y)]
    }
}

// ============================================================================
// LabelMap
// ============================================================================

/// A 2D label map from connected component analysis.
///
/// 0 is background; components are numbered 1..=`num_labels` in raster order
/// of their first pixel.
#[derive(Debug)]
pub struct LabelMap {
    labels: Buffer2<u32>,
    num_labels: usize,
}

impl LabelMap {
    /// Label the set pixels of `mask`.
    ///
    /// Masks with at least [`PARALLEL_CCL_THRESHOLD`] pixels are labelled
    /// strip-parallel; the result is identical either way.
    pub fn from_mask(mask: &BitBuffer2, connectivity: Connectivity) -> Self {
        let width = mask.width();
        let height = mask.height();
        let mut labels = Buffer2::new_default(width, height);

        if width == 0 || height == 0 {
            return Self {
                labels,
                num_labels: 0,
            };
        }

        let num_labels = if width * height < PARALLEL_CCL_THRESHOLD {
            label_mask_sequential(mask, &mut labels, connectivity)
        } else {
            label_mask_parallel(mask, &mut labels, connectivity)
        };

        Self { labels, num_labels }
    }

    /// Number of connected components (excluding background).
    #[inline]
    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.labels.width()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.labels.height()
    }

    #[inline]
    pub fn labels(&self) -> &Buffer2<u32> {
        &self.labels
    }
}

// ============================================================================
// Row merging
// ============================================================================

/// Union operation shared by the sequential and the atomic union-find.
trait RunUnion {
    fn union(&mut self, a: u32, b: u32);
}

/// Union every run of row `y` with the runs of row `y - 1` it touches.
///
/// Both rows are sorted by column, so a single forward sweep suffices.
fn merge_rows(
    runs: &RunTable,
    y: usize,
    connectivity: Connectivity,
    uf: &mut impl RunUnion,
) {
    let above = runs.row_range(y - 1);
    let below = runs.row_range(y);
    if above.is_empty() || below.is_empty() {
        return;
    }

    let mut first_candidate = above.start;
    for curr in below {
        let (reach_start, reach_end) = runs.runs[curr].reach(connectivity);

        while first_candidate < above.end && runs.runs[first_candidate].end <= reach_start {
            first_candidate += 1;
        }

        let mut prev = first_candidate;
        while prev < above.end && runs.runs[prev].start < reach_end {
            uf.union(prev as u32, curr as u32);
            prev += 1;
        }
    }
}

/// Map every run to its final label and return the number of components.
///
/// Roots are always the smallest run index of their set, i.e. the first run
/// in raster order, so numbering roots in index order numbers components by
/// their first pixel.
fn resolve_labels(len: usize, mut find: impl FnMut(u32) -> u32) -> (Vec<u32>, usize) {
    let mut final_labels = vec![0u32; len];
    let mut num_labels = 0u32;
    for i in 0..len {
        let root = find(i as u32) as usize;
        if root == i {
            num_labels += 1;
            final_labels[i] = num_labels;
        } else {
            final_labels[i] = final_labels[root];
        }
    }
    (final_labels, num_labels as usize)
}

/// Paint each run's final label into the row-major label buffer.
fn write_labels(runs: &RunTable, final_labels: &[u32], labels: &mut Buffer2<u32>) {
    let width = labels.width();
    labels
        .pixels_mut()
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            let range = runs.row_range(y);
            for (run, &label) in runs.runs[range.clone()]
                .iter()
                .zip(&final_labels[range])
            {
                row[run.start as usize..run.end as usize].fill(label);
            }
        });
}

// ============================================================================
// Sequential labeling (small images)
// ============================================================================

/// Sequential RLE-based CCL for small images.
pub(super) fn label_mask_sequential(
    mask: &BitBuffer2,
    labels: &mut Buffer2<u32>,
    connectivity: Connectivity,
) -> usize {
    let runs = RunTable::extract(mask, false);
    if runs.len() == 0 {
        return 0;
    }

    let mut uf = UnionFind::new(runs.len());
    for y in 1..mask.height() {
        merge_rows(&runs, y, connectivity, &mut uf);
    }

    let (final_labels, num_labels) = resolve_labels(runs.len(), |i| uf.find(i));
    write_labels(&runs, &final_labels, labels);
    num_labels
}

// ============================================================================
// Parallel labeling (large images)
// ============================================================================

/// Parallel RLE-based CCL for large images.
///
/// 1. Extract runs of every row in parallel
/// 2. Merge rows inside each horizontal strip in parallel
/// 3. Merge the rows that straddle strip boundaries
/// 4. Resolve labels in raster order and write them row-parallel
pub(super) fn label_mask_parallel(
    mask: &BitBuffer2,
    labels: &mut Buffer2<u32>,
    connectivity: Connectivity,
) -> usize {
    let height = mask.height();
    let runs = RunTable::extract(mask, true);
    if runs.len() == 0 {
        return 0;
    }

    let num_strips = (height / MIN_ROWS_PER_STRIP).clamp(1, rayon::current_num_threads());
    let rows_per_strip = height.div_ceil(num_strips);
    let uf = AtomicUnionFind::new(runs.len());

    (0..num_strips).into_par_iter().for_each(|strip| {
        let y_start = strip * rows_per_strip;
        let y_end = ((strip + 1) * rows_per_strip).min(height);
        let mut uf_ref = AtomicUFRef(&uf);
        for y in (y_start + 1)..y_end {
            merge_rows(&runs, y, connectivity, &mut uf_ref);
        }
    });

    let mut uf_ref = AtomicUFRef(&uf);
    for strip in 1..num_strips {
        let y = strip * rows_per_strip;
        if y < height {
            merge_rows(&runs, y, connectivity, &mut uf_ref);
        }
    }

    let (final_labels, num_labels) = resolve_labels(runs.len(), |i| uf.find(i));
    write_labels(&runs, &final_labels, labels);
    num_labels
}

// ============================================================================
// Union-Find (sequential)
// ============================================================================

/// Union-find over run indices. The root of a set is its smallest index.
#[derive(Debug)]
struct UnionFind {
    parent: Vec<u32>,
}

impl UnionFind {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len as u32).collect(),
        }
    }

    /// Find root with path halving.
    #[inline]
    fn find(&mut self, mut x: u32) -> u32 {
        while self.parent[x as usize] != x {
            let grandparent = self.parent[self.parent[x as usize] as usize];
            self.parent[x as usize] = grandparent;
            x = grandparent;
        }
        x
    }
}

impl RunUnion for UnionFind {
    #[inline]
    fn union(&mut self, a: u32, b: u32) {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a != root_b {
            let (smaller, larger) = (root_a.min(root_b), root_a.max(root_b));
            self.parent[larger as usize] = smaller;
        }
    }
}

// ============================================================================
// Union-Find (atomic/parallel)
// ============================================================================

/// Lock-free union-find over run indices. The root of a set is its smallest index.
struct AtomicUnionFind {
    parent: Vec<AtomicU32>,
}

impl std::fmt::Debug for AtomicUnionFind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicUnionFind")
            .field("len", &self.parent.len())
            .finish()
    }
}

impl AtomicUnionFind {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len as u32).map(AtomicU32::new).collect(),
        }
    }

    #[inline]
    fn find(&self, mut x: u32) -> u32 {
        loop {
            // Relaxed: a stale parent only costs extra hops; the CAS in
            // `union` orders the actual links.
            let parent = self.parent[x as usize].load(Ordering::Relaxed);
            if parent == x {
                return x;
            }
            x = parent;
        }
    }

    fn union(&self, a: u32, b: u32) {
        let mut root_a = self.find(a);
        let mut root_b = self.find(b);

        while root_a != root_b {
            if root_a > root_b {
                std::mem::swap(&mut root_a, &mut root_b);
            }

            // Link the larger root under the smaller one, retrying if another
            // thread re-rooted `root_b` in the meantime.
            match self.parent[root_b as usize].compare_exchange_weak(
                root_b,
                root_a,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(_) => {
                    root_a = self.find(root_a);
                    root_b = self.find(root_b);
                }
            }
        }
    }
}

/// Adapts `&AtomicUnionFind` (which uses `&self`) to [`RunUnion`].
#[derive(Debug)]
struct AtomicUFRef<'a>(&'a AtomicUnionFind);

impl RunUnion for AtomicUFRef<'_> {
    #[inline]
    fn union(&mut self, a: u32, b: u32) {
        self.0.union(a, b);
    }
}
