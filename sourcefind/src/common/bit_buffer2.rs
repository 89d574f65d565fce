//! Bit-packed 2D buffer for boolean masks.
//!
//! Uses 1 bit per pixel. Every row starts on a fresh `u64` word so rows can be
//! scanned (and written) independently, which the run-length labeller and the
//! parallel threshold pass rely on.

/// Number of bits per storage word.
pub const BITS_PER_WORD: usize = 64;

/// A 2D buffer of booleans packed into row-aligned `u64` words.
///
/// Bit `x % 64` of word `y * words_per_row + x / 64` holds pixel `(x, y)`.
/// Padding bits past `width` in the last word of a row are always zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitBuffer2 {
    words: Vec<u64>,
    width: usize,
    height: usize,
    words_per_row: usize,
}

impl BitBuffer2 {
    /// Create a mask with every bit cleared.
    pub fn new_default(width: usize, height: usize) -> Self {
        let words_per_row = width.div_ceil(BITS_PER_WORD);
        Self {
            words: vec![0u64; words_per_row * height],
            width,
            height,
            words_per_row,
        }
    }

    /// Create a mask from a row-major slice of booleans.
    pub fn from_slice(width: usize, height: usize, data: &[bool]) -> Self {
        assert_eq!(
            data.len(),
            width * height,
            "data length {} does not match dimensions {}x{}",
            data.len(),
            width,
            height
        );

        let mut mask = Self::new_default(width, height);
        for (y, row) in data.chunks_exact(width.max(1)).enumerate().take(height) {
            for (x, &value) in row.iter().enumerate() {
                if value {
                    mask.set_xy(x, y, true);
                }
            }
        }
        mask
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn words_per_row(&self) -> usize {
        self.words_per_row
    }

    #[inline]
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    #[inline]
    pub fn words_mut(&mut self) -> &mut [u64] {
        &mut self.words
    }

    #[inline]
    pub fn get_xy(&self, x: usize, y: usize) -> bool {
        debug_assert!(x < self.width && y < self.height);
        let word = self.words[y * self.words_per_row + x / BITS_PER_WORD];
        (word >> (x % BITS_PER_WORD)) & 1 != 0
    }

    #[inline]
    pub fn set_xy(&mut self, x: usize, y: usize, value: bool) {
        debug_assert!(x < self.width && y < self.height);
        let word = &mut self.words[y * self.words_per_row + x / BITS_PER_WORD];
        let bit = 1u64 << (x % BITS_PER_WORD);
        if value {
            *word |= bit;
        } else {
            *word &= !bit;
        }
    }

    /// Number of set bits.
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// True if every bit set in `self` is also set in `other`.
    pub fn is_subset_of(&self, other: &Self) -> bool {
        debug_assert_eq!(self.width, other.width);
        debug_assert_eq!(self.height, other.height);
        self.words
            .iter()
            .zip(other.words.iter())
            .all(|(&a, &b)| a & !b == 0)
    }
}
