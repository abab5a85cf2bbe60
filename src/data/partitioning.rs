//! Contiguous ownership ranges of a global index space.
//!
//! Rank `r` owns `[offsets[r], offsets[r + 1])`. Ranks may own nothing.

use std::ops::Range;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Partitioning {
    offsets: Vec<usize>,
}

impl Partitioning {
    /// Build from per-rank sizes.
    pub fn from_sizes(sizes: &[usize]) -> Self {
        let mut offsets = Vec::with_capacity(sizes.len() + 1);
        offsets.push(0);
        let mut acc = 0;
        for &n in sizes {
            acc += n;
            offsets.push(acc);
        }
        Self { offsets }
    }

    pub fn n_ranks(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn n_global(&self) -> usize {
        self.offsets[self.offsets.len() - 1]
    }

    /// Indices owned by `rank`.
    pub fn range(&self, rank: usize) -> Range<usize> {
        self.offsets[rank]..self.offsets[rank + 1]
    }

    /// Owner of global index `g`, or `None` if out of range.
    pub fn owner(&self, g: usize) -> Option<usize> {
        if g >= self.n_global() {
            return None;
        }
        // last rank whose range starts at or before g; empty ranges are skipped
        Some(self.offsets.partition_point(|&o| o <= g) - 1)
    }

    /// Owner of `g` and the offset of `g` inside the owner's range.
    pub fn locate(&self, g: usize) -> Option<(usize, usize)> {
        self.owner(g).map(|r| (r, g - self.offsets[r]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_ranges_are_skipped() {
        let p = Partitioning::from_sizes(&[2, 0, 3]);
        assert_eq!(p.n_global(), 5);
        assert_eq!(p.range(1), 2..2);
        assert_eq!(p.owner(1), Some(0));
        assert_eq!(p.owner(2), Some(2));
        assert_eq!(p.locate(4), Some((2, 2)));
        assert_eq!(p.owner(5), None);
    }
}
