//! Activation frontier — how far into a pool's efficiency order work may go.
//!
//! A pool is cut into consecutive segments. The frontier starts at the end
//! of the first segment and moves one segment outward each time it widens,
//! never past the end of the pool.

use std::ops::Range;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationFrontier {
    /// Exclusive end of each segment, ascending; the last equals the pool size.
    ends: Vec<usize>,
    level: usize,
}

impl ActivationFrontier {
    /// Segments of `step` machines over a pool of `len`; the last segment
    /// takes whatever remains. A zero `step` yields a single segment.
    pub fn stepped(len: usize, step: usize) -> Self {
        if step == 0 || step >= len {
            return Self::whole(len);
        }
        let mut ends: Vec<usize> = (1..).map(|i| i * step).take_while(|end| *end < len).collect();
        ends.push(len);
        Self { ends, level: 0 }
    }

    /// `tiers` segments of `len / tiers` machines, the last one absorbing
    /// the remainder. Pools too small to split form a single segment.
    pub fn tiered(len: usize, tiers: usize) -> Self {
        let size = if tiers == 0 { 0 } else { len / tiers };
        if size == 0 {
            return Self::whole(len);
        }
        let mut ends: Vec<usize> = (1..tiers).map(|i| i * size).collect();
        ends.push(len);
        Self { ends, level: 0 }
    }

    fn whole(len: usize) -> Self {
        Self {
            ends: vec![len],
            level: 0,
        }
    }

    /// Number of machines, from the front of the pool, inside the frontier.
    pub fn limit(&self) -> usize {
        self.ends[self.level]
    }

    /// Index range of segment `index`.
    pub fn segment(&self, index: usize) -> Option<Range<usize>> {
        let end = *self.ends.get(index)?;
        let start = if index == 0 { 0 } else { self.ends[index - 1] };
        Some(start..end)
    }

    pub fn segment_count(&self) -> usize {
        self.ends.len()
    }

    pub fn is_fully_open(&self) -> bool {
        self.level + 1 >= self.ends.len()
    }

    /// Move out by one segment and return the newly covered index range.
    pub fn widen(&mut self) -> Option<Range<usize>> {
        if self.is_fully_open() {
            return None;
        }
        self.level += 1;
        self.segment(self.level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiered_splits_into_quarters_with_remainder_last() {
        let frontier = ActivationFrontier::tiered(10, 4);
        assert_eq!(frontier.segment_count(), 4);
        assert_eq!(frontier.segment(0), Some(0..2));
        assert_eq!(frontier.segment(2), Some(4..6));
        assert_eq!(frontier.segment(3), Some(6..10));
        assert_eq!(frontier.limit(), 2);
    }

    #[test]
    fn small_pool_is_a_single_segment() {
        let mut frontier = ActivationFrontier::tiered(3, 4);
        assert_eq!(frontier.limit(), 3);
        assert!(frontier.is_fully_open());
        assert_eq!(frontier.widen(), None);
    }

    #[test]
    fn widen_stops_at_pool_end() {
        let mut frontier = ActivationFrontier::stepped(7, 3);
        assert_eq!(frontier.limit(), 3);
        assert_eq!(frontier.widen(), Some(3..6));
        assert_eq!(frontier.widen(), Some(6..7));
        assert_eq!(frontier.limit(), 7);
        assert_eq!(frontier.widen(), None);
        assert_eq!(frontier.limit(), 7);
    }
}
