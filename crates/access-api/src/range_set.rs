//! Sets of `u64` identifiers stored as merged closed intervals.
//!
//! Purged transaction and history ids are reported back to frontends in bulk,
//! and purges tend to be contiguous, so interval storage stays tiny.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeInclusive;

/// Set of unsigned identifiers kept as disjoint, non-adjacent closed ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RangeSet {
    // start -> inclusive end
    ranges: BTreeMap<u64, u64>,
}

impl RangeSet {
    /// Create an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ranges: BTreeMap::new(),
        }
    }

    /// Add a single value.
    pub fn insert(&mut self, value: u64) {
        self.insert_range(value..=value);
    }

    /// Add every value in `range`. Empty ranges are ignored.
    pub fn insert_range(&mut self, range: RangeInclusive<u64>) {
        let (mut start, mut end) = range.into_inner();
        if start > end {
            return;
        }

        if let Some((&prev_start, &prev_end)) = self.ranges.range(..=start).next_back() {
            if prev_end.saturating_add(1) >= start {
                if prev_end >= end {
                    return;
                }
                self.ranges.remove(&prev_start);
                start = prev_start;
            }
        }

        while let Some((&next_start, &next_end)) = self.ranges.range(start..).next() {
            if end != u64::MAX && next_start > end + 1 {
                break;
            }
            self.ranges.remove(&next_start);
            end = end.max(next_end);
        }

        self.ranges.insert(start, end);
    }

    /// Whether `value` is in the set.
    #[must_use]
    pub fn contains(&self, value: u64) -> bool {
        self.ranges
            .range(..=value)
            .next_back()
            .is_some_and(|(_, &end)| end >= value)
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of disjoint ranges.
    #[must_use]
    pub fn range_count(&self) -> usize {
        self.ranges.len()
    }

    /// Iterate the ranges in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = RangeInclusive<u64>> + '_ {
        self.ranges.iter().map(|(&start, &end)| start..=end)
    }
}

impl FromIterator<u64> for RangeSet {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

impl FromIterator<RangeInclusive<u64>> for RangeSet {
    fn from_iter<I: IntoIterator<Item = RangeInclusive<u64>>>(iter: I) -> Self {
        let mut set = Self::new();
        for range in iter {
            set.insert_range(range);
        }
        set
    }
}

impl Extend<u64> for RangeSet {
    fn extend<I: IntoIterator<Item = u64>>(&mut self, iter: I) {
        for value in iter {
            self.insert(value);
        }
    }
}

impl fmt::Display for RangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, range) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            if range.start() == range.end() {
                write!(f, "{}", range.start())?;
            } else {
                write!(f, "{}..={}", range.start(), range.end())?;
            }
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_adjacent_values_merge() {
        let set: RangeSet = [1, 2, 3, 5, 4].into_iter().collect();
        assert_eq!(set.range_count(), 1);
        assert_eq!(set.iter().next(), Some(1..=5));
    }

    #[test]
    fn test_bridging_range_merges_neighbours() {
        let mut set: RangeSet = [0..=2, 10..=12, 20..=22].into_iter().collect();
        assert_eq!(set.range_count(), 3);
        set.insert_range(3..=19);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![0..=22]);
    }

    #[test]
    fn test_contained_range_is_noop() {
        let mut set: RangeSet = [5..=50].into_iter().collect();
        set.insert_range(10..=20);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![5..=50]);
    }

    #[test]
    fn test_extremes() {
        let mut set = RangeSet::new();
        set.insert(u64::MAX);
        set.insert(0);
        set.insert_range(u64::MAX - 3..=u64::MAX - 1);
        assert!(set.contains(u64::MAX));
        assert!(set.contains(0));
        assert!(!set.contains(1));
        assert_eq!(set.range_count(), 2);
    }

    #[test]
    fn test_display() {
        let set: RangeSet = [1, 3, 4, 5].into_iter().collect();
        assert_eq!(set.to_string(), "[1, 3..=5]");
    }

    proptest! {
        #[test]
        fn prop_matches_btreeset(values in proptest::collection::vec(0u64..200, 0..100)) {
            let set: RangeSet = values.iter().copied().collect();
            let reference: BTreeSet<u64> = values.iter().copied().collect();

            for value in 0..210 {
                prop_assert_eq!(set.contains(value), reference.contains(&value));
            }

            // Ranges are disjoint and never adjacent.
            let ranges: Vec<_> = set.iter().collect();
            for pair in ranges.windows(2) {
                prop_assert!(pair[0].end() + 1 < *pair[1].start());
            }
        }
    }
}
