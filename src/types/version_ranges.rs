/// A half-open range of notification versions, `[begin, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionRange {
    pub begin: i64,
    pub end: i64,
}

impl VersionRange {
    pub fn new(begin: i64, end: i64) -> Self {
        debug_assert!(begin < end, "empty version range");
        Self { begin, end }
    }

    pub fn contains(&self, version: i64) -> bool {
        self.begin <= version && version < self.end
    }
}

/// An append-only union of version ranges, kept sorted and disjoint.
///
/// Tracks the set of notification versions already delivered to a client;
/// a version inside the collection is a duplicate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionRangeCollection {
    ranges: Vec<VersionRange>,
}

impl VersionRangeCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn ranges(&self) -> &[VersionRange] {
        &self.ranges
    }

    pub fn contains(&self, version: i64) -> bool {
        match self.ranges.binary_search_by(|r| r.begin.cmp(&version)) {
            Ok(_) => true,
            Err(0) => false,
            Err(i) => self.ranges[i - 1].contains(version),
        }
    }

    /// One past the highest version in the collection, or 0 when empty.
    pub fn end_version(&self) -> i64 {
        self.ranges.last().map(|r| r.end).unwrap_or(0)
    }

    /// Add a single version.
    pub fn add(&mut self, version: i64) {
        self.add_range(VersionRange::new(version, version + 1));
    }

    /// Union a range in, coalescing with overlapping or adjacent ranges.
    pub fn add_range(&mut self, range: VersionRange) {
        if range.begin >= range.end {
            return;
        }

        // First range whose end reaches the new begin and last range whose
        // begin does not pass the new end bound the merge window.
        let start = self.ranges.partition_point(|r| r.end < range.begin);
        let stop = self.ranges.partition_point(|r| r.begin <= range.end);

        if start == stop {
            self.ranges.insert(start, range);
            return;
        }

        let merged = VersionRange {
            begin: range.begin.min(self.ranges[start].begin),
            end: range.end.max(self.ranges[stop - 1].end),
        };
        self.ranges.splice(start..stop, std::iter::once(merged));
    }

    /// Union another collection in.
    pub fn merge(&mut self, other: &Self) {
        for range in &other.ranges {
            self.add_range(*range);
        }
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }
}
