//! Key ranges for forward cursor scans.

use std::cmp::Ordering;

/// Shape of a [`KeyRange`]: which bounds are present and whether each is
/// inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RangeType {
    /// Every key.
    All,
    /// `start <= key <= stop`
    Closed,
    /// `start <= key < stop`
    ClosedOpen,
    /// `start < key < stop`
    Open,
    /// `start < key <= stop`
    OpenClosed,
    /// `start <= key`
    AtLeast,
    /// `key <= stop`
    AtMost,
    /// `start < key`
    GreaterThan,
    /// `key < stop`
    LessThan,
}

impl RangeType {
    pub fn has_start(self) -> bool {
        matches!(
            self,
            RangeType::Closed
                | RangeType::ClosedOpen
                | RangeType::Open
                | RangeType::OpenClosed
                | RangeType::AtLeast
                | RangeType::GreaterThan
        )
    }

    pub fn has_stop(self) -> bool {
        matches!(
            self,
            RangeType::Closed
                | RangeType::ClosedOpen
                | RangeType::Open
                | RangeType::OpenClosed
                | RangeType::AtMost
                | RangeType::LessThan
        )
    }

    pub fn start_inclusive(self) -> bool {
        matches!(
            self,
            RangeType::Closed | RangeType::ClosedOpen | RangeType::AtLeast
        )
    }

    pub fn stop_inclusive(self) -> bool {
        matches!(
            self,
            RangeType::Closed | RangeType::OpenClosed | RangeType::AtMost
        )
    }

    /// Whether a key comparing `key_vs_start` against the start bound lies on
    /// the admitted side of it. Always true without a start bound.
    pub fn admits_after_start(self, key_vs_start: Ordering) -> bool {
        if !self.has_start() {
            return true;
        }
        match key_vs_start {
            Ordering::Greater => true,
            Ordering::Equal => self.start_inclusive(),
            Ordering::Less => false,
        }
    }

    /// Whether a key comparing `key_vs_stop` against the stop bound lies on
    /// the admitted side of it. Always true without a stop bound.
    pub fn admits_before_stop(self, key_vs_stop: Ordering) -> bool {
        if !self.has_stop() {
            return true;
        }
        match key_vs_stop {
            Ordering::Less => true,
            Ordering::Equal => self.stop_inclusive(),
            Ordering::Greater => false,
        }
    }
}

/// An optional start and stop key with a [`RangeType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange<K> {
    range_type: RangeType,
    start: Option<K>,
    stop: Option<K>,
}

impl<K> KeyRange<K> {
    pub fn all() -> Self {
        Self {
            range_type: RangeType::All,
            start: None,
            stop: None,
        }
    }

    pub fn closed(start: K, stop: K) -> Self {
        Self::bounded(RangeType::Closed, start, stop)
    }

    pub fn closed_open(start: K, stop: K) -> Self {
        Self::bounded(RangeType::ClosedOpen, start, stop)
    }

    pub fn open(start: K, stop: K) -> Self {
        Self::bounded(RangeType::Open, start, stop)
    }

    pub fn open_closed(start: K, stop: K) -> Self {
        Self::bounded(RangeType::OpenClosed, start, stop)
    }

    pub fn at_least(start: K) -> Self {
        Self {
            range_type: RangeType::AtLeast,
            start: Some(start),
            stop: None,
        }
    }

    pub fn greater_than(start: K) -> Self {
        Self {
            range_type: RangeType::GreaterThan,
            start: Some(start),
            stop: None,
        }
    }

    pub fn at_most(stop: K) -> Self {
        Self {
            range_type: RangeType::AtMost,
            start: None,
            stop: Some(stop),
        }
    }

    pub fn less_than(stop: K) -> Self {
        Self {
            range_type: RangeType::LessThan,
            start: None,
            stop: Some(stop),
        }
    }

    fn bounded(range_type: RangeType, start: K, stop: K) -> Self {
        Self {
            range_type,
            start: Some(start),
            stop: Some(stop),
        }
    }

    pub fn range_type(&self) -> RangeType {
        self.range_type
    }

    pub fn start(&self) -> Option<&K> {
        self.start.as_ref()
    }

    pub fn stop(&self) -> Option<&K> {
        self.stop.as_ref()
    }

    pub fn is_all(&self) -> bool {
        self.range_type == RangeType::All
    }
}

impl<K: Ord> KeyRange<K> {
    /// Whether `key` falls in the range under `K`'s own ordering.
    ///
    /// Scans compare serialized keys with the table comparator instead; the
    /// two agree only when the key codec preserves order.
    pub fn contains(&self, key: &K) -> bool {
        let after_start = self
            .start
            .as_ref()
            .map_or(true, |s| self.range_type.admits_after_start(key.cmp(s)));
        let before_stop = self
            .stop
            .as_ref()
            .map_or(true, |s| self.range_type.admits_before_stop(key.cmp(s)));
        after_start && before_stop
    }
}
