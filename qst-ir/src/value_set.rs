use std::fmt;

/// Sets with at most this many values are multiplied and divided element by element.
const EXACT_OP_LIMIT: u64 = 256;

/// A sorted set of `i32` values, stored as disjoint closed intervals.
///
/// Intervals are kept sorted and neither overlap nor touch, so two sets with the same values
/// have the same representation.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct ValueSet {
    intervals: Vec<(i32, i32)>,
}

impl ValueSet {
    pub fn empty() -> Self {
        ValueSet::default()
    }

    /// Every `i32`.
    pub fn all() -> Self {
        Self::of_interval(i32::MIN, i32::MAX)
    }

    pub fn of(value: i32) -> Self {
        Self::of_interval(value, value)
    }

    /// All values in `[start, end]`. Empty if `end < start`.
    pub fn of_interval(start: i32, end: i32) -> Self {
        if end < start {
            return Self::empty();
        }
        ValueSet {
            intervals: vec![(start, end)],
        }
    }

    fn from_intervals(mut intervals: Vec<(i32, i32)>) -> Self {
        intervals.sort_unstable();
        let mut merged: Vec<(i32, i32)> = Vec::with_capacity(intervals.len());
        for (start, end) in intervals {
            match merged.last_mut() {
                Some(last) if start as i64 <= last.1 as i64 + 1 => last.1 = last.1.max(end),
                _ => merged.push((start, end)),
            }
        }
        ValueSet { intervals: merged }
    }

    /// Number of values.
    pub fn len(&self) -> u64 {
        self.intervals
            .iter()
            .map(|&(start, end)| (end as i64 - start as i64 + 1) as u64)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn is_all(&self) -> bool {
        self.intervals == [(i32::MIN, i32::MAX)]
    }

    /// The `i`-th smallest value.
    pub fn get(&self, i: u64) -> Option<i32> {
        let mut idx = i;
        for &(start, end) in &self.intervals {
            let size = (end as i64 - start as i64 + 1) as u64;
            if idx < size {
                return Some((start as i64 + idx as i64) as i32);
            }
            idx -= size;
        }
        None
    }

    pub fn contains(&self, value: i32) -> bool {
        self.intervals
            .binary_search_by(|&(start, end)| {
                if end < value {
                    std::cmp::Ordering::Less
                } else if start > value {
                    std::cmp::Ordering::Greater
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .is_ok()
    }

    pub fn min(&self) -> Option<i32> {
        self.intervals.first().map(|&(start, _)| start)
    }

    pub fn max(&self) -> Option<i32> {
        self.intervals.last().map(|&(_, end)| end)
    }

    pub fn union(&self, other: &ValueSet) -> ValueSet {
        let mut intervals = self.intervals.clone();
        intervals.extend_from_slice(&other.intervals);
        Self::from_intervals(intervals)
    }

    /// Add `scalar` to every value, wrapping on overflow.
    pub fn add(&self, scalar: i32) -> ValueSet {
        let mut intervals = Vec::with_capacity(self.intervals.len() + 1);
        for &(start, end) in &self.intervals {
            let new_start = start as i64 + scalar as i64;
            let new_end = end as i64 + scalar as i64;
            let in_range = |v: i64| (i32::MIN as i64..=i32::MAX as i64).contains(&v);
            if in_range(new_start) == in_range(new_end) {
                intervals.push((new_start as i32, new_end as i32));
            } else {
                // Only one bound wrapped: split at the end of the range.
                intervals.push((new_start as i32, i32::MAX));
                intervals.push((i32::MIN, new_end as i32));
            }
        }
        Self::from_intervals(intervals)
    }

    /// Subtract `scalar` from every value, wrapping on overflow.
    pub fn sub(&self, scalar: i32) -> ValueSet {
        // Subtracting i32::MIN is the same as adding it under wrapping arithmetic.
        self.add(scalar.wrapping_neg())
    }

    /// Multiply every value by `scalar`.
    ///
    /// Exact for small sets. For larger sets the result is the interval spanned by the products
    /// of the bounds, or every value if those overflow.
    pub fn mul(&self, scalar: i32) -> ValueSet {
        if scalar == 0 && !self.is_empty() {
            return Self::of(0);
        }
        if self.len() <= EXACT_OP_LIMIT {
            return Self::from_intervals(
                self.iter()
                    .map(|v| {
                        let p = v.wrapping_mul(scalar);
                        (p, p)
                    })
                    .collect(),
            );
        }
        self.map_bounds(|v| v.checked_mul(scalar as i64))
    }

    /// Divide every value by `scalar`, rounding toward zero. Division by zero yields every value.
    pub fn div(&self, scalar: i32) -> ValueSet {
        if scalar == 0 {
            return Self::all();
        }
        if self.len() <= EXACT_OP_LIMIT {
            return Self::from_intervals(
                self.iter()
                    .map(|v| {
                        let q = v.wrapping_div(scalar);
                        (q, q)
                    })
                    .collect(),
            );
        }
        self.map_bounds(|v| Some(v / scalar as i64))
    }

    /// Apply a monotonic operation to the bounds. Falls back to every value when the operation
    /// leaves the `i32` range.
    fn map_bounds(&self, op: impl Fn(i64) -> Option<i64>) -> ValueSet {
        let (Some(min), Some(max)) = (self.min(), self.max()) else {
            return Self::empty();
        };
        let (Some(a), Some(b)) = (op(min as i64), op(max as i64)) else {
            return Self::all();
        };
        let (lo, hi) = (a.min(b), a.max(b));
        match (i32::try_from(lo), i32::try_from(hi)) {
            (Ok(lo), Ok(hi)) => Self::of_interval(lo, hi),
            _ => Self::all(),
        }
    }

    /// Values in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = i32> + '_ {
        self.intervals
            .iter()
            .flat_map(|&(start, end)| start..=end)
    }
}

impl fmt::Debug for ValueSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, &(start, end)) in self.intervals.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            if start == end {
                write!(f, "{start}")?;
            } else {
                write!(f, "{start}..={end}")?;
            }
        }
        f.write_str("}")
    }
}

impl FromIterator<i32> for ValueSet {
    fn from_iter<I: IntoIterator<Item = i32>>(iter: I) -> Self {
        Self::from_intervals(iter.into_iter().map(|v| (v, v)).collect())
    }
}
