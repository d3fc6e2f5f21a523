//! Most-frequent-value counting for categorical neighbourhoods.

/// Counts values in first-seen order and reports the most frequent one.
///
/// Ties go to the value that was pushed first, which keeps results
/// independent of the numeric value of the codes involved. Neighbourhoods are
/// small (a window or a sub-pixel pattern), so a linear scan over the
/// distinct values beats hashing.
#[derive(Debug, Clone, Default)]
pub struct MajorityCounter {
    counts: Vec<(i32, u32)>,
}

impl MajorityCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            counts: Vec::with_capacity(capacity),
        }
    }

    /// Record one occurrence of `value`.
    pub fn push(&mut self, value: i32) {
        match self.counts.iter_mut().find(|(v, _)| *v == value) {
            Some((_, count)) => *count += 1,
            None => self.counts.push((value, 1)),
        }
    }

    /// The most frequent value, or `None` if nothing was pushed.
    pub fn winner(&self) -> Option<i32> {
        let mut best: Option<(i32, u32)> = None;
        for &(value, count) in &self.counts {
            match best {
                Some((_, best_count)) if best_count >= count => {}
                _ => best = Some((value, count)),
            }
        }
        best.map(|(value, _)| value)
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Forget all counts, keeping the allocation.
    pub fn clear(&mut self) {
        self.counts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_majority_picks_most_frequent() {
        let mut counter = MajorityCounter::new();
        for v in [5, 7, 7, 5, 7] {
            counter.push(v);
        }
        assert_eq!(counter.winner(), Some(7));
    }

    #[test]
    fn test_tie_goes_to_first_seen() {
        let mut counter = MajorityCounter::new();
        for v in [98, 98, 183, 183, 183, 91, 91, 91] {
            counter.push(v);
        }
        assert_eq!(counter.winner(), Some(183));

        counter.clear();
        for v in [91, 183] {
            counter.push(v);
        }
        assert_eq!(counter.winner(), Some(91));
    }

    #[test]
    fn test_empty_has_no_winner() {
        assert_eq!(MajorityCounter::new().winner(), None);
    }
}
