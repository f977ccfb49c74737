//! Deviation window
//!
//! Keeps the most recent deviation samples and reduces them to a median, so a
//! single late or early datagram cannot trigger a correction on its own.

use std::collections::VecDeque;

/// Number of deviation samples kept for the median
pub const WINDOW_CAPACITY: usize = 10;

/// Bounded FIFO of signed deviation samples (seconds, positive = master ahead)
#[derive(Debug, Clone)]
pub struct DeviationWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl DeviationWindow {
    pub fn new() -> Self {
        Self::with_capacity(WINDOW_CAPACITY)
    }

    /// Create a window holding at most `capacity` samples (minimum 1)
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Add a sample, evicting the oldest when full
    pub fn push(&mut self, deviation: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(deviation);
    }

    /// Median of the current samples, or `None` when empty.
    ///
    /// Odd length takes the middle element, even length averages the two
    /// middle elements.
    pub fn median(&self) -> Option<f64> {
        median(self.samples.iter().copied())
    }

    /// Drop all samples (after a correction)
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples oldest first
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }
}

impl Default for DeviationWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// Median of an arbitrary set of values
pub fn median(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let mut sorted: Vec<f64> = values.into_iter().collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    }
}
