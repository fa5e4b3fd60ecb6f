//! Bounded error ring buffer.

use secsync_core::SecsyncError;
use std::collections::VecDeque;

/// Keeps the most recent errors for observability, evicting the oldest
/// once the capacity is reached.
#[derive(Debug, Clone)]
pub struct ErrorRing {
    entries: VecDeque<SecsyncError>,
    capacity: usize,
}

impl ErrorRing {
    /// Ring buffer sized for ephemeral error accounting.
    pub const DEFAULT_CAPACITY: usize = 20;

    /// Create an empty ring with the given capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record an error, evicting the oldest entry when full.
    pub fn push(&mut self, error: SecsyncError) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(error);
    }

    /// Drop all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of recorded errors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no errors are recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Recorded errors, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &SecsyncError> {
        self.entries.iter()
    }
}

impl Default for ErrorRing {
    fn default() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secsync_core::ErrorCode;

    #[test]
    fn twenty_first_error_evicts_the_oldest() {
        let mut ring = ErrorRing::default();
        for i in 0..21 {
            let error = if i == 0 {
                SecsyncError::protocol(ErrorCode::EphemeralReplay)
            } else {
                SecsyncError::crypto(format!("error-{}", i))
            };
            ring.push(error);
        }
        assert_eq!(ring.len(), 20);
        // The replay error was first in and must be gone.
        assert!(ring.entries().all(|e| e.code().is_none()));
        assert_eq!(
            ring.entries().next().map(ToString::to_string),
            Some("Crypto error: error-1".to_string())
        );
    }

    #[test]
    fn clear_empties_the_ring() {
        let mut ring = ErrorRing::default();
        ring.push(SecsyncError::crypto("x"));
        assert!(!ring.is_empty());
        ring.clear();
        assert!(ring.is_empty());
    }
}
