//! Identifiers and version counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a registered participant. Never reused.
pub type ParticipantId = u64;

/// Per-participant change counter. 0 means "no changes yet".
pub type ItineraryVersion = u64;

/// Schedule-wide change counter.
pub type ScheduleVersion = u64;

/// The single cross-participant counter shared by every itinerary log.
///
/// Every accepted mutation of any log bumps it by exactly one with a single
/// atomic increment, so unrelated participants never wait on each other.
#[derive(Debug, Default)]
pub struct ScheduleClock {
    latest: AtomicU64,
}

impl ScheduleClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one accepted mutation and return the new schedule version.
    pub fn advance(&self) -> ScheduleVersion {
        self.latest.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// The most recently issued schedule version.
    pub fn latest(&self) -> ScheduleVersion {
        self.latest.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_clock_advances_by_one() {
        let clock = ScheduleClock::new();
        assert_eq!(clock.latest(), 0);
        assert_eq!(clock.advance(), 1);
        assert_eq!(clock.advance(), 2);
        assert_eq!(clock.latest(), 2);
    }

    #[test]
    fn test_clock_concurrent_advances_are_not_lost() {
        let clock = Arc::new(ScheduleClock::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let clock = Arc::clone(&clock);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        clock.advance();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(clock.latest(), 1000);
    }
}
