//! A fixed-duration ring of time fragments, used to bound how much capture
//! history the engine reports as "currently available" without ever
//! retaining more than its configured window. Grounded in the same
//! fixed-capacity ring idiom as `ByteBuffer`, but indexed by wall-clock
//! duration instead of bytes: the core engine only ever needs to answer
//! "what is the oldest timestamp I can still serve," the actual recording
//! to storage is left to the external collaborator that owns the file.
//!
//! Pushing a fragment attributes its whole length to `end_time`; fragments
//! are evicted from the front, oldest first, whenever the retained span
//! would exceed `capacity`.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineEvent {
    StartTimeChanged(Duration),
    EndTimeChanged(Duration),
}

/// Tracks `[start_time, end_time)` of the retained window plus the queue of
/// fragment lengths that make it up, so the oldest can be evicted without
/// rescanning.
#[derive(Debug)]
pub struct FragmentRing {
    capacity: Duration,
    fragments: std::collections::VecDeque<Duration>,
    start_time: Duration,
    end_time: Duration,
}

impl FragmentRing {
    pub fn new(capacity: Duration) -> Self {
        FragmentRing { capacity, fragments: std::collections::VecDeque::new(), start_time: Duration::ZERO, end_time: Duration::ZERO }
    }

    pub fn start_time(&self) -> Duration {
        self.start_time
    }

    pub fn end_time(&self) -> Duration {
        self.end_time
    }

    pub fn span(&self) -> Duration {
        self.end_time.saturating_sub(self.start_time)
    }

    /// Appends one fragment of wall-clock length `len`, evicting from the
    /// front until the retained span fits back within `capacity`. Returns
    /// every change event fired, in order, so a caller can forward them to
    /// whatever notifies interested listeners.
    pub fn push_fragment(&mut self, len: Duration) -> Vec<TimelineEvent> {
        let mut events = Vec::new();
        self.fragments.push_back(len);
        self.end_time = self.end_time.saturating_add(len);
        events.push(TimelineEvent::EndTimeChanged(self.end_time));

        while self.span() > self.capacity {
            let Some(evicted) = self.fragments.pop_front() else { break };
            self.start_time = self.start_time.saturating_add(evicted);
            events.push(TimelineEvent::StartTimeChanged(self.start_time));
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twenty_two_second_fragments_settle_to_a_twenty_second_window() {
        let mut ring = FragmentRing::new(Duration::from_secs(20));
        let mut last_events = Vec::new();
        for _ in 0..22 {
            last_events = ring.push_fragment(Duration::from_secs(1));
        }

        assert_eq!(ring.end_time(), Duration::from_secs(22));
        assert!(ring.span() <= Duration::from_secs(20));
        assert!(ring.span() >= Duration::from_secs(19));
        assert!(last_events.contains(&TimelineEvent::EndTimeChanged(Duration::from_secs(22))));
    }

    #[test]
    fn span_never_exceeds_capacity_after_an_eviction() {
        let mut ring = FragmentRing::new(Duration::from_secs(5));
        for _ in 0..8 {
            ring.push_fragment(Duration::from_secs(1));
        }
        assert!(ring.span() <= Duration::from_secs(5));
    }

    #[test]
    fn single_fragment_under_capacity_fires_no_eviction() {
        let mut ring = FragmentRing::new(Duration::from_secs(20));
        let events = ring.push_fragment(Duration::from_secs(1));
        assert_eq!(events, vec![TimelineEvent::EndTimeChanged(Duration::from_secs(1))]);
        assert_eq!(ring.start_time(), Duration::ZERO);
    }
}
