//! Per-target request sequencing with replay of already-answered requests.

use std::collections::BTreeMap;

use proven_access_api::RequestException;

/// The result recorded for a processed request.
pub type Outcome<S> = Result<S, RequestException>;

/// What to do with an incoming request sequence.
#[derive(Debug, PartialEq, Eq)]
pub enum Admission<S> {
    /// The next expected request; process it.
    Process,
    /// Already processed; answer with the recorded outcome.
    Replay(Outcome<S>),
    /// Covered by an earlier sequence increment; nothing was recorded.
    Skipped,
}

/// Tracks the next expected sequence of one target and the outcome of every
/// request it has processed.
#[derive(Debug)]
pub struct ReplayLog<S> {
    expected: u64,
    outcomes: BTreeMap<u64, Outcome<S>>,
}

impl<S: Clone> ReplayLog<S> {
    pub const fn new() -> Self {
        Self {
            expected: 0,
            outcomes: BTreeMap::new(),
        }
    }

    pub const fn expected(&self) -> u64 {
        self.expected
    }

    /// Classify `sequence`. Sequences ahead of the expected one are rejected
    /// without touching any state.
    pub fn admit(&self, sequence: u64) -> Result<Admission<S>, RequestException> {
        if sequence == self.expected {
            return Ok(Admission::Process);
        }
        if sequence > self.expected {
            return Err(RequestException::out_of_order(self.expected));
        }
        Ok(self
            .outcomes
            .get(&sequence)
            .map_or(Admission::Skipped, |outcome| Admission::Replay(outcome.clone())))
    }

    /// Record the outcome of the request at the expected sequence.
    pub fn record(&mut self, sequence: u64, outcome: &Outcome<S>) {
        debug_assert_eq!(sequence, self.expected);
        self.outcomes.insert(sequence, outcome.clone());
        self.expected = sequence + 1;
    }

    /// Skip `count` sequences following the last recorded one.
    pub fn skip(&mut self, count: u64) {
        self.expected = self.expected.saturating_add(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_order_then_replay() {
        let mut log = ReplayLog::<u32>::new();
        assert_eq!(log.admit(0), Ok(Admission::Process));
        log.record(0, &Ok(10));
        log.record(1, &Err(RequestException::runtime("x")));

        assert_eq!(log.admit(0), Ok(Admission::Replay(Ok(10))));
        assert_eq!(
            log.admit(1),
            Ok(Admission::Replay(Err(RequestException::runtime("x"))))
        );
        assert_eq!(log.admit(2), Ok(Admission::Process));
    }

    #[test]
    fn test_future_sequence_rejected_without_state_change() {
        let log = ReplayLog::<u32>::new();
        assert_eq!(log.admit(3), Err(RequestException::out_of_order(0)));
        assert_eq!(log.expected(), 0);
    }

    #[test]
    fn test_skipped_sequences() {
        let mut log = ReplayLog::<u32>::new();
        log.record(0, &Ok(1));
        log.skip(2);
        assert_eq!(log.expected(), 3);
        assert_eq!(log.admit(1), Ok(Admission::Skipped));
        assert_eq!(log.admit(3), Ok(Admission::Process));
    }
}
