//! Congestion Classification
//!
//! Deterministic, rule-based severity for one road segment over a trailing
//! window `[now - lookback, now)`:
//!
//! 1. Accidents in the window → RED
//! 2. Two or more vehicle entries above the threshold → RED
//! 3. Exactly one → YELLOW
//! 4. Otherwise → GREEN
//!
//! The threshold comparison is strict: an entry equal to the threshold is
//! not congested. Vehicle entries are per distinct timestamp, so several
//! reports sharing a timestamp are judged on their sum.

use std::sync::Arc;

use tracing::debug;

use crate::clock::Clock;
use crate::storage::{CounterStore, StoreError};
use crate::types::{AccidentRule, Condition, EventKind};

/// Answers congestion queries against a shared counter store.
///
/// Holds no state of its own beyond its handles, so concurrent queries only
/// contend inside the store.
#[derive(Clone)]
pub struct CongestionClassifier {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    accident_rule: AccidentRule,
}

impl CongestionClassifier {
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>, accident_rule: AccidentRule) -> Self {
        Self {
            store,
            clock,
            accident_rule,
        }
    }

    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    pub const fn accident_rule(&self) -> AccidentRule {
        self.accident_rule
    }

    /// Half-open window `[now - lookback, now)`.
    pub fn window(&self, lookback: i64) -> (i64, i64) {
        let end = self.clock.now_millis();
        (end.saturating_sub(lookback), end)
    }

    /// Severity of `segment` over the last `lookback` milliseconds.
    pub fn classify(&self, segment: &str, lookback: i64, threshold: i64) -> Result<Condition, StoreError> {
        let (start, end) = self.window(lookback);

        if self.has_accident(segment, start, end)? {
            debug!(segment, start, end, "Accident in window");
            return Ok(Condition::Red);
        }

        let mut busy = 0usize;
        for counter in self.store.read(segment, start, end, EventKind::Vehicle)? {
            if counter?.value > threshold {
                busy += 1;
                if busy >= 2 {
                    break;
                }
            }
        }

        let condition = match busy {
            0 => Condition::Green,
            1 => Condition::Yellow,
            _ => Condition::Red,
        };
        debug!(segment, start, end, busy, %condition, "Segment classified");
        Ok(condition)
    }

    /// Sum of vehicle counts over the last `lookback` milliseconds.
    pub fn total_vehicles(&self, segment: &str, lookback: i64) -> Result<i64, StoreError> {
        let (start, end) = self.window(lookback);
        self.sum(segment, start, end, EventKind::Vehicle)
    }

    /// Sum of accident counts over the last `lookback` milliseconds.
    pub fn total_accidents(&self, segment: &str, lookback: i64) -> Result<i64, StoreError> {
        let (start, end) = self.window(lookback);
        self.sum(segment, start, end, EventKind::Accident)
    }

    fn has_accident(&self, segment: &str, start: i64, end: i64) -> Result<bool, StoreError> {
        match self.accident_rule {
            AccidentRule::WindowSum => Ok(self.sum(segment, start, end, EventKind::Accident)? > 0),
            AccidentRule::AnyPositiveEntry => {
                for counter in self.store.read(segment, start, end, EventKind::Accident)? {
                    if counter?.value > 0 {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    fn sum(&self, segment: &str, start: i64, end: i64, kind: EventKind) -> Result<i64, StoreError> {
        let mut total = 0i64;
        for counter in self.store.read(segment, start, end, kind)? {
            total = total.saturating_add(counter?.value);
        }
        Ok(total)
    }
}
