use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Integer time quantum. All scheduling decisions quantize to cycles; all
/// stored deadlines are cycles.
pub type Cycle = u64;

/// Maps wall time to discrete cycles of fixed length offset from a
/// configured epoch.
#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct ActorClock {
    /// Epoch of cycle 0, in milliseconds since the Unix epoch.
    beginning_of_time: i64,
    /// Length of one cycle in milliseconds.
    cycle_millis: u64,
}

impl ActorClock {
    pub fn new(beginning_of_time: i64, cycle_millis: u64) -> Self {
        assert!(cycle_millis > 0, "cycle length must be positive");
        ActorClock { beginning_of_time, cycle_millis }
    }

    pub fn cycle_millis(&self) -> u64 {
        self.cycle_millis
    }

    /// Cycle containing the given instant. Instants before the epoch clamp
    /// to cycle 0.
    pub fn cycle(&self, when: DateTime<Utc>) -> Cycle {
        let offset = when.timestamp_millis() - self.beginning_of_time;
        if offset <= 0 {
            return 0;
        }
        offset as u64 / self.cycle_millis
    }

    pub fn current_cycle(&self) -> Cycle {
        self.cycle(Utc::now())
    }

    pub fn cycle_start_millis(&self, cycle: Cycle) -> i64 {
        self.beginning_of_time + (cycle * self.cycle_millis) as i64
    }

    /// Last millisecond belonging to the cycle.
    pub fn cycle_end_millis(&self, cycle: Cycle) -> i64 {
        self.cycle_start_millis(cycle + 1) - 1
    }

    pub fn cycle_start_date(&self, cycle: Cycle) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.cycle_start_millis(cycle)).unwrap()
    }

    pub fn cycle_end_date(&self, cycle: Cycle) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.cycle_end_millis(cycle)).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_mapping_is_consistent() {
        let clock = ActorClock::new(1_000, 10);
        assert_eq!(clock.cycle(Utc.timestamp_millis_opt(1_000).unwrap()), 0);
        assert_eq!(clock.cycle(Utc.timestamp_millis_opt(1_009).unwrap()), 0);
        assert_eq!(clock.cycle(Utc.timestamp_millis_opt(1_010).unwrap()), 1);
        assert_eq!(clock.cycle(clock.cycle_start_date(17)), 17);
        assert_eq!(clock.cycle(clock.cycle_end_date(17)), 17);
    }

    #[test]
    fn pre_epoch_clamps_to_zero() {
        let clock = ActorClock::new(5_000, 10);
        assert_eq!(clock.cycle(Utc.timestamp_millis_opt(0).unwrap()), 0);
    }
}
