use crate::observe::AgreementSnapshot;
use std::collections::HashMap;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
struct TrendPoint {
    started_at: Option<i64>,
    ended_at: Option<i64>,
    age: Option<i64>,
}

/// Remembers the previous cycle's update timestamps per agreement, to tell whether replication is
/// moving forward between two observations.
#[derive(Debug, Default)]
pub(crate) struct TrendTracker {
    previous: HashMap<String, TrendPoint>,
}

impl TrendTracker {
    pub(crate) fn new() -> Self {
        TrendTracker::default()
    }

    /// Record `snapshot` and report whether it shows progress against the last recorded one. A
    /// missing snapshot shows no progress and leaves the history as it was.
    pub(crate) fn record(&mut self, snapshot: &AgreementSnapshot) -> bool {
        if snapshot.missing {
            return false;
        }

        let current = TrendPoint {
            started_at: snapshot.last_update_started_at,
            ended_at: snapshot.last_update_ended_at,
            age: snapshot.update_age().filter(|age| *age >= 0),
        };

        let moving = match self.previous.get(&snapshot.dn) {
            Some(previous) => {
                advanced(previous.started_at, current.started_at)
                    || advanced(previous.ended_at, current.ended_at)
                    || matches!((previous.age, current.age), (Some(before), Some(now)) if now < before)
            }
            None => false,
        };

        self.previous.insert(snapshot.dn.clone(), current);
        moving
    }
}

fn advanced(before: Option<i64>, now: Option<i64>) -> bool {
    matches!((before, now), (Some(before), Some(now)) if now > before)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DN: &str = "cn=agmt to c1,cn=replica,cn=config";

    fn snapshot(observed_at: i64, started_at: Option<i64>, ended_at: Option<i64>) -> AgreementSnapshot {
        AgreementSnapshot {
            missing: false,
            last_update_started_at: started_at,
            last_update_ended_at: ended_at,
            ..AgreementSnapshot::missing(DN, observed_at, None)
        }
    }

    #[test]
    fn first_sighting_is_not_progress() {
        let mut trend = TrendTracker::new();
        assert!(!trend.record(&snapshot(100, Some(90), Some(95))));
    }

    #[test]
    fn detects_new_update_start() {
        let mut trend = TrendTracker::new();
        trend.record(&snapshot(100, Some(90), Some(95)));

        assert!(trend.record(&snapshot(103, Some(101), Some(95))));
        // Same timestamps again, only older.
        assert!(!trend.record(&snapshot(106, Some(101), Some(95))));
    }

    #[test]
    fn detects_new_update_end() {
        let mut trend = TrendTracker::new();
        trend.record(&snapshot(100, None, Some(95)));

        assert!(trend.record(&snapshot(103, None, Some(102))));
    }

    #[test]
    fn missing_cycles_keep_history() {
        let mut trend = TrendTracker::new();
        trend.record(&snapshot(100, Some(90), Some(95)));

        assert!(!trend.record(&AgreementSnapshot::missing(DN, 103, None)));
        assert!(trend.record(&snapshot(106, Some(104), Some(105))));
    }
}
