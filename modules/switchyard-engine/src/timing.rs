//! Per-action wall-clock timings for one top-level dispatch.

use std::time::Duration;

use serde::ser::{Serialize, SerializeMap, Serializer};

/// Label → elapsed time, in execution order. Recording a label twice keeps
/// its position and overwrites the duration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionTimings {
    entries: Vec<(String, Duration)>,
}

impl ActionTimings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, label: impl Into<String>, elapsed: Duration) {
        let label = label.into();
        match self.entries.iter_mut().find(|(l, _)| *l == label) {
            Some(entry) => entry.1 = elapsed,
            None => self.entries.push((label, elapsed)),
        }
    }

    pub fn get(&self, label: &str) -> Option<Duration> {
        self.entries
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, d)| *d)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(l, _)| l.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Duration)> {
        self.entries.iter().map(|(l, d)| (l.as_str(), *d))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Serializes as `{label: milliseconds}`.
impl Serialize for ActionTimings {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (label, elapsed) in &self.entries {
            map.serialize_entry(label, &(elapsed.as_nanos() as f64 / 1_000_000.0))?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rerecording_keeps_order_and_overwrites() {
        let mut timings = ActionTimings::new();
        timings.record("a", Duration::from_millis(1));
        timings.record("b", Duration::from_millis(2));
        timings.record("a", Duration::from_millis(3));

        assert_eq!(timings.labels().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(timings.get("a"), Some(Duration::from_millis(3)));
        assert_eq!(timings.get("c"), None);
    }

    #[test]
    fn serializes_as_millisecond_map() {
        let mut timings = ActionTimings::new();
        timings.record("fetchUser", Duration::from_millis(12));
        let json = serde_json::to_value(&timings).unwrap();
        assert_eq!(json["fetchUser"], serde_json::json!(12.0));
    }
}
