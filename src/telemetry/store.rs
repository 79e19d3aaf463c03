//! Latest snapshot plus bounded per-category history.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use tracing::{debug, trace};

use super::history::{Category, HistoryBuffer};
use super::reading::NormalizedReading;

/// In-memory telemetry state.
///
/// Mutated only by the ingestion pipeline. Readers receive owned copies, so a
/// caller never holds a reference into a buffer that is being written.
#[derive(Debug)]
pub struct TelemetryStore {
    latest: Option<NormalizedReading>,
    history: BTreeMap<Category, HistoryBuffer<NormalizedReading>>,
    total_ingested: u64,
}

impl TelemetryStore {
    pub fn new(capacity: usize) -> Self {
        let history = Category::ALL
            .into_iter()
            .map(|category| (category, HistoryBuffer::new(capacity)))
            .collect();

        Self {
            latest: None,
            history,
            total_ingested: 0,
        }
    }

    /// Stores `reading` as the latest snapshot and, when its topic names a
    /// category, appends it to that category's history.
    ///
    /// Returns the category the reading was filed under. Unclassified topics
    /// only update the snapshot.
    pub fn ingest(&mut self, reading: NormalizedReading) -> Option<Category> {
        self.total_ingested += 1;
        let category = Category::classify(&reading.topic);

        match category.and_then(|c| self.history.get_mut(&c).map(|buffer| (c, buffer))) {
            Some((category, buffer)) => {
                if buffer.push(reading.clone()).is_some() {
                    trace!(%category, capacity = buffer.capacity(), "Evicted oldest history entry");
                }
            }
            None => {
                debug!(topic = %reading.topic, "Topic matches no history category, kept as latest only");
            }
        }

        self.latest = Some(reading);
        category
    }

    pub fn latest(&self) -> Option<NormalizedReading> {
        self.latest.clone()
    }

    pub fn latest_received_at(&self) -> Option<DateTime<Utc>> {
        self.latest.as_ref().map(|reading| reading.received_at)
    }

    pub fn history(&self, category: Category, limit: usize) -> Vec<NormalizedReading> {
        self.history
            .get(&category)
            .map(|buffer| buffer.recent(limit))
            .unwrap_or_default()
    }

    pub fn history_len(&self, category: Category) -> usize {
        self.history.get(&category).map_or(0, HistoryBuffer::len)
    }

    pub fn total_ingested(&self) -> u64 {
        self.total_ingested
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::RawMessage;
    use crate::telemetry::reading::normalize;

    fn reading(topic: &str, payload: &str) -> NormalizedReading {
        normalize(&RawMessage::new(topic, payload))
    }

    #[test]
    fn latest_is_absent_before_first_ingest() {
        let store = TelemetryStore::new(5);
        assert_eq!(store.latest(), None);
        assert!(store.history(Category::Temperature, 10).is_empty());
    }

    #[test]
    fn raw_temperature_payload_lands_in_latest_and_history() {
        let mut store = TelemetryStore::new(5);
        let filed = store.ingest(reading("iot/sensors/temperature", "not json"));

        assert_eq!(filed, Some(Category::Temperature));
        assert_eq!(
            store.latest().and_then(|r| r.raw_text().map(str::to_string)),
            Some("not json".to_string())
        );
        let history = store.history(Category::Temperature, 10);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].raw_text(), Some("not json"));
    }

    #[test]
    fn history_is_bounded_per_category() {
        let mut store = TelemetryStore::new(3);
        for i in 0..7 {
            store.ingest(reading("iot/sensors/temperature", &format!(r#"{{"seq":{i}}}"#)));
        }
        store.ingest(reading("iot/sensors/humidity", r#"{"seq":100}"#));

        let seqs: Vec<i64> = store
            .history(Category::Temperature, 10)
            .iter()
            .filter_map(|r| r.field("seq").and_then(|v| v.as_i64()))
            .collect();
        assert_eq!(seqs, vec![4, 5, 6]);
        assert_eq!(store.history_len(Category::Humidity), 1);
        assert_eq!(store.total_ingested(), 8);
    }

    #[test]
    fn history_limit_is_clamped() {
        let mut store = TelemetryStore::new(10);
        for i in 0..4 {
            store.ingest(reading("iot/sensors/humidity", &format!(r#"{{"seq":{i}}}"#)));
        }

        assert_eq!(store.history(Category::Humidity, 50).len(), 4);
        assert!(store.history(Category::Humidity, 0).is_empty());

        let last_two: Vec<i64> = store
            .history(Category::Humidity, 2)
            .iter()
            .filter_map(|r| r.field("seq").and_then(|v| v.as_i64()))
            .collect();
        assert_eq!(last_two, vec![2, 3]);
    }

    #[test]
    fn unclassified_topic_only_updates_latest() {
        let mut store = TelemetryStore::new(10);
        store.ingest(reading("iot/sensors/temperature", r#"{"t":1}"#));
        let filed = store.ingest(reading("iot/sensors/pressure", r#"{"p":1013}"#));

        assert_eq!(filed, None);
        assert_eq!(
            store.latest().map(|r| r.topic),
            Some("iot/sensors/pressure".to_string())
        );
        assert_eq!(store.history_len(Category::Temperature), 1);
        assert_eq!(store.history_len(Category::Humidity), 0);
    }
}
