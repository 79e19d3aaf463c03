use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Metric bucket a topic is classified into
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Temperature,
    Humidity,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Temperature, Category::Humidity];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Temperature => "temperature",
            Category::Humidity => "humidity",
        }
    }

    /// Substring match on the topic, temperature first. Topics matching
    /// neither are not classified.
    pub fn classify(topic: &str) -> Option<Category> {
        Category::ALL
            .into_iter()
            .find(|category| topic.contains(category.as_str()))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown history category: {0}")]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Category::ALL
            .into_iter()
            .find(|category| category.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

/// Bounded FIFO with drop-oldest eviction.
#[derive(Debug, Clone)]
pub struct HistoryBuffer<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> HistoryBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends `entry`, evicting and returning the oldest one when full.
    pub fn push(&mut self, entry: T) -> Option<T> {
        if self.capacity == 0 {
            return Some(entry);
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }
}

impl<T: Clone> HistoryBuffer<T> {
    /// The newest `limit` entries, oldest first. `limit` is clamped to the
    /// current length.
    pub fn recent(&self, limit: usize) -> Vec<T> {
        let take = limit.min(self.entries.len());
        self.entries
            .iter()
            .skip(self.entries.len() - take)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_the_most_recent_entries_in_order() {
        for capacity in [1usize, 3, 5, 10] {
            for inserts in 0..25usize {
                let mut buffer = HistoryBuffer::new(capacity);
                for value in 0..inserts {
                    buffer.push(value);
                    assert!(buffer.len() <= capacity);
                }

                let start = inserts.saturating_sub(capacity);
                let expected: Vec<usize> = (start..inserts).collect();
                assert_eq!(buffer.recent(usize::MAX), expected);
            }
        }
    }

    #[test]
    fn push_returns_the_evicted_entry() {
        let mut buffer = HistoryBuffer::new(2);
        assert_eq!(buffer.push("a"), None);
        assert_eq!(buffer.push("b"), None);
        assert_eq!(buffer.push("c"), Some("a"));
        assert_eq!(buffer.recent(2), vec!["b", "c"]);
    }

    #[test]
    fn recent_clamps_limit() {
        let mut buffer = HistoryBuffer::new(10);
        for value in 1..=4 {
            buffer.push(value);
        }

        assert_eq!(buffer.recent(100), vec![1, 2, 3, 4]);
        assert_eq!(buffer.recent(2), vec![3, 4]);
        assert!(buffer.recent(0).is_empty());
    }

    #[test]
    fn zero_capacity_stores_nothing() {
        let mut buffer = HistoryBuffer::new(0);
        assert_eq!(buffer.push(1), Some(1));
        assert!(buffer.is_empty());
    }

    #[test]
    fn classify_by_substring() {
        assert_eq!(
            Category::classify("iot/sensors/temperature"),
            Some(Category::Temperature)
        );
        assert_eq!(
            Category::classify("home/humidity/kitchen"),
            Some(Category::Humidity)
        );
        assert_eq!(Category::classify("iot/sensors/pressure"), None);
    }

    #[test]
    fn category_parsing_rejects_unknown_names() {
        assert_eq!("Temperature".parse::<Category>(), Ok(Category::Temperature));
        assert_eq!(" humidity ".parse::<Category>(), Ok(Category::Humidity));
        assert_eq!(
            "pressure".parse::<Category>(),
            Err(UnknownCategory("pressure".to_string()))
        );
    }
}
