//! # Output Aggregator
//!
//! Collects decoded values from every polling loop of a session into a single
//! [`OutputBatch`]. Values are grouped by correlation id and by the wall-clock
//! second in which they were decoded.
//!
//! ```text
//! OutputBatch { hardwareId, data: [
//!     OutputGroup { correlationId, sourceTimestamp, values: [
//!         DecodedValue { displayName, addressLabel, valueText }, ...
//!     ]}, ...
//! ]}
//! ```
//!
//! The batch only exists between the first contribution and the next
//! [`OutputAggregator::take`] or [`OutputAggregator::clear`].

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

/// One labelled value, rendered as display text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedValue {
    pub display_name: String,
    pub address_label: String,
    pub value_text: String,
}

impl DecodedValue {
    pub fn new(display_name: &str, address_label: String, value_text: String) -> Self {
        Self {
            display_name: display_name.to_string(),
            address_label,
            value_text,
        }
    }
}

/// Values sharing a correlation id and a source second
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputGroup {
    pub correlation_id: String,
    pub source_timestamp: String,
    pub values: Vec<DecodedValue>,
}

/// Everything one slave produced since the last take
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputBatch {
    pub hardware_id: String,
    pub data: Vec<OutputGroup>,
}

impl OutputBatch {
    pub fn new(hardware_id: &str) -> Self {
        Self {
            hardware_id: hardware_id.to_string(),
            data: Vec::new(),
        }
    }

    /// Append values to the group matching `(correlation_id, timestamp)`,
    /// creating the group when none exists yet
    pub fn append(&mut self, correlation_id: &str, timestamp: &str, values: Vec<DecodedValue>) {
        let existing = self
            .data
            .iter_mut()
            .find(|g| g.correlation_id == correlation_id && g.source_timestamp == timestamp);

        match existing {
            Some(group) => group.values.extend(values),
            None => self.data.push(OutputGroup {
                correlation_id: correlation_id.to_string(),
                source_timestamp: timestamp.to_string(),
                values,
            }),
        }
    }

    pub fn value_count(&self) -> usize {
        self.data.iter().map(|g| g.values.len()).sum()
    }
}

/// Current local time truncated to the second
pub fn source_timestamp() -> String {
    Local::now().format(crate::SOURCE_TIMESTAMP_FORMAT).to_string()
}

/// Lock-protected batch shared by all polling loops of a session
#[derive(Debug, Default)]
pub struct OutputAggregator {
    batch: Mutex<Option<OutputBatch>>,
}

impl OutputAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    // Poisoning is ignored: no method leaves the batch half-updated.
    fn lock(&self) -> MutexGuard<'_, Option<OutputBatch>> {
        self.batch.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add values decoded now
    pub fn contribute(&self, hardware_id: &str, correlation_id: &str, values: Vec<DecodedValue>) {
        let timestamp = source_timestamp();
        self.contribute_at(hardware_id, correlation_id, &timestamp, values);
    }

    /// Add values with an explicit source timestamp
    pub fn contribute_at(
        &self,
        hardware_id: &str,
        correlation_id: &str,
        timestamp: &str,
        values: Vec<DecodedValue>,
    ) {
        if values.is_empty() {
            return;
        }

        let mut guard = self.lock();
        guard
            .get_or_insert_with(|| OutputBatch::new(hardware_id))
            .append(correlation_id, timestamp, values);
    }

    /// Remove and return the current batch in one step
    pub fn take(&self) -> Option<OutputBatch> {
        self.lock().take()
    }

    /// Copy of the current batch, left in place
    pub fn peek(&self) -> Option<OutputBatch> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        *self.lock() = None;
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn value(label: &str, text: &str) -> DecodedValue {
        DecodedValue::new("Sensor", label.to_string(), text.to_string())
    }

    #[test]
    fn test_same_second_same_correlation_merges() {
        let aggregator = OutputAggregator::new();
        aggregator.contribute_at("hw", "A", "2024-01-01 00:00:00", vec![value("40001", "00001")]);
        aggregator.contribute_at("hw", "A", "2024-01-01 00:00:00", vec![value("40002", "00002")]);

        let batch = aggregator.take().unwrap();
        assert_eq!(batch.hardware_id, "hw");
        assert_eq!(batch.data.len(), 1);
        let labels: Vec<_> = batch.data[0].values.iter().map(|v| v.address_label.as_str()).collect();
        assert_eq!(labels, vec!["40001", "40002"]);
    }

    #[test]
    fn test_new_group_per_correlation_or_second() {
        let aggregator = OutputAggregator::new();
        aggregator.contribute_at("hw", "A", "2024-01-01 00:00:00", vec![value("1", "0")]);
        aggregator.contribute_at("hw", "B", "2024-01-01 00:00:00", vec![value("2", "0")]);
        aggregator.contribute_at("hw", "A", "2024-01-01 00:00:01", vec![value("3", "0")]);
        aggregator.contribute_at("hw", "A", "2024-01-01 00:00:00", vec![value("4", "0")]);

        let batch = aggregator.peek().unwrap();
        assert_eq!(batch.data.len(), 3);
        assert_eq!(batch.data[0].values.len(), 2);
        assert_eq!(batch.value_count(), 4);
    }

    #[test]
    fn test_batch_lifecycle() {
        let aggregator = OutputAggregator::new();
        assert!(aggregator.is_empty());

        aggregator.contribute("hw", "A", Vec::new());
        assert!(aggregator.is_empty());

        aggregator.contribute("hw", "A", vec![value("1", "1")]);
        assert!(aggregator.peek().is_some());
        assert!(!aggregator.is_empty());

        aggregator.clear();
        assert!(aggregator.take().is_none());

        aggregator.contribute("hw", "A", vec![value("1", "1")]);
        assert!(aggregator.take().is_some());
        assert!(aggregator.take().is_none());
    }

    #[test]
    fn test_concurrent_contributions() {
        let aggregator = Arc::new(OutputAggregator::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let aggregator = aggregator.clone();
                std::thread::spawn(move || {
                    for j in 0..50 {
                        aggregator.contribute_at(
                            "hw",
                            &format!("C{}", i % 2),
                            "2024-01-01 00:00:00",
                            vec![value(&format!("{}-{}", i, j), "1")],
                        );
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let batch = aggregator.take().unwrap();
        assert_eq!(batch.data.len(), 2);
        assert_eq!(batch.value_count(), 400);
    }

    #[test]
    fn test_serialized_field_names() {
        let aggregator = OutputAggregator::new();
        aggregator.contribute_at("hw-1", "A", "2024-01-01 12:00:00", vec![value("40001", "00042")]);
        let json = serde_json::to_value(aggregator.take().unwrap()).unwrap();

        assert_eq!(json["hardwareId"], "hw-1");
        assert_eq!(json["data"][0]["correlationId"], "A");
        assert_eq!(json["data"][0]["sourceTimestamp"], "2024-01-01 12:00:00");
        assert_eq!(json["data"][0]["values"][0]["displayName"], "Sensor");
        assert_eq!(json["data"][0]["values"][0]["addressLabel"], "40001");
        assert_eq!(json["data"][0]["values"][0]["valueText"], "00042");
    }

    #[test]
    fn test_source_timestamp_format() {
        let ts = source_timestamp();
        assert_eq!(ts.len(), 19);
        assert!(chrono::NaiveDateTime::parse_from_str(&ts, "%Y-%m-%d %H:%M:%S").is_ok());
    }
}
