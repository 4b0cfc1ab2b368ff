// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Groups pending entries into Loki streams and cuts them into push payloads.

use serde::Serialize;
use std::collections::BTreeMap;
use time::OffsetDateTime;

use crate::labels::LabelSet;

/// Default number of line bytes accumulated before a batch is considered full (1 MiB).
pub const DEFAULT_BATCH_SIZE_BYTES: usize = 1024 * 1024;

/// A single line destined for Loki.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub labels: LabelSet,
    pub timestamp: OffsetDateTime,
    pub line: String,
}

/// Body of a `POST /loki/api/v1/push` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushRequest {
    pub streams: Vec<PushStream>,
}

impl PushRequest {
    pub fn entry_count(&self) -> usize {
        self.streams.iter().map(|s| s.values.len()).sum()
    }
}

/// One labelled stream; values are `[unix_nanos, line]` pairs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushStream {
    pub stream: LabelSet,
    pub values: Vec<[String; 2]>,
}

pub struct Aggregator {
    streams: BTreeMap<LabelSet, Vec<(i128, String)>>,
    size_bytes: usize,
    max_batch_bytes: usize,
}

impl Aggregator {
    pub fn new(max_batch_bytes: usize) -> Self {
        Self {
            streams: BTreeMap::new(),
            size_bytes: 0,
            max_batch_bytes,
        }
    }

    pub fn add(&mut self, entry: Entry) {
        self.size_bytes += entry.line.len();
        self.streams
            .entry(entry.labels)
            .or_default()
            .push((entry.timestamp.unix_timestamp_nanos(), entry.line));
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.size_bytes >= self.max_batch_bytes
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Drains every pending entry into a push payload.
    ///
    /// Values inside a stream are ordered by timestamp; entries sharing a
    /// timestamp keep their arrival order.
    pub fn take_batch(&mut self) -> Option<PushRequest> {
        if self.streams.is_empty() {
            return None;
        }
        self.size_bytes = 0;
        let streams = std::mem::take(&mut self.streams)
            .into_iter()
            .map(|(stream, mut values)| {
                values.sort_by_key(|(ts, _)| *ts);
                PushStream {
                    stream,
                    values: values
                        .into_iter()
                        .map(|(ts, line)| [ts.to_string(), line])
                        .collect(),
                }
            })
            .collect();
        Some(PushRequest { streams })
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn entry(service: &str, ts: OffsetDateTime, line: &str) -> Entry {
        Entry {
            labels: LabelSet::new().with("service_name", service),
            timestamp: ts,
            line: line.to_string(),
        }
    }

    #[test]
    fn empty_aggregator_yields_no_batch() {
        let mut aggregator = Aggregator::default();
        assert!(aggregator.is_empty());
        assert!(aggregator.take_batch().is_none());
    }

    #[test]
    fn groups_entries_by_label_set() {
        let mut aggregator = Aggregator::default();
        let ts = datetime!(2023-11-14 22:13:20 UTC);
        aggregator.add(entry("checkout", ts, "a"));
        aggregator.add(entry("search", ts, "b"));
        aggregator.add(entry("checkout", ts, "c"));

        let batch = aggregator.take_batch().unwrap();
        assert_eq!(batch.streams.len(), 2);
        assert_eq!(batch.entry_count(), 3);

        let checkout = batch
            .streams
            .iter()
            .find(|s| s.stream.get("service_name") == Some("checkout"))
            .unwrap();
        assert_eq!(
            checkout.values,
            vec![
                ["1700000000000000000".to_string(), "a".to_string()],
                ["1700000000000000000".to_string(), "c".to_string()],
            ]
        );
        assert!(aggregator.is_empty());
        assert_eq!(aggregator.size_bytes(), 0);
    }

    #[test]
    fn orders_values_by_timestamp() {
        let mut aggregator = Aggregator::default();
        aggregator.add(entry("api", datetime!(2023-11-14 22:13:21 UTC), "later"));
        aggregator.add(entry("api", datetime!(2023-11-14 22:13:20 UTC), "earlier"));

        let batch = aggregator.take_batch().unwrap();
        let lines: Vec<&str> = batch.streams[0]
            .values
            .iter()
            .map(|[_, line]| line.as_str())
            .collect();
        assert_eq!(lines, vec!["earlier", "later"]);
    }

    #[test]
    fn reports_full_once_size_reached() {
        let mut aggregator = Aggregator::new(8);
        let ts = datetime!(2023-11-14 22:13:20 UTC);
        aggregator.add(entry("api", ts, "1234"));
        assert!(!aggregator.is_full());
        aggregator.add(entry("api", ts, "5678"));
        assert!(aggregator.is_full());
        aggregator.take_batch();
        assert!(!aggregator.is_full());
    }

    #[test]
    fn push_request_matches_loki_wire_format() {
        let mut aggregator = Aggregator::default();
        aggregator.add(entry("api", datetime!(2023-11-14 22:13:20 UTC), "hi"));
        let json = serde_json::to_value(aggregator.take_batch().unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "streams": [{
                    "stream": {"service_name": "api"},
                    "values": [["1700000000000000000", "hi"]]
                }]
            })
        );
    }
}
