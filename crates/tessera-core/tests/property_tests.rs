//! # Property-Based Tests
//!
//! Invariants of the pure core pieces: journal bounding, datatype tag
//! round-trips, the closed render vocabulary, offload thresholds, and
//! filter paging.

#![allow(clippy::unwrap_used, clippy::panic)]

use proptest::collection::vec;
use proptest::prelude::*;
use serde_json::{Map, Value, json};
use tessera_core::{
    Datatype, Filter, Journal, JournalEntry, Row, RowId, ValueEnvelope, ValueRegistry,
    gateway::evaluate_filters,
};

const RENDER_VOCABULARY: [&str; 13] = [
    "text",
    "link",
    "coordinate",
    "geometry",
    "geometry-file",
    "image",
    "image-thumbnail",
    "boolean",
    "color",
    "color-list",
    "json",
    "json-file",
    "unknown",
];

fn arb_datatype() -> impl Strategy<Value = Datatype> {
    prop_oneof![
        Just(Datatype::Text),
        Just(Datatype::Number),
        Just(Datatype::Boolean),
        Just(Datatype::Date),
        Just(Datatype::Url),
        Just(Datatype::Color),
        Just(Datatype::Coordinate),
        Just(Datatype::Polygon),
        Just(Datatype::Json),
        Just(Datatype::Image),
        Just(Datatype::Relation),
        "[a-z-]{1,16}".prop_map(|tag: String| Datatype::from(tag.as_str())),
    ]
}

fn arb_payload() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        "[a-zA-Z0-9 #]{0,40}".prop_map(Value::String),
        vec("[a-z#0-9]{0,10}", 0..4).prop_map(|items| json!(items)),
    ]
}

proptest! {
    /// The journal never retains more than its capacity, and always keeps
    /// the most recent entries.
    #[test]
    fn journal_is_bounded_append_then_trim(labels in vec("[a-z.]{1,12}", 0..500)) {
        let journal = Journal::new(200);
        for label in &labels {
            journal.record(JournalEntry::committed(label.clone(), Vec::new()));
        }
        prop_assert!(journal.len() <= 200);
        prop_assert_eq!(journal.len(), labels.len().min(200));

        let entries = journal.entries();
        let expected_tail: Vec<&String> =
            labels.iter().skip(labels.len().saturating_sub(200)).collect();
        let kept: Vec<&String> = entries.iter().map(|e| &e.label).collect();
        prop_assert_eq!(kept, expected_tail);
    }

    /// Datatype tags survive the string round trip, known and unknown.
    #[test]
    fn datatype_tags_round_trip(tag in "[a-z][a-z0-9-]{0,24}") {
        let datatype = Datatype::from(tag.as_str());
        prop_assert_eq!(datatype.as_str(), tag.as_str());

        let serialized = serde_json::to_value(&datatype).expect("serialize");
        let back: Datatype = serde_json::from_value(serialized).expect("deserialize");
        prop_assert_eq!(back, datatype);
    }

    /// The registry always answers from the fixed render vocabulary, no
    /// matter the datatype/payload combination.
    #[test]
    fn render_vocabulary_is_closed(datatype in arb_datatype(), payload in arb_payload()) {
        let registry = ValueRegistry::with_builtins();
        let envelope = ValueEnvelope { datatype, data: payload };
        let rendered = registry.render(&envelope);
        prop_assert!(RENDER_VOCABULARY.contains(&rendered.kind()));
        let previewed = registry.preview(&envelope);
        prop_assert!(RENDER_VOCABULARY.contains(&previewed.kind()));
    }

    /// Offload triggers exactly when the serialized payload exceeds the
    /// plugin threshold (string payloads serialize with two quote chars).
    #[test]
    fn offload_threshold_is_exact(len in 0usize..20_000) {
        let registry = ValueRegistry::with_builtins();
        let payload = Value::String("g".repeat(len));
        let expected = len + 2 > 10_000;
        prop_assert_eq!(
            registry.should_upload_to_bucket(&Datatype::Polygon, &payload),
            expected
        );
    }

    /// Paging never yields more than `limit` rows, never yields rows
    /// skipped by `offset`, and reports the unpaged total.
    #[test]
    fn paging_respects_offset_and_limit(
        n in 0usize..50,
        offset in 0usize..60,
        limit in 0usize..60,
    ) {
        let rows: Vec<Row> = (0..n)
            .map(|i| {
                let mut data = Map::new();
                data.insert("n".into(), json!(i));
                Row::new(RowId::new(format!("r{i:03}")), data, Vec::new())
            })
            .collect();

        let page = evaluate_filters(
            rows,
            &[
                Filter::order_asc("$id"),
                Filter::Offset(offset),
                Filter::Limit(limit),
            ],
        );

        prop_assert_eq!(page.total, n);
        let expected_len = n.saturating_sub(offset).min(limit);
        prop_assert_eq!(page.rows.len(), expected_len);
        if let Some(first) = page.rows.first() {
            prop_assert_eq!(first.id.as_str(), format!("r{offset:03}"));
        }
    }
}
