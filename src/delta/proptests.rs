//! Property-based tests for the delta reducer

use super::*;
use proptest::prelude::*;
use serde_json::json;

fn arb_chunks() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::vec("[a-zA-Z0-9 {}\":,.@]{0,12}", 0..20)
}

/// Arbitrary wire delta with the shapes providers actually send, plus noise
fn arb_delta() -> impl Strategy<Value = PartialMessage> {
    prop_oneof![
        "[a-z ]{0,10}".prop_map(PartialMessage::content),
        "[a-zA-Z]{1,10}".prop_map(PartialMessage::function_name),
        "[a-z{}\":]{0,10}".prop_map(PartialMessage::function_arguments),
        Just(PartialMessage::from_value(json!({ "role": "assistant" }))),
        Just(PartialMessage::from_value(json!({ "content": null }))),
        Just(PartialMessage::from_value(json!({ "tool_calls": [{ "index": 0 }] }))),
        Just(PartialMessage::from_value(json!({ "content": { "odd": true } }))),
        (0i64..100).prop_map(|n| PartialMessage::from_value(json!({ "index": n }))),
    ]
}

proptest! {
    #[test]
    fn prop_text_fold_is_concatenation(chunks in arb_chunks()) {
        let folded = chunks
            .iter()
            .fold(PartialMessage::new(), |acc, chunk| {
                reduce(&acc, &PartialMessage::content(chunk.clone()))
            });
        let expected = chunks.concat();
        if chunks.is_empty() {
            prop_assert!(folded.is_empty());
        } else {
            prop_assert_eq!(folded.text(), Some(expected.as_str()));
        }
    }

    #[test]
    fn prop_arguments_fold_is_concatenation(chunks in arb_chunks()) {
        let mut accumulator = StreamingAccumulator::new();
        accumulator.push(&PartialMessage::function_name("isFormValid"));
        for chunk in &chunks {
            accumulator.push(&PartialMessage::function_arguments(chunk.clone()));
        }
        let call = accumulator.into_message().function_call;
        prop_assert_eq!(call.map(|c| c.arguments), Some(chunks.concat()));
    }

    #[test]
    fn prop_keys_are_never_lost(deltas in proptest::collection::vec(arb_delta(), 0..30)) {
        let mut accumulated = PartialMessage::new();
        for delta in &deltas {
            let next = reduce(&accumulated, delta);
            for key in accumulated.fields.keys() {
                prop_assert!(next.get(key).is_some());
            }
            accumulated = next;
        }
    }

    #[test]
    fn prop_first_value_shape_wins(deltas in proptest::collection::vec(arb_delta(), 1..30)) {
        let folded = deltas
            .iter()
            .fold(PartialMessage::new(), |acc, delta| reduce(&acc, delta));
        for (key, fragment) in &folded.fields {
            let first = deltas
                .iter()
                .find_map(|delta| delta.get(key))
                .expect("key came from some delta");
            prop_assert_eq!(
                std::mem::discriminant(fragment),
                std::mem::discriminant(first)
            );
        }
    }
}
