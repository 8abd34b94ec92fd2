//! Streaming delta reducer
//!
//! Streaming completions arrive as a sequence of partial messages. Each one is
//! folded into an accumulated message: text is concatenated in arrival order and
//! nested objects are merged key by key, so
//! `{"function_call": {"name": "isFormValid"}}` followed by
//! `{"function_call": {"arguments": "{\"em"}}` and
//! `{"function_call": {"arguments": "ail\": ...}"}}` yields one complete call.
//!
//! Fragments are a closed shape. Lists, scalars and mismatched shapes are never
//! merged: whatever has already been accumulated for that key is kept.

#[cfg(test)]
mod proptests;

use crate::llm::{FunctionCall, Message, Role};
use serde_json::Value;
use std::collections::BTreeMap;

/// Field name of the text content in a message delta
pub const CONTENT_KEY: &str = "content";
/// Field name of the role in a message delta
pub const ROLE_KEY: &str = "role";
/// Field name of the structured call in a message delta
pub const FUNCTION_CALL_KEY: &str = "function_call";
const NAME_KEY: &str = "name";
const ARGUMENTS_KEY: &str = "arguments";

/// One value inside a partial message
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    /// Text, merged by concatenation
    Text(String),
    /// Nested object, merged recursively
    Object(BTreeMap<String, Fragment>),
    /// List, never merged
    List(Vec<Value>),
    /// Number or boolean, never merged
    Scalar(Value),
}

impl Fragment {
    /// Convert a wire value. `null` has no fragment representation.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::String(text) => Some(Fragment::Text(text)),
            Value::Object(map) => Some(Fragment::Object(fields_from_map(map))),
            Value::Array(items) => Some(Fragment::List(items)),
            scalar @ (Value::Bool(_) | Value::Number(_)) => Some(Fragment::Scalar(scalar)),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Fragment::Text(text) => Value::String(text.clone()),
            Fragment::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(key, fragment)| (key.clone(), fragment.to_value()))
                    .collect(),
            ),
            Fragment::List(items) => Value::Array(items.clone()),
            Fragment::Scalar(value) => value.clone(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Fragment::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Fragment>> {
        match self {
            Fragment::Object(fields) => Some(fields),
            _ => None,
        }
    }
}

fn fields_from_map(map: serde_json::Map<String, Value>) -> BTreeMap<String, Fragment> {
    map.into_iter()
        .filter_map(|(key, value)| Fragment::from_value(value).map(|fragment| (key, fragment)))
        .collect()
}

/// A message under construction, or one delta of it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialMessage {
    fields: BTreeMap<String, Fragment>,
}

impl PartialMessage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a wire delta such as `choices[0].delta`.
    ///
    /// Anything other than an object yields an empty delta.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self {
                fields: fields_from_map(map),
            },
            _ => Self::default(),
        }
    }

    /// Delta carrying only a piece of text content
    pub fn content(text: impl Into<String>) -> Self {
        Self::default().with(CONTENT_KEY, Fragment::Text(text.into()))
    }

    /// Delta carrying the name of a structured call
    pub fn function_name(name: impl Into<String>) -> Self {
        Self::function_call_part(NAME_KEY, name.into())
    }

    /// Delta carrying a slice of structured-call arguments
    pub fn function_arguments(arguments: impl Into<String>) -> Self {
        Self::function_call_part(ARGUMENTS_KEY, arguments.into())
    }

    fn function_call_part(key: &str, text: String) -> Self {
        let call = BTreeMap::from([(key.to_string(), Fragment::Text(text))]);
        Self::default().with(FUNCTION_CALL_KEY, Fragment::Object(call))
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, fragment: Fragment) -> Self {
        self.fields.insert(key.into(), fragment);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Fragment> {
        self.fields.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Text content carried by this message or delta
    pub fn text(&self) -> Option<&str> {
        self.get(CONTENT_KEY).and_then(Fragment::as_text)
    }

    pub fn has_function_call(&self) -> bool {
        self.fields.contains_key(FUNCTION_CALL_KEY)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(
            self.fields
                .iter()
                .map(|(key, fragment)| (key.clone(), fragment.to_value()))
                .collect(),
        )
    }

    /// Finish the message.
    ///
    /// The role defaults to assistant and missing content becomes empty text. A
    /// structured call that never received a name is dropped.
    pub fn into_message(self) -> Message {
        let role = self
            .get(ROLE_KEY)
            .and_then(Fragment::as_text)
            .and_then(Role::parse)
            .unwrap_or(Role::Assistant);
        let content = self.text().unwrap_or_default().to_string();
        let function_call = self
            .get(FUNCTION_CALL_KEY)
            .and_then(Fragment::as_object)
            .and_then(|call| {
                let name = call.get(NAME_KEY).and_then(Fragment::as_text)?;
                let arguments = call
                    .get(ARGUMENTS_KEY)
                    .and_then(Fragment::as_text)
                    .unwrap_or_default();
                Some(FunctionCall {
                    name: name.to_string(),
                    arguments: arguments.to_string(),
                })
            });

        Message {
            role,
            content,
            function_call,
        }
    }
}

/// Fold `delta` into `accumulated`, returning the merged message.
///
/// `accumulated` is left untouched. Calls must be made in arrival order.
pub fn reduce(accumulated: &PartialMessage, delta: &PartialMessage) -> PartialMessage {
    let mut fields = accumulated.fields.clone();
    absorb(&mut fields, &delta.fields);
    PartialMessage { fields }
}

fn absorb(target: &mut BTreeMap<String, Fragment>, delta: &BTreeMap<String, Fragment>) {
    for (key, incoming) in delta {
        match target.get_mut(key) {
            None => {
                target.insert(key.clone(), incoming.clone());
            }
            Some(existing) => merge(existing, incoming),
        }
    }
}

fn merge(existing: &mut Fragment, incoming: &Fragment) {
    match (existing, incoming) {
        (Fragment::Text(text), Fragment::Text(more)) => text.push_str(more),
        (Fragment::Object(fields), Fragment::Object(more)) => absorb(fields, more),
        // Lists and scalars are never merged; shape mismatches keep the accumulated value.
        (Fragment::List(_) | Fragment::Scalar(_), _)
        | (Fragment::Text(_), _)
        | (Fragment::Object(_), _) => {}
    }
}

/// Per-turn accumulator for a streaming completion
#[derive(Debug, Default)]
pub struct StreamingAccumulator {
    message: PartialMessage,
    fragments: usize,
}

impl StreamingAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, delta: &PartialMessage) {
        self.message = reduce(&self.message, delta);
        self.fragments += 1;
    }

    pub fn has_function_call(&self) -> bool {
        self.message.has_function_call()
    }

    pub fn fragments(&self) -> usize {
        self.fragments
    }

    pub fn message(&self) -> &PartialMessage {
        &self.message
    }

    pub fn into_message(self) -> Message {
        self.message.into_message()
    }
}
