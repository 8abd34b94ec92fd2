//! System prompt construction

use crate::schema::FormValues;
use serde_json::Value;
use std::fmt::Write;

/// Default role description for the form-filling assistant
pub const DEFAULT_SYSTEM_PROMPT: &str = "Your role is to help fill a form \
that follows a JSON Schema. \
You will ask questions in natural language, one at a time, to the user and fill the form. \
Use a friendly and energetic tone. \
You are able to go back to previous questions if asked.";

/// Build the system prompt for a session.
///
/// Known values are listed only when there are any, so the model asks about
/// the remaining fields instead of re-asking.
pub fn build_system_prompt(template: &str, locale: &str, known_values: &FormValues) -> String {
    let mut prompt = String::from(template);
    let _ = write!(
        prompt,
        "\nWrite in the language of the following locale: {locale}"
    );

    if !known_values.is_empty() {
        let listed = known_values
            .iter()
            .map(|(key, value)| format!("{key}: {}", render_value(value)))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = write!(
            prompt,
            "\nUse the following values to fill the form \
             and ask questions about the remaining missing ones: {listed}"
        );
    }

    prompt
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
