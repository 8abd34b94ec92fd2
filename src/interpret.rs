//! Completion signal interpretation
//!
//! Decides whether a model reply is an ordinary conversational turn or the
//! completion directive carrying the filled-in form.

use crate::llm::Message;
use crate::schema::{FormSchema, FormValues};
use serde_json::Value;

/// Name of the function the model calls once the form is complete
pub const COMPLETION_DIRECTIVE: &str = "isFormValid";

/// Description sent with the completion directive
pub const COMPLETION_DIRECTIVE_DESCRIPTION: &str =
    "Trigger only when all the required field have been answered";

/// Shown when the directive fired but its arguments could not be used
const UNREADABLE_ANSWERS: &str =
    "Sorry, I could not read those answers. Could you confirm them once more?";

/// Outcome of inspecting one model reply
#[derive(Debug, Clone, PartialEq)]
pub struct Interpretation {
    pub is_valid: bool,
    pub values: Option<FormValues>,
    /// Text recorded in the transcript for this turn
    pub display_text: String,
}

impl Interpretation {
    fn plain(message: &Message) -> Self {
        Self {
            is_valid: false,
            values: None,
            display_text: message.content.clone(),
        }
    }

    fn unreadable(message: &Message) -> Self {
        let display_text = if message.content.trim().is_empty() {
            UNREADABLE_ANSWERS.to_string()
        } else {
            message.content.clone()
        };
        Self {
            is_valid: false,
            values: None,
            display_text,
        }
    }

    fn complete(values: FormValues) -> Self {
        // serde_json maps are key-ordered, so this echo is canonical
        let display_text = Value::Object(values.clone()).to_string();
        Self {
            is_valid: true,
            values: Some(values),
            display_text,
        }
    }
}

/// Classify `message` against the directive named `directive_name`.
pub fn interpret(message: &Message, directive_name: &str) -> Interpretation {
    match directive(message, directive_name) {
        Directive::Absent => Interpretation::plain(message),
        Directive::Unreadable => Interpretation::unreadable(message),
        Directive::Values(values) => Interpretation::complete(values),
    }
}

/// Like [`interpret`], but values missing a required field of `schema` are
/// treated as unreadable.
pub fn interpret_for_schema(
    message: &Message,
    directive_name: &str,
    schema: &FormSchema,
) -> Interpretation {
    match directive(message, directive_name) {
        Directive::Absent => Interpretation::plain(message),
        Directive::Values(values) if schema.missing_required(&values).is_empty() => {
            Interpretation::complete(values)
        }
        Directive::Values(_) | Directive::Unreadable => Interpretation::unreadable(message),
    }
}

enum Directive {
    Absent,
    /// Called, but the arguments are not a JSON object
    Unreadable,
    Values(FormValues),
}

fn directive(message: &Message, directive_name: &str) -> Directive {
    let Some(call) = message
        .function_call
        .as_ref()
        .filter(|call| call.name == directive_name)
    else {
        return Directive::Absent;
    };

    match serde_json::from_str::<Value>(&call.arguments) {
        Ok(Value::Object(values)) => Directive::Values(values),
        Ok(_) | Err(_) => Directive::Unreadable,
    }
}
