//! Server-sent event decoding for streaming completions
//!
//! Event framing and UTF-8 reassembly across chunk boundaries are left to
//! `eventsource-stream`; this module turns each event's data into a message
//! delta.

use super::{FragmentStream, LlmError};
use crate::delta::PartialMessage;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::fmt::Display;

const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Value,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    #[serde(default)]
    message: Option<String>,
}

/// What one event contributes to the fragment stream
enum Decoded {
    Fragment(PartialMessage),
    Skip,
    Done,
    Failed(LlmError),
}

fn decode_event(data: &str) -> Decoded {
    let data = data.trim();
    if data.is_empty() {
        return Decoded::Skip;
    }
    if data == DONE_SENTINEL {
        return Decoded::Done;
    }

    match serde_json::from_str::<StreamChunk>(data) {
        Ok(StreamChunk {
            error: Some(error), ..
        }) => {
            let message = error
                .message
                .unwrap_or_else(|| "An error occurred during streaming".to_string());
            Decoded::Failed(LlmError::server_error(format!("Stream error: {message}")))
        }
        Ok(chunk) => match chunk.choices.into_iter().next() {
            Some(choice) => Decoded::Fragment(PartialMessage::from_value(choice.delta)),
            None => {
                tracing::trace!("Skipping stream chunk without choices");
                Decoded::Skip
            }
        },
        Err(e) => Decoded::Failed(LlmError::unknown(format!(
            "Failed to parse stream chunk: {e} - data: {data}"
        ))),
    }
}

/// Turn an SSE byte stream into message deltas.
///
/// The stream ends at `[DONE]` or when the body ends. Transport and parse
/// failures are yielded once, after which the stream ends.
pub fn decode_sse<S, B, E>(body: S) -> FragmentStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let events = Box::pin(body.eventsource());

    Box::pin(futures::stream::unfold(
        Some(events),
        |state| async move {
            let mut events = state?;
            loop {
                let event = match events.next().await? {
                    Ok(event) => event,
                    Err(e) => {
                        let error = LlmError::network(format!("Stream interrupted: {e}"));
                        return Some((Err(error), None));
                    }
                };
                match decode_event(&event.data) {
                    Decoded::Fragment(fragment) => return Some((Ok(fragment), Some(events))),
                    Decoded::Skip => {}
                    Decoded::Done => return None,
                    Decoded::Failed(error) => return Some((Err(error), None)),
                }
            }
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::reduce;
    use crate::llm::LlmErrorKind;
    use std::convert::Infallible;

    fn body(chunks: Vec<Vec<u8>>) -> impl Stream<Item = Result<Vec<u8>, Infallible>> {
        futures::stream::iter(chunks.into_iter().map(Ok))
    }

    fn text_body(chunks: &[&str]) -> impl Stream<Item = Result<Vec<u8>, Infallible>> {
        body(chunks.iter().map(|c| c.as_bytes().to_vec()).collect())
    }

    #[tokio::test]
    async fn test_decode_deltas_until_done() {
        let stream = decode_sse(text_body(&[
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n",
            "\ndata: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
        ]));

        let deltas: Vec<_> = stream.collect().await;
        assert_eq!(deltas.len(), 2);
        let merged = deltas
            .into_iter()
            .map(Result::unwrap)
            .fold(PartialMessage::new(), |acc, d| reduce(&acc, &d));
        assert_eq!(merged.text(), Some("Hello"));
    }

    #[tokio::test]
    async fn test_event_split_across_chunks() {
        let stream = decode_sse(text_body(&[
            "data: {\"choices\":[{\"del",
            "ta\":{\"content\":\"hello\"}}]}\r\n\r\n",
        ]));
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap().text(), Some("hello"));
    }

    #[tokio::test]
    async fn test_multibyte_character_split_across_chunks() {
        let event = concat!(
            "data: {\"choices\":[{\"delta\":",
            "{\"content\":\"Quel est votre prénom ?\"}}]}\n\n",
        );
        let bytes = event.as_bytes();
        // Cut between the two bytes of 'é'
        let cut = bytes.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let stream = decode_sse(body(vec![bytes[..cut].to_vec(), bytes[cut..].to_vec()]));
        let items: Vec<_> = stream.collect().await;

        assert_eq!(items.len(), 1);
        assert_eq!(
            items[0].as_ref().unwrap().text(),
            Some("Quel est votre prénom ?")
        );
    }

    #[tokio::test]
    async fn test_decode_skips_empty_choices_and_comments() {
        let stream = decode_sse(text_body(&[
            ": keep-alive\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":3}}\n\n",
            "data: {\"choices\":[{\"delta\":{\"function_call\":{\"name\":\"isFormValid\"}}}]}\n\n",
        ]));

        let deltas: Vec<_> = stream.collect().await;
        assert_eq!(deltas.len(), 1);
        assert!(deltas[0].as_ref().unwrap().has_function_call());
    }

    #[tokio::test]
    async fn test_decode_in_band_error_ends_stream() {
        let stream = decode_sse(text_body(&[
            "data: {\"error\":{\"message\":\"overloaded\"}}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n",
        ]));

        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 1);
        let err = items[0].as_ref().unwrap_err();
        assert_eq!(err.kind, LlmErrorKind::ServerError);
        assert!(err.message.contains("overloaded"));
    }

    #[tokio::test]
    async fn test_decode_malformed_json() {
        let items: Vec<_> = decode_sse(text_body(&["data: {not json\n\n"])).collect().await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }

    #[tokio::test]
    async fn test_decode_transport_error() {
        let failing = futures::stream::iter(vec![
            Ok::<Vec<u8>, String>(
                b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n".to_vec(),
            ),
            Err("reset by peer".to_string()),
        ]);
        let items: Vec<_> = decode_sse(failing).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].as_ref().unwrap_err().kind, LlmErrorKind::Network);
    }
}
