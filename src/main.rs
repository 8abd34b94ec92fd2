//! formchat - fill a form by chatting with an LLM
//!
//! Runs one form dialogue over stdin/stdout. Logs go to stderr as JSON.

use formchat::config::{AppConfig, SchemaSource};
use formchat::llm::{LlmService, LoggingService, OpenAIService};
use formchat::schema_generator::generate_schema;
use formchat::store::{history_to_messages, ConversationStore, InMemoryStore, StoredMessage};
use formchat::{FormSchema, FormSession, FormValues, SessionError, TokenEvent, TokenSink};
use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Prints streamed tokens as they arrive
struct ConsoleSink<W> {
    out: W,
}

impl<W: Write + Send> TokenSink for ConsoleSink<W> {
    fn emit(&mut self, event: TokenEvent) {
        let written = match event {
            TokenEvent::Token(text) => write!(self.out, "{text}"),
            TokenEvent::Working => write!(self.out, "..."),
            TokenEvent::Done => writeln!(self.out),
        };
        // A closed terminal must not end the turn
        if let Err(e) = written.and_then(|()| self.out.flush()) {
            tracing::debug!(error = %e, "Failed to write to stdout");
        }
    }
}

/// What the user did at the prompt
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Line(String),
    Closed,
    Interrupted,
}

/// Wait for the next line, or for `interrupt` to fire first
async fn read_input<R>(
    lines: &mut Lines<R>,
    interrupt: impl Future<Output = ()>,
) -> std::io::Result<Input>
where
    R: AsyncBufRead + Unpin,
{
    tokio::select! {
        biased;
        () = interrupt => Ok(Input::Interrupted),
        line = lines.next_line() => Ok(line?.map_or(Input::Closed, Input::Line)),
    }
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Ctrl-C handler unavailable");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging; stdout is the conversation
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "formchat=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = AppConfig::from_env()?;
    let openai = OpenAIService::new(
        config.require_api_key()?,
        config.model.clone(),
        config.openai_base_url.as_deref(),
    )?;
    let llm: Arc<dyn LlmService> = Arc::new(LoggingService::new(Arc::new(openai)));

    let schema = load_schema(&config.schema, llm.clone()).await?;
    tracing::info!(
        model = %config.model,
        fields = schema.properties().len(),
        streaming = config.stream,
        "Starting form dialogue"
    );

    let store = InMemoryStore::new();
    let conversation_id = Uuid::new_v4().to_string();
    let history = history_to_messages(&store.load(&conversation_id).await?);
    let mut session = FormSession::new(
        llm,
        schema,
        FormValues::new(),
        history,
        config.session_options(),
    );

    eprintln!("Answer the questions below. Ctrl-C cancels a reply or quits at the prompt.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut utterance: Option<String> = None;

    loop {
        let committed = session.messages().len();
        let cancel = CancellationToken::new();
        let interrupt = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                ctrl_c().await;
                cancel.cancel();
            })
        };

        let mut sink = ConsoleSink {
            out: std::io::stdout(),
        };
        let sink: Option<&mut dyn TokenSink> = if config.stream { Some(&mut sink) } else { None };
        let result = session.run(utterance.as_deref(), sink, &cancel).await;
        interrupt.abort();

        match result {
            Ok(outcome) => {
                if !config.stream {
                    println!("{}", outcome.answer);
                }

                let turn: Vec<StoredMessage> = session.messages()[committed..]
                    .iter()
                    .filter_map(StoredMessage::from_message)
                    .collect();
                store.append(&conversation_id, &turn).await?;

                if let Some(values) = outcome.values {
                    println!("{}", serde_json::to_string_pretty(&values)?);
                    tracing::info!(conversation_id = %conversation_id, "Form completed");
                    return Ok(());
                }
            }
            Err(SessionError::Cancelled) => {
                eprintln!("\n(cancelled)");
            }
            Err(e) => {
                tracing::error!(error = %e, "Turn failed");
                eprintln!("Error: {e}");
            }
        }

        match read_input(&mut lines, ctrl_c()).await? {
            Input::Line(line) => utterance = Some(line),
            Input::Closed => {
                tracing::info!(%conversation_id, "Input closed before completion");
                return Ok(());
            }
            Input::Interrupted => {
                tracing::info!(%conversation_id, "Interrupted at the prompt");
                return Ok(());
            }
        }
    }
}

async fn load_schema(
    source: &SchemaSource,
    llm: Arc<dyn LlmService>,
) -> Result<FormSchema, Box<dyn std::error::Error>> {
    Ok(match source {
        SchemaSource::File(path) => FormSchema::from_path(path)?,
        SchemaSource::Fields(fields) => generate_schema(fields, llm).await?,
        SchemaSource::Builtin => FormSchema::contact_form(),
    })
}
