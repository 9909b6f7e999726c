use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::{Client, RequestBuilder};
use reqwest_eventsource::{Error as EventSourceError, Event, EventSource};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument, warn};

use crate::config::Config;
use crate::error::ChatError;
use crate::message::Message;

/// Lazy, finite sequence of reply fragments. Not restartable.
pub type FragmentStream = BoxStream<'static, Result<String, ChatError>>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sampling {
    pub temperature: f32,
    pub max_tokens: u32,
}

/// The two call shapes the session needs from a language model.
#[async_trait]
pub trait CompletionGateway: Send + Sync {
    /// One round-trip, one full reply.
    async fn complete_once(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        sampling: Sampling,
    ) -> Result<String, ChatError>;

    /// Request a reply to `history` delivered as fragments. Errors before the
    /// first byte are returned directly; later ones arrive as a stream item.
    async fn complete_stream(
        &self,
        system_prompt: &str,
        history: &[Message],
        sampling: Sampling,
    ) -> Result<FragmentStream, ChatError>;
}

// Structures matching the /chat/completions endpoint
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: crate::message::Role,
    content: &'a str,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize, Debug)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize, Debug)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    error: Option<ApiError>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    delta: Option<StreamDelta>,
}

#[derive(Deserialize, Debug)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Deserialize, Debug)]
struct ApiError {
    message: String,
}

/// `CompletionGateway` over an OpenAI-compatible chat completions API.
#[derive(Clone)]
pub struct OpenAiGateway {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl std::fmt::Debug for OpenAiGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiGateway")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl OpenAiGateway {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    fn wire_messages<'a>(system_prompt: &'a str, rest: &'a [Message]) -> Vec<WireMessage<'a>> {
        std::iter::once(WireMessage {
            role: crate::message::Role::System,
            content: system_prompt,
        })
        .chain(rest.iter().map(|m| WireMessage {
            role: m.role,
            content: &m.content,
        }))
        .collect()
    }

    fn request(&self, request: &ChatRequest<'_>) -> RequestBuilder {
        self.client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
    }

    async fn post(&self, request: &ChatRequest<'_>) -> Result<reqwest::Response, ChatError> {
        let response = self
            .request(request)
            .send()
            .await
            .map_err(|e| ChatError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(%status, %error_body, "Completion API request failed");
            return Err(ChatError::upstream(
                Some(status.as_u16()),
                upstream_message(&error_body),
            ));
        }

        Ok(response)
    }
}

#[async_trait]
impl CompletionGateway for OpenAiGateway {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn complete_once(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        sampling: Sampling,
    ) -> Result<String, ChatError> {
        let user = [Message::user(user_prompt)];
        let request = ChatRequest {
            model: &self.model,
            messages: Self::wire_messages(system_prompt, &user),
            temperature: sampling.temperature,
            max_tokens: sampling.max_tokens,
            stream: false,
        };

        let response = self.post(&request).await?;
        let status = response.status().as_u16();
        let body = response
            .json::<ChatResponse>()
            .await
            .map_err(|e| ChatError::upstream(Some(status), format!("unreadable response: {e}")))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ChatError::upstream(Some(status), "response contained no message"))?;

        debug!(chars = content.chars().count(), "Received single-shot completion");
        Ok(content)
    }

    #[instrument(skip_all, fields(model = %self.model, history = history.len()))]
    async fn complete_stream(
        &self,
        system_prompt: &str,
        history: &[Message],
        sampling: Sampling,
    ) -> Result<FragmentStream, ChatError> {
        let request = ChatRequest {
            model: &self.model,
            messages: Self::wire_messages(system_prompt, history),
            temperature: sampling.temperature,
            max_tokens: sampling.max_tokens,
            stream: true,
        };

        let mut source = EventSource::new(self.request(&request))
            .map_err(|e| ChatError::Network(format!("failed to open stream: {e}")))?;

        // Rejections (bad key, rate limit, unreachable host) surface here,
        // before the caller sees a stream.
        match source.next().await {
            Some(Ok(Event::Open)) => debug!("Completion stream opened"),
            Some(Ok(Event::Message(_))) => {
                source.close();
                return Err(ChatError::upstream(None, "stream sent data before opening"));
            }
            Some(Err(err)) => {
                source.close();
                return Err(open_error(err).await);
            }
            None => return Err(ChatError::upstream(None, "stream closed before opening")),
        }

        Ok(fragments(source))
    }
}

/// Pull the human-readable message out of an API error body, if it has one.
fn upstream_message(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => envelope.error.message,
        Err(_) => body.trim().to_string(),
    }
}

/// Why a stream could not be opened. Reads the error body when there is one.
async fn open_error(err: EventSourceError) -> ChatError {
    match err {
        EventSourceError::InvalidStatusCode(status, response) => {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(%status, %error_body, "Completion API request failed");
            ChatError::upstream(Some(status.as_u16()), upstream_message(&error_body))
        }
        EventSourceError::InvalidContentType(content_type, response) => ChatError::upstream(
            Some(response.status().as_u16()),
            format!("expected an event stream, got {content_type:?}"),
        ),
        other => stream_error(other),
    }
}

fn stream_error(err: EventSourceError) -> ChatError {
    match err {
        EventSourceError::Transport(e) => ChatError::from(e),
        EventSourceError::StreamEnded => ChatError::upstream(None, "stream ended unexpectedly"),
        other => ChatError::upstream(None, format!("unreadable stream: {other}")),
    }
}

enum Step {
    Fragment(String),
    Skip,
    Done,
}

fn interpret(data: &str) -> Result<Step, ChatError> {
    if data.trim() == "[DONE]" {
        return Ok(Step::Done);
    }
    let chunk: StreamChunk = serde_json::from_str(data)
        .map_err(|e| ChatError::upstream(None, format!("malformed stream chunk: {e}")))?;
    if let Some(err) = chunk.error {
        return Err(ChatError::upstream(None, err.message));
    }
    let text = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
        .filter(|text| !text.is_empty());
    Ok(text.map_or(Step::Skip, Step::Fragment))
}

/// Reply fragments from an opened event source. Ends at `[DONE]`, when the
/// body ends, or right after the first error. The source is closed on every
/// exit so it never reconnects.
fn fragments(source: EventSource) -> FragmentStream {
    stream::unfold(Some(source), |source| async move {
        let mut source = source?;
        loop {
            let step = match source.next().await {
                Some(Ok(Event::Open)) => Ok(Step::Skip),
                Some(Ok(Event::Message(message))) => interpret(&message.data),
                Some(Err(EventSourceError::StreamEnded)) | None => Ok(Step::Done),
                Some(Err(err)) => Err(stream_error(err)),
            };
            match step {
                Ok(Step::Fragment(text)) => return Some((Ok(text), Some(source))),
                Ok(Step::Skip) => {}
                Ok(Step::Done) => {
                    source.close();
                    return None;
                }
                Err(err) => {
                    warn!(error = %err, "Completion stream failed");
                    source.close();
                    return Some((Err(err), None));
                }
            }
        }
    })
    .boxed()
}
