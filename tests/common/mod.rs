#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use brandme::{ChatError, CompletionGateway, FragmentStream, Message, Sampling};
use futures::{stream, StreamExt};

/// What a `StubGateway` was asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Once {
        system_prompt: String,
        user_prompt: String,
        sampling: Sampling,
    },
    Stream {
        system_prompt: String,
        history: Vec<Message>,
        sampling: Sampling,
    },
}

/// In-memory gateway with canned replies that records every call.
pub struct StubGateway {
    nickname: Result<String, ChatError>,
    fragments: Vec<Result<String, ChatError>>,
    stream_error: Option<ChatError>,
    calls: Mutex<Vec<Call>>,
}

impl StubGateway {
    pub fn new(nickname: &str, fragments: &[&str]) -> Self {
        Self {
            nickname: Ok(nickname.to_string()),
            fragments: fragments.iter().map(|f| Ok(f.to_string())).collect(),
            stream_error: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_nickname(mut self, err: ChatError) -> Self {
        self.nickname = Err(err);
        self
    }

    /// Deliver the canned fragments, then fail.
    pub fn failing_midstream(mut self, err: ChatError) -> Self {
        self.fragments.push(Err(err));
        self
    }

    /// Refuse the streamed request outright.
    pub fn rejecting_stream(mut self, err: ChatError) -> Self {
        self.stream_error = Some(err);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl CompletionGateway for StubGateway {
    async fn complete_once(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        sampling: Sampling,
    ) -> Result<String, ChatError> {
        self.calls.lock().unwrap().push(Call::Once {
            system_prompt: system_prompt.to_string(),
            user_prompt: user_prompt.to_string(),
            sampling,
        });
        self.nickname.clone()
    }

    async fn complete_stream(
        &self,
        system_prompt: &str,
        history: &[Message],
        sampling: Sampling,
    ) -> Result<FragmentStream, ChatError> {
        self.calls.lock().unwrap().push(Call::Stream {
            system_prompt: system_prompt.to_string(),
            history: history.to_vec(),
            sampling,
        });
        if let Some(err) = &self.stream_error {
            return Err(err.clone());
        }
        Ok(stream::iter(self.fragments.clone()).boxed())
    }
}
