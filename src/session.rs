use std::fmt;
use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::constants::{CHAT_SAMPLING, NICKNAME_SAMPLING};
use crate::error::ChatError;
use crate::gateway::{CompletionGateway, FragmentStream};
use crate::message::Message;
use crate::prompts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Waiting for interests and situation.
    #[default]
    Collecting,
    /// Nickname generated; chat turns allowed.
    Chatting,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Collecting => f.write_str("collecting"),
            Phase::Chatting => f.write_str("chatting"),
        }
    }
}

/// Everything one user's session knows. Only `Session` mutates it, which
/// keeps these true: chatting means history is non-empty and both profile
/// fields are set; collecting means everything is empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionState {
    messages: Vec<Message>,
    nickname: Option<String>,
    interests: Option<String>,
    situation: Option<String>,
    phase: Phase,
}

impl SessionState {
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn nickname(&self) -> Option<&str> {
        self.nickname.as_deref()
    }

    pub fn interests(&self) -> Option<&str> {
        self.interests.as_deref()
    }

    pub fn situation(&self) -> Option<&str> {
        self.situation.as_deref()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }
}

/// A requested chat reply that has not been written to history yet.
///
/// Pull fragments with [`PendingTurn::next_fragment`] to render them as
/// they arrive, then hand the turn back to [`Session::commit_turn`].
/// Dropping it commits nothing.
pub struct PendingTurn {
    user: Message,
    fragments: FragmentStream,
    reply: String,
    failure: Option<ChatError>,
    exhausted: bool,
    epoch: u64,
}

impl fmt::Debug for PendingTurn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTurn")
            .field("user", &self.user)
            .field("reply", &self.reply)
            .field("failure", &self.failure)
            .field("exhausted", &self.exhausted)
            .finish_non_exhaustive()
    }
}

impl PendingTurn {
    /// Text received so far.
    pub fn reply_so_far(&self) -> &str {
        &self.reply
    }

    /// Next fragment, or `None` once the reply is complete. After an error
    /// the stream is over and the turn can no longer be committed.
    pub async fn next_fragment(&mut self) -> Option<Result<String, ChatError>> {
        if self.exhausted {
            return None;
        }
        match self.fragments.next().await {
            Some(Ok(text)) => {
                self.reply.push_str(&text);
                Some(Ok(text))
            }
            Some(Err(err)) => {
                self.exhausted = true;
                self.failure = Some(err.clone());
                Some(Err(err))
            }
            None => {
                self.exhausted = true;
                None
            }
        }
    }

    async fn finish(mut self) -> Result<(Message, String), ChatError> {
        while let Some(item) = self.next_fragment().await {
            item?;
        }
        match self.failure {
            Some(err) => Err(err),
            None => Ok((self.user, self.reply)),
        }
    }
}

/// One user's conversation: state plus the gateway it talks through.
pub struct Session {
    state: SessionState,
    gateway: Arc<dyn CompletionGateway>,
    // Bumped on reset so turns requested before it cannot land after it.
    epoch: u64,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(gateway: Arc<dyn CompletionGateway>) -> Self {
        Self {
            state: SessionState::default(),
            gateway,
            epoch: 0,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Generate the nickname greeting and move to the chat phase.
    /// State is untouched unless the call succeeds.
    #[instrument(skip_all)]
    pub async fn submit_profile(
        &mut self,
        interests: &str,
        situation: &str,
    ) -> Result<Message, ChatError> {
        let interests = interests.trim();
        let situation = situation.trim();
        if interests.is_empty() || situation.is_empty() {
            return Err(ChatError::Validation(
                "좋아하는 것과 현재 상황을 모두 입력해주세요!".to_string(),
            ));
        }
        if self.state.phase != Phase::Collecting {
            return Err(ChatError::Phase {
                action: "submit a profile",
                phase: self.state.phase,
            });
        }

        let user_prompt = prompts::nickname_user_prompt(interests, situation);
        let reply = self
            .gateway
            .complete_once(prompts::NICKNAME_SYSTEM_PROMPT, &user_prompt, NICKNAME_SAMPLING)
            .await
            .inspect_err(|err| warn!(error = %err, "Nickname generation failed"))?;

        let greeting = Message::assistant(reply);
        self.state.interests = Some(interests.to_string());
        self.state.situation = Some(situation.to_string());
        self.state.messages = vec![greeting.clone()];
        self.state.phase = Phase::Chatting;
        info!("Profile submitted, session is now chatting");
        Ok(greeting)
    }

    /// Ask for a streamed reply to `text` on top of the current history.
    /// Nothing is recorded until the turn is committed.
    #[instrument(skip_all, fields(history = self.state.messages.len()))]
    pub async fn send_message(&self, text: &str) -> Result<PendingTurn, ChatError> {
        if self.state.phase != Phase::Chatting {
            return Err(ChatError::Phase {
                action: "send a message",
                phase: self.state.phase,
            });
        }
        if text.trim().is_empty() {
            return Err(ChatError::Validation("메시지를 입력해주세요!".to_string()));
        }

        let user = Message::user(text);
        let mut history = self.state.messages.clone();
        history.push(user.clone());
        let system_prompt = prompts::chat_system_prompt(&self.state);

        let fragments = self
            .gateway
            .complete_stream(&system_prompt, &history, CHAT_SAMPLING)
            .await
            .inspect_err(|err| warn!(error = %err, "Chat request failed"))?;

        Ok(PendingTurn {
            user,
            fragments,
            reply: String::new(),
            failure: None,
            exhausted: false,
            epoch: self.epoch,
        })
    }

    /// Finish `turn` and append its user message and the full reply. If the
    /// stream failed, nothing is appended and the error is returned.
    pub async fn commit_turn(&mut self, turn: PendingTurn) -> Result<Message, ChatError> {
        if turn.epoch != self.epoch {
            return Err(ChatError::Reset);
        }
        let (user, reply) = turn
            .finish()
            .await
            .inspect_err(|err| warn!(error = %err, "Discarding failed reply"))?;

        let reply = Message::assistant(reply);
        self.state.messages.push(user);
        self.state.messages.push(reply.clone());
        debug!(history = self.state.messages.len(), "Turn committed");
        Ok(reply)
    }

    /// `send_message` and `commit_turn` without rendering in between.
    pub async fn chat(&mut self, text: &str) -> Result<Message, ChatError> {
        let turn = self.send_message(text).await?;
        self.commit_turn(turn).await
    }

    pub fn reset(&mut self) {
        self.state = SessionState::default();
        self.epoch += 1;
        info!("Session reset");
    }
}
