pub mod chat;
pub mod config;
pub mod constants;
pub mod error;
pub mod gateway;
pub mod message;
pub mod prompts;
pub mod session;
pub mod web_server;

pub use error::ChatError;
pub use gateway::{CompletionGateway, FragmentStream, OpenAiGateway, Sampling};
pub use message::{Message, Role};
pub use session::{PendingTurn, Phase, Session, SessionState};
