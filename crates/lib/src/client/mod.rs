//! Chat client: talks to the relay and keeps sessions and messages in a [`crate::store::StorageService`].

mod chat;
mod gateway;

pub use chat::{ChatClient, SendOutcome, DEFAULT_CONTEXT_WINDOW};
pub use gateway::{extract_reply, ChatBackend, ChatError, GatewayClient};
