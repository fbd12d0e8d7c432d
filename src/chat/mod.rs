//! Conversations: types, persistence and the chat-turn flow.

pub mod store;
pub mod turn;
pub mod types;

pub use store::{FsKeyValue, KeyValueBackend, MemoryKeyValue, PersistentChatStore};
pub use turn::{ChatTurn, TurnOutcome};
pub use types::{Conversation, ConversationId, FileRef, Message, MessageContent, Role};
