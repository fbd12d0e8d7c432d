//! Freddie: client core for a locally hosted AI assistant.
//!
//! The crate keeps the conversation history and tracks model downloads run
//! by a separate backend service.
//!
//! # Architecture
//!
//! - **Registry**: mirrors the backend's module catalog in immutable
//!   snapshots, refreshed through a [`registry::BackendTransport`]
//! - **Reconciler**: diffs consecutive snapshots into one-shot download
//!   events and guards download, cancel and delete requests
//! - **Monitor**: the polling timer, tightening its cadence while a module
//!   transfers
//! - **Notifications**: a fan-out bus of expiring user-facing messages
//! - **Chat**: conversation types, best-effort persistence and the chat-turn
//!   flow
//!
//! The two halves share no locks. They meet only in the module list and in
//! caller-registered callbacks.

pub mod app_dirs;
pub mod chat;
pub mod config;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod notify;
pub mod reconciler;
pub mod registry;

pub use chat::{ChatTurn, Conversation, PersistentChatStore};
pub use config::FreddieConfig;
pub use error::{FreddieError, Result};
pub use monitor::DownloadMonitor;
pub use notify::{NotificationBus, Severity};
pub use reconciler::{DownloadEvent, DownloadReconciler, PollMode, PollOutcome};
pub use registry::{AiModule, DownloadState, HttpTransport, ModuleRegistryCache};
