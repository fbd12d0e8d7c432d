//! One chat turn against the backend.
//!
//! [`ChatTurn::send`] appends the user message and a pending assistant
//! placeholder, posts the turn to the backend, replaces the placeholder with
//! the reply (or a system message on failure) and persists the conversation.

use std::sync::Arc;

use tracing::{info, warn};

use super::store::PersistentChatStore;
use super::types::{Conversation, FileRef};
use crate::error::{FreddieError, Result};
use crate::notify::NotificationBus;
use crate::registry::{ChatRequest, ModuleRegistryCache};

/// Result of a turn that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// The conversation as persisted, placeholder already replaced.
    pub conversation: Conversation,
    /// Backend failure, if the reply could not be obtained.
    pub error: Option<FreddieError>,
}

impl TurnOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Chat flow over the backend, the module catalog and the conversation store.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    cache: Arc<ModuleRegistryCache>,
    store: Arc<PersistentChatStore>,
    bus: NotificationBus,
}

impl ChatTurn {
    pub fn new(
        cache: Arc<ModuleRegistryCache>,
        store: Arc<PersistentChatStore>,
        bus: NotificationBus,
    ) -> Self {
        Self { cache, store, bus }
    }

    /// Send one turn.
    ///
    /// `conversation` continues an existing conversation; `None` starts a new
    /// one titled after `text`.
    ///
    /// # Errors
    ///
    /// Validation failures leave everything untouched and are published to
    /// the bus: [`FreddieError::InvalidMessage`] for an empty turn or one sent
    /// while a reply is pending, [`FreddieError::UnknownModule`] and
    /// [`FreddieError::ModuleNotReady`] for a module that cannot answer.
    /// Backend failures are reported in [`TurnOutcome::error`].
    pub async fn send(
        &self,
        conversation: Option<Conversation>,
        module_id: &str,
        text: &str,
        attachments: Vec<FileRef>,
    ) -> Result<TurnOutcome> {
        self.validate(conversation.as_ref(), module_id, text, &attachments)
            .inspect_err(|e| {
                self.bus.warning(e.to_string());
            })?;

        let mut conversation =
            conversation.unwrap_or_else(|| Conversation::start(text, &attachments));
        let request = ChatRequest {
            module_id: module_id.to_owned(),
            message: text.to_owned(),
            files: attachments.iter().map(|f| f.name.clone()).collect(),
        };
        conversation.push_user(text, attachments);
        conversation.begin_reply();

        let error = match self.cache.transport().chat(&request).await {
            Ok(reply) => {
                conversation.resolve_pending(reply);
                info!(
                    conversation_id = %conversation.id,
                    module_id,
                    messages = conversation.messages.len(),
                    "chat turn completed"
                );
                None
            }
            Err(e) => {
                warn!(conversation_id = %conversation.id, module_id, error = %e, "chat turn failed");
                conversation.fail_pending(format!("Error: {}", e.message()));
                self.bus.error(e.message().to_owned());
                Some(e)
            }
        };

        self.store.save(&conversation);
        Ok(TurnOutcome {
            conversation,
            error,
        })
    }

    fn validate(
        &self,
        conversation: Option<&Conversation>,
        module_id: &str,
        text: &str,
        attachments: &[FileRef],
    ) -> Result<()> {
        if text.trim().is_empty() && attachments.is_empty() {
            return Err(FreddieError::InvalidMessage(
                "Please enter a message or attach a file.".to_owned(),
            ));
        }
        if conversation.is_some_and(Conversation::has_pending) {
            return Err(FreddieError::InvalidMessage(
                "A reply is still pending in this conversation.".to_owned(),
            ));
        }
        let module = self
            .cache
            .module(module_id)
            .ok_or_else(|| FreddieError::UnknownModule(module_id.to_owned()))?;
        if !module.downloaded {
            return Err(FreddieError::ModuleNotReady(module.id));
        }
        Ok(())
    }
}
