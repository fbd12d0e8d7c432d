//! Core conversation types.
//!
//! A [`Conversation`] is an ordered list of [`Message`]s plus the metadata
//! the sidebar shows (title, preview, timestamps). An in-flight assistant
//! reply is represented by a single [`MessageContent::Pending`] message that
//! is replaced in place once the reply resolves or fails.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Conversation identifier (UUID v4 for conversations created here).
pub type ConversationId = String;

/// Maximum characters of the first user message used as the title.
pub const TITLE_MAX_CHARS: usize = 50;

/// Maximum characters of the latest user message used as the preview.
pub const PREVIEW_MAX_CHARS: usize = 100;

/// Title used when the first turn carries attachments but no text.
const UNTITLED: &str = "New chat";

/// Message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum MessageContent {
    /// Resolved text.
    Text(String),
    /// Assistant reply still in flight.
    Pending,
}

impl MessageContent {
    /// The text, or `None` while pending.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Pending => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// An attachment reference. Only image types carry inline preview data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub name: String,
    pub mime_type: String,
    /// `data:<mime>;base64,<payload>` for `image/*` attachments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_data: Option<String>,
}

impl FileRef {
    /// Attachment without preview data.
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            preview_data: None,
        }
    }

    /// Attachment built from its contents. Image types get an inline preview.
    pub fn from_bytes(name: impl Into<String>, mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        let mut file = Self::new(name, mime_type);
        if file.is_image() {
            file.preview_data = Some(format!(
                "data:{};base64,{}",
                file.mime_type,
                BASE64.encode(bytes)
            ));
        }
        file
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<FileRef>,
    pub sent_at: DateTime<Utc>,
}

impl Message {
    pub fn user(text: impl Into<String>, attachments: Vec<FileRef>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
            attachments,
            sent_at: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
            attachments: Vec::new(),
            sent_at: Utc::now(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
            attachments: Vec::new(),
            sent_at: Utc::now(),
        }
    }

    /// Placeholder for an assistant reply that has not arrived yet.
    pub fn pending() -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Pending,
            attachments: Vec::new(),
            sent_at: Utc::now(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.content.is_pending()
    }
}

/// A stored conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    /// Fixed at creation from the first user message.
    pub title: String,
    /// Start of the most recent user message.
    pub preview: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

impl Conversation {
    /// Start a conversation whose first user message is `text`.
    ///
    /// The title and preview are derived from `text`; the message itself is
    /// appended by [`push_user`](Self::push_user).
    pub fn start(text: &str, attachments: &[FileRef]) -> Self {
        let now = Utc::now();
        let title = if text.trim().is_empty() {
            attachments
                .first()
                .map(|f| truncate_chars(&f.name, TITLE_MAX_CHARS))
                .unwrap_or_else(|| UNTITLED.to_owned())
        } else {
            truncate_chars(text, TITLE_MAX_CHARS)
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title,
            preview: String::new(),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
        }
    }

    /// Append a user message and update the preview.
    pub fn push_user(&mut self, text: &str, attachments: Vec<FileRef>) {
        self.preview = text.chars().take(PREVIEW_MAX_CHARS).collect();
        self.messages.push(Message::user(text, attachments));
        self.touch();
    }

    /// Append the pending assistant placeholder.
    ///
    /// Returns `false` without appending if a reply is already pending.
    pub fn begin_reply(&mut self) -> bool {
        if self.has_pending() {
            return false;
        }
        self.messages.push(Message::pending());
        self.touch();
        true
    }

    /// Replace the pending placeholder with the assistant's reply.
    ///
    /// Returns `false` if nothing was pending.
    pub fn resolve_pending(&mut self, reply: impl Into<String>) -> bool {
        self.replace_pending(Message::assistant(reply))
    }

    /// Replace the pending placeholder with a system message describing the failure.
    ///
    /// Returns `false` if nothing was pending.
    pub fn fail_pending(&mut self, reason: impl Into<String>) -> bool {
        self.replace_pending(Message::system(reason))
    }

    pub fn has_pending(&self) -> bool {
        self.messages.iter().any(Message::is_pending)
    }

    fn replace_pending(&mut self, message: Message) -> bool {
        let Some(slot) = self.messages.iter_mut().rev().find(|m| m.is_pending()) else {
            return false;
        };
        *slot = message;
        self.touch();
        true
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// First `max` characters of `text`, with `...` appended when cut.
fn truncate_chars(text: &str, max: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
