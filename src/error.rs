//! Error types for the freddie client core.
//!
//! Each error variant carries a stable error code (SCREAMING_SNAKE_CASE)
//! that is included in the Display output and accessible via [`FreddieError::code()`].
//! Codes are part of the public API contract and will not change.
//!
//! Errors fall into three families:
//!
//! | Family | Variants | Handling |
//! |--------|----------|----------|
//! | Network | [`Network`](FreddieError::Network), [`Backend`](FreddieError::Backend) | non-fatal, the next poll tick retries |
//! | Validation | `AlreadyDownloading` … `ModuleNotReady` | published to the notification bus, operation aborted |
//! | Storage | [`Storage`](FreddieError::Storage) | logged and swallowed by best-effort persistence |

/// Stable error codes for programmatic error handling.
pub mod error_codes {
    /// Backend unreachable, connection refused or request timed out.
    pub const NETWORK_ERROR: &str = "NETWORK_ERROR";

    /// Backend answered with an error payload or an unexpected body.
    pub const BACKEND_ERROR: &str = "BACKEND_ERROR";

    /// The module is already transferring.
    pub const ALREADY_DOWNLOADING: &str = "ALREADY_DOWNLOADING";

    /// The module payload is already on disk.
    pub const ALREADY_DOWNLOADED: &str = "ALREADY_DOWNLOADED";

    /// The module does not fit into the available disk space.
    pub const INSUFFICIENT_SPACE: &str = "INSUFFICIENT_SPACE";

    /// Cancel requested for a module that is not transferring.
    pub const NOT_DOWNLOADING: &str = "NOT_DOWNLOADING";

    /// Delete requested for a module without a local payload.
    pub const NOT_DOWNLOADED: &str = "NOT_DOWNLOADED";

    /// The module id is not part of the current catalog snapshot.
    pub const UNKNOWN_MODULE: &str = "UNKNOWN_MODULE";

    /// A chat turn was rejected before reaching the backend.
    pub const INVALID_MESSAGE: &str = "INVALID_MESSAGE";

    /// A chat turn targeted a module that is not downloaded.
    pub const MODULE_NOT_READY: &str = "MODULE_NOT_READY";

    /// Conversation persistence failed.
    pub const STORAGE_ERROR: &str = "STORAGE_ERROR";

    /// Invalid or unreadable configuration.
    pub const CONFIG_INVALID: &str = "CONFIG_INVALID";
}

/// Errors produced by the freddie client core.
///
/// The Display impl formats as `[CODE] message`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FreddieError {
    /// Backend unreachable or timed out.
    #[error("[{}] {}", error_codes::NETWORK_ERROR, .0)]
    Network(String),

    /// Backend returned an error payload or an unparseable body.
    #[error("[{}] {}", error_codes::BACKEND_ERROR, .0)]
    Backend(String),

    /// The module is currently `Downloading` or `Retrying`.
    #[error("[{}] {} is already downloading", error_codes::ALREADY_DOWNLOADING, .0)]
    AlreadyDownloading(String),

    /// The module is already downloaded.
    #[error("[{}] {} is already downloaded", error_codes::ALREADY_DOWNLOADED, .0)]
    AlreadyDownloaded(String),

    /// The module's declared size exceeds the available space.
    #[error(
        "[{}] {module_id} needs {required_bytes} bytes but only {available_bytes} are available",
        error_codes::INSUFFICIENT_SPACE
    )]
    InsufficientSpace {
        /// Module that was requested.
        module_id: String,
        /// Declared module size.
        required_bytes: u64,
        /// Caller-supplied free space.
        available_bytes: u64,
    },

    /// The module is not transferring, so there is nothing to cancel.
    #[error("[{}] {} is not downloading", error_codes::NOT_DOWNLOADING, .0)]
    NotDownloading(String),

    /// The module has no local payload to delete.
    #[error("[{}] {} is not downloaded", error_codes::NOT_DOWNLOADED, .0)]
    NotDownloaded(String),

    /// The module id is not in the catalog.
    #[error("[{}] unknown module: {}", error_codes::UNKNOWN_MODULE, .0)]
    UnknownModule(String),

    /// Empty chat turn (no text and no attachments) or similar.
    #[error("[{}] {}", error_codes::INVALID_MESSAGE, .0)]
    InvalidMessage(String),

    /// Chat requested against a module that is not downloaded yet.
    #[error("[{}] {} is not downloaded yet", error_codes::MODULE_NOT_READY, .0)]
    ModuleNotReady(String),

    /// Serialization or persistence failure.
    #[error("[{}] {}", error_codes::STORAGE_ERROR, .0)]
    Storage(String),

    /// Configuration could not be read, parsed or validated.
    #[error("[{}] {}", error_codes::CONFIG_INVALID, .0)]
    Config(String),
}

impl FreddieError {
    /// Returns the stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Network(_) => error_codes::NETWORK_ERROR,
            Self::Backend(_) => error_codes::BACKEND_ERROR,
            Self::AlreadyDownloading(_) => error_codes::ALREADY_DOWNLOADING,
            Self::AlreadyDownloaded(_) => error_codes::ALREADY_DOWNLOADED,
            Self::InsufficientSpace { .. } => error_codes::INSUFFICIENT_SPACE,
            Self::NotDownloading(_) => error_codes::NOT_DOWNLOADING,
            Self::NotDownloaded(_) => error_codes::NOT_DOWNLOADED,
            Self::UnknownModule(_) => error_codes::UNKNOWN_MODULE,
            Self::InvalidMessage(_) => error_codes::INVALID_MESSAGE,
            Self::ModuleNotReady(_) => error_codes::MODULE_NOT_READY,
            Self::Storage(_) => error_codes::STORAGE_ERROR,
            Self::Config(_) => error_codes::CONFIG_INVALID,
        }
    }

    /// Returns the inner message (or module id) without the code prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Network(m)
            | Self::Backend(m)
            | Self::AlreadyDownloading(m)
            | Self::AlreadyDownloaded(m)
            | Self::NotDownloading(m)
            | Self::NotDownloaded(m)
            | Self::UnknownModule(m)
            | Self::InvalidMessage(m)
            | Self::ModuleNotReady(m)
            | Self::Storage(m)
            | Self::Config(m) => m,
            Self::InsufficientSpace { module_id, .. } => module_id,
        }
    }

    /// Returns true for transient failures that the next poll tick retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Returns true for client-side validation failures.
    ///
    /// These abort the operation before any network call and leave state unchanged.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::AlreadyDownloading(_)
                | Self::AlreadyDownloaded(_)
                | Self::InsufficientSpace { .. }
                | Self::NotDownloading(_)
                | Self::NotDownloaded(_)
                | Self::UnknownModule(_)
                | Self::InvalidMessage(_)
                | Self::ModuleNotReady(_)
        )
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, FreddieError>;
