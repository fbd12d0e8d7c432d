//! Catalog types and backend wire parsing.
//!
//! The backend reports each module with a free-form `download_status`
//! object. [`DownloadState`] classifies it into a closed set of variants with
//! an explicit [`DownloadState::Unknown`] fallback, so the client never
//! invents a state it did not observe.

use serde::Deserialize;

use crate::error::{FreddieError, Result};

/// Stable catalog key of a module.
pub type ModuleId = String;

/// Reason reported for a failed download without error text.
const UNKNOWN_FAILURE: &str = "unknown error";

/// Progress fields of an active transfer.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DownloadProgress {
    /// Percentage in `0.0..=100.0`.
    pub progress_pct: f64,
    pub bytes_done: u64,
    pub bytes_total: u64,
    /// Bytes per second.
    pub speed_bps: f64,
    /// Estimated seconds remaining.
    pub eta_sec: f64,
}

/// Classified download state of one module.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadState {
    Idle,
    Downloading(DownloadProgress),
    Retrying { attempt: u32 },
    Completed,
    Failed { reason: String },
    Cancelled,
    /// A status string this client does not recognise.
    Unknown { status: String },
}

impl DownloadState {
    /// `Downloading` or `Retrying`.
    pub fn is_transferring(&self) -> bool {
        matches!(self, Self::Downloading(_) | Self::Retrying { .. })
    }

    /// Wire name of the state.
    pub fn label(&self) -> &str {
        match self {
            Self::Idle => "idle",
            Self::Downloading(_) => "downloading",
            Self::Retrying { .. } => "retrying",
            Self::Completed => "completed",
            Self::Failed { .. } => "failed",
            Self::Cancelled => "cancelled",
            Self::Unknown { status } => status.as_str(),
        }
    }

    fn from_wire(status: Option<WireStatus>) -> Self {
        let Some(status) = status else {
            return Self::Idle;
        };
        match status.status.as_str() {
            "" | "idle" => Self::Idle,
            "downloading" => Self::Downloading(DownloadProgress {
                progress_pct: status.progress.clamp(0.0, 100.0),
                bytes_done: status.downloaded_bytes,
                bytes_total: status.total_bytes,
                speed_bps: status.speed.max(0.0),
                eta_sec: status.eta.max(0.0),
            }),
            "retrying" => Self::Retrying {
                attempt: status.retries,
            },
            "completed" => Self::Completed,
            "failed" => Self::Failed {
                reason: status
                    .error
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(|| UNKNOWN_FAILURE.to_owned()),
            },
            "cancelled" => Self::Cancelled,
            other => Self::Unknown {
                status: other.to_owned(),
            },
        }
    }
}

impl std::fmt::Display for DownloadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Downloading(p) => write!(f, "downloading {:.1}%", p.progress_pct),
            Self::Retrying { attempt } => write!(f, "retrying (attempt {attempt})"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
            other => f.write_str(other.label()),
        }
    }
}

/// One installable module as last reported by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct AiModule {
    pub id: ModuleId,
    pub display_name: String,
    pub description: Option<String>,
    /// Free-form category (coding, general, creative, multilingual, ...).
    pub category: Option<String>,
    pub size_bytes: u64,
    /// Parameter count label, e.g. `"7B"`.
    pub parameters: Option<String>,
    pub context_length: Option<u64>,
    pub recommended: bool,
    /// The payload is on local disk.
    pub downloaded: bool,
    pub state: DownloadState,
}

impl AiModule {
    /// Minimal module, mainly for tests and fakes.
    pub fn new(id: impl Into<String>, size_bytes: u64) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            description: None,
            category: None,
            size_bytes,
            parameters: None,
            context_length: None,
            recommended: false,
            downloaded: false,
            state: DownloadState::Idle,
        }
    }

    pub fn with_state(mut self, state: DownloadState) -> Self {
        self.state = state;
        self
    }

    pub fn with_downloaded(mut self, downloaded: bool) -> Self {
        self.downloaded = downloaded;
        self
    }
}

#[derive(Debug, Deserialize)]
struct WireStatus {
    #[serde(default)]
    status: String,
    #[serde(default)]
    progress: f64,
    #[serde(default)]
    downloaded_bytes: u64,
    #[serde(default)]
    total_bytes: u64,
    #[serde(default)]
    speed: f64,
    #[serde(default)]
    eta: f64,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    retries: u32,
}

#[derive(Debug, Deserialize)]
struct WireModule {
    id: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    size_bytes: u64,
    #[serde(default)]
    parameters: Option<String>,
    #[serde(default)]
    context_length: Option<u64>,
    #[serde(default)]
    recommended: bool,
    #[serde(default)]
    downloaded: bool,
    #[serde(default)]
    download_status: Option<WireStatus>,
}

impl From<WireModule> for AiModule {
    fn from(wire: WireModule) -> Self {
        Self {
            display_name: wire.display_name.unwrap_or_else(|| wire.id.clone()),
            id: wire.id,
            description: wire.description,
            category: wire.category,
            size_bytes: wire.size_bytes,
            parameters: wire.parameters,
            context_length: wire.context_length,
            recommended: wire.recommended,
            downloaded: wire.downloaded,
            state: DownloadState::from_wire(wire.download_status),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireCatalog {
    Bare(Vec<WireModule>),
    Envelope { modules: Vec<WireModule> },
}

/// Parse a `GET /modules` body.
///
/// Accepts a bare array or a `{ "modules": [...] }` envelope. When an id
/// appears twice, the later record replaces the earlier one in its position.
///
/// # Errors
///
/// Returns [`FreddieError::Backend`] if the body matches neither shape.
pub fn parse_catalog(body: &str) -> Result<Vec<AiModule>> {
    let catalog: WireCatalog = serde_json::from_str(body)
        .map_err(|e| FreddieError::Backend(format!("unrecognised module catalog: {e}")))?;
    let wire = match catalog {
        WireCatalog::Bare(modules) | WireCatalog::Envelope { modules } => modules,
    };

    let mut modules: Vec<AiModule> = Vec::with_capacity(wire.len());
    for module in wire.into_iter().map(AiModule::from) {
        match modules.iter_mut().find(|m| m.id == module.id) {
            Some(existing) => *existing = module,
            None => modules.push(module),
        }
    }
    Ok(modules)
}
