//! Backend transport.
//!
//! [`BackendTransport`] is the seam between the client core and the model
//! backend. [`HttpTransport`] speaks the backend's JSON-over-HTTP API with
//! `reqwest`; tests substitute in-process fakes.
//!
//! # Error mapping
//!
//! | Outcome | Error |
//! |---------|-------|
//! | connection refused, timeout | [`FreddieError::Network`] |
//! | non-2xx with `{"error": ...}` | [`FreddieError::Backend`] carrying that text |
//! | other non-2xx | [`FreddieError::Backend`] `"HTTP <code>"` |
//! | 2xx with an unparseable body | [`FreddieError::Backend`] |

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::{AiModule, parse_catalog};
use crate::config::BackendConfig;
use crate::error::{FreddieError, Result};

/// Backend answer to a download request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadAck {
    /// A background download was started.
    Started,
    /// The payload is already on disk.
    AlreadyDownloaded,
    /// A download for this module is already running.
    AlreadyDownloading,
}

impl DownloadAck {
    fn from_status(status: &str) -> Option<Self> {
        match status {
            "downloading" => Some(Self::Started),
            "already_downloaded" => Some(Self::AlreadyDownloaded),
            "already_downloading" => Some(Self::AlreadyDownloading),
            _ => None,
        }
    }
}

/// Body of `POST /chat/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatRequest {
    pub module_id: String,
    pub message: String,
    /// Attachment file names.
    pub files: Vec<String>,
}

/// Async access to the model backend.
#[async_trait]
pub trait BackendTransport: Send + Sync {
    /// Fetch the full module catalog.
    async fn fetch_catalog(&self) -> Result<Vec<AiModule>>;

    /// Ask the backend to start downloading a module.
    async fn start_download(&self, module_id: &str) -> Result<DownloadAck>;

    /// Ask the backend to cancel a running download.
    async fn cancel_download(&self, module_id: &str) -> Result<()>;

    /// Ask the backend to delete a downloaded module.
    async fn delete_module(&self, module_id: &str) -> Result<()>;

    /// Send one chat turn and return the assistant reply.
    async fn chat(&self, request: &ChatRequest) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatBody {
    response: String,
}

#[derive(Debug, Serialize)]
struct ModuleRequest<'a> {
    module_id: &'a str,
}

/// `reqwest` implementation of [`BackendTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport for the configured backend.
    pub fn new(config: &BackendConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    async fn get_text(&self, path: &str) -> Result<String> {
        let url = self.url(path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&url, &e))?;
        read_success_body(&url, resp).await
    }

    async fn post_text<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<String> {
        let url = self.url(path);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&url, &e))?;
        read_success_body(&url, resp).await
    }
}

#[async_trait]
impl BackendTransport for HttpTransport {
    async fn fetch_catalog(&self) -> Result<Vec<AiModule>> {
        let body = self.get_text("modules/").await?;
        let modules = parse_catalog(&body)?;
        debug!(count = modules.len(), "fetched module catalog");
        Ok(modules)
    }

    async fn start_download(&self, module_id: &str) -> Result<DownloadAck> {
        let body = self
            .post_text("modules/download/", &ModuleRequest { module_id })
            .await?;
        let parsed: StatusBody = serde_json::from_str(&body)
            .map_err(|e| FreddieError::Backend(format!("unparseable download response: {e}")))?;
        if let Some(error) = parsed.error {
            return Err(FreddieError::Backend(error));
        }
        let status = parsed.status.unwrap_or_default();
        DownloadAck::from_status(&status).ok_or_else(|| {
            FreddieError::Backend(format!("unexpected download status {status:?}"))
        })
    }

    async fn cancel_download(&self, module_id: &str) -> Result<()> {
        self.post_text("modules/cancel/", &ModuleRequest { module_id })
            .await
            .map(|_| ())
    }

    async fn delete_module(&self, module_id: &str) -> Result<()> {
        self.post_text("modules/delete/", &ModuleRequest { module_id })
            .await
            .map(|_| ())
    }

    async fn chat(&self, request: &ChatRequest) -> Result<String> {
        let body = self.post_text("chat/", request).await?;
        let parsed: ChatBody = serde_json::from_str(&body)
            .map_err(|e| FreddieError::Backend(format!("unparseable chat response: {e}")))?;
        Ok(parsed.response)
    }
}

/// Return the body of a 2xx response, or map the failure.
async fn read_success_body(url: &str, resp: reqwest::Response) -> Result<String> {
    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| classify_reqwest_error(url, &e))?;
    if status.is_success() {
        return Ok(body);
    }

    let detail = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|b| b.error.or(b.message))
        .filter(|m| !m.trim().is_empty());
    Err(FreddieError::Backend(
        detail.unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
    ))
}

/// Classify a reqwest error.
fn classify_reqwest_error(url: &str, err: &reqwest::Error) -> FreddieError {
    if err.is_timeout() {
        FreddieError::Network(format!("request to {url} timed out"))
    } else if err.is_connect() {
        FreddieError::Network(format!("backend unreachable at {url}: {err}"))
    } else {
        FreddieError::Backend(format!("transport error: {err}"))
    }
}
