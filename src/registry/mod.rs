//! Module catalog: wire types, backend transport and the refresh cache.

pub mod cache;
pub mod transport;
pub mod types;

pub use cache::{CatalogSnapshot, ModuleRegistryCache, PollSchedule};
pub use transport::{BackendTransport, ChatRequest, DownloadAck, HttpTransport};
pub use types::{AiModule, DownloadProgress, DownloadState, ModuleId, parse_catalog};
