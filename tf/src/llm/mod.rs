//! LLM adapter - the single typed facade over the external language service
//!
//! Four operations, each a pure request/response with a declared schema:
//! requirements analysis, blueprint creation, task generation, and
//! assignment scoring. Responses are cached under deterministic keys.

mod cache;
pub mod client;
mod error;
mod http;

pub use cache::CachedAdapter;
pub use client::{AssignmentScore, LlmAdapter};
pub use error::LlmError;
pub use http::HttpAdapter;

use std::sync::Arc;

use crate::config::LlmConfig;

/// Build the production adapter stack: HTTP transport wrapped in the TTL cache
pub fn create_adapter(config: &LlmConfig, cache_ttl_seconds: u64) -> Result<Arc<dyn LlmAdapter>, LlmError> {
    let http = HttpAdapter::new(config.clone())?;
    Ok(Arc::new(CachedAdapter::new(http, std::time::Duration::from_secs(cache_ttl_seconds))))
}
