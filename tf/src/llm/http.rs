//! HTTP transport for the LLM adapter
//!
//! Requests are JSON `{kind, payload}`; the response body must match the
//! declared schema for that kind or the call fails with SchemaViolation.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::LlmConfig;
use crate::domain::{Analysis, Blueprint, PerformanceStats, Task, Worker};

use super::client::{AssignmentScore, LlmAdapter};
use super::LlmError;

/// Adapter speaking JSON over HTTP to the language service
pub struct HttpAdapter {
    client: reqwest::Client,
    config: LlmConfig,
    api_key: Option<String>,
}

impl HttpAdapter {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        let api_key = std::env::var(&config.api_key_env).ok();
        Ok(Self { client, config, api_key })
    }

    async fn call<T: DeserializeOwned>(&self, kind: &str, payload: Value) -> Result<T, LlmError> {
        debug!(kind, endpoint = %self.config.endpoint, "HttpAdapter::call");
        let body = json!({ "kind": kind, "payload": payload });

        let mut request = self.client.post(&self.config.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout(self.config.timeout())
            } else if e.is_connect() {
                LlmError::Unavailable(e.to_string())
            } else {
                LlmError::Network(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError { status: status.as_u16(), message });
        }

        let value: Value = response.json().await.map_err(LlmError::Network)?;
        // Either a bare result or an envelope {"result": ...}
        let result = value.get("result").cloned().unwrap_or(value);
        serde_json::from_value(result).map_err(|e| LlmError::SchemaViolation(e.to_string()))
    }
}

#[async_trait]
impl LlmAdapter for HttpAdapter {
    async fn analyze_requirements(&self, text: &str) -> Result<Analysis, LlmError> {
        self.call("analyze_requirements", json!({ "text": text })).await
    }

    async fn create_blueprint(&self, analysis: &Analysis, original_text: &str) -> Result<Blueprint, LlmError> {
        self.call(
            "create_blueprint",
            json!({ "analysis": analysis, "originalText": original_text }),
        )
        .await
    }

    async fn generate_tasks(&self, blueprint: &Blueprint, specialists: &[String]) -> Result<Vec<Task>, LlmError> {
        self.call(
            "generate_tasks",
            json!({ "blueprint": blueprint, "availableSpecialists": specialists }),
        )
        .await
    }

    async fn score_assignment(
        &self,
        task: &Task,
        worker: &Worker,
        history: &PerformanceStats,
    ) -> Result<AssignmentScore, LlmError> {
        self.call(
            "score_assignment",
            json!({ "task": task, "worker": worker, "history": history }),
        )
        .await
    }
}
