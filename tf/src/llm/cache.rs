//! Response cache for the LLM adapter
//!
//! Every operation is cached under a deterministic key derived from its
//! inputs. Entries expire after the configured TTL.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::{Analysis, Blueprint, PerformanceStats, Task, Worker};

use super::client::{AssignmentScore, LlmAdapter};
use super::LlmError;

struct CacheEntry {
    stored_at: Instant,
    value: Value,
}

/// TTL cache wrapping any adapter
pub struct CachedAdapter<A> {
    inner: A,
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl<A: LlmAdapter> CachedAdapter<A> {
    pub fn new(inner: A, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get(key) {
            if entry.stored_at.elapsed() < self.ttl {
                debug!(key, "CachedAdapter: hit");
                return serde_json::from_value(entry.value.clone()).ok();
            }
            entries.remove(key);
        }
        None
    }

    async fn store<T: Serialize>(&self, key: String, value: &T) {
        if let Ok(value) = serde_json::to_value(value) {
            let mut entries = self.entries.lock().await;
            entries.insert(key, CacheEntry { stored_at: Instant::now(), value });
        }
    }

    /// Number of live (possibly expired) entries, for tests and introspection
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn key_for(kind: &str, parts: &[&str]) -> String {
    // Deterministic and order-preserving; inputs are joined with a separator
    // that cannot occur inside JSON-escaped content.
    format!("{}\u{1f}{}", kind, parts.join("\u{1f}"))
}

#[async_trait]
impl<A: LlmAdapter> LlmAdapter for CachedAdapter<A> {
    async fn analyze_requirements(&self, text: &str) -> Result<Analysis, LlmError> {
        let key = key_for("analyze_requirements", &[text]);
        if let Some(hit) = self.lookup(&key).await {
            return Ok(hit);
        }
        let result = self.inner.analyze_requirements(text).await?;
        self.store(key, &result).await;
        Ok(result)
    }

    async fn create_blueprint(&self, analysis: &Analysis, original_text: &str) -> Result<Blueprint, LlmError> {
        let analysis_json = serde_json::to_string(analysis)?;
        let key = key_for("create_blueprint", &[&analysis_json, original_text]);
        if let Some(hit) = self.lookup(&key).await {
            return Ok(hit);
        }
        let result = self.inner.create_blueprint(analysis, original_text).await?;
        self.store(key, &result).await;
        Ok(result)
    }

    async fn generate_tasks(&self, blueprint: &Blueprint, specialists: &[String]) -> Result<Vec<Task>, LlmError> {
        let blueprint_json = serde_json::to_string(blueprint)?;
        let specialists_json = specialists.join(",");
        let key = key_for("generate_tasks", &[&blueprint_json, &specialists_json]);
        if let Some(hit) = self.lookup(&key).await {
            return Ok(hit);
        }
        let result = self.inner.generate_tasks(blueprint, specialists).await?;
        self.store(key, &result).await;
        Ok(result)
    }

    async fn score_assignment(
        &self,
        task: &Task,
        worker: &Worker,
        history: &PerformanceStats,
    ) -> Result<AssignmentScore, LlmError> {
        let history_json = serde_json::to_string(history)?;
        let key = key_for("score_assignment", &[&task.id, &worker.id, &history_json]);
        if let Some(hit) = self.lookup(&key).await {
            return Ok(hit);
        }
        let result = self.inner.score_assignment(task, worker, history).await?;
        self.store(key, &result).await;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::mock::MockAdapter;

    fn analysis(domain: &str) -> Analysis {
        Analysis { domain: domain.to_string(), ..Default::default() }
    }

    #[tokio::test]
    async fn test_cache_hit_skips_inner() {
        let mock = MockAdapter::new();
        mock.push_analysis(Ok(analysis("hr")));
        // Only one scripted response: a second inner call would error

        let cached = CachedAdapter::new(mock, Duration::from_secs(60));

        let first = cached.analyze_requirements("build hr portal").await.unwrap();
        let second = cached.analyze_requirements("build hr portal").await.unwrap();
        assert_eq!(first.domain, "hr");
        assert_eq!(second.domain, "hr");
        assert_eq!(cached.len().await, 1);
    }

    #[tokio::test]
    async fn test_different_inputs_different_keys() {
        let mock = MockAdapter::new();
        mock.push_analysis(Ok(analysis("hr")));
        mock.push_analysis(Ok(analysis("finance")));

        let cached = CachedAdapter::new(mock, Duration::from_secs(60));

        let a = cached.analyze_requirements("hr portal").await.unwrap();
        let b = cached.analyze_requirements("expense tracker").await.unwrap();
        assert_eq!(a.domain, "hr");
        assert_eq!(b.domain, "finance");
        assert_eq!(cached.len().await, 2);
    }

    #[tokio::test]
    async fn test_expired_entry_refetches() {
        let mock = MockAdapter::new();
        mock.push_analysis(Ok(analysis("hr")));
        mock.push_analysis(Ok(analysis("it")));

        let cached = CachedAdapter::new(mock, Duration::from_millis(10));

        let first = cached.analyze_requirements("portal").await.unwrap();
        assert_eq!(first.domain, "hr");

        tokio::time::sleep(Duration::from_millis(30)).await;

        let second = cached.analyze_requirements("portal").await.unwrap();
        assert_eq!(second.domain, "it");
    }

    #[tokio::test]
    async fn test_errors_not_cached() {
        let mock = MockAdapter::new();
        mock.push_analysis(Err(LlmError::Timeout(Duration::from_secs(1))));
        mock.push_analysis(Ok(analysis("hr")));

        let cached = CachedAdapter::new(mock, Duration::from_secs(60));

        assert!(cached.analyze_requirements("portal").await.is_err());
        let second = cached.analyze_requirements("portal").await.unwrap();
        assert_eq!(second.domain, "hr");
    }
}
