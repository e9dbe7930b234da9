//! LlmAdapter trait definition

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{Analysis, Blueprint, PerformanceStats, Task, Worker};

use super::LlmError;

/// Adapter verdict on one candidate (task, worker) pairing
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct AssignmentScore {
    /// Confidence in [0, 1]
    pub confidence: f64,
    pub rationale: String,
    pub risks: Vec<String>,
}

/// Stateless typed facade over the external language service
///
/// Each call is independent request/response against a declared schema.
/// No conversation state is kept between calls.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    /// Distill the user text into domain, user types and core needs
    async fn analyze_requirements(&self, text: &str) -> Result<Analysis, LlmError>;

    /// Turn an analysis plus the original text into a structured blueprint
    async fn create_blueprint(&self, analysis: &Analysis, original_text: &str) -> Result<Blueprint, LlmError>;

    /// Generate the task list for a blueprint given the available specialists
    async fn generate_tasks(&self, blueprint: &Blueprint, specialists: &[String]) -> Result<Vec<Task>, LlmError>;

    /// Score how well a worker fits a task given its history
    async fn score_assignment(
        &self,
        task: &Task,
        worker: &Worker,
        history: &PerformanceStats,
    ) -> Result<AssignmentScore, LlmError>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    /// Scripted adapter for unit tests: pops pre-canned results per operation
    #[derive(Default)]
    pub struct MockAdapter {
        pub analyses: Mutex<Vec<Result<Analysis, LlmError>>>,
        pub blueprints: Mutex<Vec<Result<Blueprint, LlmError>>>,
        pub task_lists: Mutex<Vec<Result<Vec<Task>, LlmError>>>,
        pub scores: Mutex<Vec<Result<AssignmentScore, LlmError>>>,
    }

    impl MockAdapter {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_analysis(&self, result: Result<Analysis, LlmError>) {
            self.analyses.lock().unwrap().push(result);
        }

        pub fn push_blueprint(&self, result: Result<Blueprint, LlmError>) {
            self.blueprints.lock().unwrap().push(result);
        }

        pub fn push_tasks(&self, result: Result<Vec<Task>, LlmError>) {
            self.task_lists.lock().unwrap().push(result);
        }

        fn pop<T>(queue: &Mutex<Vec<Result<T, LlmError>>>) -> Result<T, LlmError> {
            let mut queue = queue.lock().unwrap();
            if queue.is_empty() {
                return Err(LlmError::Unavailable("mock exhausted".to_string()));
            }
            queue.remove(0)
        }
    }

    #[async_trait]
    impl LlmAdapter for MockAdapter {
        async fn analyze_requirements(&self, _text: &str) -> Result<Analysis, LlmError> {
            Self::pop(&self.analyses)
        }

        async fn create_blueprint(&self, _analysis: &Analysis, _text: &str) -> Result<Blueprint, LlmError> {
            Self::pop(&self.blueprints)
        }

        async fn generate_tasks(&self, _blueprint: &Blueprint, _specialists: &[String]) -> Result<Vec<Task>, LlmError> {
            Self::pop(&self.task_lists)
        }

        async fn score_assignment(
            &self,
            _task: &Task,
            _worker: &Worker,
            _history: &PerformanceStats,
        ) -> Result<AssignmentScore, LlmError> {
            Self::pop(&self.scores)
        }
    }
}
