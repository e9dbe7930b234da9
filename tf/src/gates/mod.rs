//! Quality-gate pipeline
//!
//! Transforms the task list once, after analysis and before the scheduler
//! sees the graph: every standard development task T gets a code-review
//! checkpoint R and a QA checkpoint Q chained behind it, and T's original
//! dependents are rewired onto Q. Two final review tasks close out the
//! project behind all QA checkpoints.
//!
//! At run time the pipeline turns checkpoint worker output into a verdict
//! and decides pass/fail against the configured thresholds.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Config;
use crate::domain::{CheckpointKind, Dependency, Priority, Task, TaskKind};

/// Estimated minutes for an injected code-review checkpoint
const REVIEW_MINUTES: u32 = 15;

/// Estimated minutes for an injected QA checkpoint
const QA_MINUTES: u32 = 20;

/// Finding severity reported by checkpoint workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

/// One reviewer finding
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Finding {
    pub severity: Severity,
    pub message: String,
}

impl Default for Finding {
    fn default() -> Self {
        Self { severity: Severity::Low, message: String::new() }
    }
}

/// Checkpoint worker verdict
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CheckpointVerdict {
    pub passed: bool,
    /// Quality score in [0, 1]
    pub quality_score: f64,
    pub findings: Vec<Finding>,
}

impl Default for CheckpointVerdict {
    fn default() -> Self {
        Self { passed: false, quality_score: 0.0, findings: Vec::new() }
    }
}

impl CheckpointVerdict {
    /// Derive a verdict from worker output: the last JSON object on stdout
    /// wins; without one, the exit code decides.
    pub fn from_output(stdout_json: Option<&Value>, exit_code: Option<i32>) -> Self {
        // A verdict object must at least carry `passed`; other stray JSON in
        // the output stream falls through to exit-code semantics.
        if let Some(value) = stdout_json {
            if value.get("passed").is_some() {
                if let Ok(verdict) = serde_json::from_value::<CheckpointVerdict>(value.clone()) {
                    return verdict;
                }
                warn!("Checkpoint output JSON did not match the verdict schema, using exit code");
            }
        }
        match exit_code {
            Some(0) => Self { passed: true, quality_score: 1.0, findings: Vec::new() },
            _ => Self::default(),
        }
    }

    pub fn finding_messages(&self) -> Vec<String> {
        self.findings.iter().map(|f| f.message.clone()).collect()
    }
}

/// Gate thresholds and the injection transformation
#[derive(Debug, Clone)]
pub struct QualityGates {
    pub review_threshold: f64,
    pub qa_threshold: f64,
    pub max_rework_attempts: u32,
}

impl QualityGates {
    pub fn from_config(config: &Config) -> Self {
        Self {
            review_threshold: config.review_pass_threshold,
            qa_threshold: config.qa_pass_threshold,
            max_rework_attempts: config.max_rework_attempts,
        }
    }

    /// Inject checkpoints into a task list
    ///
    /// For each standard task T: append R (code review, depends on T) and Q
    /// (QA test, depends on R), both pointing back at T; rewire every
    /// original dependent of T onto Q. Finally add the two project-wide
    /// review tasks behind all Q nodes.
    pub fn inject(tasks: Vec<Task>) -> Vec<Task> {
        let standard: Vec<(String, String, Priority)> = tasks
            .iter()
            .filter(|t| t.is_standard())
            .map(|t| (t.id.clone(), t.title.clone(), t.priority))
            .collect();
        let mut out = tasks;
        let mut qa_ids: Vec<String> = Vec::new();

        for (task_id, title, priority) in &standard {
            let review_id = format!("{}-review", task_id);
            let qa_id = format!("{}-qa", task_id);
            let (title, priority) = (title.clone(), *priority);

            // Rewire original dependents of T to Q before adding the
            // checkpoints themselves.
            for task in out.iter_mut() {
                if task.id == *task_id {
                    continue;
                }
                for dep in task.dependencies.iter_mut() {
                    if dep.task_id == *task_id {
                        debug!(dependent = %task.id, from = %task_id, to = %qa_id, "Rewiring dependent onto QA gate");
                        dep.task_id = qa_id.clone();
                    }
                }
            }

            let mut review = Task::with_id(&review_id, format!("Code review: {}", title))
                .with_kind(TaskKind::Review)
                .with_duration(REVIEW_MINUTES)
                .with_priority(priority)
                .with_dependency(Dependency::completion(task_id.clone()));
            review.specialist_kind = "code-review".to_string();
            review.is_checkpoint = true;
            review.checkpoint_type = Some(CheckpointKind::CodeReview);
            review.reviews_task_id = Some(task_id.clone());
            review.validation_criteria = vec!["no high-severity findings".to_string()];

            let mut qa = Task::with_id(&qa_id, format!("QA test: {}", title))
                .with_kind(TaskKind::Test)
                .with_duration(QA_MINUTES)
                .with_priority(priority)
                .with_dependency(Dependency::completion(review_id.clone()));
            qa.specialist_kind = "qa-test".to_string();
            qa.is_checkpoint = true;
            qa.checkpoint_type = Some(CheckpointKind::QaTest);
            qa.reviews_task_id = Some(task_id.clone());
            qa.validation_criteria = vec!["all acceptance checks pass".to_string()];

            out.push(review);
            out.push(qa);
            qa_ids.push(qa_id);
        }

        if !qa_ids.is_empty() {
            let mut final_review = Task::with_id("final-code-review", "Final code review")
                .with_kind(TaskKind::FinalReview)
                .with_duration(REVIEW_MINUTES)
                .with_priority(Priority::High);
            final_review.specialist_kind = "code-review".to_string();
            final_review.is_checkpoint = true;
            final_review.checkpoint_type = Some(CheckpointKind::FinalCodeReview);
            for qa_id in &qa_ids {
                final_review.dependencies.push(Dependency::completion(qa_id.clone()));
            }

            let mut final_qa = Task::with_id("final-qa-test", "Final QA test")
                .with_kind(TaskKind::FinalReview)
                .with_duration(QA_MINUTES)
                .with_priority(Priority::High);
            final_qa.specialist_kind = "qa-test".to_string();
            final_qa.is_checkpoint = true;
            final_qa.checkpoint_type = Some(CheckpointKind::FinalQaTest);
            for qa_id in &qa_ids {
                final_qa.dependencies.push(Dependency::completion(qa_id.clone()));
            }

            out.push(final_review);
            out.push(final_qa);
        }

        out
    }

    /// Pass rule: the worker said pass, the score clears the per-gate
    /// threshold, and nothing high-severity was found.
    pub fn passes(&self, kind: CheckpointKind, verdict: &CheckpointVerdict) -> bool {
        let threshold = if kind.is_code_review() {
            self.review_threshold
        } else {
            self.qa_threshold
        };
        verdict.passed
            && verdict.quality_score >= threshold
            && verdict.findings.iter().all(|f| f.severity < Severity::High)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn gates() -> QualityGates {
        QualityGates {
            review_threshold: 0.85,
            qa_threshold: 0.90,
            max_rework_attempts: 5,
        }
    }

    /// [T1, T2 depends on T1] becomes the six-node gated chain
    #[test]
    fn test_checkpoint_injection_shape() {
        let tasks = vec![
            Task::with_id("t1", "T1").with_duration(30),
            Task::with_id("t2", "T2").with_duration(30).with_dependency(Dependency::completion("t1")),
        ];
        let out = QualityGates::inject(tasks);

        let ids: Vec<&str> = out.iter().map(|t| t.id.as_str()).collect();
        for expected in ["t1", "t1-review", "t1-qa", "t2", "t2-review", "t2-qa"] {
            assert!(ids.contains(&expected), "missing {}", expected);
        }

        let by_id = |id: &str| out.iter().find(|t| t.id == id).unwrap();
        // R1 -> T1, Q1 -> R1, T2 -> Q1, R2 -> T2, Q2 -> R2
        assert!(by_id("t1-review").depends_on("t1"));
        assert!(by_id("t1-qa").depends_on("t1-review"));
        assert!(by_id("t2").depends_on("t1-qa"));
        assert!(!by_id("t2").depends_on("t1"));
        assert!(by_id("t2-review").depends_on("t2"));
        assert!(by_id("t2-qa").depends_on("t2-review"));

        // Back-pointers
        assert_eq!(by_id("t1-review").reviews_task_id.as_deref(), Some("t1"));
        assert_eq!(by_id("t1-qa").reviews_task_id.as_deref(), Some("t1"));
        assert_eq!(by_id("t1-review").checkpoint_type, Some(CheckpointKind::CodeReview));
        assert_eq!(by_id("t1-qa").checkpoint_type, Some(CheckpointKind::QaTest));

        // Final reviews behind every QA node
        assert!(by_id("final-code-review").depends_on("t1-qa"));
        assert!(by_id("final-code-review").depends_on("t2-qa"));
        assert!(by_id("final-qa-test").depends_on("t1-qa"));
        assert!(by_id("final-qa-test").depends_on("t2-qa"));
        assert_eq!(out.len(), 8);
    }

    #[test]
    fn test_injection_chain_is_critical_path() {
        use crate::graph::mark_critical_path;
        let tasks = vec![
            Task::with_id("t1", "T1").with_duration(30),
            Task::with_id("t2", "T2").with_duration(30).with_dependency(Dependency::completion("t1")),
        ];
        let mut out = QualityGates::inject(tasks);
        let marked = mark_critical_path(&mut out);

        // The whole gated chain lies on the single longest path
        for id in ["t1", "t1-review", "t1-qa", "t2", "t2-review", "t2-qa"] {
            let task = out.iter().find(|t| t.id == id).unwrap();
            assert!(task.on_critical_path, "{} should be critical", id);
        }
        assert!(marked >= 6);
    }

    #[test]
    fn test_injection_skips_existing_checkpoints() {
        let mut checkpoint = Task::with_id("r", "Review: old");
        checkpoint.is_checkpoint = true;
        checkpoint.checkpoint_type = Some(CheckpointKind::CodeReview);

        let out = QualityGates::inject(vec![checkpoint]);
        // No gates injected for a checkpoint, and no final reviews without
        // standard tasks
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_verdict_from_json() {
        let value = json!({
            "passed": true,
            "qualityScore": 0.93,
            "findings": [{"severity": "low", "message": "nit: naming"}]
        });
        let verdict = CheckpointVerdict::from_output(Some(&value), Some(0));
        assert!(verdict.passed);
        assert!((verdict.quality_score - 0.93).abs() < 1e-9);
        assert_eq!(verdict.findings.len(), 1);
    }

    #[test]
    fn test_verdict_from_exit_code() {
        let verdict = CheckpointVerdict::from_output(None, Some(0));
        assert!(verdict.passed);
        assert_eq!(verdict.quality_score, 1.0);

        let verdict = CheckpointVerdict::from_output(None, Some(2));
        assert!(!verdict.passed);

        let verdict = CheckpointVerdict::from_output(None, None);
        assert!(!verdict.passed);
    }

    #[test]
    fn test_verdict_stray_json_falls_back_to_exit_code() {
        let value = json!({"something": "else"});
        let verdict = CheckpointVerdict::from_output(Some(&value), Some(0));
        assert!(verdict.passed);

        let verdict = CheckpointVerdict::from_output(Some(&value), Some(1));
        assert!(!verdict.passed);
    }

    #[test]
    fn test_pass_thresholds_per_gate() {
        let gates = gates();
        let verdict = CheckpointVerdict { passed: true, quality_score: 0.87, findings: vec![] };
        assert!(gates.passes(CheckpointKind::CodeReview, &verdict));
        assert!(!gates.passes(CheckpointKind::QaTest, &verdict));

        let verdict = CheckpointVerdict { passed: true, quality_score: 0.95, findings: vec![] };
        assert!(gates.passes(CheckpointKind::QaTest, &verdict));
        assert!(gates.passes(CheckpointKind::FinalQaTest, &verdict));
    }

    #[test]
    fn test_high_severity_finding_blocks() {
        let gates = gates();
        let verdict = CheckpointVerdict {
            passed: true,
            quality_score: 0.99,
            findings: vec![Finding { severity: Severity::High, message: "sql injection".into() }],
        };
        assert!(!gates.passes(CheckpointKind::CodeReview, &verdict));

        let verdict = CheckpointVerdict {
            passed: true,
            quality_score: 0.99,
            findings: vec![Finding { severity: Severity::Medium, message: "slow query".into() }],
        };
        assert!(gates.passes(CheckpointKind::CodeReview, &verdict));
    }

    #[test]
    fn test_worker_refusal_blocks_regardless_of_score() {
        let gates = gates();
        let verdict = CheckpointVerdict { passed: false, quality_score: 1.0, findings: vec![] };
        assert!(!gates.passes(CheckpointKind::CodeReview, &verdict));
    }
}
