//! Worker registry and capability-based assignment
//!
//! Holds the specialist catalog, scores workers against tasks, and accounts
//! per-worker load. Checkpoint workers only score on checkpoint tasks;
//! development workers never receive them. The scheduler dispatches on the
//! returned selection, never on worker identity.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::{
    Assignment, Capability, CheckpointKind, ExperienceLevel, RankedWorker, Task, Worker, WorkerRole,
};

/// Base score for a checkpoint worker on a matching checkpoint task
const CHECKPOINT_BASE_SCORE: f64 = 95.0;

/// Score divisor mapping the suitability scale onto [0, 1] confidence
const CONFIDENCE_SCALE: f64 = 120.0;

fn review_title_patterns() -> &'static [Regex] {
    static RE: OnceLock<Vec<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        vec![
            Regex::new(r"(?i)^code review\b").unwrap(),
            Regex::new(r"(?i)^review\b").unwrap(),
            Regex::new(r"(?i)\breview of\b").unwrap(),
        ]
    })
}

fn test_title_patterns() -> &'static [Regex] {
    static RE: OnceLock<Vec<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        vec![
            Regex::new(r"(?i)^qa test\b").unwrap(),
            Regex::new(r"(?i)^test\b").unwrap(),
            Regex::new(r"(?i)\bqa check\b").unwrap(),
        ]
    })
}

/// Registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("No worker available for specialist kind {0:?}")]
    NoWorker(String),

    #[error("No checkpoint worker for {0:?}")]
    NoCheckpointWorker(CheckpointKind),

    #[error("All matching workers are at capacity for {0:?}")]
    AtCapacity(String),

    #[error("Unknown worker: {0}")]
    UnknownWorker(String),
}

/// Assignment selection with the confidence policy applied
#[derive(Debug, Clone)]
pub enum Selection {
    /// Confidence at or above the threshold
    Confident(Assignment),
    /// Best available fell below the threshold; alternates are attached so
    /// the caller can proceed or surface the choice
    LowConfidence(Assignment),
}

impl Selection {
    pub fn assignment(&self) -> &Assignment {
        match self {
            Selection::Confident(a) | Selection::LowConfidence(a) => a,
        }
    }

    pub fn is_confident(&self) -> bool {
        matches!(self, Selection::Confident(_))
    }
}

/// The specialist catalog
pub struct WorkerRegistry {
    workers: Mutex<BTreeMap<String, Worker>>,
    confidence_threshold: f64,
}

impl WorkerRegistry {
    pub fn new(workers: Vec<Worker>, confidence_threshold: f64) -> Self {
        let map = workers.into_iter().map(|w| (w.id.clone(), w)).collect();
        Self {
            workers: Mutex::new(map),
            confidence_threshold,
        }
    }

    /// The built-in catalog used when the configuration supplies none
    pub fn default_catalog(per_worker_max: u32) -> Vec<Worker> {
        let dev = |id: &str, name: &str, spec: &str, skills: &[(&str, f64, ExperienceLevel)]| {
            let mut worker = Worker::developer(id, name, spec).with_max_concurrent(per_worker_max);
            for (skill, eff, exp) in skills {
                worker = worker.with_capability(*skill, Capability::new(*eff, *exp));
            }
            worker
        };

        vec![
            dev(
                "dev-frontend",
                "Frontend Specialist",
                "frontend",
                &[
                    ("frontend", 0.9, ExperienceLevel::Expert),
                    ("ui", 0.85, ExperienceLevel::Advanced),
                    ("api", 0.6, ExperienceLevel::Intermediate),
                ],
            ),
            dev(
                "dev-backend",
                "Backend Specialist",
                "backend",
                &[
                    ("backend", 0.9, ExperienceLevel::Expert),
                    ("api", 0.85, ExperienceLevel::Advanced),
                    ("database", 0.7, ExperienceLevel::Intermediate),
                ],
            ),
            dev(
                "dev-database",
                "Database Specialist",
                "database",
                &[
                    ("database", 0.95, ExperienceLevel::Expert),
                    ("schema", 0.9, ExperienceLevel::Expert),
                    ("backend", 0.6, ExperienceLevel::Intermediate),
                ],
            ),
            dev(
                "dev-devops",
                "DevOps Specialist",
                "devops",
                &[
                    ("devops", 0.9, ExperienceLevel::Advanced),
                    ("integration", 0.8, ExperienceLevel::Advanced),
                ],
            ),
            dev(
                "dev-generalist",
                "Generalist Developer",
                "developer",
                &[
                    ("frontend", 0.6, ExperienceLevel::Intermediate),
                    ("backend", 0.6, ExperienceLevel::Intermediate),
                    ("database", 0.5, ExperienceLevel::Intermediate),
                ],
            ),
            Worker::reviewer("chk-code-review", "Code Reviewer", CheckpointKind::CodeReview),
            Worker::reviewer("chk-qa-test", "QA Tester", CheckpointKind::QaTest),
        ]
    }

    /// Skill match in [0, 100]
    ///
    /// Checkpoint workers score only on checkpoint tasks (or the closed set
    /// of review/test titles); development workers score from specialization
    /// and capability overlap weighted by efficiency, with an experience
    /// bonus from the strongest matched skill.
    pub fn skill_match(task: &Task, worker: &Worker) -> f64 {
        match worker.role {
            WorkerRole::CheckpointReviewer { kind } => {
                let family_matches = task
                    .checkpoint_type
                    .map(|ct| ct.is_code_review() == kind.is_code_review())
                    .unwrap_or(false);
                if task.is_checkpoint && family_matches {
                    return CHECKPOINT_BASE_SCORE;
                }
                let patterns = if kind.is_code_review() {
                    review_title_patterns()
                } else {
                    test_title_patterns()
                };
                if patterns.iter().any(|re| re.is_match(&task.title)) {
                    return CHECKPOINT_BASE_SCORE;
                }
                0.0
            }
            WorkerRole::Developer => {
                if task.is_checkpoint {
                    return 0.0;
                }
                let mut score = 0.0;
                if worker.specialization.eq_ignore_ascii_case(&task.specialist_kind) {
                    score += 60.0;
                }
                let haystack = format!(
                    "{} {} {}",
                    task.specialist_kind.to_lowercase(),
                    task.title.to_lowercase(),
                    task.description.to_lowercase()
                );
                let mut best_experience = 0.0f64;
                for (skill, capability) in &worker.capabilities {
                    if haystack.contains(&skill.to_lowercase()) {
                        score += 10.0 * capability.efficiency;
                        best_experience = best_experience.max(capability.experience.bonus());
                    }
                }
                (score + best_experience).min(100.0)
            }
        }
    }

    /// Suitability = skill + efficiency bonus (<=20) + experience bonus
    /// (<=15) + effort bonus (<=10, shrinking with duration) - load penalty
    pub fn suitability(task: &Task, worker: &Worker) -> f64 {
        let skill = Self::skill_match(task, worker);
        if skill == 0.0 {
            return 0.0;
        }

        let matched: Vec<&Capability> = worker
            .capabilities
            .iter()
            .filter(|(name, _)| {
                task.specialist_kind.to_lowercase().contains(&name.to_lowercase())
                    || task.description.to_lowercase().contains(&name.to_lowercase())
            })
            .map(|(_, c)| c)
            .collect();

        let efficiency_bonus = if matched.is_empty() {
            0.0
        } else {
            let avg: f64 = matched.iter().map(|c| c.efficiency).sum::<f64>() / matched.len() as f64;
            avg * 20.0
        };
        let experience_bonus = matched
            .iter()
            .map(|c| c.experience.bonus())
            .fold(0.0f64, f64::max);
        let effort_bonus = (10.0 - task.estimated_duration as f64 / 48.0).clamp(0.0, 10.0);
        let load_penalty = worker.current_load as f64 * 10.0;

        skill + efficiency_bonus + experience_bonus + effort_bonus - load_penalty
    }

    /// Pick the best worker for a task
    ///
    /// Checkpoint tasks route to the dedicated reviewer for their type;
    /// standard tasks rank development workers by suitability. Ties break by
    /// lowest load, then lexicographic id. A best score below the confidence
    /// threshold is returned as LowConfidence with the top alternates.
    pub async fn find_best_worker(&self, task: &Task) -> Result<Selection, RegistryError> {
        let workers = self.workers.lock().await;

        if let Some(kind) = task.checkpoint_type {
            let candidates: Vec<&Worker> = workers
                .values()
                .filter(|w| matches!(w.role, WorkerRole::CheckpointReviewer { kind: k } if k.is_code_review() == kind.is_code_review()))
                .collect();
            if candidates.is_empty() {
                return Err(RegistryError::NoCheckpointWorker(kind));
            }
            let available: Vec<&Worker> = candidates.iter().copied().filter(|w| w.has_capacity()).collect();
            if available.is_empty() {
                return Err(RegistryError::AtCapacity(task.specialist_kind.clone()));
            }
            let Some(chosen) = available
                .into_iter()
                .min_by(|a, b| a.current_load.cmp(&b.current_load).then(a.id.cmp(&b.id)))
            else {
                return Err(RegistryError::AtCapacity(task.specialist_kind.clone()));
            };
            return Ok(Selection::Confident(Assignment {
                task_id: task.id.clone(),
                worker_id: chosen.id.clone(),
                confidence: CHECKPOINT_BASE_SCORE / 100.0,
                expected_effort: task.estimated_duration,
                alternates: Vec::new(),
            }));
        }

        // Standard task: developers only
        let mut scored: Vec<(&Worker, f64)> = workers
            .values()
            .filter(|w| !w.role.is_checkpoint())
            .map(|w| (w, Self::suitability(task, w)))
            .filter(|(_, score)| *score > 0.0)
            .collect();
        if scored.is_empty() {
            return Err(RegistryError::NoWorker(task.specialist_kind.clone()));
        }

        scored.sort_by(|(wa, sa), (wb, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(wa.current_load.cmp(&wb.current_load))
                .then(wa.id.cmp(&wb.id))
        });

        let with_capacity: Vec<&(&Worker, f64)> = scored.iter().filter(|(w, _)| w.has_capacity()).collect();
        let Some((chosen, score)) = with_capacity.first().map(|(w, s)| (*w, *s)) else {
            return Err(RegistryError::AtCapacity(task.specialist_kind.clone()));
        };

        let confidence = (score / CONFIDENCE_SCALE).clamp(0.0, 1.0);
        let assignment = Assignment {
            task_id: task.id.clone(),
            worker_id: chosen.id.clone(),
            confidence,
            expected_effort: expected_effort(task, chosen),
            alternates: scored
                .iter()
                .filter(|(w, _)| w.id != chosen.id)
                .take(3)
                .map(|(w, s)| RankedWorker { worker_id: w.id.clone(), score: *s })
                .collect(),
        };

        if confidence < self.confidence_threshold {
            warn!(
                task_id = %task.id,
                worker_id = %assignment.worker_id,
                confidence,
                threshold = self.confidence_threshold,
                "Best assignment below confidence threshold"
            );
            Ok(Selection::LowConfidence(assignment))
        } else {
            debug!(task_id = %task.id, worker_id = %assignment.worker_id, confidence, "Worker selected");
            Ok(Selection::Confident(assignment))
        }
    }

    /// Reserve one load slot; fails when the worker is at capacity
    pub async fn reserve(&self, worker_id: &str) -> Result<(), RegistryError> {
        let mut workers = self.workers.lock().await;
        let worker = workers
            .get_mut(worker_id)
            .ok_or_else(|| RegistryError::UnknownWorker(worker_id.to_string()))?;
        if !worker.has_capacity() {
            return Err(RegistryError::AtCapacity(worker_id.to_string()));
        }
        worker.current_load += 1;
        Ok(())
    }

    /// Release a load slot and fold the outcome into the worker's stats
    pub async fn release(&self, worker_id: &str, quality: Option<f64>, failed: bool) {
        let mut workers = self.workers.lock().await;
        if let Some(worker) = workers.get_mut(worker_id) {
            worker.current_load = worker.current_load.saturating_sub(1);
            if failed {
                worker.performance_stats.record_failure();
            } else if let Some(quality) = quality {
                worker.performance_stats.record_completion(quality);
            }
        }
    }

    /// Fold a late-arriving quality score (from the QA gate) into a
    /// worker's stats without touching its load.
    pub async fn record_quality(&self, worker_id: &str, quality: f64) {
        let mut workers = self.workers.lock().await;
        if let Some(worker) = workers.get_mut(worker_id) {
            worker.performance_stats.record_completion(quality);
        }
    }

    pub async fn get(&self, worker_id: &str) -> Option<Worker> {
        self.workers.lock().await.get(worker_id).cloned()
    }

    /// Distinct development specializations, for the analyzer
    pub async fn specialist_kinds(&self) -> Vec<String> {
        let workers = self.workers.lock().await;
        let mut kinds: Vec<String> = workers
            .values()
            .filter(|w| !w.role.is_checkpoint())
            .map(|w| w.specialization.clone())
            .collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }

    pub async fn worker_count(&self) -> usize {
        self.workers.lock().await.len()
    }
}

fn expected_effort(task: &Task, worker: &Worker) -> u32 {
    // Better workers land under the estimate; the floor keeps it honest
    let best_efficiency = worker
        .capabilities
        .values()
        .map(|c| c.efficiency)
        .fold(0.0f64, f64::max)
        .max(0.5);
    ((task.estimated_duration as f64) / best_efficiency).round().max(1.0) as u32
}
