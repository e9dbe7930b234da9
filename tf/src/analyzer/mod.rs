//! Requirements analyzer
//!
//! Turns sanitized user text into a complete, self-consistent task list:
//! analysis, blueprint, task generation, validation/defaulting, enrichment,
//! and the integration completeness check. Transient adapter failures are
//! retried; on exhaustion (or an unreachable service) the rule-based planner
//! takes over, so a project request always yields a plan.

mod fallback;

pub use fallback::RuleBasedPlanner;

use std::collections::HashMap;
use std::sync::Arc;

use eyre::{bail, Result};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::domain::{
    generate_id, AnalyzedProject, Analysis, Blueprint, DataItem, Priority, Request, Task, TaskKind,
};
use crate::llm::LlmAdapter;
use crate::sanitize::Sanitizer;

/// Dependents at or above this count force high priority
const HIGH_PRIORITY_DEPENDENT_COUNT: usize = 4;

/// Default duration (minutes) when the adapter omits or zeroes it
const DEFAULT_TASK_MINUTES: u32 = 30;

/// The analysis pipeline
pub struct RequirementsAnalyzer {
    adapter: Arc<dyn LlmAdapter>,
    fallback: RuleBasedPlanner,
    sanitizer: Sanitizer,
    max_retries: u32,
}

impl RequirementsAnalyzer {
    pub fn new(adapter: Arc<dyn LlmAdapter>, config: &Config) -> Self {
        Self {
            adapter,
            fallback: RuleBasedPlanner::new(),
            sanitizer: Sanitizer::new(config.description_max_chars, config.prompt_max_bytes),
            max_retries: config.llm.max_retries,
        }
    }

    /// Run the full pipeline for one request
    pub async fn analyze_project(&self, request: &Request, specialists: &[String]) -> Result<AnalyzedProject> {
        let text = self.sanitizer.extract_core(&request.user_text);
        if text.is_empty() {
            bail!("Request text is empty after sanitization");
        }
        self.sanitizer.validate_size(&text, "requirements analysis")?;

        let analysis = self.analyze_with_retry(&text).await;
        debug!(domain = %analysis.domain, "Analysis complete");

        let mut blueprint = self.blueprint_with_retry(&analysis, &text).await;
        self.finish_blueprint(&mut blueprint, &analysis);

        let raw_tasks = self.tasks_with_retry(&blueprint, specialists).await;
        let mut tasks = self.validate_and_default(raw_tasks, &blueprint);
        enrich_tasks(&mut tasks, &blueprint);
        derive_priorities(&mut tasks);

        let warnings = completeness_check(&tasks);
        for warning in &warnings {
            warn!(%warning, "Integration completeness");
        }

        let estimated_total_duration = longest_path_minutes(&tasks);
        info!(
            project_id = %blueprint.project_id,
            task_count = tasks.len(),
            estimated_total_duration,
            "Analyzed project into {} tasks",
            tasks.len()
        );

        Ok(AnalyzedProject {
            blueprint,
            tasks,
            estimated_total_duration,
            complexity: analysis.complexity_hint.clone(),
            warnings,
        })
    }

    async fn analyze_with_retry(&self, text: &str) -> Analysis {
        for attempt in 0..=self.max_retries {
            match self.adapter.analyze_requirements(text).await {
                Ok(analysis) => return analysis,
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    warn!(attempt, error = %e, "analyze_requirements failed, retrying");
                }
                Err(e) => {
                    warn!(error = %e, "analyze_requirements exhausted, using rule-based fallback");
                    break;
                }
            }
        }
        self.fallback.analyze_text(text)
    }

    async fn blueprint_with_retry(&self, analysis: &Analysis, text: &str) -> Blueprint {
        for attempt in 0..=self.max_retries {
            match self.adapter.create_blueprint(analysis, text).await {
                Ok(blueprint) => return blueprint,
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    warn!(attempt, error = %e, "create_blueprint failed, retrying");
                }
                Err(e) => {
                    warn!(error = %e, "create_blueprint exhausted, using rule-based fallback");
                    break;
                }
            }
        }
        self.fallback.blueprint_for(analysis, text)
    }

    async fn tasks_with_retry(&self, blueprint: &Blueprint, specialists: &[String]) -> Vec<Task> {
        for attempt in 0..=self.max_retries {
            match self.adapter.generate_tasks(blueprint, specialists).await {
                Ok(tasks) if !tasks.is_empty() => return tasks,
                Ok(_) => {
                    warn!(attempt, "generate_tasks returned an empty list, retrying");
                }
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    warn!(attempt, error = %e, "generate_tasks failed, retrying");
                }
                Err(e) => {
                    warn!(error = %e, "generate_tasks exhausted, using rule-based fallback");
                    break;
                }
            }
        }
        self.fallback.tasks_for(blueprint)
    }

    /// Fill in the blueprint fields the adapter commonly leaves blank
    fn finish_blueprint(&self, blueprint: &mut Blueprint, analysis: &Analysis) {
        if blueprint.project_id.is_empty() {
            blueprint.project_id = generate_id("proj", &blueprint.domain);
        }
        if blueprint.domain.is_empty() {
            blueprint.domain = analysis.domain.clone();
        }
        if blueprint.architecture_pattern.is_none() {
            blueprint.architecture_pattern = Some(infer_architecture(blueprint).to_string());
        }
        for common in ["email", "auth", "storage"] {
            if !blueprint.integrations.iter().any(|i| i.eq_ignore_ascii_case(common)) {
                blueprint.integrations.push(common.to_string());
            }
        }
        if blueprint.quality_gates.is_empty() {
            blueprint.quality_gates = vec!["code-review".to_string(), "qa-test".to_string()];
        }
    }

    /// Adapter output is untrusted: issue missing ids, clamp durations,
    /// default priorities and specialist kinds, drop id collisions.
    fn validate_and_default(&self, tasks: Vec<Task>, blueprint: &Blueprint) -> Vec<Task> {
        let mut seen_ids: Vec<String> = Vec::new();
        let mut out = Vec::with_capacity(tasks.len());

        for mut task in tasks {
            if task.id.is_empty() {
                task.id = generate_id("task", &task.title);
            }
            if seen_ids.contains(&task.id) {
                let fresh = generate_id("task", &task.title);
                warn!(old = %task.id, new = %fresh, "Duplicate task id reissued");
                task.id = fresh;
            }
            if task.title.is_empty() {
                task.title = task.id.clone();
            }
            if task.estimated_duration == 0 {
                task.estimated_duration = DEFAULT_TASK_MINUTES;
            }
            if task.specialist_kind.is_empty() {
                task.specialist_kind = blueprint
                    .components
                    .first()
                    .map(|c| c.kind.clone())
                    .unwrap_or_else(|| "developer".to_string());
            }
            task.description = self.sanitizer.clean(&task.description);
            // Analyzer output is always a fresh plan
            task.status = Default::default();
            task.attempt_count = 0;

            seen_ids.push(task.id.clone());
            out.push(task);
        }

        // References to unknown tasks would wedge the graph as permanently
        // unsatisfiable; drop them here with a warning.
        for task in &mut out {
            task.dependencies.retain(|dep| {
                let known = seen_ids.contains(&dep.task_id);
                if !known {
                    warn!(task_id = %task.id, missing = %dep.task_id, "Dropping dependency on unknown task");
                }
                known
            });
        }

        out
    }
}

/// Architecture pattern from the component mix
fn infer_architecture(blueprint: &Blueprint) -> &'static str {
    let backends = blueprint.components.iter().filter(|c| c.kind.eq_ignore_ascii_case("backend")).count();
    let has_frontend = blueprint.has_component("frontend");
    let has_database = blueprint.has_component("database");

    if backends > 1 {
        "microservices"
    } else if has_frontend && backends == 1 && has_database {
        "three-tier"
    } else if backends == 1 && has_database {
        "service-with-datastore"
    } else if has_frontend && backends == 0 {
        "static-frontend"
    } else {
        "modular-monolith"
    }
}

/// Fill inputs/outputs from contracts and default validation criteria
fn enrich_tasks(tasks: &mut [Task], blueprint: &Blueprint) {
    for task in tasks.iter_mut() {
        let contracts = task.integration_contracts.clone();
        for api in &contracts.provides_api {
            let item = DataItem::named(format!("api:{}", api));
            if !task.provided_outputs.iter().any(|o| o.name == item.name) {
                task.provided_outputs.push(item);
            }
        }
        for schema in &contracts.defines_schema {
            let item = DataItem::named(format!("schema:{}", schema));
            if !task.provided_outputs.iter().any(|o| o.name == item.name) {
                task.provided_outputs.push(item);
            }
        }
        for api in &contracts.consumes_api {
            let item = DataItem::named(format!("api:{}", api));
            if !task.required_inputs.iter().any(|i| i.name == item.name) {
                task.required_inputs.push(item);
            }
        }
        for schema in &contracts.requires_schema {
            let item = DataItem::named(format!("schema:{}", schema));
            if !task.required_inputs.iter().any(|i| i.name == item.name) {
                task.required_inputs.push(item);
            }
        }

        if task.validation_criteria.is_empty() {
            task.validation_criteria = match task.kind {
                TaskKind::Implementation => vec![
                    "builds without errors".to_string(),
                    format!("{} functionality works end to end", task.specialist_kind),
                ],
                TaskKind::Review | TaskKind::FinalReview => {
                    vec!["no high-severity findings".to_string()]
                }
                TaskKind::Test => vec!["all acceptance checks pass".to_string()],
            };
        }

        if task.description.is_empty() {
            task.description = format!("{} for the {} system", task.title, blueprint.domain);
        }
    }
}

/// Priority rule: high when a task is an entry point, declares a producing
/// contract, or gates many dependents; medium with at least one dependent;
/// low otherwise.
fn derive_priorities(tasks: &mut [Task]) {
    let mut dependent_count: HashMap<&str, usize> = HashMap::new();
    for task in tasks.iter() {
        for dep in &task.dependencies {
            *dependent_count.entry(dep.task_id.as_str()).or_default() += 1;
        }
    }
    let dependent_count: HashMap<String, usize> =
        dependent_count.into_iter().map(|(k, v)| (k.to_string(), v)).collect();

    for task in tasks.iter_mut() {
        let dependents = dependent_count.get(&task.id).copied().unwrap_or(0);
        task.priority = if task.dependencies.is_empty()
            || task.integration_contracts.provides_anything()
            || dependents >= HIGH_PRIORITY_DEPENDENT_COUNT
        {
            Priority::High
        } else if dependents >= 1 {
            Priority::Medium
        } else {
            Priority::Low
        };
    }
}

/// Warn for every consumer contract without a matching producer
fn completeness_check(tasks: &[Task]) -> Vec<String> {
    let mut warnings = Vec::new();

    for task in tasks {
        for api in &task.integration_contracts.consumes_api {
            let produced = tasks.iter().any(|t| {
                t.id != task.id
                    && t.integration_contracts
                        .provides_api
                        .iter()
                        .any(|p| crate::domain::IntegrationContracts::names_match(p, api))
            });
            if !produced {
                warnings.push(format!("No producer for API '{}' consumed by task {}", api, task.id));
            }
        }
        for schema in &task.integration_contracts.requires_schema {
            let produced = tasks.iter().any(|t| {
                t.id != task.id
                    && t.integration_contracts
                        .defines_schema
                        .iter()
                        .any(|p| crate::domain::IntegrationContracts::names_match(p, schema))
            });
            if !produced {
                warnings.push(format!(
                    "No producer for schema '{}' required by task {}",
                    schema, task.id
                ));
            }
        }
    }

    warnings
}

/// Longest weighted path over explicit dependencies, in minutes
///
/// Cycles contribute nothing here; the graph engine rejects them properly
/// during build.
pub fn longest_path_minutes(tasks: &[Task]) -> u32 {
    let by_id: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
    let mut memo: HashMap<&str, u32> = HashMap::new();

    fn finish<'a>(
        id: &'a str,
        by_id: &HashMap<&'a str, &'a Task>,
        memo: &mut HashMap<&'a str, u32>,
        visiting: &mut Vec<&'a str>,
    ) -> u32 {
        if let Some(&cached) = memo.get(id) {
            return cached;
        }
        if visiting.contains(&id) {
            return 0;
        }
        let Some(task) = by_id.get(id) else { return 0 };
        visiting.push(id);
        let longest_dep = task
            .dependencies
            .iter()
            .map(|d| finish(d.task_id.as_str(), by_id, memo, visiting))
            .max()
            .unwrap_or(0);
        visiting.pop();
        let total = longest_dep + task.estimated_duration;
        memo.insert(id, total);
        total
    }

    let mut visiting = Vec::new();
    tasks
        .iter()
        .map(|t| finish(t.id.as_str(), &by_id, &mut memo, &mut visiting))
        .max()
        .unwrap_or(0)
}
