//! Rule-based planner - the no-LLM fallback
//!
//! Produces a serviceable blueprint and task list from keyword matching
//! against a built-in domain table. Used when the language service is
//! unavailable or keeps violating its response schema, and as a fully
//! deterministic adapter in tests.

use async_trait::async_trait;

use crate::domain::{
    Analysis, Blueprint, Component, DataItem, Dependency, IntegrationContracts, PerformanceStats, Task, TaskKind,
    Worker,
};
use crate::llm::{AssignmentScore, LlmAdapter, LlmError};

/// One row of the built-in domain table
struct DomainRule {
    domain: &'static str,
    keywords: &'static [&'static str],
    user_types: &'static [&'static str],
    integrations: &'static [&'static str],
    compliance: &'static [&'static str],
}

const DOMAIN_TABLE: &[DomainRule] = &[
    DomainRule {
        domain: "hr",
        keywords: &["employee", "onboarding", "payroll", "leave", "recruit", "hiring", "hr "],
        user_types: &["employee", "hr-manager"],
        integrations: &["hris"],
        compliance: &["gdpr"],
    },
    DomainRule {
        domain: "finance",
        keywords: &["invoice", "budget", "expense", "accounting", "payment", "ledger", "billing"],
        user_types: &["accountant", "controller"],
        integrations: &["payment-gateway", "accounting"],
        compliance: &["sox"],
    },
    DomainRule {
        domain: "it",
        keywords: &["ticket", "incident", "helpdesk", "asset", "support", "monitoring", "deploy"],
        user_types: &["agent", "end-user"],
        integrations: &["monitoring"],
        compliance: &[],
    },
    DomainRule {
        domain: "operations",
        keywords: &["inventory", "logistics", "warehouse", "supply", "maintenance", "dispatch"],
        user_types: &["operator", "supervisor"],
        integrations: &["logistics"],
        compliance: &[],
    },
];

/// Integrations every generated system gets regardless of domain
const COMMON_INTEGRATIONS: &[&str] = &["email", "auth", "storage"];

/// Deterministic keyword-matching planner
#[derive(Debug, Clone, Default)]
pub struct RuleBasedPlanner;

impl RuleBasedPlanner {
    pub fn new() -> Self {
        Self
    }

    /// Classify text into a domain row; unknown text lands on "generic"
    pub fn analyze_text(&self, text: &str) -> Analysis {
        let lower = text.to_lowercase();
        let rule = DOMAIN_TABLE
            .iter()
            .find(|rule| rule.keywords.iter().any(|kw| lower.contains(kw)));

        let (domain, user_types) = match rule {
            Some(rule) => (
                rule.domain.to_string(),
                rule.user_types.iter().map(|s| s.to_string()).collect(),
            ),
            None => ("generic".to_string(), vec!["user".to_string()]),
        };

        // Complexity from request size: short asks are simple systems
        let word_count = lower.split_whitespace().count();
        let complexity_hint = if word_count > 120 {
            "high"
        } else if word_count > 30 {
            "medium"
        } else {
            "low"
        };

        let core_needs = lower
            .split(['.', ';'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .take(5)
            .map(str::to_string)
            .collect();

        Analysis {
            domain,
            user_types,
            core_needs,
            complexity_hint: complexity_hint.to_string(),
        }
    }

    /// Standard three-tier blueprint for the analyzed domain
    pub fn blueprint_for(&self, analysis: &Analysis, original_text: &str) -> Blueprint {
        let lower = original_text.to_lowercase();
        let domain = &analysis.domain;

        let mut components = vec![
            Component::new("database", format!("{}-store", domain)),
            Component::new("backend", format!("{}-service", domain)),
        ];
        // Frontend unless the request is explicitly API-only
        if !lower.contains("api only") && !lower.contains("headless") {
            components.push(Component::new("frontend", format!("{}-portal", domain)));
        }

        let mut integrations: Vec<String> = COMMON_INTEGRATIONS.iter().map(|s| s.to_string()).collect();
        let mut compliance = Vec::new();
        if let Some(rule) = DOMAIN_TABLE.iter().find(|r| r.domain == *domain) {
            integrations.extend(rule.integrations.iter().map(|s| s.to_string()));
            compliance.extend(rule.compliance.iter().map(|s| s.to_string()));
        }

        Blueprint {
            project_id: String::new(),
            domain: domain.clone(),
            components,
            workflows: analysis.core_needs.clone(),
            integrations,
            quality_gates: vec!["code-review".to_string(), "qa-test".to_string()],
            compliance,
            architecture_pattern: None,
        }
    }

    /// One implementation task per component, wired with stable ids and
    /// schema/API contracts so the graph engine can infer the edges.
    pub fn tasks_for(&self, blueprint: &Blueprint) -> Vec<Task> {
        let domain = &blueprint.domain;
        let mut tasks = Vec::new();

        for component in &blueprint.components {
            let id = format!("task-{}-{}", domain, component.kind);
            let title = format!("Implement {}", component.name);
            let mut task = Task::with_id(id, title)
                .with_kind(TaskKind::Implementation)
                .with_description(format!(
                    "Build the {} component ({}) for the {} system",
                    component.name, component.kind, domain
                ));
            task.specialist_kind = component.kind.clone();

            match component.kind.as_str() {
                "database" => {
                    task.integration_contracts.defines_schema.push(domain.clone());
                    task.provided_outputs.push(DataItem::named(format!("schema:{}", domain)));
                    task.estimated_duration = 45;
                }
                "backend" => {
                    task.integration_contracts = IntegrationContracts {
                        provides_api: vec![domain.clone()],
                        requires_schema: vec![domain.clone()],
                        ..Default::default()
                    };
                    task.required_inputs.push(DataItem::named(format!("schema:{}", domain)));
                    task.provided_outputs.push(DataItem::named(format!("api:{}", domain)));
                    task.estimated_duration = 90;
                }
                "frontend" => {
                    task.integration_contracts.consumes_api.push(domain.clone());
                    task.required_inputs.push(DataItem::named(format!("api:{}", domain)));
                    task.estimated_duration = 60;
                    task.dependencies.push(Dependency::completion(format!("task-{}-backend", domain)));
                }
                _ => {
                    task.estimated_duration = 60;
                }
            }

            task.validation_criteria = vec![
                "builds without errors".to_string(),
                format!("{} acceptance checks pass", component.kind),
            ];
            tasks.push(task);
        }

        tasks
    }

    /// Capability-overlap heuristic when no model is reachable
    fn score(&self, task: &Task, worker: &Worker) -> AssignmentScore {
        let matched = worker
            .capabilities
            .keys()
            .filter(|skill| {
                let skill = skill.to_lowercase();
                task.specialist_kind.to_lowercase().contains(&skill)
                    || task.description.to_lowercase().contains(&skill)
            })
            .count();
        let specialist_match = worker.specialization.eq_ignore_ascii_case(&task.specialist_kind);

        let confidence = if specialist_match {
            0.9
        } else if matched > 0 {
            0.5 + 0.1 * (matched.min(3) as f64)
        } else {
            0.2
        };

        AssignmentScore {
            confidence,
            rationale: format!(
                "rule-based: specialization {} task kind, {} matching skills",
                if specialist_match { "matches" } else { "differs from" },
                matched
            ),
            risks: Vec::new(),
        }
    }
}

#[async_trait]
impl LlmAdapter for RuleBasedPlanner {
    async fn analyze_requirements(&self, text: &str) -> Result<Analysis, LlmError> {
        Ok(self.analyze_text(text))
    }

    async fn create_blueprint(&self, analysis: &Analysis, original_text: &str) -> Result<Blueprint, LlmError> {
        Ok(self.blueprint_for(analysis, original_text))
    }

    async fn generate_tasks(&self, blueprint: &Blueprint, _specialists: &[String]) -> Result<Vec<Task>, LlmError> {
        Ok(self.tasks_for(blueprint))
    }

    async fn score_assignment(
        &self,
        task: &Task,
        worker: &Worker,
        _history: &PerformanceStats,
    ) -> Result<AssignmentScore, LlmError> {
        Ok(self.score(task, worker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_classification() {
        let planner = RuleBasedPlanner::new();
        assert_eq!(planner.analyze_text("employee onboarding flows").domain, "hr");
        assert_eq!(planner.analyze_text("track invoices and budgets").domain, "finance");
        assert_eq!(planner.analyze_text("helpdesk ticket triage").domain, "it");
        assert_eq!(planner.analyze_text("warehouse inventory counts").domain, "operations");
        assert_eq!(planner.analyze_text("a photo sharing app").domain, "generic");
    }

    #[test]
    fn test_blueprint_includes_common_integrations() {
        let planner = RuleBasedPlanner::new();
        let analysis = planner.analyze_text("employee onboarding");
        let bp = planner.blueprint_for(&analysis, "employee onboarding");

        for common in ["email", "auth", "storage"] {
            assert!(bp.integrations.iter().any(|i| i == common), "missing {}", common);
        }
        assert!(bp.integrations.iter().any(|i| i == "hris"));
        assert!(bp.compliance.iter().any(|c| c == "gdpr"));
    }

    #[test]
    fn test_blueprint_headless_skips_frontend() {
        let planner = RuleBasedPlanner::new();
        let analysis = planner.analyze_text("invoice api only");
        let bp = planner.blueprint_for(&analysis, "invoice api only");
        assert!(!bp.has_component("frontend"));
        assert!(bp.has_component("backend"));
    }

    #[test]
    fn test_tasks_carry_contracts() {
        let planner = RuleBasedPlanner::new();
        let analysis = planner.analyze_text("employee onboarding");
        let bp = planner.blueprint_for(&analysis, "employee onboarding");
        let tasks = planner.tasks_for(&bp);

        let db = tasks.iter().find(|t| t.specialist_kind == "database").unwrap();
        let backend = tasks.iter().find(|t| t.specialist_kind == "backend").unwrap();
        let frontend = tasks.iter().find(|t| t.specialist_kind == "frontend").unwrap();

        assert_eq!(db.integration_contracts.defines_schema, vec!["hr".to_string()]);
        assert_eq!(backend.integration_contracts.provides_api, vec!["hr".to_string()]);
        assert_eq!(backend.integration_contracts.requires_schema, vec!["hr".to_string()]);
        assert_eq!(frontend.integration_contracts.consumes_api, vec!["hr".to_string()]);
        assert!(frontend.depends_on(&backend.id));
    }

    #[test]
    fn test_tasks_deterministic_ids() {
        let planner = RuleBasedPlanner::new();
        let analysis = planner.analyze_text("invoice tracking");
        let bp = planner.blueprint_for(&analysis, "invoice tracking");
        let a = planner.tasks_for(&bp);
        let b = planner.tasks_for(&bp);
        let ids_a: Vec<_> = a.iter().map(|t| t.id.clone()).collect();
        let ids_b: Vec<_> = b.iter().map(|t| t.id.clone()).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[tokio::test]
    async fn test_score_prefers_matching_specialization() {
        let planner = RuleBasedPlanner::new();
        let task = Task::new("Implement service", "backend");
        let matching = Worker::developer("w1", "Backend", "backend");
        let other = Worker::developer("w2", "Designer", "frontend");

        let stats = PerformanceStats::default();
        let a = planner.score_assignment(&task, &matching, &stats).await.unwrap();
        let b = planner.score_assignment(&task, &other, &stats).await.unwrap();
        assert!(a.confidence > b.confidence);
    }
}
