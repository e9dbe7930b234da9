//! Request, Analysis and Blueprint types produced by the requirements analyzer

use serde::{Deserialize, Serialize};

use super::task::{Priority, Task};

/// A caller's project request: free-form text plus optional context
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Request {
    pub user_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<RequestContext>,
}

impl Request {
    pub fn new(user_text: impl Into<String>) -> Self {
        Self { user_text: user_text.into(), context: None }
    }
}

/// Optional hints supplied alongside the request text
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestContext {
    pub existing_systems: Vec<String>,
    pub user_types: Vec<String>,
    pub preferred_specialists: Vec<String>,
}

/// First-stage analysis of the request
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Analysis {
    /// Business domain ("hr", "finance", "it", "operations", "generic")
    pub domain: String,
    pub user_types: Vec<String>,
    pub core_needs: Vec<String>,
    /// Rough complexity hint ("low" | "medium" | "high")
    pub complexity_hint: String,
}

/// One planned system component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    /// Component type: "frontend" | "backend" | "database" | ...
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
}

impl Component {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self { kind: kind.into(), name: name.into() }
    }
}

/// The structured plan the analyzer derives from a request
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Blueprint {
    pub project_id: String,
    pub domain: String,
    pub components: Vec<Component>,
    pub workflows: Vec<String>,
    pub integrations: Vec<String>,
    pub quality_gates: Vec<String>,
    pub compliance: Vec<String>,
    /// Architecture pattern inferred from component mix
    #[serde(skip_serializing_if = "Option::is_none")]
    pub architecture_pattern: Option<String>,
}

impl Blueprint {
    /// True when the blueprint plans a component of the given type
    pub fn has_component(&self, kind: &str) -> bool {
        self.components.iter().any(|c| c.kind.eq_ignore_ascii_case(kind))
    }
}

/// Analyzer output: blueprint plus the enriched, validated task list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzedProject {
    pub blueprint: Blueprint,
    pub tasks: Vec<Task>,
    /// Critical-path length in minutes
    pub estimated_total_duration: u32,
    pub complexity: String,
    /// Non-fatal findings (e.g. unsatisfied consumer contracts)
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub warnings: Vec<String>,
}

impl AnalyzedProject {
    /// Highest priority present in the task list, for display
    pub fn top_priority(&self) -> Priority {
        self.tasks.iter().map(|t| t.priority).max().unwrap_or_default()
    }
}
