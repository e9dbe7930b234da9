//! Worker prompt composition
//!
//! One handlebars template renders the specialist prompt from the task and
//! its dependency outputs. Oversized prompts are reduced structurally -
//! dependency payloads go first, then validation criteria, then the
//! description is truncated - before the minimal fallback of title plus
//! specialist kind. Nothing is ever cut mid-sentence silently.

use handlebars::Handlebars;
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::Task;
use crate::graph::DependencyOutput;
use crate::sanitize::{PromptTooLarge, Sanitizer};

const WORKER_TEMPLATE_NAME: &str = "worker";

const WORKER_TEMPLATE: &str = "\
# Task: {{title}}
Specialist: {{specialist}}

{{description}}
{{#if contracts}}
## Integration contracts
{{#each contracts}}
- {{this}}
{{/each}}
{{/if}}
{{#if criteria}}
## Validation criteria
{{#each criteria}}
- {{this}}
{{/each}}
{{/if}}
{{#if deps}}
## Dependency outputs
{{#each deps}}
### {{this.task_id}}
{{this.payload}}
{{/each}}
{{/if}}
";

#[derive(Serialize)]
struct DepContext {
    task_id: String,
    payload: String,
}

#[derive(Serialize)]
struct PromptContext {
    title: String,
    specialist: String,
    description: String,
    contracts: Vec<String>,
    criteria: Vec<String>,
    deps: Vec<DepContext>,
}

/// Builds size-validated worker prompts
pub struct PromptBuilder {
    handlebars: Handlebars<'static>,
    sanitizer: Sanitizer,
}

impl PromptBuilder {
    pub fn new(sanitizer: Sanitizer) -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.register_escape_fn(handlebars::no_escape);
        // The template is a compile-time constant; registration cannot fail
        // for it, but avoid panicking on principle.
        if let Err(e) = handlebars.register_template_string(WORKER_TEMPLATE_NAME, WORKER_TEMPLATE) {
            warn!(error = %e, "Worker template failed to register, prompts degrade to fallback");
        }
        Self { handlebars, sanitizer }
    }

    /// Compose the prompt for one task, reducing structurally until it fits
    /// the byte ceiling.
    pub fn compose(&self, task: &Task, deps: &[DependencyOutput]) -> Result<String, PromptTooLarge> {
        let context_label = format!("task {}", task.id);

        // Full prompt: everything included
        let full = self.render(task, deps, true, true, None);
        if self.sanitizer.validate_size(&full, &context_label).is_ok() {
            return Ok(full);
        }
        warn!(task_id = %task.id, "Prompt over limit, dropping dependency payloads");

        // Drop dependency result payloads, keep output names
        let without_payloads = self.render(task, deps, false, true, None);
        if self.sanitizer.validate_size(&without_payloads, &context_label).is_ok() {
            return Ok(without_payloads);
        }
        warn!(task_id = %task.id, "Prompt still over limit, dropping validation criteria");

        // Drop validation criteria too
        let bare = self.render(task, deps, false, false, None);
        if self.sanitizer.validate_size(&bare, &context_label).is_ok() {
            return Ok(bare);
        }
        warn!(task_id = %task.id, "Prompt still over limit, truncating description");

        // Truncate the description hard
        let truncated = self.render(task, deps, false, false, Some(512));
        if self.sanitizer.validate_size(&truncated, &context_label).is_ok() {
            return Ok(truncated);
        }

        // Minimal fallback: title and specialist kind only
        let minimal = Sanitizer::fallback_description(&task.title, &task.specialist_kind);
        self.sanitizer.validate_size(&minimal, &context_label)?;
        Ok(minimal)
    }

    fn render(
        &self,
        task: &Task,
        deps: &[DependencyOutput],
        include_payloads: bool,
        include_criteria: bool,
        description_cap: Option<usize>,
    ) -> String {
        let description = match description_cap {
            Some(cap) => Sanitizer::new(cap, usize::MAX).clean(&task.description),
            None => task.description.clone(),
        };

        let mut contracts = Vec::new();
        let c = &task.integration_contracts;
        for api in &c.provides_api {
            contracts.push(format!("provides API: {}", api));
        }
        for api in &c.consumes_api {
            contracts.push(format!("consumes API: {}", api));
        }
        for schema in &c.defines_schema {
            contracts.push(format!("defines schema: {}", schema));
        }
        for schema in &c.requires_schema {
            contracts.push(format!("requires schema: {}", schema));
        }
        for interface in &c.establishes_interface {
            contracts.push(format!("establishes interface: {}", interface));
        }

        let dep_contexts = deps
            .iter()
            .map(|dep| {
                let payload = if include_payloads {
                    match &dep.result {
                        Some(result) => serde_json::to_string_pretty(result)
                            .unwrap_or_else(|_| "<unserializable result>".to_string()),
                        None => outputs_line(dep),
                    }
                } else {
                    outputs_line(dep)
                };
                DepContext { task_id: dep.task_id.clone(), payload }
            })
            .collect();

        let context = PromptContext {
            title: task.title.clone(),
            specialist: task.specialist_kind.clone(),
            description,
            contracts,
            criteria: if include_criteria { task.validation_criteria.clone() } else { Vec::new() },
            deps: dep_contexts,
        };

        match self.handlebars.render(WORKER_TEMPLATE_NAME, &context) {
            Ok(rendered) => rendered,
            Err(e) => {
                debug!(error = %e, "Template render failed, using fallback prompt");
                Sanitizer::fallback_description(&task.title, &task.specialist_kind)
            }
        }
    }
}

fn outputs_line(dep: &DependencyOutput) -> String {
    let names: Vec<&str> = dep.outputs.iter().map(|o| o.name.as_str()).collect();
    if names.is_empty() {
        "(no declared outputs)".to_string()
    } else {
        format!("outputs: {}", names.join(", "))
    }
}
