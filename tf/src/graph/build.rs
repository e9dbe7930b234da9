//! Graph construction algorithms: edge inference, cycle detection,
//! critical-path marking
//!
//! These are pure functions over the task list, run by the engine during
//! `build` before the graph accepts any status mutation.

use std::collections::{HashMap, VecDeque};

use tracing::{debug, warn};

use crate::domain::{Dependency, EdgeKind, IntegrationContracts, Task};

use super::engine::GraphError;

/// Tasks whose path length lands within this fraction of the longest path
/// are marked critical.
const CRITICAL_PATH_BAND: f64 = 0.05;

/// Infer data, integration and schema edges from declared inputs/outputs and
/// contracts. Explicit edges stay untouched; inferred edges are added only
/// where no edge to that predecessor exists yet. Returns warnings for every
/// consumer without a producer (or an error in strict mode).
pub fn infer_edges(tasks: &mut [Task], strict: bool) -> Result<Vec<String>, GraphError> {
    let mut warnings = Vec::new();

    // Stable producer order: scan by ascending task id so the first match
    // is deterministic.
    let mut order: Vec<usize> = (0..tasks.len()).collect();
    order.sort_by(|&a, &b| tasks[a].id.cmp(&tasks[b].id));

    let mut new_deps: Vec<(usize, Dependency)> = Vec::new();

    for idx in 0..tasks.len() {
        let consumer = &tasks[idx];

        // Data edges: one per required input, to the first compatible output
        for input in &consumer.required_inputs {
            let producer = order.iter().copied().find(|&p| {
                p != idx && tasks[p].provided_outputs.iter().any(|out| out.compatible_with(input))
            });
            match producer {
                Some(p) => {
                    let dep = Dependency::new(tasks[p].id.clone(), EdgeKind::Data);
                    if !consumer.depends_on(&dep.task_id) {
                        debug!(task = %consumer.id, producer = %dep.task_id, input = %input.name, "Inferred data edge");
                        new_deps.push((idx, dep));
                    }
                }
                None => {
                    let warning = format!("No producer for input '{}' of task {}", input.name, consumer.id);
                    if strict {
                        return Err(GraphError::MissingProducer(warning));
                    }
                    warnings.push(warning);
                }
            }
        }

        // Integration edges: consumesAPI -> providesAPI
        for api in &consumer.integration_contracts.consumes_api {
            match contract_producer(tasks, &order, idx, api, |c| &c.provides_api) {
                Some(p) => {
                    let dep = Dependency::new(tasks[p].id.clone(), EdgeKind::Integration);
                    if !consumer.depends_on(&dep.task_id) {
                        new_deps.push((idx, dep));
                    }
                }
                None => {
                    let warning = format!("No provider for API '{}' consumed by task {}", api, consumer.id);
                    if strict {
                        return Err(GraphError::MissingProducer(warning));
                    }
                    warnings.push(warning);
                }
            }
        }

        // Schema edges: requiresSchema -> definesSchema
        for schema in &consumer.integration_contracts.requires_schema {
            match contract_producer(tasks, &order, idx, schema, |c| &c.defines_schema) {
                Some(p) => {
                    let dep = Dependency::new(tasks[p].id.clone(), EdgeKind::Schema);
                    if !consumer.depends_on(&dep.task_id) {
                        new_deps.push((idx, dep));
                    }
                }
                None => {
                    let warning = format!("No definition for schema '{}' required by task {}", schema, consumer.id);
                    if strict {
                        return Err(GraphError::MissingProducer(warning));
                    }
                    warnings.push(warning);
                }
            }
        }
    }

    for (idx, dep) in new_deps {
        // Inference never creates self-edges, but adapter-supplied explicit
        // deps might reference the task itself; those are caught by the
        // engine's insert validation.
        if tasks[idx].id != dep.task_id && !tasks[idx].depends_on(&dep.task_id) {
            tasks[idx].dependencies.push(dep);
        }
    }

    for warning in &warnings {
        warn!(%warning, "Edge inference");
    }
    Ok(warnings)
}

fn contract_producer<'a>(
    tasks: &'a [Task],
    order: &[usize],
    consumer_idx: usize,
    name: &str,
    select: impl Fn(&'a IntegrationContracts) -> &'a Vec<String>,
) -> Option<usize> {
    let matches: Vec<usize> = order
        .iter()
        .copied()
        .filter(|&p| {
            p != consumer_idx
                && select(&tasks[p].integration_contracts)
                    .iter()
                    .any(|provided| IntegrationContracts::names_match(provided, name))
        })
        .collect();
    if matches.len() > 1 {
        warn!(
            name,
            consumer = %tasks[consumer_idx].id,
            count = matches.len(),
            "Multiple producers for contract, taking first by task id"
        );
    }
    matches.first().copied()
}

/// Kahn's algorithm over all edges; a leftover set means a cycle
pub fn topological_order(tasks: &[Task]) -> Result<Vec<String>, GraphError> {
    let index: HashMap<&str, usize> = tasks.iter().enumerate().map(|(i, t)| (t.id.as_str(), i)).collect();

    let mut in_degree = vec![0usize; tasks.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); tasks.len()];
    for (i, task) in tasks.iter().enumerate() {
        for dep in &task.dependencies {
            if let Some(&p) = index.get(dep.task_id.as_str()) {
                in_degree[i] += 1;
                dependents[p].push(i);
            }
        }
    }

    let mut queue: VecDeque<usize> = (0..tasks.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(tasks.len());

    while let Some(i) = queue.pop_front() {
        order.push(tasks[i].id.clone());
        for &d in &dependents[i] {
            in_degree[d] -= 1;
            if in_degree[d] == 0 {
                queue.push_back(d);
            }
        }
    }

    if order.len() != tasks.len() {
        let cycle: Vec<String> = tasks
            .iter()
            .enumerate()
            .filter(|(i, _)| in_degree[*i] > 0)
            .map(|(_, t)| t.id.clone())
            .collect();
        return Err(GraphError::CyclicGraph { tasks: cycle });
    }
    Ok(order)
}

/// Mark every task lying on a path whose total weight is within 5% of the
/// longest path through the graph. Returns the number of marked tasks.
///
/// The through-length of a task is the longest entry-to-exit chain passing
/// through it: longest finish up to and including the task, plus the longest
/// tail hanging off it.
pub fn mark_critical_path(tasks: &mut [Task]) -> usize {
    let order = match topological_order(tasks) {
        Ok(order) => order,
        Err(_) => return 0,
    };
    let index: HashMap<String, usize> = tasks.iter().enumerate().map(|(i, t)| (t.id.clone(), i)).collect();

    // Earliest finish: longest weighted path ending at the task
    let mut earliest_finish = vec![0u64; tasks.len()];
    for id in &order {
        let i = index[id];
        let dep_max = tasks[i]
            .dependencies
            .iter()
            .filter_map(|d| index.get(&d.task_id).map(|&p| earliest_finish[p]))
            .max()
            .unwrap_or(0);
        earliest_finish[i] = dep_max + tasks[i].estimated_duration as u64;
    }

    // Tail: longest weighted path starting below the task
    let mut tail = vec![0u64; tasks.len()];
    for id in order.iter().rev() {
        let i = index[id];
        for dep in &tasks[i].dependencies {
            if let Some(&p) = index.get(&dep.task_id) {
                let through = tail[i] + tasks[i].estimated_duration as u64;
                tail[p] = tail[p].max(through);
            }
        }
    }

    let longest = earliest_finish.iter().max().copied().unwrap_or(0);
    if longest == 0 {
        return 0;
    }
    let threshold = (longest as f64) * (1.0 - CRITICAL_PATH_BAND);

    let mut marked = 0;
    for i in 0..tasks.len() {
        let through = (earliest_finish[i] + tail[i]) as f64;
        tasks[i].on_critical_path = through >= threshold;
        if tasks[i].on_critical_path {
            marked += 1;
        }
    }
    marked
}
