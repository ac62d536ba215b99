//! Step graph builder
//!
//! Validates a workflow definition and builds the graph the scheduler walks:
//! dependency predecessors and dependents, pointer successors, and the entry
//! set of steps that can start immediately. Building is pure, so a graph can
//! be cached per workflow id.

use std::collections::{HashMap, HashSet};

use super::error::ValidationError;
use crate::workflow::{StepAction, StepDefinition, WorkflowDefinition, END};

#[derive(Debug, Clone)]
pub struct StepNode {
    pub step: StepDefinition,
    /// Position in the workflow's step list
    pub index: usize,
    /// Indices of the steps this one depends on
    pub dependencies: Vec<usize>,
    /// Indices of the steps that depend on this one
    pub dependents: Vec<usize>,
    /// Indices of pointer targets (excluding `end`)
    pub successors: Vec<usize>,
    /// Whether any pointer edge leads here
    pub has_incoming_pointer: bool,
}

#[derive(Debug, Clone)]
pub struct StepGraph {
    workflow_id: String,
    concurrency_limit: usize,
    nodes: Vec<StepNode>,
    index: HashMap<String, usize>,
    entry_set: Vec<usize>,
    execution_levels: Vec<Vec<String>>,
}

impl StepGraph {
    pub fn build(workflow: &WorkflowDefinition) -> Result<Self, ValidationError> {
        if workflow.id.trim().is_empty() {
            return Err(ValidationError::MissingWorkflowId);
        }
        if workflow.concurrency_limit == 0 {
            return Err(ValidationError::InvalidConcurrencyLimit(0));
        }

        let mut index = HashMap::new();
        for (i, step) in workflow.steps.iter().enumerate() {
            if step.id == END {
                return Err(ValidationError::ReservedStepId(step.id.clone()));
            }
            if index.insert(step.id.clone(), i).is_some() {
                return Err(ValidationError::DuplicateStepId(step.id.clone()));
            }
            validate_action(step)?;
        }

        let mut nodes: Vec<StepNode> = workflow
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| StepNode {
                step: step.clone(),
                index: i,
                dependencies: Vec::new(),
                dependents: Vec::new(),
                successors: Vec::new(),
                has_incoming_pointer: false,
            })
            .collect();

        for (i, step) in workflow.steps.iter().enumerate() {
            for dep in &step.dependencies {
                let &d = index
                    .get(dep)
                    .ok_or_else(|| ValidationError::UnknownDependency {
                        step: step.id.clone(),
                        dependency: dep.clone(),
                    })?;
                if !nodes[i].dependencies.contains(&d) {
                    nodes[i].dependencies.push(d);
                    nodes[d].dependents.push(i);
                }
            }

            for target in step.pointer_targets() {
                if target == END {
                    continue;
                }
                let &t = index
                    .get(target)
                    .ok_or_else(|| ValidationError::UnknownTarget {
                        step: step.id.clone(),
                        target: target.to_string(),
                    })?;
                if !nodes[i].successors.contains(&t) {
                    nodes[i].successors.push(t);
                }
                nodes[t].has_incoming_pointer = true;
            }
        }

        for node in &mut nodes {
            node.dependents.sort_unstable();
        }

        if let Some(cycle) = find_dependency_cycle(&nodes) {
            return Err(ValidationError::CyclicDependency(cycle));
        }

        let entry_set: Vec<usize> = nodes
            .iter()
            .filter(|n| n.dependencies.is_empty() && !n.has_incoming_pointer)
            .map(|n| n.index)
            .collect();

        if entry_set.is_empty() && !nodes.is_empty() {
            return Err(ValidationError::NoEntryStep);
        }

        let execution_levels = compute_execution_levels(&nodes);

        Ok(Self {
            workflow_id: workflow.id.clone(),
            concurrency_limit: workflow.concurrency_limit,
            nodes,
            index,
            entry_set,
            execution_levels,
        })
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    pub fn nodes(&self) -> &[StepNode] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> &StepNode {
        &self.nodes[index]
    }

    pub fn get_node(&self, id: &str) -> Option<&StepNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Entry step indices, in definition order
    pub fn entry_indices(&self) -> &[usize] {
        &self.entry_set
    }

    /// Entry step ids, in definition order
    pub fn entry_set(&self) -> Vec<&str> {
        self.entry_set
            .iter()
            .map(|&i| self.nodes[i].step.id.as_str())
            .collect()
    }

    pub fn dependencies(&self, id: &str) -> Vec<&str> {
        self.ids(self.get_node(id).map(|n| n.dependencies.as_slice()))
    }

    pub fn dependents(&self, id: &str) -> Vec<&str> {
        self.ids(self.get_node(id).map(|n| n.dependents.as_slice()))
    }

    pub fn successors(&self, id: &str) -> Vec<&str> {
        self.ids(self.get_node(id).map(|n| n.successors.as_slice()))
    }

    /// Dependency levels: every step in a level depends only on earlier levels
    pub fn execution_levels(&self) -> &Vec<Vec<String>> {
        &self.execution_levels
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn ids(&self, indices: Option<&[usize]>) -> Vec<&str> {
        indices
            .unwrap_or_default()
            .iter()
            .map(|&i| self.nodes[i].step.id.as_str())
            .collect()
    }
}

fn validate_action(step: &StepDefinition) -> Result<(), ValidationError> {
    match &step.action {
        StepAction::ToolCode { tool_id, .. } => {
            if tool_id.trim().is_empty() {
                return Err(ValidationError::MissingToolId(step.id.clone()));
            }
        }
        StepAction::Condition {
            expression,
            on_true,
            on_false,
        } => {
            if expression.trim().is_empty() {
                return Err(ValidationError::MissingExpression(step.id.clone()));
            }
            if on_true.is_none() && on_false.is_none() {
                return Err(ValidationError::MissingBranch(step.id.clone()));
            }
        }
    }
    Ok(())
}

/// Depth-first search over dependency edges; returns the first cycle found
/// as a path that starts and ends on the same step.
fn find_dependency_cycle(nodes: &[StepNode]) -> Option<Vec<String>> {
    fn visit(
        i: usize,
        nodes: &[StepNode],
        visited: &mut HashSet<usize>,
        on_path: &mut HashSet<usize>,
        path: &mut Vec<usize>,
    ) -> Option<Vec<String>> {
        if on_path.contains(&i) {
            let start = path.iter().position(|&p| p == i).unwrap_or(0);
            let mut cycle: Vec<String> = path[start..]
                .iter()
                .map(|&p| nodes[p].step.id.clone())
                .collect();
            cycle.push(nodes[i].step.id.clone());
            return Some(cycle);
        }
        if visited.contains(&i) {
            return None;
        }

        on_path.insert(i);
        path.push(i);

        for &dep in &nodes[i].dependencies {
            if let Some(cycle) = visit(dep, nodes, visited, on_path, path) {
                return Some(cycle);
            }
        }

        path.pop();
        on_path.remove(&i);
        visited.insert(i);
        None
    }

    let mut visited = HashSet::new();
    let mut on_path = HashSet::new();
    for i in 0..nodes.len() {
        if let Some(cycle) = visit(i, nodes, &mut visited, &mut on_path, &mut Vec::new()) {
            return Some(cycle);
        }
    }
    None
}

fn compute_execution_levels(nodes: &[StepNode]) -> Vec<Vec<String>> {
    let mut in_degree: Vec<usize> = nodes.iter().map(|n| n.dependencies.len()).collect();
    let mut levels = Vec::new();
    let mut current: Vec<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();

    while !current.is_empty() {
        let mut next = Vec::new();
        for &i in &current {
            for &dependent in &nodes[i].dependents {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    next.push(dependent);
                }
            }
        }
        next.sort_unstable();
        levels.push(current.iter().map(|&i| nodes[i].step.id.clone()).collect());
        current = next;
    }

    levels
}
