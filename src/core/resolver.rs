//! Dependency resolution.
//!
//! Turns a set of top-level requests into a fully pinned, topologically
//! ordered build plan. Candidate selection is newest-first with
//! deterministic backtracking: when constraint intersection leaves a package
//! with no viable version, the resolver unwinds to the most recent decision
//! that still has unexplored alternatives and tries the next one.

use std::collections::{HashMap, VecDeque};

use thiserror::Error;

use crate::core::constraint::Constraint;
use crate::core::recipe::Recipe;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("unsatisfiable constraints involving {}", conflict.join(", "))]
    Unsatisfiable { conflict: Vec<String> },

    #[error("dependency cycle: {}", cycle.join(" -> "))]
    Cycle { cycle: Vec<String> },

    #[error(transparent)]
    Source(#[from] anyhow::Error),
}

/// Where candidate recipes come from. The catalog implements this; tests
/// substitute an in-memory table.
pub trait CandidateSource {
    /// Every known version of `name`, newest first.
    fn candidates(&self, name: &str) -> Result<Vec<Recipe>, anyhow::Error>;
}

/// A top-level request entering the resolver.
#[derive(Debug, Clone)]
pub struct Request {
    pub name: String,
    pub constraint: Constraint,
}

/// One work item: a package to satisfy and who asked for it.
#[derive(Debug, Clone)]
struct Item {
    name: String,
    constraint: Constraint,
    /// Requester chain from the top-level request down to here.
    path: Vec<String>,
}

/// Search state snapshotted at every decision point.
#[derive(Debug, Clone)]
struct SearchState {
    queue: VecDeque<Item>,
    constraints: HashMap<String, Constraint>,
    /// Names that contributed a constraint on each package; feeds conflict
    /// reporting.
    contributors: HashMap<String, Vec<String>>,
    selections: Vec<(String, Recipe)>,
}

/// A decision with alternatives left to explore.
#[derive(Debug)]
struct Frame {
    state: SearchState,
    path: Vec<String>,
    candidates: Vec<Recipe>,
    next: usize,
}

/// Resolve `requests` into dependency-first order.
pub fn resolve(
    source: &dyn CandidateSource,
    requests: &[Request],
) -> Result<Vec<Recipe>, ResolveError> {
    let mut state = SearchState {
        queue: requests
            .iter()
            .map(|r| Item {
                name: r.name.clone(),
                constraint: r.constraint.clone(),
                path: Vec::new(),
            })
            .collect(),
        constraints: HashMap::new(),
        contributors: HashMap::new(),
        selections: Vec::new(),
    };
    let mut frames: Vec<Frame> = Vec::new();

    loop {
        let Some(item) = state.queue.pop_front() else {
            return Ok(topo_sort(state.selections));
        };

        if let Some(start) = item.path.iter().position(|n| n == &item.name) {
            let mut cycle: Vec<String> = item.path[start..].to_vec();
            cycle.push(item.name.clone());
            return Err(ResolveError::Cycle { cycle });
        }

        let merged = match state.constraints.get(&item.name) {
            Some(existing) => existing.intersect(&item.constraint),
            None => item.constraint.clone(),
        };
        state.constraints.insert(item.name.clone(), merged.clone());
        record_contributors(&mut state.contributors, &item);

        // Already pinned and still viable: nothing to do.
        if let Some((_, selected)) = state.selections.iter().find(|(n, _)| n == &item.name) {
            if merged.matches(&selected.version) {
                continue;
            }
            let conflict = conflict_names(&state.contributors, &item.name);
            if backtrack(&mut frames, &mut state) {
                continue;
            }
            return Err(ResolveError::Unsatisfiable { conflict });
        }

        let viable: Vec<Recipe> = source
            .candidates(&item.name)?
            .into_iter()
            .filter(|r| merged.matches(&r.version))
            .collect();

        if viable.is_empty() || merged.is_contradictory() {
            let conflict = conflict_names(&state.contributors, &item.name);
            if backtrack(&mut frames, &mut state) {
                continue;
            }
            return Err(ResolveError::Unsatisfiable { conflict });
        }

        let mut path = item.path.clone();
        path.push(item.name.clone());

        frames.push(Frame {
            state: state.clone(),
            path: path.clone(),
            candidates: viable.clone(),
            next: 1,
        });

        let chosen = viable.into_iter().next().expect("viable checked non-empty");
        apply_with_path(&mut state, chosen, &path);
    }
}

/// Unwind to the newest frame with an untried candidate, restore its
/// snapshot, and apply that candidate. False when every alternative on the
/// stack is exhausted.
fn backtrack(frames: &mut Vec<Frame>, state: &mut SearchState) -> bool {
    while let Some(frame) = frames.last_mut() {
        if frame.next < frame.candidates.len() {
            let recipe = frame.candidates[frame.next].clone();
            frame.next += 1;
            *state = frame.state.clone();
            let path = frame.path.clone();
            apply_with_path(state, recipe, &path);
            return true;
        }
        frames.pop();
    }
    false
}

fn apply_with_path(state: &mut SearchState, recipe: Recipe, path: &[String]) {
    for dep in &recipe.dependencies {
        state.queue.push_back(Item {
            name: dep.name.clone(),
            constraint: dep.constraint.clone(),
            path: path.to_vec(),
        });
    }
    state.selections.push((recipe.name.clone(), recipe));
}

fn record_contributors(contributors: &mut HashMap<String, Vec<String>>, item: &Item) {
    let entry = contributors.entry(item.name.clone()).or_default();
    for name in &item.path {
        if !entry.contains(name) {
            entry.push(name.clone());
        }
    }
}

/// Names on the contradiction path: the conflicted package plus everything
/// that constrained it, plus their own requesters.
fn conflict_names(contributors: &HashMap<String, Vec<String>>, name: &str) -> Vec<String> {
    let mut names = vec![name.to_string()];
    let mut stack: Vec<&str> = vec![name];
    while let Some(current) = stack.pop() {
        if let Some(parents) = contributors.get(current) {
            for parent in parents {
                if !names.contains(parent) {
                    names.push(parent.clone());
                    stack.push(parent);
                }
            }
        }
    }
    names.sort();
    names
}

/// Kahn's algorithm over the selected set; ready ties break by name.
fn topo_sort(selections: Vec<(String, Recipe)>) -> Vec<Recipe> {
    let mut by_name: HashMap<String, Recipe> = HashMap::new();
    for (name, recipe) in selections {
        by_name.entry(name).or_insert(recipe);
    }

    let mut in_degree: HashMap<String, usize> = HashMap::new();
    let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
    for (name, recipe) in &by_name {
        in_degree.entry(name.clone()).or_insert(0);
        let mut seen = std::collections::HashSet::new();
        for dep in &recipe.dependencies {
            if !by_name.contains_key(&dep.name) || !seen.insert(&dep.name) {
                continue;
            }
            *in_degree.entry(name.clone()).or_insert(0) += 1;
            dependents
                .entry(dep.name.clone())
                .or_default()
                .push(name.clone());
        }
    }

    let mut ready: Vec<String> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(n, _)| n.clone())
        .collect();
    ready.sort();

    let mut order = Vec::new();
    while let Some(name) = ready.first().cloned() {
        ready.remove(0);
        if let Some(next) = dependents.get(&name) {
            for dependent in next {
                let degree = in_degree
                    .get_mut(dependent)
                    .expect("dependents only reference selected packages");
                *degree -= 1;
                if *degree == 0 {
                    let pos = ready
                        .binary_search(dependent)
                        .unwrap_or_else(|insert_at| insert_at);
                    ready.insert(pos, dependent.clone());
                }
            }
        }
        if let Some(recipe) = by_name.remove(&name) {
            order.push(recipe);
        }
    }

    order
}
