// src/messages/validation.rs
// Input validation and dependency-cycle detection (I2, §3, §9).

use crate::error::{EngineError, Result};
use std::collections::{HashMap, HashSet};

pub const MAX_SUBJECT_LEN: usize = 200;

pub fn validate_subject(subject: &str) -> Result<()> {
    if subject.is_empty() {
        return Err(EngineError::validation("subject must not be empty"));
    }
    if subject.chars().count() > MAX_SUBJECT_LEN {
        return Err(EngineError::validation(format!(
            "subject exceeds {MAX_SUBJECT_LEN} characters"
        )));
    }
    Ok(())
}

pub fn validate_to(to: &[String]) -> Result<()> {
    if to.is_empty() {
        return Err(EngineError::validation("`to` must name at least one recipient"));
    }
    Ok(())
}

/// Split a raw tag list into `(dependencies, remaining_tags)`, pulling out
/// `depends:<id>` entries per §3.
pub fn extract_dependencies(tags: &[String]) -> (Vec<String>, Vec<String>) {
    let mut deps = Vec::new();
    let mut rest = Vec::new();
    for tag in tags {
        match tag.strip_prefix("depends:") {
            Some(id) if !id.is_empty() => deps.push(id.to_string()),
            _ => rest.push(tag.clone()),
        }
    }
    (deps, rest)
}

/// Bounded DFS cycle check over the full dependency graph plus the candidate
/// message's own edges: does adding `new_id -> deps` create a cycle,
/// including a self-loop?
///
/// `edges` is every existing message's `(id, dependencies)` pair.
pub fn check_acyclic(new_id: &str, deps: &[String], edges: &[(String, Vec<String>)]) -> Result<()> {
    if deps.iter().any(|d| d == new_id) {
        return Err(EngineError::validation("dependency cycle (self-reference)"));
    }

    let mut graph: HashMap<&str, Vec<&str>> = HashMap::new();
    for (id, ds) in edges {
        graph
            .entry(id.as_str())
            .or_default()
            .extend(ds.iter().map(String::as_str));
    }
    graph.insert(new_id, deps.iter().map(String::as_str).collect());

    // A cycle exists iff, starting from `new_id` and following dependency
    // edges, we can reach `new_id` again.
    let mut visited = HashSet::new();
    let mut stack = vec![new_id];
    let mut first = true;
    while let Some(node) = stack.pop() {
        if !first && node == new_id {
            return Err(EngineError::validation("dependency cycle detected"));
        }
        first = false;
        if !visited.insert(node) {
            continue;
        }
        if let Some(next) = graph.get(node) {
            stack.extend(next.iter().copied());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_depends_tags() {
        let (deps, rest) = extract_dependencies(&[
            "depends:A".to_string(),
            "urgent".to_string(),
            "depends:B".to_string(),
        ]);
        assert_eq!(deps, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(rest, vec!["urgent".to_string()]);
    }

    #[test]
    fn self_loop_rejected() {
        let err = check_acyclic("A", &["A".to_string()], &[]).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn simple_chain_is_fine() {
        let edges = vec![("A".to_string(), vec![])];
        assert!(check_acyclic("B", &["A".to_string()], &edges).is_ok());
    }

    #[test]
    fn cycle_through_existing_edges_is_rejected() {
        // A -> (none); B depends on A; now C depends on A, but A already
        // (hypothetically, via a patched edge) depends on C: A -> C.
        let edges = vec![
            ("A".to_string(), vec!["C".to_string()]),
            ("B".to_string(), vec!["A".to_string()]),
        ];
        let err = check_acyclic("C", &["A".to_string()], &edges).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
