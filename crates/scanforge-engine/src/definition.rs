//! Workflow definition validation.
//!
//! A definition is accepted when every edge references existing nodes, no
//! edge is a self-loop, and the graph is acyclic once loop-node body edges
//! are set aside (those are the iteration back-path and are re-dispatched
//! by the engine itself).

use std::collections::{HashMap, HashSet};

use scanforge_core::model::{NodeType, WorkflowDefinition};
use scanforge_core::CoreError;

/// Validate a workflow definition's structural invariants.
pub fn validate_definition(definition: &WorkflowDefinition) -> Result<(), CoreError> {
    let node_ids: HashSet<&str> = definition.nodes.iter().map(|n| n.id.as_str()).collect();
    if node_ids.len() != definition.nodes.len() {
        return Err(CoreError::InvalidDefinition(
            "duplicate node ids".to_string(),
        ));
    }

    let loop_nodes: HashSet<&str> = definition
        .nodes
        .iter()
        .filter(|n| n.node_type.parse::<NodeType>() == Ok(NodeType::Loop))
        .map(|n| n.id.as_str())
        .collect();

    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &definition.edges {
        if !node_ids.contains(edge.source.as_str()) {
            return Err(CoreError::InvalidDefinition(format!(
                "edge {} references unknown source node {}",
                edge.id, edge.source
            )));
        }
        if !node_ids.contains(edge.target.as_str()) {
            return Err(CoreError::InvalidDefinition(format!(
                "edge {} references unknown target node {}",
                edge.id, edge.target
            )));
        }
        if edge.source == edge.target {
            return Err(CoreError::InvalidDefinition(format!(
                "edge {} is a self-loop on node {}",
                edge.id, edge.source
            )));
        }

        // Loop body edges carry the iteration cycle on purpose
        let label = edge.branch_label();
        let is_loop_body =
            loop_nodes.contains(edge.source.as_str()) && (label == "body" || label.is_empty());
        if !is_loop_body {
            adjacency
                .entry(edge.source.as_str())
                .or_default()
                .push(edge.target.as_str());
        }
    }

    // Iterative DFS cycle detection over the remaining edges
    let mut visited: HashSet<&str> = HashSet::new();
    let mut in_stack: HashSet<&str> = HashSet::new();

    for &start in node_ids.iter() {
        if visited.contains(start) {
            continue;
        }
        let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
        in_stack.insert(start);
        visited.insert(start);

        while let Some((node, child_idx)) = stack.pop() {
            let children = adjacency.get(node).map(Vec::as_slice).unwrap_or(&[]);
            if child_idx < children.len() {
                stack.push((node, child_idx + 1));
                let child = children[child_idx];
                if in_stack.contains(child) {
                    return Err(CoreError::InvalidDefinition(format!(
                        "cycle detected through node {child}"
                    )));
                }
                if !visited.contains(child) {
                    visited.insert(child);
                    in_stack.insert(child);
                    stack.push((child, 0));
                }
            } else {
                in_stack.remove(node);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn definition(value: serde_json::Value) -> WorkflowDefinition {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_valid_linear_graph() {
        let def = definition(json!({
            "nodes": [
                {"id": "a", "type": "tool"},
                {"id": "b", "type": "condition"},
                {"id": "c", "type": "notification"}
            ],
            "edges": [
                {"id": "e1", "source": "a", "target": "b"},
                {"id": "e2", "source": "b", "target": "c"}
            ]
        }));
        assert!(validate_definition(&def).is_ok());
    }

    #[test]
    fn test_unknown_edge_endpoint() {
        let def = definition(json!({
            "nodes": [{"id": "a", "type": "tool"}],
            "edges": [{"id": "e1", "source": "a", "target": "ghost"}]
        }));
        assert!(validate_definition(&def).is_err());
    }

    #[test]
    fn test_self_loop_rejected() {
        let def = definition(json!({
            "nodes": [{"id": "a", "type": "tool"}],
            "edges": [{"id": "e1", "source": "a", "target": "a"}]
        }));
        assert!(validate_definition(&def).is_err());
    }

    #[test]
    fn test_plain_cycle_rejected() {
        let def = definition(json!({
            "nodes": [
                {"id": "a", "type": "tool"},
                {"id": "b", "type": "tool"}
            ],
            "edges": [
                {"id": "e1", "source": "a", "target": "b"},
                {"id": "e2", "source": "b", "target": "a"}
            ]
        }));
        assert!(validate_definition(&def).is_err());
    }

    #[test]
    fn test_loop_body_cycle_allowed() {
        let def = definition(json!({
            "nodes": [
                {"id": "loop_1", "type": "loop", "data": {"loop_type": "count", "iterations": 3}},
                {"id": "scan", "type": "tool"},
                {"id": "done", "type": "notification"}
            ],
            "edges": [
                {"id": "e1", "source": "loop_1", "target": "scan", "label": "body"},
                {"id": "e2", "source": "scan", "target": "loop_1"},
                {"id": "e3", "source": "loop_1", "target": "done", "label": "done"}
            ]
        }));
        // The scan -> loop_1 back-edge plus the body edge form the
        // iteration cycle, which is legal; the done edge is not part of it.
        assert!(validate_definition(&def).is_ok());
    }

    #[test]
    fn test_duplicate_node_ids_rejected() {
        let def = definition(json!({
            "nodes": [
                {"id": "a", "type": "tool"},
                {"id": "a", "type": "delay"}
            ],
            "edges": []
        }));
        assert!(validate_definition(&def).is_err());
    }
}
