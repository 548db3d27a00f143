use flowcore::{output, Flow, GraphError, PartId};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use std::collections::{HashMap, HashSet};

/// Build the part graph of a flow, edges weighted by output code
pub fn build_graph(flow: &Flow) -> Result<(DiGraph<PartId, i32>, HashMap<PartId, NodeIndex>), GraphError> {
    let mut graph = DiGraph::new();
    let mut part_to_index = HashMap::new();

    for part in &flow.parts {
        let idx = graph.add_node(part.uid);
        if part_to_index.insert(part.uid, idx).is_some() {
            return Err(GraphError::DuplicatePart(part.uid));
        }
    }

    for part in &flow.parts {
        let from = part_to_index[&part.uid];
        let edges = part
            .output_connections
            .iter()
            .map(|c| (c.output, c.input_node))
            .chain(part.error_connection.map(|to| (output::FAILURE, to)));
        for (code, to) in edges {
            let to_idx = part_to_index
                .get(&to)
                .ok_or(GraphError::MissingTarget { from: part.uid, to })?;
            graph.add_edge(from, *to_idx, code);
        }
    }

    Ok((graph, part_to_index))
}

/// Check the structural invariants: one entry part, every target present
pub fn validate(flow: &Flow) -> Result<(), GraphError> {
    let (graph, part_to_index) = build_graph(flow)?;
    let entry = flow.entry_part()?;

    let unreachable = unreachable_from(&graph, part_to_index[&entry.uid]);
    if !unreachable.is_empty() {
        tracing::warn!(
            flow = %flow.name,
            count = unreachable.len(),
            "flow has parts unreachable from its entry point"
        );
    }
    Ok(())
}

/// Parts no path from the entry point leads to.
pub fn unreachable_parts(flow: &Flow) -> Result<Vec<PartId>, GraphError> {
    let (graph, part_to_index) = build_graph(flow)?;
    let entry = flow.entry_part()?;
    Ok(unreachable_from(&graph, part_to_index[&entry.uid]))
}

fn unreachable_from(graph: &DiGraph<PartId, i32>, start: NodeIndex) -> Vec<PartId> {
    let mut seen = HashSet::new();
    let mut dfs = Dfs::new(graph, start);
    while let Some(idx) = dfs.next(graph) {
        seen.insert(graph[idx]);
    }
    graph
        .node_weights()
        .filter(|uid| !seen.contains(*uid))
        .copied()
        .collect()
}
