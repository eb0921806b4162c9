///! Stage 3: link (ramp / turn channel) reclassification
///!
///! Link edges inherit their importance from the roads they connect. From
///! every node that touches both a link and a non-link edge, each link edge
///! is expanded through the contiguous link region until all paths reach a
///! node with a non-link edge; the traversed links are then set to the
///! second-best surrounding road class. Second-best protects branching links
///! from being downgraded to the weakest branch. Importance is only ever
///! raised numerically, never lowered.

use anyhow::Result;
use log::error;
use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use crate::formats::way::Way;
use crate::graph::{best_non_link_class, collect_node_edges, Edge, Node};
use crate::sequence::Sequence;
use crate::stats::DataQuality;

/// Reclassify link edges. Returns the number of edges whose importance
/// changed.
pub fn reclassify_links(
    ways: &Sequence<Way>,
    nodes_path: &Path,
    edges_path: &Path,
    stats: &mut DataQuality,
    max_expansions: u32,
) -> Result<u32> {
    println!("🔀 Reclassifying link graph edges...");

    let nodes = Sequence::<Node>::open_read_only(nodes_path)?;
    let mut edges = Sequence::<Edge>::open(edges_path)?;

    let mut count = 0u32;
    let mut position = 0usize;
    while position < nodes.len() {
        let bundle = collect_node_edges(position, &nodes, &edges)?;
        if bundle.node.node.link_edge && bundle.node.node.non_link_edge {
            count += reclassify_from_node(
                position,
                &bundle.edges,
                ways,
                &nodes,
                &mut edges,
                stats,
                max_expansions,
            )?;
        }
        position += bundle.node_count;
    }

    edges.flush()?;
    println!("  ✓ {} reclassified", count);
    Ok(count)
}

/// Expand every link edge starting at one node; `node_position` is the run
/// head of a node with both link and non-link edges.
fn reclassify_from_node(
    node_position: usize,
    node_edges: &[(Edge, usize)],
    ways: &Sequence<Way>,
    nodes: &Sequence<Node>,
    edges: &mut Sequence<Edge>,
    stats: &mut DataQuality,
    max_expansions: u32,
) -> Result<u32> {
    let mut count = 0u32;

    // Classes of every non-link connection found; seeded with this node's
    // best and accumulated across all link edges expanded from it
    let mut endrc: Vec<u8> = Vec::new();
    if let Some(best) = best_non_link_class(node_edges) {
        endrc.push(best);
    }

    for (start_edge, start_index) in node_edges {
        if !start_edge.link {
            continue;
        }

        let mut visited: HashSet<usize> = HashSet::new();
        let mut frontier: BTreeSet<usize> = BTreeSet::new();
        let mut link_indexes: Vec<usize> = vec![*start_index];

        reach(
            start_edge,
            node_position,
            nodes,
            edges,
            &mut endrc,
            &mut frontier,
            &visited,
        )?;

        // Expand until all paths reach a non-link node or the cap trips;
        // hitting the cap leaves the edges untouched
        for _ in 0..max_expansions {
            if frontier.is_empty() {
                if endrc.len() < 2 {
                    let way = ways.get(start_edge.way_index as usize)?;
                    stats.add_unconnected_link(way.osm_way_id);
                } else {
                    let mut sorted = endrc.clone();
                    sorted.sort_unstable();
                    let class = sorted[1];
                    for index in &link_indexes {
                        let mut edge = edges.get(*index)?;
                        if class > edge.importance {
                            edge.importance = class;
                            edges.set(*index, &edge)?;
                            count += 1;
                        }
                    }
                }
                break;
            }

            let expand_position = *frontier.iter().next().unwrap();
            frontier.remove(&expand_position);
            visited.insert(expand_position);

            let expanded = collect_node_edges(expand_position, nodes, edges)?;
            for (edge, index) in &expanded.edges {
                if index == start_index {
                    continue;
                }
                // The region was entered from a link-only node, so every
                // edge here must itself be a link
                if !edge.link {
                    error!("Expanding onto non-link edge {}", index);
                    continue;
                }
                link_indexes.push(*index);
                reach(
                    edge,
                    expand_position,
                    nodes,
                    edges,
                    &mut endrc,
                    &mut frontier,
                    &visited,
                )?;
            }
        }
    }

    Ok(count)
}

/// Record the far endpoint's best non-link class, or queue it for expansion
/// if it only touches links
fn reach(
    edge: &Edge,
    from: usize,
    nodes: &Sequence<Node>,
    edges: &Sequence<Edge>,
    endrc: &mut Vec<u8>,
    frontier: &mut BTreeSet<usize>,
    visited: &HashSet<usize>,
) -> Result<()> {
    let far = if edge.source_node as usize == from {
        edge.target_node as usize
    } else {
        edge.source_node as usize
    };
    let far_node = nodes.get(far)?;
    if far_node.node.non_link_edge {
        let far_bundle = collect_node_edges(far, nodes, edges)?;
        if let Some(best) = best_non_link_class(&far_bundle.edges) {
            endrc.push(best);
        }
    } else if !visited.contains(&far) {
        frontier.insert(far);
    }
    Ok(())
}
