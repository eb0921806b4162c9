///! Stage 2: node sorting and duplicate collapsing
///!
///! Orders the node sequence by (tile, original id) so it becomes a set of
///! tiles, then walks it run by run: assigns tile-local ids, rewires every
///! edge endpoint to the run head (the canonical record), and ORs the
///! link/non-link flags of the whole run into the head. The duplicates stay
///! in place afterwards; they are how `collect_node_edges` recovers a node's
///! full edge set without a separate adjacency structure.

use anyhow::Result;
use std::collections::BTreeMap;
use std::path::Path;

use crate::graph::{Edge, Node};
use crate::graph_id::GraphId;
use crate::sequence::Sequence;

/// Sort the node sequence and repair edge endpoint references.
/// Returns the tile index map: tile graph id -> offset of its first node.
pub fn sort_graph(nodes_path: &Path, edges_path: &Path) -> Result<BTreeMap<GraphId, usize>> {
    println!("🗂️  Sorting graph...");

    let mut nodes = Sequence::<Node>::open(nodes_path)?;
    // Tile-local ids are undefined before this stage, so only the tile part
    // of the graph id participates in the ordering
    nodes.sort_by(|a, b| {
        (a.graph_id.tile_base(), a.node.osmid).cmp(&(b.graph_id.tile_base(), b.node.osmid))
    })?;

    let mut edges = Sequence::<Edge>::open(edges_path)?;
    let mut tiles: BTreeMap<GraphId, usize> = BTreeMap::new();
    let mut last_tile: Option<GraphId> = None;
    let mut last_local_id = 0u32;

    let mut position = 0usize;
    while position < nodes.len() {
        let head = nodes.get(position)?;
        let tile = head.graph_id.tile_base();

        // New tile starts a fresh local id space
        let local_id = match last_tile {
            Some(t) if t == tile => last_local_id + 1,
            _ => {
                tiles.insert(tile, position);
                0
            }
        };
        let assigned = tile.with_id(local_id);

        // Accumulate the whole duplicate run into the head record
        let mut canonical = head.clone();
        canonical.graph_id = assigned;
        let mut run_end = position;
        while run_end < nodes.len() {
            let mut duplicate = nodes.get(run_end)?;
            if duplicate.node.osmid != head.node.osmid || duplicate.graph_id.tile_base() != tile {
                break;
            }
            canonical.node.link_edge |= duplicate.node.link_edge;
            canonical.node.non_link_edge |= duplicate.node.non_link_edge;

            // Point the record's edges at the canonical position
            if duplicate.is_start() {
                let index = duplicate.start_of as usize;
                let mut edge = edges.get(index)?;
                edge.source_node = position as u32;
                edges.set(index, &edge)?;
            }
            if duplicate.is_end() {
                let index = duplicate.end_of as usize;
                let mut edge = edges.get(index)?;
                edge.target_node = position as u32;
                edges.set(index, &edge)?;
            }

            // Every duplicate carries the final id
            if run_end != position {
                duplicate.graph_id = assigned;
                nodes.set(run_end, &duplicate)?;
            }
            run_end += 1;
        }
        nodes.set(position, &canonical)?;

        last_tile = Some(tile);
        last_local_id = local_id;
        position = run_end;
    }

    nodes.flush()?;
    edges.flush()?;
    println!("  ✓ {} tiles", tiles.len());
    Ok(tiles)
}
