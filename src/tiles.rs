///! Stage 4: parallel tile building
///!
///! Partitions the sorted node sequence by tile across a worker pool. Each
///! worker owns a contiguous range of tiles, opens its own read-only handles
///! on the shared sequences, synthesizes every directed edge and node
///! summary, and writes its tile files. Workers never share mutable state;
///! each returns its own `DataQuality`, merged by the driver after the join.

use anyhow::{Context, Result};
use log::error;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use crate::formats::tile::{DirectedEdge, NodeInfo, TileWriter};
use crate::formats::way::{RoadClass, Use, Way};
use crate::formats::way_node::WayNode;
use crate::geo::polyline_length;
use crate::graph::{collect_node_edges, Edge, Node, NodeBundle};
use crate::graph_id::GraphId;
use crate::osmdata::OsmData;
use crate::sequence::Sequence;
use crate::signs::{exit_sign_list, get_ref, tag_tokens};
use crate::stats::DataQuality;

/// Edges longer than this are never internal intersection edges (meters)
const MAX_INTERNAL_LENGTH: f64 = 32.0;

/// Links longer than this are ramps, never turn channels (meters)
const MAX_TURN_CHANNEL_LENGTH: f64 = 200.0;

pub struct TileBuildConfig<'a> {
    pub nodes_path: &'a Path,
    pub edges_path: &'a Path,
    pub outdir: &'a Path,
    pub worker_count: usize,
    pub not_thru_max_expansions: u32,
}

/// Build all tiles. Successful workers' statistics are merged into `stats`
/// even when another worker fails; the first failure is then surfaced.
pub fn build_local_tiles(
    config: &TileBuildConfig,
    osmdata: &OsmData,
    tiles: &BTreeMap<GraphId, usize>,
    stats: &mut DataQuality,
) -> Result<()> {
    let tile_list: Vec<(GraphId, usize)> = tiles.iter().map(|(k, v)| (*k, *v)).collect();
    let workers = config.worker_count.max(1);
    println!(
        "🏗️  Building {} tiles with {} workers...",
        tile_list.len(),
        workers
    );

    let ranges = partition_tiles(tile_list.len(), workers);
    let results: Vec<Result<DataQuality>> = ranges
        .into_par_iter()
        .map(|(start, end)| build_tile_set(config, osmdata, &tile_list, start, end))
        .collect();

    let mut first_failure = None;
    for result in results {
        match result {
            Ok(worker_stats) => stats.merge(&worker_stats),
            Err(e) => {
                if first_failure.is_none() {
                    first_failure = Some(e);
                }
            }
        }
    }
    match first_failure {
        None => {
            println!("  ✓ All tiles written");
            Ok(())
        }
        Some(e) => Err(e).context("A tile worker failed"),
    }
}

/// Split `tile_count` tiles into at most `workers` contiguous half-open
/// ranges, sized within one of each other, remainder in the first ranges
fn partition_tiles(tile_count: usize, workers: usize) -> Vec<(usize, usize)> {
    let floor = tile_count / workers;
    let at_ceiling = tile_count - workers * floor;
    let mut ranges = Vec::new();
    let mut start = 0;
    for i in 0..workers {
        let count = if i < at_ceiling { floor + 1 } else { floor };
        if count == 0 {
            continue;
        }
        ranges.push((start, start + count));
        start += count;
    }
    ranges
}

/// One worker: build the tiles in `[tile_start, tile_end)`
fn build_tile_set(
    config: &TileBuildConfig,
    osmdata: &OsmData,
    tile_list: &[(GraphId, usize)],
    tile_start: usize,
    tile_end: usize,
) -> Result<DataQuality> {
    // Every worker reads through its own handles
    let ways = Sequence::<Way>::open_read_only(&osmdata.ways_path)?;
    let way_nodes = Sequence::<WayNode>::open_read_only(&osmdata.way_nodes_path)?;
    let nodes = Sequence::<Node>::open_read_only(config.nodes_path)?;
    let edges = Sequence::<Edge>::open_read_only(config.edges_path)?;

    let mut stats = DataQuality::new();
    for tile_index in tile_start..tile_end {
        let (tile_id, node_start) = tile_list[tile_index];
        let node_end = tile_list
            .get(tile_index + 1)
            .map(|(_, offset)| *offset)
            .unwrap_or(nodes.len());

        let path = build_one_tile(
            tile_id,
            node_start,
            node_end,
            config,
            osmdata,
            &ways,
            &way_nodes,
            &nodes,
            &edges,
            &mut stats,
        )
        .map_err(|e| {
            // The failed tile is abandoned; the driver hears about it after
            // every worker has finished
            error!("Failed to build tile {}: {:#}", tile_id, e);
            e
        })?;
        println!("  ✓ Wrote tile {} ({})", tile_id, path.display());
    }
    Ok(stats)
}

#[allow(clippy::too_many_arguments)]
fn build_one_tile(
    tile_id: GraphId,
    node_start: usize,
    node_end: usize,
    config: &TileBuildConfig,
    osmdata: &OsmData,
    ways: &Sequence<Way>,
    way_nodes: &Sequence<WayNode>,
    nodes: &Sequence<Node>,
    edges: &Sequence<Edge>,
    stats: &mut DataQuality,
) -> Result<PathBuf> {
    let mut tile = TileWriter::new(tile_id);
    let mut directed_edge_count = 0u32;
    let mut tile_edge_index = 0u32;

    let mut position = node_start;
    while position < node_end {
        let bundle = collect_node_edges(position, nodes, edges)?;
        let node = &bundle.node;

        let mut directed_edges = Vec::with_capacity(bundle.edges.len());
        let mut driveable = 0u16;
        let mut best_class = RoadClass::ServiceOther;

        for (n, (edge, edge_index)) in bundle.edges.iter().enumerate() {
            let way = ways.get(edge.way_index as usize)?;

            let shape = edge_shape(way_nodes, edge.ll_index as usize, edge.llcount as usize)?;
            let exact_length = polyline_length(&shape);
            let length = (exact_length + 0.5) as u32;

            // Orientation along the edge between the two nodes
            let forward = edge.source_node as usize == position;
            let (source, target) = if forward {
                (edge.source_node as usize, edge.target_node as usize)
            } else {
                (edge.target_node as usize, edge.source_node as usize)
            };

            if edge.driveable_forward || edge.driveable_reverse {
                driveable += 1;
            }

            // Not-thru is only interesting on low importance edges
            let mut not_thru = false;
            if edge.importance > RoadClass::Tertiary as u8 {
                not_thru = is_no_through_edge(
                    source,
                    target,
                    *edge_index,
                    nodes,
                    edges,
                    config.not_thru_max_expansions,
                )?;
                if not_thru {
                    stats.not_thru_count += 1;
                }
            }

            let internal = is_intersection_internal(
                source,
                target,
                *edge_index,
                way.osm_way_id,
                exact_length,
                nodes,
                edges,
                ways,
            )?;
            if internal {
                stats.internal_count += 1;
            }

            // Links infer ramp vs turn channel and get their speed updated
            let classification = RoadClass::from_u8(edge.importance);
            let mut speed = way.speed;
            let mut edge_use = way.way_use;
            if way.link {
                edge_use = link_use(
                    *edge_index,
                    classification,
                    exact_length,
                    edge.source_node as usize,
                    edge.target_node as usize,
                    nodes,
                    edges,
                )?;
                if edge_use == Use::TurnChannel {
                    stats.turn_channel_count += 1;
                }
                speed = link_speed(edge_use, classification, way.speed);
            }

            // A low class road looping back onto itself is a cul-de-sac
            if edge_use == Use::Road
                && source == target
                && classification > RoadClass::Tertiary
            {
                edge_use = Use::Culdesac;
                stats.culdesac_count += 1;
            }

            let restrictions =
                simple_turn_restriction(&way, target, nodes, edges, ways, osmdata, stats)?;
            if restrictions != 0 {
                stats.simple_restrictions += 1;
            }

            let has_signal = edge_has_signal(edge, &way, node, forward);

            let forward_access = if forward {
                edge.driveable_forward
            } else {
                edge.driveable_reverse
            };
            let reverse_access = if forward {
                edge.driveable_reverse
            } else {
                edge.driveable_forward
            };

            let edge_info_offset = tile.add_edge_info(
                *edge_index,
                way.osm_way_id,
                &shape,
                &edge_names(&way, osmdata),
            );

            let mut directed = DirectedEdge {
                target: nodes.get(target)?.graph_id,
                edge_info_offset,
                length,
                restrictions,
                speed: speed.round().clamp(0.0, 255.0) as u8,
                classification,
                edge_use,
                local_index: n.min(u8::MAX as usize) as u8,
                forward,
                not_thru,
                internal,
                has_signal,
                exit_sign: false,
                forward_access,
                reverse_access,
            };

            best_class = best_class.min(classification);

            // Exit signs only ride on driveable ramps
            if edge_use == Use::Ramp && forward_access {
                let exits = exit_sign_list(&node.node, &way, &osmdata.names);
                if !exits.is_empty() {
                    tile.add_signs(tile_edge_index, &exits);
                    directed.exit_sign = true;
                }
            }

            directed_edges.push(directed);
            tile_edge_index += 1;
        }

        let node_info = NodeInfo {
            lat: node.node.lat,
            lng: node.node.lng,
            edge_index: directed_edge_count,
            edge_count: bundle.edges.len().min(u16::MAX as usize) as u16,
            driveable_count: driveable,
            best_class,
            access_mask: node.node.access_mask,
            node_type: node.node.node_type,
            end: bundle.edges.len() == 1,
            traffic_signal: node.node.traffic_signal,
        };
        stats.record_node_edges(bundle.edges.len());
        directed_edge_count += directed_edges.len() as u32;
        tile.add_node_and_directed_edges(node_info, directed_edges);

        position += bundle.node_count;
    }

    tile.store(config.outdir)
}

/// Read an edge's shape points from the way-node sequence
fn edge_shape(
    way_nodes: &Sequence<WayNode>,
    ll_index: usize,
    count: usize,
) -> Result<Vec<(f64, f64)>> {
    let mut shape = Vec::with_capacity(count);
    for i in 0..count {
        let way_node = way_nodes.get(ll_index + i)?;
        shape.push((way_node.node.lat, way_node.node.lng));
    }
    Ok(shape)
}

/// Names carried on the edge info: merged refs first, then street names
fn edge_names(way: &Way, osmdata: &OsmData) -> Vec<String> {
    let mut names = Vec::new();
    let way_ref = osmdata.names.ref_table.name(way.ref_index);
    let merged;
    let effective_ref = match osmdata.names.way_ref.get(&way.osm_way_id) {
        Some(relation_ref) if way.ref_index != 0 => {
            merged = get_ref(way_ref, relation_ref);
            merged.as_str()
        }
        _ => way_ref,
    };
    for token in tag_tokens(effective_ref) {
        names.push(token.to_string());
    }
    for token in tag_tokens(osmdata.names.name_table.name(way.name_index)) {
        names.push(token.to_string());
    }
    names
}

/// Signal logic: an intersection signal applies when traversing toward the
/// node; a shape-point signal applies to the matching direction, or to
/// oneways when neither directional flag was tagged
fn edge_has_signal(edge: &Edge, way: &Way, node: &Node, forward: bool) -> bool {
    (!forward && node.node.traffic_signal)
        || (edge.traffic_signal
            && ((forward && edge.forward_signal)
                || (!forward && edge.backward_signal)
                || (way.oneway && !edge.forward_signal && !edge.backward_signal)))
}

/// True when the edge enters a region whose only exit is the edge itself.
/// The expansion never crosses tertiary-or-better roads and gives up (not
/// not-thru) at the cap.
fn is_no_through_edge(
    start_node: usize,
    end_node: usize,
    start_edge_index: usize,
    nodes: &Sequence<Node>,
    edges: &Sequence<Edge>,
    max_expansions: u32,
) -> Result<bool> {
    let mut visited: HashSet<usize> = HashSet::new();
    let mut frontier: BTreeSet<usize> = BTreeSet::new();
    frontier.insert(end_node);

    for _ in 0..max_expansions {
        if frontier.is_empty() {
            return Ok(true);
        }
        let node_index = *frontier.iter().next().unwrap();
        frontier.remove(&node_index);
        visited.insert(node_index);

        let bundle = collect_node_edges(node_index, nodes, edges)?;
        for (edge, edge_index) in &bundle.edges {
            if *edge_index == start_edge_index {
                continue;
            }
            let next = if edge.source_node as usize == node_index {
                edge.target_node as usize
            } else {
                edge.source_node as usize
            };
            // Back at the start, or out through a real road: it goes through
            if next == start_node || edge.importance <= RoadClass::Tertiary as u8 {
                return Ok(false);
            }
            if !visited.contains(&next) {
                frontier.insert(next);
            }
        }
    }
    Ok(false)
}

/// A pair of oneways, one inbound and one outbound, must exist at the node.
/// The edge under test, same-way edges, and links are all skipped.
fn oneway_pair_edges_exist(
    bundle: &NodeBundle,
    node_index: usize,
    edge_index: usize,
    way_id: u64,
    ways: &Sequence<Way>,
) -> Result<bool> {
    let mut inbound = false;
    let mut outbound = false;
    for (edge, index) in &bundle.edges {
        if *index == edge_index {
            continue;
        }
        let way = ways.get(edge.way_index as usize)?;
        if way.osm_way_id == way_id || edge.link {
            continue;
        }
        let forward = edge.source_node as usize == node_index;
        if (forward && !way.auto_forward && way.auto_backward)
            || (!forward && way.auto_forward && !way.auto_backward)
        {
            inbound = true;
        }
        if (forward && way.auto_forward && !way.auto_backward)
            || (!forward && !way.auto_forward && way.auto_backward)
        {
            outbound = true;
        }
    }
    Ok(inbound && outbound)
}

/// Short connector inside a complex junction: both ends see 3+ edges and a
/// oneway in/out pair
#[allow(clippy::too_many_arguments)]
fn is_intersection_internal(
    start_node: usize,
    end_node: usize,
    edge_index: usize,
    way_id: u64,
    length: f64,
    nodes: &Sequence<Node>,
    edges: &Sequence<Edge>,
    ways: &Sequence<Way>,
) -> Result<bool> {
    if length > MAX_INTERNAL_LENGTH {
        return Ok(false);
    }
    let start_bundle = collect_node_edges(start_node, nodes, edges)?;
    if start_bundle.edges.len() < 3 {
        return Ok(false);
    }
    let end_bundle = collect_node_edges(end_node, nodes, edges)?;
    if end_bundle.edges.len() < 3 {
        return Ok(false);
    }
    Ok(
        oneway_pair_edges_exist(&start_bundle, start_node, edge_index, way_id, ways)?
            && oneway_pair_edges_exist(&end_bundle, end_node, edge_index, way_id, ways)?,
    )
}

/// Ramp or turn channel? Turn channels are short, low class, and connect
/// non-link nodes without any other link touching either end.
fn link_use(
    edge_index: usize,
    classification: RoadClass,
    length: f64,
    start_node: usize,
    end_node: usize,
    nodes: &Sequence<Node>,
    edges: &Sequence<Edge>,
) -> Result<Use> {
    if classification == RoadClass::Motorway
        || classification == RoadClass::Trunk
        || length > MAX_TURN_CHANNEL_LENGTH
    {
        return Ok(Use::Ramp);
    }

    let start_bundle = collect_node_edges(start_node, nodes, edges)?;
    let end_bundle = collect_node_edges(end_node, nodes, edges)?;
    if !start_bundle.node.node.non_link_edge || !end_bundle.node.node.non_link_edge {
        return Ok(Use::Ramp);
    }
    // Another link at either end marks a split or fork
    for (edge, index) in start_bundle.edges.iter().chain(end_bundle.edges.iter()) {
        if *index != edge_index && edge.link {
            return Ok(Use::Ramp);
        }
    }
    Ok(Use::TurnChannel)
}

/// Link speed: turn channels shave 10% off the way speed; ramps use a fixed
/// table keyed by road class
fn link_speed(edge_use: Use, classification: RoadClass, speed: f32) -> f32 {
    match edge_use {
        Use::TurnChannel => speed * 0.9,
        Use::Ramp => match classification {
            RoadClass::Motorway => 95.0,
            RoadClass::Trunk => 80.0,
            RoadClass::Primary => 65.0,
            RoadClass::Secondary => 50.0,
            RoadClass::Tertiary => 40.0,
            RoadClass::Unclassified => 35.0,
            _ => 25.0,
        },
        _ => speed,
    }
}

/// Build the restriction mask for the directed edge ending at
/// `target_position`. Bits index the target node's edges in bundle order.
fn simple_turn_restriction(
    way: &Way,
    target_position: usize,
    nodes: &Sequence<Node>,
    edges: &Sequence<Edge>,
    ways: &Sequence<Way>,
    osmdata: &OsmData,
    stats: &mut DataQuality,
) -> Result<u32> {
    let Some(candidates) = osmdata.restrictions.get(&way.osm_way_id) else {
        return Ok(0);
    };

    // Restrictions that pass through the target node of this traversal
    let target_gid = nodes.get(target_position)?.graph_id;
    let mut matching = Vec::new();
    for restriction in candidates {
        if restriction.via_graphid == target_gid {
            if restriction.is_timed() {
                stats.timed_restrictions += 1;
            } else {
                matching.push(restriction);
            }
        }
    }
    if matching.is_empty() {
        return Ok(0);
    }

    let bundle = collect_node_edges(target_position, nodes, edges)?;
    let mut way_ids = Vec::with_capacity(bundle.edges.len());
    for (edge, _) in &bundle.edges {
        way_ids.push(ways.get(edge.way_index as usize)?.osm_way_id);
    }

    // NO restrictions mask the matching to-way; ONLY restrictions mask
    // everything else. Both kinds may coexist.
    let mut mask = 0u32;
    for restriction in matching {
        if restriction.restriction_type.is_only() {
            for (i, way_id) in way_ids.iter().enumerate().take(32) {
                if *way_id != restriction.to_way_id {
                    mask |= 1 << i;
                }
            }
        } else {
            for (i, way_id) in way_ids.iter().enumerate().take(32) {
                if *way_id == restriction.to_way_id {
                    mask |= 1 << i;
                    break;
                }
            }
        }
    }
    Ok(mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_spreads_remainder_first() {
        assert_eq!(partition_tiles(7, 3), vec![(0, 3), (3, 5), (5, 7)]);
        assert_eq!(partition_tiles(4, 4), vec![(0, 1), (1, 2), (2, 3), (3, 4)]);
        // More workers than tiles: empty ranges are dropped
        assert_eq!(partition_tiles(2, 4), vec![(0, 1), (1, 2)]);
        assert_eq!(partition_tiles(0, 2), Vec::<(usize, usize)>::new());
    }

    #[test]
    fn test_link_speed_table() {
        assert_eq!(link_speed(Use::TurnChannel, RoadClass::Primary, 60.0), 54.0);
        assert_eq!(link_speed(Use::Ramp, RoadClass::Motorway, 10.0), 95.0);
        assert_eq!(link_speed(Use::Ramp, RoadClass::Trunk, 10.0), 80.0);
        assert_eq!(link_speed(Use::Ramp, RoadClass::Residential, 10.0), 25.0);
        assert_eq!(link_speed(Use::Road, RoadClass::Primary, 60.0), 60.0);
    }

    #[test]
    fn test_edge_has_signal() {
        use crate::formats::way_node::OsmNode;
        use crate::graph::NO_EDGE;

        let way = Way::new(1, RoadClass::Primary, Use::Road, 60.0, 2);
        let mut oneway = way.clone();
        oneway.oneway = true;

        let mut edge = Edge::new(0, 0, 0, &way);
        let plain_node = Node::new(OsmNode::new(1, 0.0, 0.0), 0, NO_EDGE, GraphId::default());

        // No signals anywhere
        assert!(!edge_has_signal(&edge, &way, &plain_node, true));

        // Signal at the node applies when traversing toward it
        let mut signal_node = plain_node.clone();
        signal_node.node.traffic_signal = true;
        assert!(edge_has_signal(&edge, &way, &signal_node, false));
        assert!(!edge_has_signal(&edge, &way, &signal_node, true));

        // Directional shape-point signal
        edge.traffic_signal = true;
        edge.forward_signal = true;
        assert!(edge_has_signal(&edge, &way, &plain_node, true));
        assert!(!edge_has_signal(&edge, &way, &plain_node, false));

        // Undirected shape-point signal counts for oneways only
        edge.forward_signal = false;
        assert!(!edge_has_signal(&edge, &way, &plain_node, true));
        assert!(edge_has_signal(&edge, &oneway, &plain_node, true));
    }
}
