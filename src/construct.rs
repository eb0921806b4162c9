///! Stage 1: edge construction from ways and way-nodes
///!
///! Walks the way-node sequence once. Every intersection way-node (and every
///! way endpoint) becomes a graph node; interior way-nodes become shape
///! points on the current edge. A way with k interior intersections yields
///! k+1 edges, and one node record per (way, way-end) joint.

use anyhow::{ensure, Context, Result};
use log::warn;
use std::path::Path;

use crate::formats::way::Way;
use crate::formats::way_node::{OsmNode, WayNode};
use crate::graph::{Edge, Node, NO_EDGE};
use crate::graph_id::GraphId;
use crate::sequence::Sequence;

/// Construct the edge and node sequences. Returns (node count, edge count).
pub fn construct_edges<F>(
    ways: &Sequence<Way>,
    way_nodes: &Sequence<WayNode>,
    nodes_path: &Path,
    edges_path: &Path,
    graph_id_for: F,
) -> Result<(usize, usize)>
where
    F: Fn(&OsmNode) -> GraphId,
{
    println!("🛤️  Creating graph edges from ways...");

    let mut nodes = Sequence::<Node>::create(nodes_path)?;
    let mut edges = Sequence::<Edge>::create(edges_path)?;

    let mut current = 0usize;
    while current < way_nodes.len() {
        // The way and its first node
        let first = way_nodes.get(current)?;
        let way = ways
            .get(first.way_index as usize)
            .with_context(|| format!("Way node {} references missing way", current))?;
        if way.node_count < 2 {
            warn!(
                "Way {} has {} nodes, skipping",
                way.osm_way_id, way.node_count
            );
            current += (way.node_count as usize).max(1);
            continue;
        }
        let last_index = current + way.node_count as usize - 1;
        ensure!(
            last_index < way_nodes.len(),
            "Way {} runs past the way-node sequence",
            way.osm_way_id
        );

        // This edge starts here
        let mut edge = Edge::new(nodes.len() as u32, first.way_index, current as u32, &way);

        // And this node starts this edge
        let mut start_node = first.node.clone();
        start_node.link_edge |= way.link;
        start_node.non_link_edge |= !way.link;
        nodes.push_back(&Node::new(
            start_node,
            edges.len() as u32,
            NO_EDGE,
            graph_id_for(&first.node),
        ))?;

        // Walk the way-nodes until an intersection closes the edge
        loop {
            current += 1;
            let way_node = way_nodes.get(current)?;
            edge.llcount += 1;

            if way_node.node.intersection {
                edge.target_node = nodes.len() as u32;
                let end_of = edges.len() as u32;
                edges.push_back(&edge)?;

                // The joint also starts the next edge unless the way ends here
                let start_of = if current != last_index {
                    edges.len() as u32
                } else {
                    NO_EDGE
                };
                let mut end_node = way_node.node.clone();
                end_node.link_edge |= way.link;
                end_node.non_link_edge |= !way.link;
                nodes.push_back(&Node::new(
                    end_node,
                    start_of,
                    end_of,
                    graph_id_for(&way_node.node),
                ))?;

                if current != last_index {
                    edge = Edge::new(
                        (nodes.len() - 1) as u32,
                        way_node.way_index,
                        current as u32,
                        &way,
                    );
                } else {
                    current += 1;
                    break;
                }
            } else if way_node.node.traffic_signal {
                // A signal on a shape point belongs to the edge
                edge.traffic_signal = true;
                edge.forward_signal = way_node.node.forward_signal;
                edge.backward_signal = way_node.node.backward_signal;
            }
        }
    }

    nodes.flush()?;
    edges.flush()?;
    println!(
        "  ✓ {} edges and {} nodes",
        edges.len(),
        nodes.len()
    );
    Ok((nodes.len(), edges.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::way::{RoadClass, Use};
    use crate::test_support::{intersection_at, shape_point_at, write_sequences};
    use tempfile::TempDir;

    fn fixed_graph_id(node: &OsmNode) -> GraphId {
        // Everything in one tile; good enough for topology tests
        let _ = node;
        GraphId::new(2, 0, 0)
    }

    #[test]
    fn test_two_node_way_yields_one_edge_two_nodes() {
        let dir = TempDir::new().unwrap();
        let way = Way::new(1, RoadClass::Primary, Use::Road, 60.0, 2);
        let way_nodes = vec![
            intersection_at(10, 40.0, -76.0, 0),
            intersection_at(11, 40.0, -76.1, 0),
        ];
        let (ways, way_nodes) = write_sequences(dir.path(), &[way], &way_nodes);

        let nodes_path = dir.path().join("nodes.bin");
        let edges_path = dir.path().join("edges.bin");
        let (n_nodes, n_edges) =
            construct_edges(&ways, &way_nodes, &nodes_path, &edges_path, fixed_graph_id).unwrap();
        assert_eq!(n_nodes, 2);
        assert_eq!(n_edges, 1);

        let nodes = Sequence::<Node>::open_read_only(&nodes_path).unwrap();
        let edges = Sequence::<Edge>::open_read_only(&edges_path).unwrap();
        let edge = edges.get(0).unwrap();
        assert_eq!(edge.source_node, 0);
        assert_eq!(edge.target_node, 1);
        assert_eq!(edge.llcount, 2);
        let start = nodes.get(0).unwrap();
        let end = nodes.get(1).unwrap();
        assert_eq!(start.start_of, 0);
        assert!(!start.is_end());
        assert_eq!(end.end_of, 0);
        assert!(!end.is_start());
        assert!(start.node.non_link_edge && !start.node.link_edge);
    }

    #[test]
    fn test_interior_intersection_splits_way() {
        let dir = TempDir::new().unwrap();
        let way = Way::new(1, RoadClass::Secondary, Use::Road, 50.0, 4);
        let way_nodes = vec![
            intersection_at(10, 40.0, -76.0, 0),
            shape_point_at(11, 40.0, -76.05, 0),
            intersection_at(12, 40.0, -76.1, 0),
            intersection_at(13, 40.0, -76.2, 0),
        ];
        let (ways, way_nodes) = write_sequences(dir.path(), &[way], &way_nodes);

        let nodes_path = dir.path().join("nodes.bin");
        let edges_path = dir.path().join("edges.bin");
        let (n_nodes, n_edges) =
            construct_edges(&ways, &way_nodes, &nodes_path, &edges_path, fixed_graph_id).unwrap();
        // Joints: way start, interior intersection, way end
        assert_eq!(n_nodes, 3);
        assert_eq!(n_edges, 2);

        let nodes = Sequence::<Node>::open_read_only(&nodes_path).unwrap();
        let edges = Sequence::<Edge>::open_read_only(&edges_path).unwrap();
        let first = edges.get(0).unwrap();
        let second = edges.get(1).unwrap();
        // Shape point is carried on the first edge only
        assert_eq!(first.llcount, 3);
        assert_eq!(second.llcount, 2);
        assert_eq!(first.target_node, 1);
        assert_eq!(second.source_node, 1);
        // The middle joint ends edge 0 and starts edge 1
        let joint = nodes.get(1).unwrap();
        assert_eq!(joint.end_of, 0);
        assert_eq!(joint.start_of, 1);
    }

    #[test]
    fn test_shape_point_signal_marks_edge() {
        let dir = TempDir::new().unwrap();
        let way = Way::new(1, RoadClass::Primary, Use::Road, 60.0, 3);
        let mut signal = shape_point_at(11, 40.0, -76.05, 0);
        signal.node.traffic_signal = true;
        signal.node.forward_signal = true;
        let way_nodes = vec![
            intersection_at(10, 40.0, -76.0, 0),
            signal,
            intersection_at(12, 40.0, -76.1, 0),
        ];
        let (ways, way_nodes) = write_sequences(dir.path(), &[way], &way_nodes);

        let edges_path = dir.path().join("edges.bin");
        construct_edges(
            &ways,
            &way_nodes,
            &dir.path().join("nodes.bin"),
            &edges_path,
            fixed_graph_id,
        )
        .unwrap();
        let edges = Sequence::<Edge>::open_read_only(&edges_path).unwrap();
        let edge = edges.get(0).unwrap();
        assert!(edge.traffic_signal && edge.forward_signal);
        assert!(!edge.backward_signal);
    }

    #[test]
    fn test_link_way_sets_node_link_flag() {
        let dir = TempDir::new().unwrap();
        let mut way = Way::new(1, RoadClass::Primary, Use::Road, 60.0, 2);
        way.link = true;
        let way_nodes = vec![
            intersection_at(10, 40.0, -76.0, 0),
            intersection_at(11, 40.0, -76.1, 0),
        ];
        let (ways, way_nodes) = write_sequences(dir.path(), &[way], &way_nodes);

        let nodes_path = dir.path().join("nodes.bin");
        construct_edges(
            &ways,
            &way_nodes,
            &nodes_path,
            &dir.path().join("edges.bin"),
            fixed_graph_id,
        )
        .unwrap();
        let nodes = Sequence::<Node>::open_read_only(&nodes_path).unwrap();
        let start = nodes.get(0).unwrap();
        assert!(start.node.link_edge && !start.node.non_link_edge);
    }
}
