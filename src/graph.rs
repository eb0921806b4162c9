///! Core graph records - nodes, edges, and node-edge bundling
///!
///! A graph `Node` exists once per (way, way-end) that terminates at an OSM
///! node, so one intersection usually owns several consecutive records after
///! sorting (a "duplicate run"). `collect_node_edges` is the only way the
///! sorted, duplicate-laden node sequence is read back as a graph.

use anyhow::Result;

use crate::formats::way::Way;
use crate::formats::way_node::OsmNode;
use crate::graph_id::GraphId;
use crate::sequence::{Record, Sequence};

/// Sentinel for "this node does not start/end an edge"
pub const NO_EDGE: u32 = u32::MAX;

/// Node within the graph
#[derive(Debug, Clone)]
pub struct Node {
    pub node: OsmNode,
    /// Edge index this node starts, or NO_EDGE
    pub start_of: u32,
    /// Edge index this node ends, or NO_EDGE
    pub end_of: u32,
    pub graph_id: GraphId,
}

impl Node {
    pub fn new(node: OsmNode, start_of: u32, end_of: u32, graph_id: GraphId) -> Self {
        Node {
            node,
            start_of,
            end_of,
            graph_id,
        }
    }

    pub fn is_start(&self) -> bool {
        self.start_of != NO_EDGE
    }

    pub fn is_end(&self) -> bool {
        self.end_of != NO_EDGE
    }
}

impl Record for Node {
    const SIZE: usize = OsmNode::SIZE + 16;

    fn write_bytes(&self, buf: &mut [u8]) {
        self.node.encode(&mut buf[0..OsmNode::SIZE]);
        let base = OsmNode::SIZE;
        buf[base..base + 4].copy_from_slice(&self.start_of.to_le_bytes());
        buf[base + 4..base + 8].copy_from_slice(&self.end_of.to_le_bytes());
        buf[base + 8..base + 16].copy_from_slice(&self.graph_id.value().to_le_bytes());
    }

    fn read_bytes(buf: &[u8]) -> Self {
        let base = OsmNode::SIZE;
        Node {
            node: OsmNode::decode(&buf[0..base]),
            start_of: u32::from_le_bytes(buf[base..base + 4].try_into().unwrap()),
            end_of: u32::from_le_bytes(buf[base + 4..base + 8].try_into().unwrap()),
            graph_id: GraphId::from_value(u64::from_le_bytes(
                buf[base + 8..base + 16].try_into().unwrap(),
            )),
        }
    }
}

/// An edge spanning between two consecutive intersections of a single way
#[derive(Debug, Clone)]
pub struct Edge {
    /// Index of the start node in the node sequence
    pub source_node: u32,
    /// Index of the end node in the node sequence
    pub target_node: u32,
    /// Index of the owning way
    pub way_index: u32,
    /// Offset of the first shape point in the way-node sequence
    pub ll_index: u32,
    /// Shape points including both endpoints
    pub llcount: u16,
    /// Road class, 0 = best; raised by the link reclassifier
    pub importance: u8,
    pub driveable_forward: bool,
    pub driveable_reverse: bool,
    pub traffic_signal: bool,
    pub forward_signal: bool,
    pub backward_signal: bool,
    pub link: bool,
}

impl Edge {
    /// Start a new edge at `source_node`. The target node and the remaining
    /// shape points are filled in as the way is walked.
    pub fn new(source_node: u32, way_index: u32, ll_index: u32, way: &Way) -> Self {
        Edge {
            source_node,
            target_node: NO_EDGE,
            way_index,
            ll_index,
            llcount: 1,
            importance: way.road_class as u8,
            driveable_forward: way.auto_forward,
            driveable_reverse: way.auto_backward,
            traffic_signal: false,
            forward_signal: false,
            backward_signal: false,
            link: way.link,
        }
    }
}

impl Record for Edge {
    const SIZE: usize = 20;

    fn write_bytes(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.source_node.to_le_bytes());
        buf[4..8].copy_from_slice(&self.target_node.to_le_bytes());
        buf[8..12].copy_from_slice(&self.way_index.to_le_bytes());
        buf[12..16].copy_from_slice(&self.ll_index.to_le_bytes());
        let mut packed = u32::from(self.llcount);
        packed |= u32::from(self.importance & 0x7) << 16;
        for (set, bit) in [
            (self.driveable_forward, 19),
            (self.driveable_reverse, 20),
            (self.traffic_signal, 21),
            (self.forward_signal, 22),
            (self.backward_signal, 23),
            (self.link, 24),
        ] {
            if set {
                packed |= 1 << bit;
            }
        }
        buf[16..20].copy_from_slice(&packed.to_le_bytes());
    }

    fn read_bytes(buf: &[u8]) -> Self {
        let packed = u32::from_le_bytes(buf[16..20].try_into().unwrap());
        Edge {
            source_node: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            target_node: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            way_index: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            ll_index: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
            llcount: (packed & 0xffff) as u16,
            importance: ((packed >> 16) & 0x7) as u8,
            driveable_forward: packed & (1 << 19) != 0,
            driveable_reverse: packed & (1 << 20) != 0,
            traffic_signal: packed & (1 << 21) != 0,
            forward_signal: packed & (1 << 22) != 0,
            backward_signal: packed & (1 << 23) != 0,
            link: packed & (1 << 24) != 0,
        }
    }
}

/// A node's duplicate run amalgamated: the canonical record, the number of
/// records consumed, and every incident edge with its position
#[derive(Debug)]
pub struct NodeBundle {
    pub node: Node,
    pub node_count: usize,
    pub edges: Vec<(Edge, usize)>,
}

/// Collect all edges that start or end at the duplicate run beginning at
/// `start`. The caller advances by `node_count` to reach the next run.
pub fn collect_node_edges(
    start: usize,
    nodes: &Sequence<Node>,
    edges: &Sequence<Edge>,
) -> Result<NodeBundle> {
    let head = nodes.get(start)?;
    let mut bundle = NodeBundle {
        node: head,
        node_count: 0,
        edges: Vec::new(),
    };

    let mut position = start;
    while position < nodes.len() {
        let duplicate = nodes.get(position)?;
        if duplicate.node.osmid != bundle.node.node.osmid {
            break;
        }
        if duplicate.is_start() {
            let index = duplicate.start_of as usize;
            bundle.edges.push((edges.get(index)?, index));
        }
        if duplicate.is_end() {
            let index = duplicate.end_of as usize;
            bundle.edges.push((edges.get(index)?, index));
        }
        position += 1;
    }
    bundle.node_count = position - start;
    Ok(bundle)
}

/// Best (numerically smallest) importance among the non-link edges of a
/// bundle, or None if every incident edge is a link
pub fn best_non_link_class(edges: &[(Edge, usize)]) -> Option<u8> {
    edges
        .iter()
        .filter(|(edge, _)| !edge.link)
        .map(|(edge, _)| edge.importance)
        .min()
}
