//! Butterfly-Tiler: tiled routing graph compiler
//!
//! Pipeline:
//! - Stage 1: Edge construction - ways and way-nodes become an
//!   intersection-bounded edge graph with one node record per way-end
//! - Stage 2: Node sort - nodes ordered by (tile, original id), duplicate
//!   runs collapsed onto a canonical record, edge endpoints rewired
//! - Stage 3: Link reclassification - ramps and turn channels inherit the
//!   second-best class of the roads they connect
//! - Stage 4: Tile build - parallel workers synthesize directed edges
//!   (length, speed, use, not-thru, internal, restrictions, exit signs) and
//!   write one binary tile per tile id
//!
//! Key principle: every stage reads and writes the same file-backed record
//! sequences, so the build handles datasets larger than RAM.

pub mod builder;
pub mod cli;
pub mod config;
pub mod construct;
pub mod formats;
pub mod geo;
pub mod graph;
pub mod graph_id;
pub mod osmdata;
pub mod reclassify;
pub mod sequence;
pub mod signs;
pub mod sort;
pub mod stats;
pub mod tiles;

pub use config::Config;
pub use graph_id::{GraphId, TileHierarchy, TileLevel};
pub use osmdata::OsmData;
pub use sequence::{Record, Sequence};
pub use stats::DataQuality;

/// Shared fixtures for unit tests
#[cfg(test)]
pub mod test_support {
    use std::path::Path;

    use crate::formats::way::Way;
    use crate::formats::way_node::{OsmNode, WayNode};
    use crate::sequence::Sequence;

    pub fn intersection_at(osmid: u64, lat: f64, lng: f64, way_index: u32) -> WayNode {
        let mut node = OsmNode::new(osmid, lat, lng);
        node.intersection = true;
        WayNode::new(node, way_index)
    }

    pub fn shape_point_at(osmid: u64, lat: f64, lng: f64, way_index: u32) -> WayNode {
        WayNode::new(OsmNode::new(osmid, lat, lng), way_index)
    }

    /// Write ways.bin / way_nodes.bin into `dir` and reopen them read-only
    pub fn write_sequences(
        dir: &Path,
        ways: &[Way],
        way_nodes: &[WayNode],
    ) -> (Sequence<Way>, Sequence<WayNode>) {
        let ways_path = dir.join("ways.bin");
        let way_nodes_path = dir.join("way_nodes.bin");
        let mut way_seq = Sequence::<Way>::create(&ways_path).unwrap();
        for way in ways {
            way_seq.push_back(way).unwrap();
        }
        way_seq.flush().unwrap();
        let mut way_node_seq = Sequence::<WayNode>::create(&way_nodes_path).unwrap();
        for way_node in way_nodes {
            way_node_seq.push_back(way_node).unwrap();
        }
        way_node_seq.flush().unwrap();
        (
            Sequence::<Way>::open_read_only(&ways_path).unwrap(),
            Sequence::<WayNode>::open_read_only(&way_nodes_path).unwrap(),
        )
    }
}
