///! Way-node records - one vertex along a way, from the upstream parser
///!
///! Fixed 32-byte records stored in a raw `Sequence` file (way_nodes.bin),
///! ordered way by way. The embedded `OsmNode` primitive is also carried by
///! the core graph `Node` records.

use crate::sequence::Record;

const FLAG_INTERSECTION: u16 = 1 << 0;
const FLAG_TRAFFIC_SIGNAL: u16 = 1 << 1;
const FLAG_FORWARD_SIGNAL: u16 = 1 << 2;
const FLAG_BACKWARD_SIGNAL: u16 = 1 << 3;
const FLAG_HAS_REF: u16 = 1 << 4;
const FLAG_HAS_NAME: u16 = 1 << 5;
const FLAG_HAS_EXIT_TO: u16 = 1 << 6;
const FLAG_LINK_EDGE: u16 = 1 << 7;
const FLAG_NON_LINK_EDGE: u16 = 1 << 8;

/// The raw map node primitive embedded in way-nodes and graph nodes
#[derive(Debug, Clone, Default)]
pub struct OsmNode {
    pub osmid: u64,
    pub lat: f64,
    pub lng: f64,
    pub intersection: bool,
    pub traffic_signal: bool,
    pub forward_signal: bool,
    pub backward_signal: bool,
    pub has_ref: bool,
    pub has_name: bool,
    pub has_exit_to: bool,
    /// Accumulated by the edge constructor and node sorter
    pub link_edge: bool,
    pub non_link_edge: bool,
    pub access_mask: u8,
    pub node_type: u8,
}

impl OsmNode {
    pub const SIZE: usize = 28;

    pub fn new(osmid: u64, lat: f64, lng: f64) -> Self {
        OsmNode {
            osmid,
            lat,
            lng,
            ..Default::default()
        }
    }

    pub fn encode(&self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.osmid.to_le_bytes());
        buf[8..16].copy_from_slice(&self.lat.to_le_bytes());
        buf[16..24].copy_from_slice(&self.lng.to_le_bytes());
        let mut flags = 0u16;
        for (set, bit) in [
            (self.intersection, FLAG_INTERSECTION),
            (self.traffic_signal, FLAG_TRAFFIC_SIGNAL),
            (self.forward_signal, FLAG_FORWARD_SIGNAL),
            (self.backward_signal, FLAG_BACKWARD_SIGNAL),
            (self.has_ref, FLAG_HAS_REF),
            (self.has_name, FLAG_HAS_NAME),
            (self.has_exit_to, FLAG_HAS_EXIT_TO),
            (self.link_edge, FLAG_LINK_EDGE),
            (self.non_link_edge, FLAG_NON_LINK_EDGE),
        ] {
            if set {
                flags |= bit;
            }
        }
        buf[24..26].copy_from_slice(&flags.to_le_bytes());
        buf[26] = self.access_mask;
        buf[27] = self.node_type;
    }

    pub fn decode(buf: &[u8]) -> Self {
        let flags = u16::from_le_bytes(buf[24..26].try_into().unwrap());
        OsmNode {
            osmid: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            lat: f64::from_le_bytes(buf[8..16].try_into().unwrap()),
            lng: f64::from_le_bytes(buf[16..24].try_into().unwrap()),
            intersection: flags & FLAG_INTERSECTION != 0,
            traffic_signal: flags & FLAG_TRAFFIC_SIGNAL != 0,
            forward_signal: flags & FLAG_FORWARD_SIGNAL != 0,
            backward_signal: flags & FLAG_BACKWARD_SIGNAL != 0,
            has_ref: flags & FLAG_HAS_REF != 0,
            has_name: flags & FLAG_HAS_NAME != 0,
            has_exit_to: flags & FLAG_HAS_EXIT_TO != 0,
            link_edge: flags & FLAG_LINK_EDGE != 0,
            non_link_edge: flags & FLAG_NON_LINK_EDGE != 0,
            access_mask: buf[26],
            node_type: buf[27],
        }
    }
}

/// One vertex along a way
#[derive(Debug, Clone, Default)]
pub struct WayNode {
    pub node: OsmNode,
    /// Index of the owning way in the way sequence
    pub way_index: u32,
}

impl WayNode {
    pub fn new(node: OsmNode, way_index: u32) -> Self {
        WayNode { node, way_index }
    }
}

impl Record for WayNode {
    const SIZE: usize = OsmNode::SIZE + 4;

    fn write_bytes(&self, buf: &mut [u8]) {
        self.node.encode(&mut buf[0..OsmNode::SIZE]);
        buf[OsmNode::SIZE..].copy_from_slice(&self.way_index.to_le_bytes());
    }

    fn read_bytes(buf: &[u8]) -> Self {
        WayNode {
            node: OsmNode::decode(&buf[0..OsmNode::SIZE]),
            way_index: u32::from_le_bytes(buf[OsmNode::SIZE..].try_into().unwrap()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_way_node_round_trip() {
        let mut node = OsmNode::new(42, 40.21, -76.75);
        node.intersection = true;
        node.traffic_signal = true;
        node.backward_signal = true;
        node.has_exit_to = true;
        node.access_mask = 0x3;

        let mut buf = [0u8; WayNode::SIZE];
        WayNode::new(node, 7).write_bytes(&mut buf);
        let decoded = WayNode::read_bytes(&buf);
        assert_eq!(decoded.way_index, 7);
        assert_eq!(decoded.node.osmid, 42);
        assert_eq!(decoded.node.lat, 40.21);
        assert_eq!(decoded.node.lng, -76.75);
        assert!(decoded.node.intersection);
        assert!(decoded.node.traffic_signal && decoded.node.backward_signal);
        assert!(!decoded.node.forward_signal);
        assert!(decoded.node.has_exit_to && !decoded.node.has_name);
        assert_eq!(decoded.node.access_mask, 0x3);
    }
}
