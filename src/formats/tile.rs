///! <level>/<tileid>.gph format - one finished graph tile
///!
///! Format (little-endian):
///!
///! Header (40 bytes):
///!   magic:            u32 = 0x54485047  // "GPHT"
///!   version:          u16 = 1
///!   reserved:         u16 = 0
///!   graph_id:         u64  // tile base id
///!   node_count:       u32
///!   directed_edges:   u32
///!   sign_count:       u32
///!   reserved2:        u32
///!   edge_info_size:   u64
///!
///! Body:
///!   node records      (24 bytes each)
///!   directed edges    (28 bytes each)
///!   edge info blob    (variable; see EdgeInfo)
///!   sign records      (variable: edge index u32, type u8, len u16, utf8)
///!
///! Footer (16 bytes):
///!   body_crc64:  u64
///!   file_crc64:  u64

use anyhow::{bail, ensure, Context, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use super::crc;
use crate::formats::way::{RoadClass, Use};
use crate::graph_id::GraphId;
use crate::signs::{Sign, SignType};

const MAGIC: u32 = 0x5448_5047; // "GPHT"
const VERSION: u16 = 1;
const HEADER_SIZE: usize = 40;
const NODE_RECORD_SIZE: usize = 24;
const EDGE_RECORD_SIZE: usize = 28;

/// Fixed-point coordinate scale, 1e-7 degrees
const COORD_SCALE: f64 = 1e7;

/// Summary record for one graph node in a tile
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub lat: f64,
    pub lng: f64,
    /// Offset of the node's first directed edge in this tile
    pub edge_index: u32,
    pub edge_count: u16,
    pub driveable_count: u16,
    pub best_class: RoadClass,
    pub access_mask: u8,
    pub node_type: u8,
    /// Only one edge touches this node
    pub end: bool,
    pub traffic_signal: bool,
}

const NODE_FLAG_END: u8 = 1 << 0;
const NODE_FLAG_SIGNAL: u8 = 1 << 1;

impl NodeInfo {
    fn encode(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&((self.lat * COORD_SCALE).round() as i32).to_le_bytes());
        buf[4..8].copy_from_slice(&((self.lng * COORD_SCALE).round() as i32).to_le_bytes());
        buf[8..12].copy_from_slice(&self.edge_index.to_le_bytes());
        buf[12..14].copy_from_slice(&self.edge_count.to_le_bytes());
        buf[14..16].copy_from_slice(&self.driveable_count.to_le_bytes());
        buf[16] = self.best_class as u8;
        buf[17] = self.access_mask;
        buf[18] = self.node_type;
        let mut flags = 0u8;
        if self.end {
            flags |= NODE_FLAG_END;
        }
        if self.traffic_signal {
            flags |= NODE_FLAG_SIGNAL;
        }
        buf[19] = flags;
        buf[20..24].copy_from_slice(&[0u8; 4]);
    }

    fn decode(buf: &[u8]) -> Self {
        let flags = buf[19];
        NodeInfo {
            lat: i32::from_le_bytes(buf[0..4].try_into().unwrap()) as f64 / COORD_SCALE,
            lng: i32::from_le_bytes(buf[4..8].try_into().unwrap()) as f64 / COORD_SCALE,
            edge_index: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            edge_count: u16::from_le_bytes(buf[12..14].try_into().unwrap()),
            driveable_count: u16::from_le_bytes(buf[14..16].try_into().unwrap()),
            best_class: RoadClass::from_u8(buf[16]),
            access_mask: buf[17],
            node_type: buf[18],
            end: flags & NODE_FLAG_END != 0,
            traffic_signal: flags & NODE_FLAG_SIGNAL != 0,
        }
    }
}

/// One directed traversal of a graph edge
#[derive(Debug, Clone)]
pub struct DirectedEdge {
    pub target: GraphId,
    pub edge_info_offset: u32,
    /// Meters, rounded half-up
    pub length: u32,
    /// Turn restriction mask over the target node's edges, bundle order
    pub restrictions: u32,
    /// km/h
    pub speed: u8,
    pub classification: RoadClass,
    pub edge_use: Use,
    /// Position among the source node's directed edges
    pub local_index: u8,
    pub forward: bool,
    pub not_thru: bool,
    pub internal: bool,
    pub has_signal: bool,
    pub exit_sign: bool,
    pub forward_access: bool,
    pub reverse_access: bool,
}

const EDGE_FLAG_FORWARD: u16 = 1 << 0;
const EDGE_FLAG_NOT_THRU: u16 = 1 << 1;
const EDGE_FLAG_INTERNAL: u16 = 1 << 2;
const EDGE_FLAG_SIGNAL: u16 = 1 << 3;
const EDGE_FLAG_EXIT_SIGN: u16 = 1 << 4;
const EDGE_FLAG_FORWARD_ACCESS: u16 = 1 << 5;
const EDGE_FLAG_REVERSE_ACCESS: u16 = 1 << 6;

impl DirectedEdge {
    fn encode(&self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.target.value().to_le_bytes());
        buf[8..12].copy_from_slice(&self.edge_info_offset.to_le_bytes());
        buf[12..16].copy_from_slice(&self.length.to_le_bytes());
        buf[16..20].copy_from_slice(&self.restrictions.to_le_bytes());
        buf[20] = self.speed;
        buf[21] = self.classification as u8;
        buf[22] = self.edge_use as u8;
        buf[23] = self.local_index;
        let mut flags = 0u16;
        for (set, bit) in [
            (self.forward, EDGE_FLAG_FORWARD),
            (self.not_thru, EDGE_FLAG_NOT_THRU),
            (self.internal, EDGE_FLAG_INTERNAL),
            (self.has_signal, EDGE_FLAG_SIGNAL),
            (self.exit_sign, EDGE_FLAG_EXIT_SIGN),
            (self.forward_access, EDGE_FLAG_FORWARD_ACCESS),
            (self.reverse_access, EDGE_FLAG_REVERSE_ACCESS),
        ] {
            if set {
                flags |= bit;
            }
        }
        buf[24..26].copy_from_slice(&flags.to_le_bytes());
        buf[26..28].copy_from_slice(&[0u8; 2]);
    }

    fn decode(buf: &[u8]) -> Self {
        let flags = u16::from_le_bytes(buf[24..26].try_into().unwrap());
        DirectedEdge {
            target: GraphId::from_value(u64::from_le_bytes(buf[0..8].try_into().unwrap())),
            edge_info_offset: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            length: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
            restrictions: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
            speed: buf[20],
            classification: RoadClass::from_u8(buf[21]),
            edge_use: Use::from_u8(buf[22]),
            local_index: buf[23],
            forward: flags & EDGE_FLAG_FORWARD != 0,
            not_thru: flags & EDGE_FLAG_NOT_THRU != 0,
            internal: flags & EDGE_FLAG_INTERNAL != 0,
            has_signal: flags & EDGE_FLAG_SIGNAL != 0,
            exit_sign: flags & EDGE_FLAG_EXIT_SIGN != 0,
            forward_access: flags & EDGE_FLAG_FORWARD_ACCESS != 0,
            reverse_access: flags & EDGE_FLAG_REVERSE_ACCESS != 0,
        }
    }
}

/// Shared geometry and names for both traversals of an edge
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeInfo {
    pub way_id: u64,
    pub shape: Vec<(f64, f64)>,
    pub names: Vec<String>,
}

/// Accumulates one tile and writes it to disk
pub struct TileWriter {
    graph_id: GraphId,
    nodes: Vec<NodeInfo>,
    directed_edges: Vec<DirectedEdge>,
    edge_info: Vec<u8>,
    edge_info_offsets: HashMap<usize, u32>,
    signs: Vec<(u32, Sign)>,
}

impl TileWriter {
    pub fn new(graph_id: GraphId) -> Self {
        TileWriter {
            graph_id: graph_id.tile_base(),
            nodes: Vec::new(),
            directed_edges: Vec::new(),
            edge_info: Vec::new(),
            edge_info_offsets: HashMap::new(),
            signs: Vec::new(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn directed_edge_count(&self) -> usize {
        self.directed_edges.len()
    }

    /// Append a node summary and its outbound directed edges
    pub fn add_node_and_directed_edges(
        &mut self,
        node: NodeInfo,
        directed_edges: Vec<DirectedEdge>,
    ) {
        self.nodes.push(node);
        self.directed_edges.extend(directed_edges);
    }

    /// Intern geometry and names for an edge, keyed by its position in the
    /// edge sequence so both traversals share one entry. Returns the offset.
    pub fn add_edge_info(
        &mut self,
        edge_index: usize,
        way_id: u64,
        shape: &[(f64, f64)],
        names: &[String],
    ) -> u32 {
        if let Some(offset) = self.edge_info_offsets.get(&edge_index) {
            return *offset;
        }
        let offset = self.edge_info.len() as u32;
        self.edge_info.extend_from_slice(&way_id.to_le_bytes());
        self.edge_info
            .extend_from_slice(&(shape.len() as u16).to_le_bytes());
        self.edge_info
            .extend_from_slice(&(names.len() as u16).to_le_bytes());
        for (lat, lng) in shape {
            self.edge_info
                .extend_from_slice(&((lat * COORD_SCALE).round() as i32).to_le_bytes());
            self.edge_info
                .extend_from_slice(&((lng * COORD_SCALE).round() as i32).to_le_bytes());
        }
        for name in names {
            self.edge_info
                .extend_from_slice(&(name.len() as u16).to_le_bytes());
            self.edge_info.extend_from_slice(name.as_bytes());
        }
        self.edge_info_offsets.insert(edge_index, offset);
        offset
    }

    /// Attach exit signs to a directed edge (by tile-local edge index)
    pub fn add_signs(&mut self, directed_edge_index: u32, signs: &[Sign]) {
        for sign in signs {
            self.signs.push((directed_edge_index, sign.clone()));
        }
    }

    /// Serialize and write `<outdir>/<level>/<tileid>.gph`
    pub fn store(&self, outdir: &Path) -> Result<PathBuf> {
        let dir = outdir.join(self.graph_id.level().to_string());
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create tile directory {}", dir.display()))?;
        let path = dir.join(format!("{}.gph", self.graph_id.tile()));

        let mut header = Vec::with_capacity(HEADER_SIZE);
        header.extend_from_slice(&MAGIC.to_le_bytes());
        header.extend_from_slice(&VERSION.to_le_bytes());
        header.extend_from_slice(&0u16.to_le_bytes());
        header.extend_from_slice(&self.graph_id.value().to_le_bytes());
        header.extend_from_slice(&(self.nodes.len() as u32).to_le_bytes());
        header.extend_from_slice(&(self.directed_edges.len() as u32).to_le_bytes());
        header.extend_from_slice(&(self.signs.len() as u32).to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes());
        header.extend_from_slice(&(self.edge_info.len() as u64).to_le_bytes());
        debug_assert_eq!(header.len(), HEADER_SIZE);

        let mut body = Vec::new();
        let mut record = [0u8; NODE_RECORD_SIZE];
        for node in &self.nodes {
            node.encode(&mut record);
            body.extend_from_slice(&record);
        }
        let mut record = [0u8; EDGE_RECORD_SIZE];
        for edge in &self.directed_edges {
            edge.encode(&mut record);
            body.extend_from_slice(&record);
        }
        body.extend_from_slice(&self.edge_info);
        for (edge_index, sign) in &self.signs {
            body.extend_from_slice(&edge_index.to_le_bytes());
            body.push(sign.sign_type as u8);
            body.extend_from_slice(&(sign.text.len() as u16).to_le_bytes());
            body.extend_from_slice(sign.text.as_bytes());
        }

        let body_crc = crc::checksum(&body);
        let mut file_digest = crc::Digest::new();
        file_digest.update(&header);
        file_digest.update(&body);
        let file_crc = file_digest.finalize();

        let file = File::create(&path)
            .with_context(|| format!("Failed to create tile {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&header)?;
        writer.write_all(&body)?;
        writer.write_all(&body_crc.to_le_bytes())?;
        writer.write_all(&file_crc.to_le_bytes())?;
        writer.flush()?;
        Ok(path)
    }
}

/// A tile read back from disk
#[derive(Debug)]
pub struct Tile {
    pub graph_id: GraphId,
    pub nodes: Vec<NodeInfo>,
    pub directed_edges: Vec<DirectedEdge>,
    edge_info: Vec<u8>,
    pub signs: Vec<(u32, Sign)>,
}

impl Tile {
    /// Read and fully decode a tile, verifying checksums
    pub fn read(path: &Path) -> Result<Tile> {
        let mut file = File::open(path)
            .with_context(|| format!("Failed to open tile {}", path.display()))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        ensure!(bytes.len() >= HEADER_SIZE + 16, "Tile file too short");

        let content_end = bytes.len() - 16;
        let stored_file_crc = u64::from_le_bytes(bytes[content_end + 8..].try_into()?);
        if crc::checksum(&bytes[..content_end]) != stored_file_crc {
            bail!("Tile file CRC mismatch in {}", path.display());
        }

        let magic = u32::from_le_bytes(bytes[0..4].try_into()?);
        if magic != MAGIC {
            bail!("Invalid tile magic: {:08x}", magic);
        }
        let version = u16::from_le_bytes(bytes[4..6].try_into()?);
        if version != VERSION {
            bail!("Unsupported tile version: {}", version);
        }
        let graph_id = GraphId::from_value(u64::from_le_bytes(bytes[8..16].try_into()?));
        let node_count = u32::from_le_bytes(bytes[16..20].try_into()?) as usize;
        let edge_count = u32::from_le_bytes(bytes[20..24].try_into()?) as usize;
        let sign_count = u32::from_le_bytes(bytes[24..28].try_into()?) as usize;
        let edge_info_size = u64::from_le_bytes(bytes[32..40].try_into()?) as usize;

        let mut pos = HEADER_SIZE;
        let mut nodes = Vec::with_capacity(node_count);
        for _ in 0..node_count {
            ensure!(pos + NODE_RECORD_SIZE <= content_end, "Tile truncated");
            nodes.push(NodeInfo::decode(&bytes[pos..pos + NODE_RECORD_SIZE]));
            pos += NODE_RECORD_SIZE;
        }
        let mut directed_edges = Vec::with_capacity(edge_count);
        for _ in 0..edge_count {
            ensure!(pos + EDGE_RECORD_SIZE <= content_end, "Tile truncated");
            directed_edges.push(DirectedEdge::decode(&bytes[pos..pos + EDGE_RECORD_SIZE]));
            pos += EDGE_RECORD_SIZE;
        }
        ensure!(pos + edge_info_size <= content_end, "Tile truncated");
        let edge_info = bytes[pos..pos + edge_info_size].to_vec();
        pos += edge_info_size;

        let mut signs = Vec::with_capacity(sign_count);
        for _ in 0..sign_count {
            ensure!(pos + 7 <= content_end, "Tile truncated");
            let edge_index = u32::from_le_bytes(bytes[pos..pos + 4].try_into()?);
            let sign_type = SignType::from_u8(bytes[pos + 4]);
            let len = u16::from_le_bytes(bytes[pos + 5..pos + 7].try_into()?) as usize;
            pos += 7;
            ensure!(pos + len <= content_end, "Tile truncated");
            let text = std::str::from_utf8(&bytes[pos..pos + len])?.to_string();
            pos += len;
            signs.push((edge_index, Sign { sign_type, text }));
        }

        Ok(Tile {
            graph_id,
            nodes,
            directed_edges,
            edge_info,
            signs,
        })
    }

    /// Decode the edge info entry at `offset`
    pub fn edge_info_at(&self, offset: u32) -> Result<EdgeInfo> {
        let buf = &self.edge_info;
        let mut pos = offset as usize;
        ensure!(pos + 12 <= buf.len(), "Edge info offset out of range");
        let way_id = u64::from_le_bytes(buf[pos..pos + 8].try_into()?);
        let shape_count = u16::from_le_bytes(buf[pos + 8..pos + 10].try_into()?) as usize;
        let name_count = u16::from_le_bytes(buf[pos + 10..pos + 12].try_into()?) as usize;
        pos += 12;

        let mut shape = Vec::with_capacity(shape_count);
        for _ in 0..shape_count {
            ensure!(pos + 8 <= buf.len(), "Edge info truncated");
            let lat = i32::from_le_bytes(buf[pos..pos + 4].try_into()?) as f64 / COORD_SCALE;
            let lng = i32::from_le_bytes(buf[pos + 4..pos + 8].try_into()?) as f64 / COORD_SCALE;
            shape.push((lat, lng));
            pos += 8;
        }
        let mut names = Vec::with_capacity(name_count);
        for _ in 0..name_count {
            ensure!(pos + 2 <= buf.len(), "Edge info truncated");
            let len = u16::from_le_bytes(buf[pos..pos + 2].try_into()?) as usize;
            pos += 2;
            ensure!(pos + len <= buf.len(), "Edge info truncated");
            names.push(std::str::from_utf8(&buf[pos..pos + len])?.to_string());
            pos += len;
        }
        Ok(EdgeInfo {
            way_id,
            shape,
            names,
        })
    }
}

/// Check a tile file's magic, version, and checksums
pub fn verify(path: &Path) -> Result<()> {
    let tile = Tile::read(path)?;
    println!(
        "  ✓ {} verified (tile {}, {} nodes, {} directed edges, {} signs)",
        path.display(),
        tile.graph_id,
        tile.nodes.len(),
        tile.directed_edges.len(),
        tile.signs.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_node() -> NodeInfo {
        NodeInfo {
            lat: 40.25,
            lng: -76.5,
            edge_index: 0,
            edge_count: 2,
            driveable_count: 2,
            best_class: RoadClass::Primary,
            access_mask: 1,
            node_type: 0,
            end: false,
            traffic_signal: true,
        }
    }

    fn sample_edge(target: GraphId, offset: u32) -> DirectedEdge {
        DirectedEdge {
            target,
            edge_info_offset: offset,
            length: 120,
            restrictions: 0b110,
            speed: 60,
            classification: RoadClass::Primary,
            edge_use: Use::Road,
            local_index: 0,
            forward: true,
            not_thru: false,
            internal: false,
            has_signal: true,
            exit_sign: false,
            forward_access: true,
            reverse_access: true,
        }
    }

    #[test]
    fn test_store_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let tile_id = GraphId::new(2, 814_000, 0);
        let mut writer = TileWriter::new(tile_id);

        let shape = vec![(40.25, -76.5), (40.26, -76.49)];
        let names = vec!["Main Street".to_string()];
        let offset = writer.add_edge_info(5, 999, &shape, &names);
        // Second traversal of the same edge shares the entry
        assert_eq!(writer.add_edge_info(5, 999, &shape, &names), offset);

        let edge = sample_edge(tile_id.with_id(1), offset);
        writer.add_node_and_directed_edges(sample_node(), vec![edge]);
        writer.add_signs(0, &[Sign::new(SignType::ExitToward, "Harrisburg")]);

        let path = writer.store(dir.path()).unwrap();
        assert!(path.ends_with("2/814000.gph"));
        verify(&path).unwrap();

        let tile = Tile::read(&path).unwrap();
        assert_eq!(tile.graph_id, tile_id.tile_base());
        assert_eq!(tile.nodes.len(), 1);
        assert_eq!(tile.directed_edges.len(), 1);
        assert!(tile.nodes[0].traffic_signal);
        assert_eq!(tile.nodes[0].edge_count, 2);
        assert!((tile.nodes[0].lat - 40.25).abs() < 1e-6);

        let de = &tile.directed_edges[0];
        assert_eq!(de.target, tile_id.with_id(1));
        assert_eq!(de.restrictions, 0b110);
        assert!(de.forward && de.has_signal && !de.not_thru);

        let info = tile.edge_info_at(de.edge_info_offset).unwrap();
        assert_eq!(info.way_id, 999);
        assert_eq!(info.names, names);
        assert_eq!(info.shape.len(), 2);
        assert!((info.shape[1].0 - 40.26).abs() < 1e-6);

        assert_eq!(tile.signs.len(), 1);
        assert_eq!(tile.signs[0].0, 0);
        assert_eq!(tile.signs[0].1.text, "Harrisburg");
    }

    #[test]
    fn test_corrupt_tile_rejected() {
        let dir = TempDir::new().unwrap();
        let mut writer = TileWriter::new(GraphId::new(2, 7, 0));
        writer.add_node_and_directed_edges(sample_node(), vec![]);
        let path = writer.store(dir.path()).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let len = bytes.len();
        bytes[len / 2] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();
        assert!(Tile::read(&path).is_err());
    }
}
