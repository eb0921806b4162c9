///! Binary file formats for the build inputs and the finished tiles

pub mod crc;
pub mod names;
pub mod restriction;
pub mod tile;
pub mod way;
pub mod way_node;

pub use names::{NameData, StringTable};
pub use restriction::{Restriction, RestrictionType};
pub use tile::{DirectedEdge, EdgeInfo, NodeInfo, Tile, TileWriter};
pub use way::{RoadClass, Use, Way};
pub use way_node::{OsmNode, WayNode};
