///! Graph identifiers and the tile hierarchy
///!
///! A `GraphId` packs (level, tile id, tile-local id) into a u64:
///!   bits  0..3   hierarchy level
///!   bits  3..25  tile id (row-major over a world-spanning grid)
///!   bits 25..46  tile-local node id
///!
///! Ordering is (level, tile, id). Tile-local ids are assigned by the node
///! sorter; before that pass they are zero and only (level, tile) is
///! meaningful for comparison.

use anyhow::{ensure, Result};
use serde::Deserialize;

const LEVEL_BITS: u64 = 3;
const TILE_BITS: u64 = 22;
const ID_BITS: u64 = 21;

const LEVEL_MASK: u64 = (1 << LEVEL_BITS) - 1;
const TILE_MASK: u64 = (1 << TILE_BITS) - 1;
const ID_MASK: u64 = (1 << ID_BITS) - 1;

/// Packed identifier of a node (or tile, with id == 0) in the tiled graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct GraphId(u64);

impl GraphId {
    pub fn new(level: u8, tile: u32, id: u32) -> Self {
        debug_assert!(u64::from(level) <= LEVEL_MASK);
        debug_assert!(u64::from(tile) <= TILE_MASK);
        debug_assert!(u64::from(id) <= ID_MASK);
        GraphId(
            u64::from(level) | (u64::from(tile) << LEVEL_BITS) | (u64::from(id) << (LEVEL_BITS + TILE_BITS)),
        )
    }

    pub fn from_value(value: u64) -> Self {
        GraphId(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }

    pub fn level(self) -> u8 {
        (self.0 & LEVEL_MASK) as u8
    }

    pub fn tile(self) -> u32 {
        ((self.0 >> LEVEL_BITS) & TILE_MASK) as u32
    }

    pub fn id(self) -> u32 {
        ((self.0 >> (LEVEL_BITS + TILE_BITS)) & ID_MASK) as u32
    }

    /// The same tile with the local id zeroed
    pub fn tile_base(self) -> GraphId {
        GraphId(self.0 & (LEVEL_MASK | (TILE_MASK << LEVEL_BITS)))
    }

    pub fn with_id(self, id: u32) -> GraphId {
        debug_assert!(u64::from(id) <= ID_MASK);
        GraphId(self.tile_base().0 | (u64::from(id) << (LEVEL_BITS + TILE_BITS)))
    }
}

impl Ord for GraphId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.level(), self.tile(), self.id()).cmp(&(other.level(), other.tile(), other.id()))
    }
}

impl PartialOrd for GraphId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for GraphId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.level(), self.tile(), self.id())
    }
}

/// One level of the tile hierarchy: square tiles of `size` degrees
#[derive(Debug, Clone, Deserialize)]
pub struct TileLevel {
    pub level: u8,
    pub size: f64,
    #[serde(default)]
    pub name: String,
}

/// World-spanning tile grids, one per hierarchy level
#[derive(Debug, Clone)]
pub struct TileHierarchy {
    levels: Vec<TileLevel>,
}

impl TileHierarchy {
    pub fn new(mut levels: Vec<TileLevel>) -> Result<Self> {
        ensure!(!levels.is_empty(), "Tile hierarchy has no levels");
        levels.sort_by_key(|l| l.level);
        for l in &levels {
            ensure!(
                l.size > 0.0 && 360.0 % l.size == 0.0,
                "Tile size {} does not evenly divide 360 degrees",
                l.size
            );
            let cols = (360.0 / l.size) as u64;
            let rows = (180.0 / l.size).ceil() as u64;
            ensure!(
                cols * rows <= TILE_MASK + 1,
                "Tile size {} produces more tiles than a GraphId can address",
                l.size
            );
        }
        Ok(TileHierarchy { levels })
    }

    pub fn levels(&self) -> &[TileLevel] {
        &self.levels
    }

    /// The most detailed level; the local graph is built here
    pub fn local_level(&self) -> &TileLevel {
        self.levels.last().unwrap()
    }

    fn level_config(&self, level: u8) -> &TileLevel {
        self.levels
            .iter()
            .find(|l| l.level == level)
            .unwrap_or_else(|| self.local_level())
    }

    /// Tile id containing (lat, lng) at the given level
    pub fn tile_id(&self, lat: f64, lng: f64, level: u8) -> u32 {
        let size = self.level_config(level).size;
        let ncols = (360.0 / size) as u32;
        let nrows = (180.0 / size).ceil() as u32;
        let col = (((lng + 180.0) / size) as u32).min(ncols - 1);
        let row = (((lat + 90.0) / size) as u32).min(nrows - 1);
        row * ncols + col
    }

    /// GraphId (tile base) of the node at (lat, lng) on the given level
    pub fn graph_id(&self, lat: f64, lng: f64, level: u8) -> GraphId {
        GraphId::new(level, self.tile_id(lat, lng, level), 0)
    }
}
