///! Build configuration tree
///!
///! Loaded from a JSON file:
///! {
///!   "hierarchy": [ {"level": 2, "size": 0.25, "name": "local"} ],
///!   "concurrency": 4,
///!   "reclassify_max_expansions": 512,
///!   "not_thru_max_expansions": 256
///! }

use anyhow::{ensure, Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::graph_id::{TileHierarchy, TileLevel};

fn default_reclassify_cap() -> u32 {
    512
}

fn default_not_thru_cap() -> u32 {
    256
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub hierarchy: Vec<TileLevel>,

    /// Tile build worker count; defaults to hardware concurrency, floor 1
    #[serde(default)]
    pub concurrency: Option<usize>,

    /// Expansion cap for the link reclassifier BFS
    #[serde(default = "default_reclassify_cap")]
    pub reclassify_max_expansions: u32,

    /// Expansion cap for the not-thru BFS
    #[serde(default = "default_not_thru_cap")]
    pub not_thru_max_expansions: u32,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.hierarchy.is_empty(), "Config has an empty hierarchy");
        ensure!(
            self.reclassify_max_expansions > 0 && self.not_thru_max_expansions > 0,
            "Expansion caps must be positive"
        );
        Ok(())
    }

    /// Worker count for the tile build stage
    pub fn worker_count(&self) -> usize {
        match self.concurrency {
            Some(0) | None => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            Some(n) => n,
        }
        .max(1)
    }

    pub fn tile_hierarchy(&self) -> Result<TileHierarchy> {
        TileHierarchy::new(self.hierarchy.clone())
    }
}
