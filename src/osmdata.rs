///! Input artifacts produced by the upstream parser
///!
///! Bundles the paths of the two big record sequences with the in-memory
///! side tables: the restriction multimap and the name archive.

use anyhow::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::formats::names::{self, NameData};
use crate::formats::restriction::{self, Restriction};

pub struct OsmData {
    pub ways_path: PathBuf,
    pub way_nodes_path: PathBuf,
    /// Restrictions keyed by their from-way id
    pub restrictions: HashMap<u64, Vec<Restriction>>,
    pub names: NameData,
}

impl OsmData {
    pub fn load(
        ways_path: &Path,
        way_nodes_path: &Path,
        restrictions_path: &Path,
        names_path: &Path,
    ) -> Result<OsmData> {
        let restrictions = restriction::read_multimap(restrictions_path)?;
        let names = names::read(names_path)?;
        Ok(OsmData {
            ways_path: ways_path.to_path_buf(),
            way_nodes_path: way_nodes_path.to_path_buf(),
            restrictions,
            names,
        })
    }
}
