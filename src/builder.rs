///! Pipeline driver: construct -> sort -> reclassify -> build tiles

use anyhow::Result;
use std::path::Path;

use crate::config::Config;
use crate::formats::way::Way;
use crate::formats::way_node::WayNode;
use crate::construct::construct_edges;
use crate::osmdata::OsmData;
use crate::reclassify::reclassify_links;
use crate::sequence::Sequence;
use crate::sort::sort_graph;
use crate::stats::DataQuality;
use crate::tiles::{build_local_tiles, TileBuildConfig};

/// Run the whole graph build. Intermediate nodes.bin / edges.bin land in
/// `outdir` next to the tiles.
pub fn build(config: &Config, osmdata: &OsmData, outdir: &Path) -> Result<DataQuality> {
    std::fs::create_dir_all(outdir)?;
    let nodes_path = outdir.join("nodes.bin");
    let edges_path = outdir.join("edges.bin");

    let hierarchy = config.tile_hierarchy()?;
    let level = hierarchy.local_level().level;

    // Make the edges and nodes in the graph
    {
        let ways = Sequence::<Way>::open_read_only(&osmdata.ways_path)?;
        let way_nodes = Sequence::<WayNode>::open_read_only(&osmdata.way_nodes_path)?;
        construct_edges(&ways, &way_nodes, &nodes_path, &edges_path, |node| {
            hierarchy.graph_id(node.lat, node.lng, level)
        })?;
    }

    // Line up the nodes and re-point the edges at them
    let tiles = sort_graph(&nodes_path, &edges_path)?;

    // Reclassify links. This must run before tile building since it updates
    // the edge sequence in place.
    let mut stats = DataQuality::new();
    {
        let ways = Sequence::<Way>::open_read_only(&osmdata.ways_path)?;
        reclassify_links(
            &ways,
            &nodes_path,
            &edges_path,
            &mut stats,
            config.reclassify_max_expansions,
        )?;
    }

    // Form the connected graph tiles from the nodes and edges
    let tile_config = TileBuildConfig {
        nodes_path: &nodes_path,
        edges_path: &edges_path,
        outdir,
        worker_count: config.worker_count(),
        not_thru_max_expansions: config.not_thru_max_expansions,
    };
    build_local_tiles(&tile_config, osmdata, &tiles, &mut stats)?;

    stats.log_issues();
    stats.log_statistics();
    Ok(stats)
}
