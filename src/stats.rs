///! Data-quality accounting for the build pipeline
///!
///! Issues found while building are not fatal; they are counted here, merged
///! across tile workers, and reported at the end of the run.

use log::warn;

/// Size of the directed-edges-per-node histogram; the last bucket collects
/// everything at or above it
pub const HISTOGRAM_BUCKETS: usize = 16;

#[derive(Debug, Clone, Default)]
pub struct DataQuality {
    pub not_thru_count: u64,
    pub internal_count: u64,
    pub turn_channel_count: u64,
    pub culdesac_count: u64,
    pub simple_restrictions: u64,
    pub timed_restrictions: u64,
    /// Way ids of link edges that never reached two non-link connections
    pub unconnected_links: Vec<u64>,
    /// node_histogram[n] counts nodes with n directed edges
    pub node_histogram: [u64; HISTOGRAM_BUCKETS],
}

impl DataQuality {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_unconnected_link(&mut self, way_id: u64) {
        self.unconnected_links.push(way_id);
    }

    pub fn record_node_edges(&mut self, count: usize) {
        self.node_histogram[count.min(HISTOGRAM_BUCKETS - 1)] += 1;
    }

    /// Fold another accumulator (typically from a tile worker) into this one
    pub fn merge(&mut self, other: &DataQuality) {
        self.not_thru_count += other.not_thru_count;
        self.internal_count += other.internal_count;
        self.turn_channel_count += other.turn_channel_count;
        self.culdesac_count += other.culdesac_count;
        self.simple_restrictions += other.simple_restrictions;
        self.timed_restrictions += other.timed_restrictions;
        self.unconnected_links
            .extend_from_slice(&other.unconnected_links);
        for (mine, theirs) in self
            .node_histogram
            .iter_mut()
            .zip(other.node_histogram.iter())
        {
            *mine += *theirs;
        }
    }

    pub fn log_issues(&self) {
        for way_id in &self.unconnected_links {
            warn!("Unconnected link edge, way id {}", way_id);
        }
    }

    pub fn log_statistics(&self) {
        println!("📊 Build statistics:");
        println!("  Not-thru edges:        {}", self.not_thru_count);
        println!("  Internal edges:        {}", self.internal_count);
        println!("  Turn channels:         {}", self.turn_channel_count);
        println!("  Cul-de-sacs:           {}", self.culdesac_count);
        println!("  Simple restrictions:   {}", self.simple_restrictions);
        println!("  Timed restrictions:    {}", self.timed_restrictions);
        println!("  Unconnected links:     {}", self.unconnected_links.len());
        println!("  Directed edges per node:");
        for (n, count) in self.node_histogram.iter().enumerate() {
            if *count > 0 {
                let label = if n == HISTOGRAM_BUCKETS - 1 {
                    format!("{}+", n)
                } else {
                    n.to_string()
                };
                println!("    {:>3}: {}", label, count);
            }
        }
    }
}
