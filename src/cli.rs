///! CLI commands for butterfly-tiler

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::builder;
use crate::config::Config;
use crate::formats::tile;
use crate::osmdata::OsmData;

#[derive(Parser)]
#[command(name = "butterfly-tiler")]
#[command(about = "Compiles OSM road network artifacts into routable graph tiles", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build graph tiles from parser artifacts
    Build {
        /// Build configuration (hierarchy, concurrency, expansion caps)
        #[arg(short, long)]
        config: PathBuf,

        /// Path to ways.bin
        #[arg(long)]
        ways: PathBuf,

        /// Path to way_nodes.bin
        #[arg(long)]
        way_nodes: PathBuf,

        /// Path to restrictions.bin
        #[arg(long)]
        restrictions: PathBuf,

        /// Path to names.bin
        #[arg(long)]
        names: PathBuf,

        /// Output directory for tiles (and intermediate files)
        #[arg(short, long)]
        outdir: PathBuf,
    },

    /// Verify a tile file's structure and checksums
    VerifyTile {
        /// Path to a .gph tile file
        tile: PathBuf,
    },
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Build {
            config,
            ways,
            way_nodes,
            restrictions,
            names,
            outdir,
        } => {
            let config = Config::from_file(&config)?;
            let osmdata = OsmData::load(&ways, &way_nodes, &restrictions, &names)?;
            builder::build(&config, &osmdata, &outdir)?;
            println!("✅ Graph build complete");
            Ok(())
        }
        Commands::VerifyTile { tile } => tile::verify(&tile),
    }
}
