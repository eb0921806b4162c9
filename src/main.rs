use anyhow::Result;
use butterfly_tiler::cli::{run, Cli};
use clap::Parser;

fn main() -> Result<()> {
    env_logger::init();
    run(Cli::parse())
}
