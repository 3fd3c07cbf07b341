//! AtlasObj Inspector
//!
//! Opens a database file and prints its header, counters or memory usage,
//! or runs a collection.

use std::path::PathBuf;

use atlasobj::{Config, Engine};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

/// AtlasObj Inspector
#[derive(Parser, Debug)]
#[command(name = "atlasobj-inspect")]
#[command(about = "Inspect an AtlasObj database file")]
#[command(version)]
struct Args {
    /// Database file
    #[arg(short, long, default_value = "./atlasobj.dbs")]
    path: PathBuf,

    /// Page pool size in MB
    #[arg(long, default_value = "4")]
    pool_mb: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print both generations of the header
    Header,

    /// Print store counters
    Stats,

    /// Print reachable objects grouped by type
    Usage,

    /// Run a collection and commit the result
    Collect,
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,atlasobj=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("AtlasObj Inspector v{}", atlasobj::VERSION);
    tracing::info!("Database file: {}", args.path.display());

    let config = Config::builder()
        .path(&args.path)
        .page_pool_size(args.pool_mb * 1024 * 1024)
        .build();

    if let Err(e) = run(config, args.command) {
        tracing::error!("Inspection failed: {}", e);
        std::process::exit(1);
    }
}

fn run(config: Config, command: Commands) -> atlasobj::Result<()> {
    let engine = Engine::new(config)?;
    engine.open()?;

    match command {
        Commands::Header => {
            let header = engine.header()?;
            println!("committed generation: {}", header.curr);
            println!("dirty: {}", header.dirty);
            for (i, root) in header.root.iter().enumerate() {
                println!("generation {}:", i);
                println!("  size:            {}", root.size);
                println!("  used_size:       {}", root.used_size);
                println!("  index:           {} ({} handles)", root.index, root.index_size);
                println!("  shadow index:    {} ({} handles)", root.shadow_index, root.shadow_index_size);
                println!("  index_used:      {}", root.index_used);
                println!("  free_list:       {}", root.free_list);
                println!("  bitmap_end:      {}", root.bitmap_end);
                println!("  bitmap_extent:   {}", root.bitmap_extent);
                println!("  root_object:     {}", root.root_object);
                println!("  class_desc_list: {}", root.class_desc_list);
            }
        }
        Commands::Stats => {
            let stats = engine.stats()?;
            println!("{:#?}", stats);
        }
        Commands::Usage => {
            let usage = engine.memory_usage()?;
            println!("{:<24} {:>10} {:>14} {:>14}", "type", "instances", "total", "allocated");
            for (name, t) in &usage.types {
                println!("{:<24} {:>10} {:>14} {:>14}", name, t.instances, t.total_size, t.allocated_size);
            }
            for (name, t) in [
                ("<composites>", usage.composites),
                ("<descriptors>", usage.descriptors),
                ("<system>", usage.system),
            ] {
                println!("{:<24} {:>10} {:>14} {:>14}", name, t.instances, t.total_size, t.allocated_size);
            }
        }
        Commands::Collect => {
            let freed = engine.collect()?;
            engine.commit()?;
            println!("freed {} records", freed);
        }
    }

    engine.close()
}
