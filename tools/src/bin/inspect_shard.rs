use anyhow::Context;
use clap::{Parser, Subcommand};
use data_contracts::{DatasetSpecification, Split};
use shard_dataset::read_shard;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "inspect_shard", about = "Inspect shards and dataset specifications")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the label, sample count and checksum of one shard.
    Shard {
        path: PathBuf,
        /// Also list the payload size of every record.
        #[arg(long, default_value_t = false)]
        records: bool,
    },
    /// Validate a dataset specification and summarize it.
    Spec {
        path: PathBuf,
        /// Open every shard and compare its sample count with the specification.
        #[arg(long, default_value_t = false)]
        check_shards: bool,
        /// Print the specification as JSON instead of a summary.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    match Args::parse().command {
        Command::Shard { path, records } => {
            let shard = read_shard(&path).with_context(|| format!("reading {}", path.display()))?;
            println!("shard: {}", path.display());
            println!("label: {}", shard.label);
            println!("samples: {}", shard.len());
            println!("sha256: {}", shard.checksum_sha256);
            if records {
                for (i, image) in shard.images.iter().enumerate() {
                    println!("  [{i}] label={} bytes={}", shard.labels[i], image.len());
                }
            }
        }
        Command::Spec {
            path,
            check_shards,
            json,
        } => {
            let spec = DatasetSpecification::load(&path)
                .with_context(|| format!("loading specification {}", path.display()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&spec)?);
            } else {
                println!("dataset: {} ({} layout)", spec.name, spec.layout.kind());
                println!("base path: {}", spec.base_path);
                for split in Split::ALL {
                    let range = spec.class_id_range(split);
                    let images: usize = range
                        .clone()
                        .filter_map(|id| spec.images_per_class.get(&id))
                        .sum();
                    println!(
                        "  {split}: classes {}..{} ({} classes, {images} images)",
                        range.start,
                        range.end,
                        range.len()
                    );
                }
            }
            if check_shards {
                let mut mismatches = 0usize;
                for (class_id, expected) in &spec.images_per_class {
                    let shard_path = spec.shard_path(*class_id)?;
                    let shard = read_shard(&shard_path)
                        .with_context(|| format!("reading {}", shard_path.display()))?;
                    if shard.len() != *expected || shard.label != *class_id {
                        eprintln!(
                            "class {class_id}: shard has {} samples labelled {}, specification says {expected}",
                            shard.len(),
                            shard.label
                        );
                        mismatches += 1;
                    }
                }
                if mismatches > 0 {
                    anyhow::bail!("{mismatches} shards disagree with the specification");
                }
                println!("all {} shards match", spec.images_per_class.len());
            }
        }
    }
    Ok(())
}
