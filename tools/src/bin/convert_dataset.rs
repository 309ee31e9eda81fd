use anyhow::Context;
use clap::Parser;
use cli_support::common::{ConversionArgs, ConversionOpts, RecordsOutputArgs, RecordsOutputOpts};
use data_contracts::Split;
use shard_dataset::{build_source, CanonicalFormat, ConvertOptions, DatasetConverter, SplitCache};
use shard_tools::ToolConfig;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "convert_dataset",
    about = "Convert configured datasets into per-class shards + dataset specification"
)]
struct Args {
    /// Dataset to convert (a `[datasets.<name>]` table of the tools config); repeatable.
    #[arg(long, required_unless_present = "all")]
    dataset: Vec<String>,
    /// Convert every configured dataset.
    #[arg(long, default_value_t = false)]
    all: bool,
    #[command(flatten)]
    output: RecordsOutputArgs,
    #[command(flatten)]
    conversion: ConversionArgs,
    /// Canonical image format for shard payloads.
    #[arg(long, value_parser = ["jpeg", "png"])]
    format: Option<String>,
    /// Only resolve (and cache) the splits; write no shards.
    #[arg(long, default_value_t = false)]
    splits_only: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();
    let cfg = ToolConfig::load();
    let output = RecordsOutputOpts::resolve(&args.output, &cfg.records_root, &cfg.splits_root);
    let conversion = ConversionOpts::from(&args.conversion);
    let format = match args.format.as_deref() {
        Some("png") => CanonicalFormat::Png,
        Some(_) => CanonicalFormat::Jpeg,
        None => cfg.format,
    };

    let names: Vec<String> = if args.all {
        cfg.datasets.keys().cloned().collect()
    } else {
        args.dataset.clone()
    };
    if names.is_empty() {
        anyhow::bail!("no datasets configured; add [datasets.<name>] tables to the tools config");
    }

    for name in &names {
        let Some(source_cfg) = cfg.dataset(name) else {
            anyhow::bail!("dataset {name} is not configured");
        };
        let started = Instant::now();
        let source = build_source(name, source_cfg)
            .with_context(|| format!("preparing {} source {name}", source_cfg.kind()))?;
        let options = ConvertOptions::new(&output.records_root, &output.splits_root, name)
            .with_seed(conversion.seed.unwrap_or(cfg.seed))
            .with_force_splits(conversion.force_splits)
            .with_format(format)
            .with_jobs(conversion.jobs);
        let records_path = output.records_path(name);
        let converter = DatasetConverter::new(source.as_ref(), options);

        if args.splits_only {
            let resolved = converter
                .resolve_splits()
                .with_context(|| format!("resolving splits for {name}"))?;
            for split in Split::ALL {
                println!("{name} {split}: {} classes", resolved.splits().get(split).len());
            }
            if source.uses_split_cache() {
                let cache = SplitCache::for_dataset(&output.splits_root, name);
                println!("split file: {}", cache.path().display());
            }
            continue;
        }

        let spec = converter
            .convert()
            .with_context(|| format!("converting {name} into {}", records_path.display()))?;
        let counts = spec.classes_per_split();
        info!(
            "{name}: {} classes ({} train / {} valid / {} test), {} images in {:.1}s",
            spec.num_classes(),
            counts[&Split::Train],
            counts[&Split::Valid],
            counts[&Split::Test],
            spec.total_images(),
            started.elapsed().as_secs_f32()
        );
    }
    Ok(())
}
