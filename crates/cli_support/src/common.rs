use clap::Args;
use std::path::{Path, PathBuf};

/// Output locations shared by the conversion tools. Unset roots fall back to
/// the tools config.
#[derive(Debug, Clone, Default, Args)]
pub struct RecordsOutputArgs {
    /// Directory receiving one `<dataset>/` folder of shards per dataset.
    #[arg(long)]
    pub records_root: Option<PathBuf>,
    /// Directory holding `<dataset>_splits.json` split files.
    #[arg(long)]
    pub splits_root: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct RecordsOutputOpts {
    pub records_root: PathBuf,
    pub splits_root: PathBuf,
}

impl RecordsOutputOpts {
    pub fn new(records_root: PathBuf, splits_root: PathBuf) -> Self {
        Self {
            records_root,
            splits_root,
        }
    }

    /// Flags win over the configured defaults.
    pub fn resolve(args: &RecordsOutputArgs, records_root: &Path, splits_root: &Path) -> Self {
        Self::new(
            args.records_root
                .clone()
                .unwrap_or_else(|| records_root.to_path_buf()),
            args.splits_root
                .clone()
                .unwrap_or_else(|| splits_root.to_path_buf()),
        )
    }

    pub fn records_path(&self, dataset: &str) -> PathBuf {
        self.records_root.join(dataset)
    }
}

/// Split and scheduling knobs shared by the conversion tools.
#[derive(Debug, Clone, Args)]
pub struct ConversionArgs {
    /// Seed for randomized split policies (defaults to the configured seed).
    #[arg(long)]
    pub seed: Option<u64>,
    /// Recompute splits even when a split file already exists.
    #[arg(long, default_value_t = false)]
    pub force_splits: bool,
    /// Number of classes converted in parallel.
    #[arg(long, default_value_t = 1)]
    pub jobs: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct ConversionOpts {
    pub seed: Option<u64>,
    pub force_splits: bool,
    pub jobs: usize,
}

impl From<&ConversionArgs> for ConversionOpts {
    fn from(args: &ConversionArgs) -> Self {
        ConversionOpts {
            seed: args.seed,
            force_splits: args.force_splits,
            jobs: args.jobs.max(1),
        }
    }
}
