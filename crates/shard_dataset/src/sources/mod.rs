//! Per-dataset extraction strategies.
//!
//! A source answers two questions: which native classes go to which split,
//! and which raw examples make up a class. Everything else (id allocation,
//! shard writing, specification assembly) is shared by the converter.

pub mod alphabet;
pub mod array_file;
pub mod coco;
pub mod image_folder;
pub mod image_list;
pub mod json_images;
pub mod registry;
pub mod taxonomy;

use data_contracts::{NativeClassId, Split, SplitAssignment, TaxonomySubgraph};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::splits::{SplitAssigner, SplitCounts, SplitPolicy};
use crate::types::{ClassExamples, ConvertError, DatasetResult, RawExample};

/// Shape of the specification a source produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLayout {
    Flat,
    /// Each class reports its superclass through `ClassExamples::superclass`.
    BiLevel,
    Hierarchical(BTreeMap<Split, TaxonomySubgraph>),
}

pub trait DatasetSource: Send + Sync {
    fn name(&self) -> &str;

    fn layout(&self) -> SourceLayout {
        SourceLayout::Flat
    }

    /// Structural sources derive their splits every run instead of caching them.
    fn uses_split_cache(&self) -> bool {
        true
    }

    /// Native class ids per split, in the order classes should receive ids.
    fn create_splits(&self, assigner: &SplitAssigner) -> DatasetResult<SplitAssignment>;

    /// Raw examples of one class, in shard order.
    fn class_examples(&self, class: &NativeClassId) -> DatasetResult<ClassExamples>;
}

/// Split policy as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum SplitSpec {
    /// Random stratified draw with explicit counts.
    Counts {
        train: usize,
        valid: usize,
        test: usize,
    },
    /// Random stratified draw with cumulative ratios.
    Ratios { train: f64, trainval: f64 },
    Permuted {
        train: usize,
        valid: usize,
        test: usize,
    },
    Contiguous {
        train: usize,
        valid: usize,
        test: usize,
    },
    AllTest,
    /// A split file (same format as the split cache) naming every class.
    Table { path: PathBuf },
}

impl Default for SplitSpec {
    fn default() -> Self {
        SplitSpec::Ratios {
            train: 0.70,
            trainval: 0.85,
        }
    }
}

impl SplitSpec {
    /// Class count implied by an explicit-count policy.
    pub fn total(&self) -> Option<usize> {
        match self {
            SplitSpec::Counts { train, valid, test }
            | SplitSpec::Permuted { train, valid, test }
            | SplitSpec::Contiguous { train, valid, test } => Some(train + valid + test),
            _ => None,
        }
    }

    pub fn policy(&self, universe: usize) -> DatasetResult<SplitPolicy> {
        Ok(match self {
            SplitSpec::Counts { train, valid, test } => {
                SplitPolicy::Random(SplitCounts::new(*train, *valid, *test))
            }
            SplitSpec::Ratios { train, trainval } => {
                SplitPolicy::Random(SplitCounts::from_ratios(universe, *train, *trainval)?)
            }
            SplitSpec::Permuted { train, valid, test } => {
                SplitPolicy::Permuted(SplitCounts::new(*train, *valid, *test))
            }
            SplitSpec::Contiguous { train, valid, test } => {
                SplitPolicy::Contiguous(SplitCounts::new(*train, *valid, *test))
            }
            SplitSpec::AllTest => SplitPolicy::AllTest,
            SplitSpec::Table { path } => SplitPolicy::External(SplitAssignment::load(path)?),
        })
    }
}

pub(crate) fn require_dir(path: &Path) -> DatasetResult<()> {
    if !path.is_dir() {
        return Err(ConvertError::Config(format!(
            "directory {} does not exist",
            path.display()
        )));
    }
    Ok(())
}

pub(crate) fn require_file(path: &Path) -> DatasetResult<()> {
    if !path.is_file() {
        return Err(ConvertError::Config(format!(
            "file {} does not exist",
            path.display()
        )));
    }
    Ok(())
}

/// Sorted names of the subdirectories (`dirs = true`) or files of `dir`.
pub(crate) fn list_entries(dir: &Path, dirs: bool) -> DatasetResult<Vec<String>> {
    require_dir(dir)?;
    let io_err = |e| ConvertError::Io {
        path: dir.to_path_buf(),
        source: e,
    };
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let is_dir = entry.path().is_dir();
        if is_dir == dirs {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Sorted files of a class directory, minus `skip`. Subdirectories are ignored.
pub(crate) fn directory_examples(
    dir: &Path,
    skip: &BTreeSet<String>,
) -> DatasetResult<Vec<RawExample>> {
    let mut examples = Vec::new();
    for name in list_entries(dir, false)? {
        if skip.contains(&name) {
            debug!("skipping file {}", dir.join(&name).display());
            continue;
        }
        examples.push(RawExample::file(dir.join(name)));
    }
    Ok(examples)
}

/// File names listed in a duplicates file. Lines look like
/// `class/file.JPEG  # original name`; `#` lines are comments.
pub(crate) fn read_skip_list(path: &Path) -> DatasetResult<BTreeSet<String>> {
    let raw = fs::read_to_string(path).map_err(|e| ConvertError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(parse_skip_list(&raw))
}

fn parse_skip_list(raw: &str) -> BTreeSet<String> {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| {
            let entry = l.split('#').next().unwrap_or_default().trim();
            Path::new(entry)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
        })
        .collect()
}

pub(crate) fn class_name_of(class: &NativeClassId) -> DatasetResult<&str> {
    class.as_name().ok_or_else(|| {
        ConvertError::Consistency(format!("expected a class name, got index {class}"))
    })
}

pub(crate) fn class_index_of(class: &NativeClassId) -> DatasetResult<u64> {
    class.as_index().ok_or_else(|| {
        ConvertError::Consistency(format!("expected a class index, got name {class}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_list_keeps_basenames_and_drops_comments() {
        let raw = "# header\n\nn01/n01_1.JPEG  # a.jpg\n  n02/n02_7.JPEG\n";
        let set = parse_skip_list(raw);
        assert_eq!(
            set.into_iter().collect::<Vec<_>>(),
            vec!["n01_1.JPEG".to_string(), "n02_7.JPEG".to_string()]
        );
    }

    #[test]
    fn entries_split_files_and_dirs() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("b")).unwrap();
        fs::create_dir(dir.path().join("a")).unwrap();
        fs::write(dir.path().join("z.txt"), b"").unwrap();
        fs::write(dir.path().join(".directory"), b"").unwrap();
        assert_eq!(list_entries(dir.path(), true).unwrap(), vec!["a", "b"]);
        let skip: BTreeSet<String> = [".directory".to_string()].into_iter().collect();
        let files = directory_examples(dir.path(), &skip).unwrap();
        assert_eq!(files, vec![RawExample::file(dir.path().join("z.txt"))]);
    }

    #[test]
    fn missing_directory_is_config_error() {
        let err = list_entries(Path::new("/definitely/not/here"), true).unwrap_err();
        assert!(matches!(err, ConvertError::Config(_)));
    }

    #[test]
    fn default_split_spec_is_seventy_fifteen_fifteen() {
        match SplitSpec::default().policy(100).unwrap() {
            SplitPolicy::Random(c) => assert_eq!(c, SplitCounts::new(70, 15, 15)),
            other => panic!("unexpected policy {other:?}"),
        }
    }
}
