//! Shared data contracts for split files, dataset specifications, and taxonomies.

pub mod spec;
pub mod split;
pub mod taxonomy;

pub use spec::{
    fill_pattern, ClassRecord, DatasetSpecification, SpecLayout, DEFAULT_FILE_PATTERN,
    SPEC_FILE_NAME, TRAIN_TEST_FILE_PATTERN,
};
pub use split::{NativeClassId, Split, SplitAssignment};
pub use taxonomy::{TaxonomyGraph, TaxonomyNode, TaxonomySubgraph};

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContractError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unknown split {0:?}")]
    UnknownSplit(String),
    #[error("class {class} assigned twice (second time in {split})")]
    DuplicateClass { class: String, split: Split },
    #[error("file pattern {pattern:?} takes {expected} argument(s), got {got}")]
    FilePattern {
        pattern: String,
        expected: usize,
        got: usize,
    },
    #[error("taxonomy: {0}")]
    Taxonomy(String),
    #[error("inconsistent specification: {0}")]
    Inconsistent(String),
}

/// Writes pretty JSON next to `path` and renames it into place.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), ContractError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    if !parent.as_os_str().is_empty() && !parent.exists() {
        fs::create_dir_all(parent).map_err(|e| ContractError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    let data = serde_json::to_vec_pretty(value).map_err(|e| ContractError::Json {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, data).map_err(|e| ContractError::Io {
        path: tmp.clone(),
        source: e,
    })?;
    fs::rename(&tmp, path).map_err(|e| ContractError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}
