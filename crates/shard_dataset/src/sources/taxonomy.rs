//! Hierarchical layout: one directory per taxonomy leaf, with the
//! train/valid/test subgraphs read from a pre-built graph file.

use data_contracts::{NativeClassId, Split, SplitAssignment, TaxonomyGraph};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::info;

use super::{
    class_name_of, directory_examples, list_entries, read_skip_list, DatasetSource, SourceLayout,
};
use crate::splits::{SplitAssigner, SplitPolicy};
use crate::types::{ClassExamples, ConvertError, DatasetResult};

fn default_taxonomy_file() -> PathBuf {
    PathBuf::from("taxonomy.json")
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyConfig {
    pub data_root: PathBuf,
    /// Relative to `data_root` unless absolute.
    #[serde(default = "default_taxonomy_file")]
    pub taxonomy_file: PathBuf,
    #[serde(default)]
    pub duplicates_files: Vec<PathBuf>,
    #[serde(default = "default_true")]
    pub skip_on_error: bool,
}

impl TaxonomyConfig {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            taxonomy_file: default_taxonomy_file(),
            duplicates_files: Vec::new(),
            skip_on_error: true,
        }
    }
}

pub struct TaxonomySource {
    name: String,
    config: TaxonomyConfig,
    graph: TaxonomyGraph,
    duplicates: BTreeSet<String>,
}

impl TaxonomySource {
    pub fn new(name: &str, config: TaxonomyConfig) -> DatasetResult<Self> {
        let graph = TaxonomyGraph::load(&config.data_root.join(&config.taxonomy_file))?;
        let on_disk: BTreeSet<String> = list_entries(&config.data_root, true)?.into_iter().collect();
        let leaves: BTreeSet<String> = Split::ALL
            .into_iter()
            .flat_map(|split| graph.leaves(split))
            .collect();
        if on_disk != leaves {
            let missing = leaves.difference(&on_disk).count();
            let extra = on_disk.difference(&leaves).count();
            return Err(ConvertError::Consistency(format!(
                "{name}: taxonomy has {} leaves, {missing} without a directory and {extra} directories outside the graph",
                leaves.len()
            )));
        }
        let mut duplicates = BTreeSet::new();
        for path in &config.duplicates_files {
            duplicates.extend(read_skip_list(&config.data_root.join(path))?);
        }
        info!(
            "{name}: {} leaves, {} duplicate files skipped",
            leaves.len(),
            duplicates.len()
        );
        Ok(Self {
            name: name.to_string(),
            config,
            graph,
            duplicates,
        })
    }

    pub fn graph(&self) -> &TaxonomyGraph {
        &self.graph
    }
}

impl DatasetSource for TaxonomySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn layout(&self) -> SourceLayout {
        SourceLayout::Hierarchical(self.graph.split_subgraphs.clone())
    }

    fn uses_split_cache(&self) -> bool {
        false
    }

    fn create_splits(&self, assigner: &SplitAssigner) -> DatasetResult<SplitAssignment> {
        let ids = |split| {
            self.graph
                .leaves(split)
                .into_iter()
                .map(NativeClassId::from)
                .collect::<Vec<_>>()
        };
        let fixed = SplitAssignment::new(ids(Split::Train), ids(Split::Valid), ids(Split::Test));
        let universe: Vec<NativeClassId> = fixed.iter().map(|(_, id)| id.clone()).collect();
        assigner.assign(&universe, &SplitPolicy::Fixed(fixed))
    }

    fn class_examples(&self, class: &NativeClassId) -> DatasetResult<ClassExamples> {
        let leaf = class_name_of(class)?;
        let examples = directory_examples(&self.config.data_root.join(leaf), &self.duplicates)?;
        let mut out = ClassExamples::new(leaf, examples);
        out.skip_on_error = self.config.skip_on_error;
        Ok(out)
    }
}
