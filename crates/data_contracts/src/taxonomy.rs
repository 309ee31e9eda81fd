//! Taxonomy graph consumed by hierarchical datasets.
//!
//! The graph is built elsewhere; this module only models the per-split
//! subgraphs and answers "which leaves belong to this split".

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use crate::{ContractError, Split};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomyNode {
    /// Stable concept identifier (e.g. a WordNet id).
    pub id: String,
    #[serde(default)]
    pub words: String,
    #[serde(default)]
    pub children: Vec<String>,
}

/// The part of the concept DAG owned by one split.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomySubgraph {
    pub nodes: Vec<TaxonomyNode>,
}

impl TaxonomySubgraph {
    /// Leaf ids (nodes without children), sorted.
    pub fn leaves(&self) -> Vec<String> {
        let mut leaves: Vec<String> = self
            .nodes
            .iter()
            .filter(|n| n.children.is_empty())
            .map(|n| n.id.clone())
            .collect();
        leaves.sort();
        leaves.dedup();
        leaves
    }

    pub fn words(&self, id: &str) -> Option<&str> {
        self.nodes
            .iter()
            .find(|n| n.id == id)
            .map(|n| n.words.as_str())
            .filter(|w| !w.is_empty())
    }

    /// Every child reference must resolve to a node of the same subgraph.
    pub fn validate(&self, split: Split) -> Result<(), ContractError> {
        let ids: BTreeSet<&str> = self.nodes.iter().map(|n| n.id.as_str()).collect();
        if ids.len() != self.nodes.len() {
            return Err(ContractError::Taxonomy(format!(
                "{split} subgraph has duplicate node ids"
            )));
        }
        for node in &self.nodes {
            if let Some(missing) = node.children.iter().find(|c| !ids.contains(c.as_str())) {
                return Err(ContractError::Taxonomy(format!(
                    "{split} node {} references unknown child {missing}",
                    node.id
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomyGraph {
    pub split_subgraphs: BTreeMap<Split, TaxonomySubgraph>,
}

impl TaxonomyGraph {
    pub fn subgraph(&self, split: Split) -> Option<&TaxonomySubgraph> {
        self.split_subgraphs.get(&split)
    }

    pub fn leaves(&self, split: Split) -> Vec<String> {
        self.subgraph(split)
            .map(TaxonomySubgraph::leaves)
            .unwrap_or_default()
    }

    /// Each subgraph must be well formed and no leaf may be shared by two splits.
    pub fn validate(&self) -> Result<(), ContractError> {
        let mut seen = BTreeMap::<String, Split>::new();
        for (split, graph) in &self.split_subgraphs {
            graph.validate(*split)?;
            for leaf in graph.leaves() {
                if let Some(prev) = seen.insert(leaf.clone(), *split) {
                    return Err(ContractError::Taxonomy(format!(
                        "leaf {leaf} appears in both {prev} and {split}"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ContractError> {
        let raw = fs::read(path).map_err(|e| ContractError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let graph: TaxonomyGraph =
            serde_json::from_slice(&raw).map_err(|e| ContractError::Json {
                path: path.to_path_buf(),
                source: e,
            })?;
        graph.validate()?;
        Ok(graph)
    }
}
