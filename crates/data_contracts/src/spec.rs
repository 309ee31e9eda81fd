//! Dataset specification: the persisted summary of a finished conversion.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::taxonomy::TaxonomySubgraph;
use crate::{ContractError, Split};

/// One shard per class, named by class id.
pub const DEFAULT_FILE_PATTERN: &str = "{}.shard";
/// Two-argument variant used by datasets with train/test-specific shards.
pub const TRAIN_TEST_FILE_PATTERN: &str = "{}_{}.shard";
pub const SPEC_FILE_NAME: &str = "dataset_spec.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassRecord {
    pub class_id: u32,
    pub name: String,
    pub split: Split,
    pub image_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecLayout {
    /// Classes belong directly to a split.
    Flat {
        classes_per_split: BTreeMap<Split, usize>,
    },
    /// Superclasses belong to a split; classes belong to a superclass.
    BiLevel {
        superclasses_per_split: BTreeMap<Split, usize>,
        classes_per_superclass: BTreeMap<u32, usize>,
        superclass_names: BTreeMap<u32, String>,
    },
    /// Classes are the sorted leaves of each split's taxonomy subgraph.
    Hierarchical {
        split_subgraphs: BTreeMap<Split, TaxonomySubgraph>,
    },
}

impl SpecLayout {
    pub fn kind(&self) -> &'static str {
        match self {
            SpecLayout::Flat { .. } => "flat",
            SpecLayout::BiLevel { .. } => "bi_level",
            SpecLayout::Hierarchical { .. } => "hierarchical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSpecification {
    pub name: String,
    /// Directory holding the shards, as a UTF-8 string.
    pub base_path: String,
    pub file_pattern: String,
    pub images_per_class: BTreeMap<u32, usize>,
    pub class_names: BTreeMap<u32, String>,
    pub layout: SpecLayout,
}

impl DatasetSpecification {
    /// Number of classes per split, derived from the layout for every variant.
    pub fn classes_per_split(&self) -> BTreeMap<Split, usize> {
        let mut out: BTreeMap<Split, usize> = Split::ALL.iter().map(|s| (*s, 0)).collect();
        match &self.layout {
            SpecLayout::Flat { classes_per_split } => {
                for (split, count) in classes_per_split {
                    out.insert(*split, *count);
                }
            }
            SpecLayout::BiLevel {
                superclasses_per_split,
                classes_per_superclass,
                ..
            } => {
                let mut superclass_id = 0u32;
                for split in Split::ALL {
                    let n = superclasses_per_split.get(&split).copied().unwrap_or(0);
                    let mut total = 0;
                    for _ in 0..n {
                        total += classes_per_superclass
                            .get(&superclass_id)
                            .copied()
                            .unwrap_or(0);
                        superclass_id += 1;
                    }
                    out.insert(split, total);
                }
            }
            SpecLayout::Hierarchical { split_subgraphs } => {
                for (split, graph) in split_subgraphs {
                    out.insert(*split, graph.leaves().len());
                }
            }
        }
        out
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    pub fn total_images(&self) -> usize {
        self.images_per_class.values().sum()
    }

    /// Class ids owned by `split`: train ids first, then valid, then test.
    pub fn class_id_range(&self, split: Split) -> Range<u32> {
        let counts = self.classes_per_split();
        let mut start = 0u32;
        for s in Split::ALL {
            let n = counts.get(&s).copied().unwrap_or(0) as u32;
            if s == split {
                return start..start + n;
            }
            start += n;
        }
        start..start
    }

    pub fn split_of(&self, class_id: u32) -> Option<Split> {
        Split::ALL
            .into_iter()
            .find(|s| self.class_id_range(*s).contains(&class_id))
    }

    pub fn class_records(&self) -> Vec<ClassRecord> {
        self.class_names
            .iter()
            .filter_map(|(id, name)| {
                Some(ClassRecord {
                    class_id: *id,
                    name: name.clone(),
                    split: self.split_of(*id)?,
                    image_count: self.images_per_class.get(id).copied().unwrap_or(0),
                })
            })
            .collect()
    }

    pub fn shard_path(&self, class_id: u32) -> Result<PathBuf, ContractError> {
        let file = fill_pattern(&self.file_pattern, &[class_id.to_string()])?;
        Ok(Path::new(&self.base_path).join(file))
    }

    /// Checks the class-ID ordering invariant that readers rely on.
    pub fn validate(&self) -> Result<(), ContractError> {
        let counts = self.classes_per_split();
        let total: usize = counts.values().sum();
        if total != self.class_names.len() || total != self.images_per_class.len() {
            return Err(ContractError::Inconsistent(format!(
                "classes_per_split sums to {total} but class_names has {} and images_per_class has {} entries",
                self.class_names.len(),
                self.images_per_class.len()
            )));
        }
        for (expected, (a, b)) in self
            .class_names
            .keys()
            .zip(self.images_per_class.keys())
            .enumerate()
        {
            if *a as usize != expected || *b as usize != expected {
                return Err(ContractError::Inconsistent(format!(
                    "class ids are not dense over [0, {total}): found {a}/{b} at position {expected}"
                )));
            }
        }
        match &self.layout {
            SpecLayout::Flat { .. } => {}
            SpecLayout::BiLevel {
                superclasses_per_split,
                classes_per_superclass,
                superclass_names,
            } => {
                let n_super: usize = superclasses_per_split.values().sum();
                if classes_per_superclass.len() != n_super || superclass_names.len() != n_super {
                    return Err(ContractError::Inconsistent(format!(
                        "{n_super} superclasses per split but {} class counts and {} names",
                        classes_per_superclass.len(),
                        superclass_names.len()
                    )));
                }
                for (expected, id) in classes_per_superclass.keys().enumerate() {
                    if *id as usize != expected {
                        return Err(ContractError::Inconsistent(format!(
                            "superclass ids are not dense: found {id} at position {expected}"
                        )));
                    }
                }
            }
            SpecLayout::Hierarchical { split_subgraphs } => {
                for (split, graph) in split_subgraphs {
                    let range = self.class_id_range(*split);
                    let names: Vec<&str> = range
                        .filter_map(|id| self.class_names.get(&id).map(String::as_str))
                        .collect();
                    let leaves = graph.leaves();
                    if names != leaves.iter().map(String::as_str).collect::<Vec<_>>() {
                        return Err(ContractError::Inconsistent(format!(
                            "{split} class names do not match the sorted leaves of its subgraph"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<(), ContractError> {
        crate::write_json_atomic(path, self)
    }

    pub fn load(path: &Path) -> Result<Self, ContractError> {
        let raw = fs::read(path).map_err(|e| ContractError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let spec: DatasetSpecification =
            serde_json::from_slice(&raw).map_err(|e| ContractError::Json {
                path: path.to_path_buf(),
                source: e,
            })?;
        spec.validate()?;
        Ok(spec)
    }
}

/// Substitutes each `{}` placeholder of `pattern` with the next argument.
pub fn fill_pattern(pattern: &str, args: &[String]) -> Result<String, ContractError> {
    let pieces: Vec<&str> = pattern.split("{}").collect();
    if pieces.len() - 1 != args.len() {
        return Err(ContractError::FilePattern {
            pattern: pattern.to_string(),
            expected: pieces.len() - 1,
            got: args.len(),
        });
    }
    let mut out = String::with_capacity(pattern.len() + 8 * args.len());
    for (i, piece) in pieces.iter().enumerate() {
        out.push_str(piece);
        if let Some(arg) = args.get(i) {
            out.push_str(arg);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(train: usize, valid: usize, test: usize) -> DatasetSpecification {
        let n = (train + valid + test) as u32;
        DatasetSpecification {
            name: "toy".into(),
            base_path: "/records/toy".into(),
            file_pattern: DEFAULT_FILE_PATTERN.into(),
            images_per_class: (0..n).map(|i| (i, 5)).collect(),
            class_names: (0..n).map(|i| (i, format!("c{i}"))).collect(),
            layout: SpecLayout::Flat {
                classes_per_split: [
                    (Split::Train, train),
                    (Split::Valid, valid),
                    (Split::Test, test),
                ]
                .into_iter()
                .collect(),
            },
        }
    }

    #[test]
    fn ranges_follow_split_order() {
        let spec = flat(7, 2, 1);
        assert_eq!(spec.class_id_range(Split::Train), 0..7);
        assert_eq!(spec.class_id_range(Split::Valid), 7..9);
        assert_eq!(spec.class_id_range(Split::Test), 9..10);
        assert_eq!(spec.split_of(6), Some(Split::Train));
        assert_eq!(spec.split_of(7), Some(Split::Valid));
        assert_eq!(spec.split_of(9), Some(Split::Test));
        assert_eq!(spec.split_of(10), None);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn count_mismatch_rejected() {
        let mut spec = flat(3, 1, 1);
        spec.class_names.remove(&4);
        assert!(matches!(
            spec.validate(),
            Err(ContractError::Inconsistent(_))
        ));
    }

    #[test]
    fn bilevel_counts_sum_superclasses_in_order() {
        let spec = DatasetSpecification {
            name: "alpha".into(),
            base_path: ".".into(),
            file_pattern: DEFAULT_FILE_PATTERN.into(),
            images_per_class: (0..6).map(|i| (i, 1)).collect(),
            class_names: (0..6).map(|i| (i, format!("c{i}"))).collect(),
            layout: SpecLayout::BiLevel {
                superclasses_per_split: [(Split::Train, 2), (Split::Valid, 0), (Split::Test, 1)]
                    .into_iter()
                    .collect(),
                classes_per_superclass: [(0, 2), (1, 3), (2, 1)].into_iter().collect(),
                superclass_names: [(0, "a".into()), (1, "b".into()), (2, "c".into())]
                    .into_iter()
                    .collect(),
            },
        };
        let counts = spec.classes_per_split();
        assert_eq!(counts[&Split::Train], 5);
        assert_eq!(counts[&Split::Valid], 0);
        assert_eq!(counts[&Split::Test], 1);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn json_roundtrip_keeps_integer_and_split_keys() {
        let spec = flat(2, 1, 1);
        let json = serde_json::to_string(&spec).unwrap();
        assert!(json.contains(r#""train":2"#));
        let back: DatasetSpecification = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn shard_path_fills_pattern() {
        let spec = flat(1, 0, 0);
        assert_eq!(
            spec.shard_path(0).unwrap(),
            PathBuf::from("/records/toy/0.shard")
        );
        assert_eq!(
            fill_pattern(TRAIN_TEST_FILE_PATTERN, &["3".into(), "train".into()]).unwrap(),
            "3_train.shard"
        );
        assert!(fill_pattern(TRAIN_TEST_FILE_PATTERN, &["3".into()]).is_err());
    }
}
