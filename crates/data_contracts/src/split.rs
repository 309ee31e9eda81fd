use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::ContractError;

/// Benchmark-level partition of classes.
///
/// The derived ordering `Train < Valid < Test` decides class-ID ranges and
/// must not be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Valid,
    Test,
}

impl Split {
    pub const ALL: [Split; 3] = [Split::Train, Split::Valid, Split::Test];

    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Valid => "valid",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Split {
    type Err = ContractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "train" => Ok(Split::Train),
            "valid" | "val" | "validation" => Ok(Split::Valid),
            "test" => Ok(Split::Test),
            other => Err(ContractError::UnknownSplit(other.to_string())),
        }
    }
}

/// Identifier of a class in the source dataset's own id-space.
///
/// Serialized untagged so split files hold plain JSON strings or integers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NativeClassId {
    Index(u64),
    Name(String),
}

impl NativeClassId {
    pub fn as_index(&self) -> Option<u64> {
        match self {
            NativeClassId::Index(i) => Some(*i),
            NativeClassId::Name(_) => None,
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            NativeClassId::Name(n) => Some(n),
            NativeClassId::Index(_) => None,
        }
    }
}

impl fmt::Display for NativeClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeClassId::Index(i) => write!(f, "{i}"),
            NativeClassId::Name(n) => f.write_str(n),
        }
    }
}

impl From<u64> for NativeClassId {
    fn from(v: u64) -> Self {
        NativeClassId::Index(v)
    }
}

impl From<usize> for NativeClassId {
    fn from(v: usize) -> Self {
        NativeClassId::Index(v as u64)
    }
}

impl From<&str> for NativeClassId {
    fn from(v: &str) -> Self {
        NativeClassId::Name(v.to_string())
    }
}

impl From<String> for NativeClassId {
    fn from(v: String) -> Self {
        NativeClassId::Name(v)
    }
}

/// Train/valid/test partition of native class ids; also the split cache file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SplitAssignment {
    pub train: Vec<NativeClassId>,
    pub valid: Vec<NativeClassId>,
    pub test: Vec<NativeClassId>,
}

impl SplitAssignment {
    pub fn new(
        train: Vec<NativeClassId>,
        valid: Vec<NativeClassId>,
        test: Vec<NativeClassId>,
    ) -> Self {
        Self { train, valid, test }
    }

    pub fn get(&self, split: Split) -> &[NativeClassId] {
        match split {
            Split::Train => &self.train,
            Split::Valid => &self.valid,
            Split::Test => &self.test,
        }
    }

    pub fn len(&self) -> usize {
        self.train.len() + self.valid.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Classes in allocation order: every train class, then valid, then test.
    pub fn iter(&self) -> impl Iterator<Item = (Split, &NativeClassId)> + '_ {
        Split::ALL
            .into_iter()
            .flat_map(move |split| self.get(split).iter().map(move |id| (split, id)))
    }

    /// A native id may appear at most once across all three lists.
    pub fn validate(&self) -> Result<(), ContractError> {
        let mut seen = BTreeSet::new();
        for (split, id) in self.iter() {
            if !seen.insert(id) {
                return Err(ContractError::DuplicateClass {
                    class: id.to_string(),
                    split,
                });
            }
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ContractError> {
        let raw = fs::read(path).map_err(|e| ContractError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let splits: SplitAssignment =
            serde_json::from_slice(&raw).map_err(|e| ContractError::Json {
                path: path.to_path_buf(),
                source: e,
            })?;
        splits.validate()?;
        Ok(splits)
    }

    pub fn save(&self, path: &Path) -> Result<(), ContractError> {
        crate::write_json_atomic(path, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_order_is_train_valid_test() {
        assert!(Split::Train < Split::Valid);
        assert!(Split::Valid < Split::Test);
        assert_eq!(Split::ALL.to_vec(), {
            let mut v = vec![Split::Test, Split::Train, Split::Valid];
            v.sort();
            v
        });
    }

    #[test]
    fn split_parses_aliases() {
        assert_eq!("val".parse::<Split>().unwrap(), Split::Valid);
        assert_eq!("TRAIN".parse::<Split>().unwrap(), Split::Train);
        assert!("holdout".parse::<Split>().is_err());
    }

    #[test]
    fn native_ids_roundtrip_untagged() {
        let splits = SplitAssignment::new(
            vec![NativeClassId::from("airplane")],
            vec![NativeClassId::from(3u64)],
            vec![],
        );
        let json = serde_json::to_string(&splits).unwrap();
        assert_eq!(json, r#"{"train":["airplane"],"valid":[3],"test":[]}"#);
        let back: SplitAssignment = serde_json::from_str(&json).unwrap();
        assert_eq!(back, splits);
    }

    #[test]
    fn iter_follows_split_order() {
        let splits = SplitAssignment::new(
            vec![2u64.into(), 0u64.into()],
            vec![1u64.into()],
            vec![3u64.into()],
        );
        let order: Vec<_> = splits.iter().map(|(s, id)| (s, id.clone())).collect();
        assert_eq!(
            order,
            vec![
                (Split::Train, 2u64.into()),
                (Split::Train, 0u64.into()),
                (Split::Valid, 1u64.into()),
                (Split::Test, 3u64.into()),
            ]
        );
    }

    #[test]
    fn duplicate_across_splits_rejected() {
        let splits = SplitAssignment::new(vec!["a".into()], vec![], vec!["a".into()]);
        let err = splits.validate().unwrap_err();
        assert!(matches!(
            err,
            ContractError::DuplicateClass {
                split: Split::Test,
                ..
            }
        ));
    }

    #[test]
    fn unknown_keys_rejected() {
        let raw = r#"{"train":[],"valid":[],"test":[],"extra":[]}"#;
        assert!(serde_json::from_str::<SplitAssignment>(raw).is_err());
    }
}
