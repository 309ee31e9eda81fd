//! Two-level layout: `<set>/<alphabet>/<character>/<images>`.
//!
//! Alphabets are superclasses and characters are classes. The background set
//! feeds train (minus the listed validation alphabets) and valid; the
//! evaluation set is test.

use data_contracts::{NativeClassId, SplitAssignment};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::warn;

use super::{class_name_of, directory_examples, list_entries, DatasetSource, SourceLayout};
use crate::splits::{SplitAssigner, SplitPolicy};
use crate::types::{ClassExamples, ConvertError, DatasetResult};

fn default_background() -> String {
    "images_background".to_string()
}

fn default_evaluation() -> String {
    "images_evaluation".to_string()
}

fn default_validation_alphabets() -> Vec<String> {
    [
        "Blackfoot_(Canadian_Aboriginal_Syllabics)",
        "Ojibwe_(Canadian_Aboriginal_Syllabics)",
        "Inuktitut_(Canadian_Aboriginal_Syllabics)",
        "Tagalog",
        "Alphabet_of_the_Magi",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlphabetConfig {
    pub data_root: PathBuf,
    #[serde(default = "default_background")]
    pub background_dir: String,
    #[serde(default = "default_evaluation")]
    pub evaluation_dir: String,
    /// Background alphabets held out for validation, in id order.
    #[serde(default = "default_validation_alphabets")]
    pub validation_alphabets: Vec<String>,
    #[serde(default)]
    pub expected_background: Option<usize>,
    #[serde(default)]
    pub expected_evaluation: Option<usize>,
    /// Swap black and white (white-on-black strokes become black-on-white).
    #[serde(default = "default_true")]
    pub invert: bool,
}

impl AlphabetConfig {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            background_dir: default_background(),
            evaluation_dir: default_evaluation(),
            validation_alphabets: default_validation_alphabets(),
            expected_background: None,
            expected_evaluation: None,
            invert: true,
        }
    }
}

pub struct AlphabetSource {
    name: String,
    config: AlphabetConfig,
}

impl AlphabetSource {
    pub fn new(name: &str, config: AlphabetConfig) -> DatasetResult<Self> {
        let background = list_entries(&config.data_root.join(&config.background_dir), true)?;
        let evaluation = list_entries(&config.data_root.join(&config.evaluation_dir), true)?;
        for (set, found, expected) in [
            (&config.background_dir, background.len(), config.expected_background),
            (&config.evaluation_dir, evaluation.len(), config.expected_evaluation),
        ] {
            if let Some(expected) = expected {
                if found != expected {
                    return Err(ConvertError::Config(format!(
                        "{name}: expected {expected} alphabets in {set}, found {found}"
                    )));
                }
            }
        }
        if let Some(missing) = config
            .validation_alphabets
            .iter()
            .find(|a| !background.contains(a))
        {
            return Err(ConvertError::Config(format!(
                "{name}: validation alphabet {missing} is not in {}",
                config.background_dir
            )));
        }
        Ok(Self {
            name: name.to_string(),
            config,
        })
    }

    /// Characters of the given alphabets as `<set>/<alphabet>/<character>` ids.
    fn characters(&self, set: &str, alphabets: &[String]) -> DatasetResult<Vec<NativeClassId>> {
        let mut out = Vec::new();
        for alphabet in alphabets {
            let chars = list_entries(&self.config.data_root.join(set).join(alphabet), true)?;
            if chars.is_empty() {
                warn!("{}: alphabet {alphabet} has no characters; skipped", self.name);
                continue;
            }
            out.extend(
                chars
                    .into_iter()
                    .map(|c| NativeClassId::from(format!("{set}/{alphabet}/{c}"))),
            );
        }
        Ok(out)
    }
}

impl DatasetSource for AlphabetSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn layout(&self) -> SourceLayout {
        SourceLayout::BiLevel
    }

    fn uses_split_cache(&self) -> bool {
        false
    }

    fn create_splits(&self, assigner: &SplitAssigner) -> DatasetResult<SplitAssignment> {
        let background_root = self.config.data_root.join(&self.config.background_dir);
        let held_out: BTreeSet<&String> = self.config.validation_alphabets.iter().collect();
        let train_alphabets: Vec<String> = list_entries(&background_root, true)?
            .into_iter()
            .filter(|a| !held_out.contains(a))
            .collect();
        let test_alphabets = list_entries(&self.config.data_root.join(&self.config.evaluation_dir), true)?;

        let fixed = SplitAssignment::new(
            self.characters(&self.config.background_dir, &train_alphabets)?,
            self.characters(&self.config.background_dir, &self.config.validation_alphabets)?,
            self.characters(&self.config.evaluation_dir, &test_alphabets)?,
        );
        let universe: Vec<NativeClassId> = fixed.iter().map(|(_, id)| id.clone()).collect();
        assigner.assign(&universe, &SplitPolicy::Fixed(fixed))
    }

    fn class_examples(&self, class: &NativeClassId) -> DatasetResult<ClassExamples> {
        let rel = class_name_of(class)?;
        let parts: Vec<&str> = rel.splitn(3, '/').collect();
        let [_, alphabet, character] = parts[..] else {
            return Err(ConvertError::Consistency(format!(
                "{}: malformed character id {rel}",
                self.name
            )));
        };
        let dir = self.config.data_root.join(rel);
        let mut examples = ClassExamples::new(
            format!("{alphabet}-{character}"),
            directory_examples(&dir, &BTreeSet::new())?,
        );
        examples.superclass = Some(alphabet.to_string());
        examples.invert = self.config.invert;
        Ok(examples)
    }
}
