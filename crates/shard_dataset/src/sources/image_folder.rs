//! One directory per class under a common root.

use data_contracts::{NativeClassId, SplitAssignment};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::info;

use super::{class_name_of, directory_examples, list_entries, read_skip_list, DatasetSource, SplitSpec};
use crate::splits::SplitAssigner;
use crate::types::{ClassExamples, ConvertError, DatasetResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageFolderConfig {
    pub data_root: PathBuf,
    #[serde(default)]
    pub split: SplitSpec,
    /// File names ignored in every class directory; `{class}` expands to the
    /// class directory name (e.g. `GT-{class}.csv`).
    #[serde(default)]
    pub files_to_skip: Vec<String>,
    /// Duplicate lists whose file names are skipped in every class.
    #[serde(default)]
    pub duplicates_files: Vec<PathBuf>,
    /// Images live in `<class>/<image_subdir>` instead of `<class>`.
    #[serde(default)]
    pub image_subdir: Option<String>,
    #[serde(default)]
    pub expected_classes: Option<usize>,
    #[serde(default)]
    pub skip_on_error: bool,
    #[serde(default)]
    pub invert: bool,
}

impl ImageFolderConfig {
    pub fn new(data_root: impl Into<PathBuf>, split: SplitSpec) -> Self {
        Self {
            data_root: data_root.into(),
            split,
            files_to_skip: Vec::new(),
            duplicates_files: Vec::new(),
            image_subdir: None,
            expected_classes: None,
            skip_on_error: false,
            invert: false,
        }
    }
}

pub struct ImageFolderSource {
    name: String,
    config: ImageFolderConfig,
    classes: Vec<String>,
    duplicates: BTreeSet<String>,
}

impl ImageFolderSource {
    pub fn new(name: &str, config: ImageFolderConfig) -> DatasetResult<Self> {
        let classes = list_entries(&config.data_root, true)?;
        if let Some(expected) = config.expected_classes {
            if classes.len() != expected {
                return Err(ConvertError::Config(format!(
                    "{name}: expected {expected} class directories under {}, found {}",
                    config.data_root.display(),
                    classes.len()
                )));
            }
        }
        let mut duplicates = BTreeSet::new();
        for path in &config.duplicates_files {
            duplicates.extend(read_skip_list(&config.data_root.join(path))?);
        }
        if !duplicates.is_empty() {
            info!("{name}: {} duplicate files will be skipped", duplicates.len());
        }
        Ok(Self {
            name: name.to_string(),
            config,
            classes,
            duplicates,
        })
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }
}

impl DatasetSource for ImageFolderSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_splits(&self, assigner: &SplitAssigner) -> DatasetResult<SplitAssignment> {
        let universe: Vec<NativeClassId> =
            self.classes.iter().map(|c| NativeClassId::from(c.as_str())).collect();
        let policy = self.config.split.policy(universe.len())?;
        assigner.assign(&universe, &policy)
    }

    fn class_examples(&self, class: &NativeClassId) -> DatasetResult<ClassExamples> {
        let class_dir = class_name_of(class)?;
        if !self.classes.iter().any(|c| c == class_dir) {
            return Err(ConvertError::Consistency(format!(
                "{}: split names unknown class directory {class_dir}",
                self.name
            )));
        }
        let mut dir = self.config.data_root.join(class_dir);
        if let Some(sub) = &self.config.image_subdir {
            dir = dir.join(sub);
        }
        let mut skip = self.duplicates.clone();
        skip.extend(
            self.config
                .files_to_skip
                .iter()
                .map(|f| f.replace("{class}", class_dir)),
        );
        let mut examples = ClassExamples::new(class_dir, directory_examples(&dir, &skip)?);
        examples.invert = self.config.invert;
        examples.skip_on_error = self.config.skip_on_error;
        Ok(examples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn skip_pattern_expands_class_name() {
        let dir = tempfile::tempdir().unwrap();
        let class = dir.path().join("00003");
        fs::create_dir(&class).unwrap();
        fs::write(class.join("GT-00003.csv"), b"x").unwrap();
        fs::write(class.join("a.ppm"), b"x").unwrap();
        let mut config = ImageFolderConfig::new(dir.path(), SplitSpec::AllTest);
        config.files_to_skip = vec!["GT-{class}.csv".into()];
        let source = ImageFolderSource::new("signs", config).unwrap();
        let class = source.class_examples(&NativeClassId::from("00003")).unwrap();
        assert_eq!(class.examples.len(), 1);
        assert_eq!(class.name, "00003");
    }

    #[test]
    fn expected_class_count_enforced() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("a")).unwrap();
        let mut config = ImageFolderConfig::new(dir.path(), SplitSpec::AllTest);
        config.expected_classes = Some(2);
        assert!(matches!(
            ImageFolderSource::new("x", config),
            Err(ConvertError::Config(_))
        ));
    }
}
