//! COCO-style instance annotations: every annotation is one example, cropped
//! to its (scaled) bounding box, filed under its category.

use data_contracts::{NativeClassId, SplitAssignment};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;

use super::{class_index_of, require_dir, require_file, DatasetSource, SplitSpec};
use crate::recode::{BoundingBox, Crop};
use crate::splits::SplitAssigner;
use crate::types::{ClassExamples, ConvertError, DatasetResult, RawExample};

fn default_image_subdir() -> String {
    "train2017".to_string()
}

fn default_annotation_file() -> String {
    "instances_train2017.json".to_string()
}

fn default_split() -> SplitSpec {
    SplitSpec::Permuted {
        train: 0,
        valid: 40,
        test: 40,
    }
}

fn default_box_scale_ratio() -> f64 {
    1.2
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CocoConfig {
    pub data_root: PathBuf,
    #[serde(default = "default_image_subdir")]
    pub image_subdir: String,
    #[serde(default = "default_annotation_file")]
    pub annotation_file: String,
    #[serde(default = "default_split")]
    pub split: SplitSpec,
    /// Boxes grow by this factor about their center; must be at least 1.0.
    #[serde(default = "default_box_scale_ratio")]
    pub box_scale_ratio: f64,
    #[serde(default = "default_true")]
    pub skip_on_error: bool,
}

impl CocoConfig {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            image_subdir: default_image_subdir(),
            annotation_file: default_annotation_file(),
            split: default_split(),
            box_scale_ratio: default_box_scale_ratio(),
            skip_on_error: true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AnnotationFile {
    annotations: Vec<Annotation>,
    categories: Vec<Category>,
}

#[derive(Debug, Clone, Deserialize)]
struct Annotation {
    #[serde(default)]
    id: Option<u64>,
    image_id: u64,
    category_id: u64,
    /// `[x, y, width, height]`
    bbox: [f64; 4],
}

#[derive(Debug, Clone, Deserialize)]
struct Category {
    id: u64,
    name: String,
}

pub struct CocoSource {
    name: String,
    config: CocoConfig,
    image_dir: PathBuf,
    categories: Vec<Category>,
    by_category: BTreeMap<u64, Vec<Annotation>>,
}

impl CocoSource {
    pub fn new(name: &str, config: CocoConfig) -> DatasetResult<Self> {
        let image_dir = config.data_root.join(&config.image_subdir);
        require_dir(&image_dir)?;
        let annotation_path = config.data_root.join(&config.annotation_file);
        require_file(&annotation_path)?;
        if config.box_scale_ratio < 1.0 {
            return Err(ConvertError::Config(format!(
                "box scale ratio must be at least 1.0, got {}",
                config.box_scale_ratio
            )));
        }

        let raw = fs::read(&annotation_path).map_err(|e| ConvertError::Io {
            path: annotation_path.clone(),
            source: e,
        })?;
        let file: AnnotationFile = serde_json::from_slice(&raw).map_err(|e| ConvertError::Json {
            path: annotation_path.clone(),
            source: e,
        })?;
        if file.annotations.is_empty() {
            return Err(ConvertError::Config(format!(
                "{}: instance annotations are empty",
                annotation_path.display()
            )));
        }
        if let Some(expected) = config.split.total() {
            if file.categories.len() != expected {
                return Err(ConvertError::Config(format!(
                    "{} categories but the split counts sum to {expected}",
                    file.categories.len()
                )));
            }
        }

        let mut by_category: BTreeMap<u64, Vec<Annotation>> = BTreeMap::new();
        for category in &file.categories {
            if by_category.insert(category.id, Vec::new()).is_some() {
                return Err(ConvertError::Consistency(format!(
                    "category id {} listed twice",
                    category.id
                )));
            }
        }
        let mut annotation_ids = BTreeSet::new();
        for annotation in file.annotations {
            if let Some(id) = annotation.id {
                if !annotation_ids.insert(id) {
                    return Err(ConvertError::Consistency(format!(
                        "annotation id {id} listed twice"
                    )));
                }
            }
            by_category
                .get_mut(&annotation.category_id)
                .ok_or_else(|| {
                    ConvertError::Consistency(format!(
                        "annotation references unknown category {}",
                        annotation.category_id
                    ))
                })?
                .push(annotation);
        }

        Ok(Self {
            name: name.to_string(),
            config,
            image_dir,
            categories: file.categories,
            by_category,
        })
    }
}

impl DatasetSource for CocoSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_splits(&self, assigner: &SplitAssigner) -> DatasetResult<SplitAssignment> {
        let universe: Vec<NativeClassId> =
            self.categories.iter().map(|c| NativeClassId::from(c.id)).collect();
        let policy = self.config.split.policy(universe.len())?;
        assigner.assign(&universe, &policy)
    }

    fn class_examples(&self, class: &NativeClassId) -> DatasetResult<ClassExamples> {
        let category_id = class_index_of(class)?;
        let category = self
            .categories
            .iter()
            .find(|c| c.id == category_id)
            .ok_or_else(|| {
                ConvertError::Consistency(format!("{}: unknown category {category_id}", self.name))
            })?;
        let examples = self
            .by_category
            .get(&category_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .map(|a| {
                let [x, y, w, h] = a.bbox;
                RawExample::file(self.image_dir.join(format!("{:012}.jpg", a.image_id))).with_crop(
                    Crop::Scaled {
                        bbox: BoundingBox::new(x, y, w, h),
                        ratio: self.config.box_scale_ratio,
                    },
                )
            })
            .collect();
        let mut out = ClassExamples::new(category.name.clone(), examples);
        out.skip_on_error = self.config.skip_on_error;
        Ok(out)
    }
}
