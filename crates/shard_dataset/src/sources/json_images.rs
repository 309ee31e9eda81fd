//! Image-level labels spread over several annotation files (e.g. the
//! `train.json`/`val.json` pair of a competition release). Each image carries
//! exactly one category; categories must agree across files and be numbered
//! `0..N`.

use data_contracts::{NativeClassId, SplitAssignment};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use super::{class_index_of, require_dir, require_file, DatasetSource, SplitSpec};
use crate::recode::{BoundingBox, Crop};
use crate::splits::SplitAssigner;
use crate::types::{ClassExamples, ConvertError, DatasetResult, RawExample};

fn default_annotation_files() -> Vec<PathBuf> {
    vec![PathBuf::from("train.json"), PathBuf::from("val.json")]
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonImagesConfig {
    pub data_root: PathBuf,
    /// Relative to `data_root` unless absolute.
    #[serde(default = "default_annotation_files")]
    pub annotation_files: Vec<PathBuf>,
    #[serde(default)]
    pub split: SplitSpec,
    /// When set, images with a `bbox` are cropped to it, grown by this factor.
    #[serde(default)]
    pub box_scale_ratio: Option<f64>,
    #[serde(default = "default_true")]
    pub skip_on_error: bool,
}

impl JsonImagesConfig {
    pub fn new(data_root: impl Into<PathBuf>, split: SplitSpec) -> Self {
        Self {
            data_root: data_root.into(),
            annotation_files: default_annotation_files(),
            split,
            box_scale_ratio: None,
            skip_on_error: true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LabelFile {
    images: Vec<ImageEntry>,
    annotations: Vec<ImageLabel>,
    categories: Vec<Category>,
}

#[derive(Debug, Clone, Deserialize)]
struct ImageEntry {
    id: u64,
    file_name: PathBuf,
    /// `[x, y, width, height]`
    #[serde(default)]
    bbox: Option<[f64; 4]>,
}

#[derive(Debug, Deserialize)]
struct ImageLabel {
    image_id: u64,
    category_id: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct Category {
    id: u64,
    name: String,
}

pub struct JsonImagesSource {
    name: String,
    config: JsonImagesConfig,
    categories: Vec<Category>,
    by_category: BTreeMap<u64, Vec<ImageEntry>>,
}

fn read_label_file(path: &Path) -> DatasetResult<LabelFile> {
    require_file(path)?;
    let raw = fs::read(path).map_err(|e| ConvertError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_slice(&raw).map_err(|e| ConvertError::Json {
        path: path.to_path_buf(),
        source: e,
    })
}

impl JsonImagesSource {
    pub fn new(name: &str, config: JsonImagesConfig) -> DatasetResult<Self> {
        require_dir(&config.data_root)?;
        if config.annotation_files.is_empty() {
            return Err(ConvertError::Config(format!(
                "{name}: no annotation files configured"
            )));
        }
        if let Some(ratio) = config.box_scale_ratio {
            if ratio < 1.0 {
                return Err(ConvertError::Config(format!(
                    "box scale ratio must be at least 1.0, got {ratio}"
                )));
            }
        }

        let mut categories: Option<Vec<Category>> = None;
        let mut by_category: BTreeMap<u64, Vec<ImageEntry>> = BTreeMap::new();
        let mut image_ids = BTreeSet::new();
        for relative in &config.annotation_files {
            let path = config.data_root.join(relative);
            let file = read_label_file(&path)?;
            match &categories {
                None => {
                    check_contiguous(&file.categories)?;
                    for category in &file.categories {
                        by_category.insert(category.id, Vec::new());
                    }
                    categories = Some(file.categories);
                }
                Some(first) if *first != file.categories => {
                    return Err(ConvertError::Consistency(format!(
                        "{}: categories differ from {}",
                        path.display(),
                        config.data_root.join(&config.annotation_files[0]).display()
                    )));
                }
                Some(_) => {}
            }

            let mut images: BTreeMap<u64, ImageEntry> = BTreeMap::new();
            for image in file.images {
                if !image_ids.insert(image.id) {
                    return Err(ConvertError::Consistency(format!(
                        "{}: image id {} listed twice",
                        path.display(),
                        image.id
                    )));
                }
                images.insert(image.id, image);
            }
            for label in file.annotations {
                let image = images.remove(&label.image_id).ok_or_else(|| {
                    ConvertError::Consistency(format!(
                        "{}: image {} is unknown or labelled twice",
                        path.display(),
                        label.image_id
                    ))
                })?;
                by_category
                    .get_mut(&label.category_id)
                    .ok_or_else(|| {
                        ConvertError::Consistency(format!(
                            "{}: image {} labelled with unknown category {}",
                            path.display(),
                            label.image_id,
                            label.category_id
                        ))
                    })?
                    .push(image);
            }
        }

        let categories = categories.unwrap_or_default();
        if let Some(expected) = config.split.total() {
            if categories.len() != expected {
                return Err(ConvertError::Config(format!(
                    "{} categories but the split counts sum to {expected}",
                    categories.len()
                )));
            }
        }
        info!(
            "{name}: {} categories, {} labelled images",
            categories.len(),
            by_category.values().map(Vec::len).sum::<usize>()
        );
        Ok(Self {
            name: name.to_string(),
            config,
            categories,
            by_category,
        })
    }
}

fn check_contiguous(categories: &[Category]) -> DatasetResult<()> {
    let ids: BTreeSet<u64> = categories.iter().map(|c| c.id).collect();
    let n = categories.len() as u64;
    if ids.len() != categories.len() || ids.iter().next_back().is_some_and(|last| *last != n - 1) {
        return Err(ConvertError::Consistency(format!(
            "category ids must be unique and cover 0..{n}"
        )));
    }
    Ok(())
}

impl DatasetSource for JsonImagesSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_splits(&self, assigner: &SplitAssigner) -> DatasetResult<SplitAssignment> {
        let universe: Vec<NativeClassId> = (0..self.categories.len()).map(NativeClassId::from).collect();
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
            .map(|image| {
                let example = RawExample::file(self.config.data_root.join(&image.file_name));
                match (image.bbox, self.config.box_scale_ratio) {
                    (Some([x, y, w, h]), Some(ratio)) => example.with_crop(Crop::Scaled {
                        bbox: BoundingBox::new(x, y, w, h),
                        ratio,
                    }),
                    _ => example,
                }
            })
            .collect();
        let mut out = ClassExamples::new(category.name.clone(), examples);
        out.skip_on_error = self.config.skip_on_error;
        Ok(out)
    }
}
