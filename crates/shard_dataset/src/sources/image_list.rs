//! Flat image directory plus tabular text files mapping image → class,
//! optionally with one pixel bounding box per image.

use data_contracts::{NativeClassId, SplitAssignment};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::{class_index_of, require_dir, DatasetSource, SplitSpec};
use crate::recode::{Crop, CropBox};
use crate::splits::SplitAssigner;
use crate::types::{ClassExamples, ConvertError, DatasetResult, RawExample};

fn default_image_dir() -> PathBuf {
    PathBuf::from("images")
}

fn default_extension() -> String {
    "jpg".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageListConfig {
    pub data_root: PathBuf,
    /// Files with lines `<image stem> <class name>`; the name may contain spaces.
    pub labels_files: Vec<PathBuf>,
    #[serde(default = "default_image_dir")]
    pub image_dir: PathBuf,
    #[serde(default = "default_extension")]
    pub extension: String,
    /// File with lines `<image stem> <xmin> <ymin> <xmax> <ymax>`.
    #[serde(default)]
    pub boxes_file: Option<PathBuf>,
    #[serde(default)]
    pub split: SplitSpec,
    #[serde(default)]
    pub skip_on_error: bool,
}

pub struct ImageListSource {
    name: String,
    config: ImageListConfig,
    /// Sorted class names; a class's native id is its index here.
    class_names: Vec<String>,
    /// Image stems per class, sorted.
    images: Vec<Vec<String>>,
    boxes: Option<BTreeMap<String, CropBox>>,
}

fn read_lines(path: &Path) -> DatasetResult<Vec<String>> {
    let raw = fs::read_to_string(path).map_err(|e| ConvertError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(raw
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

fn parse_boxes(path: &Path) -> DatasetResult<BTreeMap<String, CropBox>> {
    let mut boxes = BTreeMap::new();
    for line in read_lines(path)? {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let parsed: Option<Vec<i64>> = fields.get(1..5).and_then(|v| {
            v.iter().map(|f| f.parse::<i64>().ok()).collect()
        });
        let (Some(stem), Some(coords)) = (fields.first(), parsed) else {
            return Err(ConvertError::Config(format!(
                "{}: malformed box line {line:?}",
                path.display()
            )));
        };
        let crop = CropBox::new(coords[0], coords[1], coords[2], coords[3]);
        if boxes.insert(stem.to_string(), crop).is_some() {
            return Err(ConvertError::Consistency(format!(
                "{}: image {stem} has two boxes",
                path.display()
            )));
        }
    }
    Ok(boxes)
}

impl ImageListSource {
    pub fn new(name: &str, config: ImageListConfig) -> DatasetResult<Self> {
        require_dir(&config.data_root.join(&config.image_dir))?;
        let mut image_to_class: BTreeMap<String, String> = BTreeMap::new();
        for labels in &config.labels_files {
            let path = config.data_root.join(labels);
            for line in read_lines(&path)? {
                let Some((stem, class)) = line.split_once(' ') else {
                    return Err(ConvertError::Config(format!(
                        "{}: malformed label line {line:?}",
                        path.display()
                    )));
                };
                if image_to_class
                    .insert(stem.to_string(), class.to_string())
                    .is_some()
                {
                    return Err(ConvertError::Consistency(format!(
                        "image {stem} is labelled twice"
                    )));
                }
            }
        }

        let mut by_class: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (stem, class) in image_to_class {
            by_class.entry(class).or_default().push(stem);
        }
        let (class_names, images): (Vec<String>, Vec<Vec<String>>) = by_class.into_iter().unzip();

        let boxes = match &config.boxes_file {
            Some(path) => {
                let boxes = parse_boxes(&config.data_root.join(path))?;
                if let Some(stem) = images.iter().flatten().find(|s| !boxes.contains_key(*s)) {
                    return Err(ConvertError::Consistency(format!(
                        "image {stem} has no bounding box"
                    )));
                }
                Some(boxes)
            }
            None => None,
        };

        Ok(Self {
            name: name.to_string(),
            config,
            class_names,
            images,
            boxes,
        })
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }
}

impl DatasetSource for ImageListSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_splits(&self, assigner: &SplitAssigner) -> DatasetResult<SplitAssignment> {
        let universe: Vec<NativeClassId> =
            (0..self.class_names.len()).map(NativeClassId::from).collect();
        let policy = self.config.split.policy(universe.len())?;
        assigner.assign(&universe, &policy)
    }

    fn class_examples(&self, class: &NativeClassId) -> DatasetResult<ClassExamples> {
        let index = class_index_of(class)? as usize;
        let (Some(name), Some(stems)) = (self.class_names.get(index), self.images.get(index)) else {
            return Err(ConvertError::Consistency(format!(
                "{}: class index {index} out of range ({} classes)",
                self.name,
                self.class_names.len()
            )));
        };
        let image_dir = self.config.data_root.join(&self.config.image_dir);
        let examples = stems
            .iter()
            .map(|stem| {
                let example =
                    RawExample::file(image_dir.join(format!("{stem}.{}", self.config.extension)));
                match self.boxes.as_ref().and_then(|b| b.get(stem)) {
                    Some(b) => example.with_crop(Crop::Pixels(*b)),
                    None => example,
                }
            })
            .collect();
        let mut out = ClassExamples::new(name.clone(), examples);
        out.skip_on_error = self.config.skip_on_error;
        Ok(out)
    }
}
