//! Dataset kinds selectable from configuration.

use serde::{Deserialize, Serialize};

use super::alphabet::{AlphabetConfig, AlphabetSource};
use super::array_file::{ArrayFileConfig, ArrayFileSource};
use super::coco::{CocoConfig, CocoSource};
use super::image_folder::{ImageFolderConfig, ImageFolderSource};
use super::image_list::{ImageListConfig, ImageListSource};
use super::json_images::{JsonImagesConfig, JsonImagesSource};
use super::taxonomy::{TaxonomyConfig, TaxonomySource};
use super::DatasetSource;
use crate::types::DatasetResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DatasetSourceConfig {
    ImageFolder(ImageFolderConfig),
    ArrayFile(ArrayFileConfig),
    Alphabet(AlphabetConfig),
    Coco(CocoConfig),
    ImageList(ImageListConfig),
    JsonImages(JsonImagesConfig),
    Taxonomy(TaxonomyConfig),
}

impl DatasetSourceConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            DatasetSourceConfig::ImageFolder(_) => "image_folder",
            DatasetSourceConfig::ArrayFile(_) => "array_file",
            DatasetSourceConfig::Alphabet(_) => "alphabet",
            DatasetSourceConfig::Coco(_) => "coco",
            DatasetSourceConfig::ImageList(_) => "image_list",
            DatasetSourceConfig::JsonImages(_) => "json_images",
            DatasetSourceConfig::Taxonomy(_) => "taxonomy",
        }
    }
}

/// Validates the source layout on disk and returns the matching strategy.
pub fn build_source(name: &str, config: &DatasetSourceConfig) -> DatasetResult<Box<dyn DatasetSource>> {
    Ok(match config {
        DatasetSourceConfig::ImageFolder(c) => Box::new(ImageFolderSource::new(name, c.clone())?),
        DatasetSourceConfig::ArrayFile(c) => Box::new(ArrayFileSource::new(name, c.clone())?),
        DatasetSourceConfig::Alphabet(c) => Box::new(AlphabetSource::new(name, c.clone())?),
        DatasetSourceConfig::Coco(c) => Box::new(CocoSource::new(name, c.clone())?),
        DatasetSourceConfig::ImageList(c) => Box::new(ImageListSource::new(name, c.clone())?),
        DatasetSourceConfig::JsonImages(c) => Box::new(JsonImagesSource::new(name, c.clone())?),
        DatasetSourceConfig::Taxonomy(c) => Box::new(TaxonomySource::new(name, c.clone())?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::SplitSpec;
    use serde_json::json;

    #[test]
    fn config_selects_kind_by_tag() {
        let config: DatasetSourceConfig = serde_json::from_value(json!({
            "kind": "image_folder",
            "data_root": "/data/flowers",
            "split": {"policy": "counts", "train": 71, "valid": 15, "test": 16}
        }))
        .unwrap();
        assert_eq!(config.kind(), "image_folder");
        match config {
            DatasetSourceConfig::ImageFolder(c) => {
                assert_eq!(
                    c.split,
                    SplitSpec::Counts {
                        train: 71,
                        valid: 15,
                        test: 16
                    }
                );
                assert!(!c.skip_on_error);
            }
            other => panic!("unexpected config {other:?}"),
        }
    }

    #[test]
    fn alphabet_defaults_fill_in() {
        let config: DatasetSourceConfig = serde_json::from_value(json!({
            "kind": "alphabet",
            "data_root": "/data/omniglot"
        }))
        .unwrap();
        match config {
            DatasetSourceConfig::Alphabet(c) => {
                assert_eq!(c.background_dir, "images_background");
                assert_eq!(c.validation_alphabets.len(), 5);
                assert!(c.invert);
            }
            other => panic!("unexpected config {other:?}"),
        }
    }

    #[test]
    fn json_images_defaults_to_two_annotation_files() {
        let config: DatasetSourceConfig = serde_json::from_value(json!({
            "kind": "json_images",
            "data_root": "/data/fungi",
            "split": {"policy": "counts", "train": 994, "valid": 200, "test": 200}
        }))
        .unwrap();
        assert_eq!(config.kind(), "json_images");
        match config {
            DatasetSourceConfig::JsonImages(c) => {
                assert_eq!(c.annotation_files.len(), 2);
                assert_eq!(c.split.total(), Some(1394));
                assert!(c.box_scale_ratio.is_none());
            }
            other => panic!("unexpected config {other:?}"),
        }
    }

    #[test]
    fn build_fails_on_missing_root() {
        let config = DatasetSourceConfig::ImageFolder(ImageFolderConfig::new(
            "/definitely/not/here",
            SplitSpec::AllTest,
        ));
        assert!(build_source("x", &config).is_err());
    }
}
