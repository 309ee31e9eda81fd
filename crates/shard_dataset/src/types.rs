//! Core types and error definitions for shard_dataset.

use data_contracts::ContractError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::recode::Crop;

pub type DatasetResult<T> = Result<T, ConvertError>;

#[derive(Debug, Error)]
pub enum ConvertError {
    /// Missing source files, bad split counts, unsupported settings.
    #[error("configuration error: {0}")]
    Config(String),
    #[error("failed to read example {path}: {source}")]
    ExampleRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image decode/encode error for {example}: {source}")]
    Image {
        example: String,
        #[source]
        source: image::ImageError,
    },
    #[error("crop of {example} is empty ({width}x{height})")]
    DegenerateCrop {
        example: String,
        width: i64,
        height: i64,
    },
    /// Upstream data-integrity problems; never repaired silently.
    #[error("consistency error: {0}")]
    Consistency(String),
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json parse error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("shard {path}: {msg}")]
    Shard { path: PathBuf, msg: String },
}

impl ConvertError {
    /// Errors confined to one example; skippable when a class opts into resilience.
    pub fn is_per_example(&self) -> bool {
        matches!(
            self,
            ConvertError::ExampleRead { .. }
                | ConvertError::Image { .. }
                | ConvertError::DegenerateCrop { .. }
        )
    }
}

/// Where the bytes of one raw example come from.
#[derive(Debug, Clone, PartialEq)]
pub enum ExampleSource {
    /// An encoded image file on disk.
    File(PathBuf),
    /// A flat single-channel intensity vector (one row of an array file).
    Intensities { name: String, pixels: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawExample {
    pub source: ExampleSource,
    pub crop: Option<Crop>,
}

impl RawExample {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: ExampleSource::File(path.into()),
            crop: None,
        }
    }

    pub fn with_crop(mut self, crop: Crop) -> Self {
        self.crop = Some(crop);
        self
    }

    /// Human-readable identity used in logs and errors.
    pub fn describe(&self) -> String {
        match &self.source {
            ExampleSource::File(path) => path.display().to_string(),
            ExampleSource::Intensities { name, .. } => name.clone(),
        }
    }
}

/// Everything a source knows about one class before any image is processed.
#[derive(Debug, Clone)]
pub struct ClassExamples {
    pub name: String,
    pub examples: Vec<RawExample>,
    /// Bi-level datasets name the superclass each class belongs to.
    pub superclass: Option<String>,
    /// Invert pixels (black/white swap) for every example of the class.
    pub invert: bool,
    /// Log and drop examples that fail with a per-example error.
    pub skip_on_error: bool,
    /// Every example is known to be readable, so the shard can be pre-sized.
    pub count_known: bool,
}

impl ClassExamples {
    pub fn new(name: impl Into<String>, examples: Vec<RawExample>) -> Self {
        Self {
            name: name.into(),
            examples,
            superclass: None,
            invert: false,
            skip_on_error: false,
            count_known: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardMetadata {
    pub class_id: u32,
    /// Shard file name relative to the records directory (UTF-8).
    pub relative_path: String,
    pub shard_version: u32,
    pub samples: usize,
    /// Hex-encoded SHA256 of the record region.
    pub checksum_sha256: Option<String>,
}
