//! Conversion of class-structured image datasets into per-class shards.
//!
//! This crate provides:
//! - Split assignment (random, permuted, contiguous, structural, external table)
//! - A split cache with an explicit hit/miss lookup
//! - Split-ordered class-ID allocation
//! - Image recoding to a canonical format with crop/invert transforms
//! - The `.shard` container writer and reader
//! - The dataset converter state machine and the per-dataset source strategies

pub mod class_ids;
pub mod converter;
pub mod recode;
pub mod shard;
pub mod sources;
pub mod split_cache;
pub mod splits;
pub mod types;

pub use class_ids::{allocate_class_ids, ClassIdAllocator, ClassPlan};
pub use converter::{
    ClassesMaterialized, ConvertOptions, DatasetConverter, SpecBuilder, SplitsResolved,
    DEFAULT_SEED,
};
pub use recode::{BoundingBox, CanonicalFormat, Crop, CropBox, ImageRecodePipeline, Transforms};
pub use shard::{read_shard, ShardCapacity, ShardContents, ShardWriter, SHARD_MAGIC, SHARD_VERSION};
pub use sources::registry::{build_source, DatasetSourceConfig};
pub use sources::{DatasetSource, SourceLayout};
pub use split_cache::{CacheLookup, SplitCache};
pub use splits::{gen_rand_split_inds, SplitAssigner, SplitCounts, SplitIndices, SplitPolicy};
pub use types::*;
