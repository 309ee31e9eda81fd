//! Dataset conversion state machine.
//!
//! `DatasetConverter` (uninitialized) → [`SplitsResolved`] →
//! [`ClassesMaterialized`] → persisted [`DatasetSpecification`]. Each
//! transition consumes the previous state, so a run cannot be resumed halfway.

use data_contracts::{
    fill_pattern, ClassRecord, DatasetSpecification, Split, SpecLayout, SplitAssignment,
    DEFAULT_FILE_PATTERN, SPEC_FILE_NAME,
};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::class_ids::{allocate_class_ids, ClassPlan};
use crate::recode::{CanonicalFormat, ImageRecodePipeline};
use crate::shard::{ShardCapacity, ShardWriter};
use crate::sources::{DatasetSource, SourceLayout};
use crate::split_cache::SplitCache;
use crate::splits::SplitAssigner;
use crate::types::{ConvertError, DatasetResult, ShardMetadata};

pub const DEFAULT_SEED: u64 = 22;

#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Directory receiving the shards and the specification file.
    pub records_path: PathBuf,
    pub split_file: PathBuf,
    pub seed: u64,
    /// Recompute splits even if a cached assignment exists.
    pub force_splits: bool,
    pub format: CanonicalFormat,
    /// Shard file name template with one `{}` slot for the class id.
    pub file_pattern: String,
    /// Classes converted concurrently; 1 keeps the sequential reference order.
    pub jobs: usize,
}

impl ConvertOptions {
    /// `<records_root>/<name>` and `<splits_root>/<name>_splits.json`.
    pub fn new(records_root: &Path, splits_root: &Path, name: &str) -> Self {
        Self {
            records_path: records_root.join(name),
            split_file: SplitCache::for_dataset(splits_root, name).path().to_path_buf(),
            seed: DEFAULT_SEED,
            force_splits: false,
            format: CanonicalFormat::default(),
            file_pattern: DEFAULT_FILE_PATTERN.to_string(),
            jobs: 1,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_force_splits(mut self, force: bool) -> Self {
        self.force_splits = force;
        self
    }

    pub fn with_format(mut self, format: CanonicalFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_file_pattern(mut self, pattern: &str) -> Self {
        self.file_pattern = pattern.to_string();
        self
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn spec_path(&self) -> PathBuf {
        self.records_path.join(SPEC_FILE_NAME)
    }
}

pub struct DatasetConverter<'a> {
    source: &'a dyn DatasetSource,
    options: ConvertOptions,
    pipeline: ImageRecodePipeline,
}

impl<'a> DatasetConverter<'a> {
    pub fn new(source: &'a dyn DatasetSource, options: ConvertOptions) -> Self {
        let pipeline = ImageRecodePipeline::new(options.format);
        Self {
            source,
            options,
            pipeline,
        }
    }

    pub fn options(&self) -> &ConvertOptions {
        &self.options
    }

    /// Runs every transition and returns the persisted specification.
    pub fn convert(self) -> DatasetResult<DatasetSpecification> {
        self.resolve_splits()?.materialize_classes()?.persist()
    }

    /// Reads the cached assignment or computes (and caches) a new one.
    pub fn resolve_splits(self) -> DatasetResult<SplitsResolved<'a>> {
        let assigner = SplitAssigner::new(self.options.seed);
        let (splits, from_cache) = if self.source.uses_split_cache() {
            SplitCache::new(&self.options.split_file).resolve(self.options.force_splits, || {
                self.source.create_splits(&assigner)
            })?
        } else {
            (self.source.create_splits(&assigner)?, false)
        };
        splits.validate()?;
        info!(
            "{}: {} train / {} valid / {} test classes{}",
            self.source.name(),
            splits.train.len(),
            splits.valid.len(),
            splits.test.len(),
            if from_cache { " (cached)" } else { "" }
        );
        Ok(SplitsResolved {
            converter: self,
            splits,
            from_cache,
        })
    }

    fn convert_class(&self, plan: &ClassPlan) -> DatasetResult<ClassOutcome> {
        let class = self.source.class_examples(&plan.native)?;
        let file = fill_pattern(&self.options.file_pattern, &[plan.class_id.to_string()])?;
        let path = self.options.records_path.join(file);
        let capacity = if class.count_known {
            ShardCapacity::Known(class.examples.len())
        } else {
            ShardCapacity::Unknown
        };
        debug!("Creating shard for class ID {} at {}", plan.class_id, path.display());
        let mut writer = ShardWriter::create(&path, plan.class_id, capacity)?;
        for example in &class.examples {
            match self.pipeline.process(example, class.invert) {
                Ok(bytes) => writer.append(&bytes, plan.class_id)?,
                Err(err) if class.skip_on_error && err.is_per_example() => {
                    warn!("While trying to load {}, got error: {err}", example.describe());
                }
                Err(err) => return Err(err),
            }
        }
        let shard = writer.finish()?;
        if shard.samples == 0 && !class.examples.is_empty() {
            return Err(ConvertError::Consistency(format!(
                "class {} ({}) had {} examples but none could be written",
                plan.class_id,
                class.name,
                class.examples.len()
            )));
        }
        info!(
            class_id = plan.class_id,
            split = %plan.split,
            images = shard.samples,
            "Wrote class {}",
            class.name
        );
        Ok(ClassOutcome {
            record: ClassRecord {
                class_id: plan.class_id,
                name: class.name,
                split: plan.split,
                image_count: shard.samples,
            },
            superclass: class.superclass,
            shard,
        })
    }
}

struct ClassOutcome {
    record: ClassRecord,
    superclass: Option<String>,
    shard: ShardMetadata,
}

pub struct SplitsResolved<'a> {
    converter: DatasetConverter<'a>,
    splits: SplitAssignment,
    from_cache: bool,
}

impl<'a> SplitsResolved<'a> {
    pub fn splits(&self) -> &SplitAssignment {
        &self.splits
    }

    pub fn from_cache(&self) -> bool {
        self.from_cache
    }

    /// Allocates ids, then extracts, recodes and writes every class in id order.
    pub fn materialize_classes(self) -> DatasetResult<ClassesMaterialized<'a>> {
        let converter = self.converter;
        let options = &converter.options;
        let plans = allocate_class_ids(&self.splits)?;
        // Two-slot train/test patterns are readable but never written here.
        fill_pattern(&options.file_pattern, &["0".to_string()]).map_err(|e| {
            ConvertError::Config(format!("unusable shard file pattern: {e}"))
        })?;

        fs::create_dir_all(&options.records_path).map_err(|e| ConvertError::Io {
            path: options.records_path.clone(),
            source: e,
        })?;
        let spec_path = options.spec_path();
        if spec_path.exists() {
            debug!("Removing stale specification {}", spec_path.display());
            fs::remove_file(&spec_path).map_err(|e| ConvertError::Io {
                path: spec_path.clone(),
                source: e,
            })?;
        }

        let outcomes: Vec<ClassOutcome> = if options.jobs > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(options.jobs)
                .build()
                .map_err(|e| ConvertError::Config(format!("thread pool: {e}")))?;
            pool.install(|| {
                plans
                    .par_iter()
                    .map(|plan| converter.convert_class(plan))
                    .collect::<DatasetResult<Vec<_>>>()
            })?
        } else {
            plans
                .iter()
                .map(|plan| converter.convert_class(plan))
                .collect::<DatasetResult<Vec<_>>>()?
        };

        let mut builder = SpecBuilder::new(
            converter.source.name(),
            &options.records_path,
            converter.source.layout(),
        )
        .with_file_pattern(&options.file_pattern);
        let mut shards = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            builder = builder.with_class(outcome.record, outcome.superclass)?;
            shards.push(outcome.shard);
        }
        Ok(ClassesMaterialized {
            converter,
            builder,
            shards,
        })
    }
}

pub struct ClassesMaterialized<'a> {
    converter: DatasetConverter<'a>,
    builder: SpecBuilder,
    shards: Vec<ShardMetadata>,
}

impl ClassesMaterialized<'_> {
    pub fn shards(&self) -> &[ShardMetadata] {
        &self.shards
    }

    pub fn total_images(&self) -> usize {
        self.shards.iter().map(|s| s.samples).sum()
    }

    /// Validates and writes `dataset_spec.json`; the only write of that file.
    pub fn persist(self) -> DatasetResult<DatasetSpecification> {
        let spec = self.builder.finish()?;
        let path = self.converter.options.spec_path();
        spec.save(&path)?;
        info!(
            "Saved dataset specification for {} ({} classes, {} images) to {}",
            spec.name,
            spec.num_classes(),
            spec.total_images(),
            path.display()
        );
        Ok(spec)
    }
}

#[derive(Debug, Clone)]
struct SuperclassEntry {
    name: String,
    split: Split,
    classes: usize,
}

/// Accumulates class records in id order and finalizes them once.
#[derive(Debug, Clone)]
pub struct SpecBuilder {
    name: String,
    base_path: String,
    file_pattern: String,
    layout: SourceLayout,
    records: Vec<ClassRecord>,
    superclasses: Vec<SuperclassEntry>,
}

impl SpecBuilder {
    pub fn new(name: &str, base_path: &Path, layout: SourceLayout) -> Self {
        Self {
            name: name.to_string(),
            base_path: base_path.to_string_lossy().into_owned(),
            file_pattern: DEFAULT_FILE_PATTERN.to_string(),
            layout,
            records: Vec::new(),
            superclasses: Vec::new(),
        }
    }

    pub fn with_file_pattern(mut self, pattern: &str) -> Self {
        self.file_pattern = pattern.to_string();
        self
    }

    /// Adds the next class. Ids must arrive densely and split-ordered; in a
    /// bi-level layout consecutive classes of one superclass are grouped.
    pub fn with_class(
        mut self,
        record: ClassRecord,
        superclass: Option<String>,
    ) -> DatasetResult<Self> {
        let expected = self.records.len() as u32;
        if record.class_id != expected {
            return Err(ConvertError::Consistency(format!(
                "class id {} recorded where {expected} was expected",
                record.class_id
            )));
        }
        if let Some(prev) = self.records.last() {
            if record.split < prev.split {
                return Err(ConvertError::Consistency(format!(
                    "class {} of {} follows a {} class",
                    record.class_id, record.split, prev.split
                )));
            }
        }
        if let SourceLayout::BiLevel = self.layout {
            let superclass = superclass.ok_or_else(|| {
                ConvertError::Consistency(format!(
                    "class {} ({}) has no superclass in a bi-level dataset",
                    record.class_id, record.name
                ))
            })?;
            let continues = matches!(
                self.superclasses.last(),
                Some(last) if last.name == superclass && last.split == record.split
            );
            if continues {
                if let Some(last) = self.superclasses.last_mut() {
                    last.classes += 1;
                }
            } else {
                if self.superclasses.iter().any(|s| s.name == superclass) {
                    return Err(ConvertError::Consistency(format!(
                        "superclass {superclass} appears in two non-adjacent runs"
                    )));
                }
                self.superclasses.push(SuperclassEntry {
                    name: superclass,
                    split: record.split,
                    classes: 1,
                });
            }
        }
        self.records.push(record);
        Ok(self)
    }

    pub fn finish(self) -> DatasetResult<DatasetSpecification> {
        let mut classes_per_split: BTreeMap<Split, usize> =
            Split::ALL.iter().map(|s| (*s, 0)).collect();
        for record in &self.records {
            *classes_per_split.entry(record.split).or_default() += 1;
        }
        let layout = match self.layout {
            SourceLayout::Flat => SpecLayout::Flat { classes_per_split },
            SourceLayout::BiLevel => {
                let mut superclasses_per_split: BTreeMap<Split, usize> =
                    Split::ALL.iter().map(|s| (*s, 0)).collect();
                let mut classes_per_superclass = BTreeMap::new();
                let mut superclass_names = BTreeMap::new();
                for (id, entry) in self.superclasses.into_iter().enumerate() {
                    *superclasses_per_split.entry(entry.split).or_default() += 1;
                    classes_per_superclass.insert(id as u32, entry.classes);
                    superclass_names.insert(id as u32, entry.name);
                }
                SpecLayout::BiLevel {
                    superclasses_per_split,
                    classes_per_superclass,
                    superclass_names,
                }
            }
            SourceLayout::Hierarchical(split_subgraphs) => {
                SpecLayout::Hierarchical { split_subgraphs }
            }
        };
        let spec = DatasetSpecification {
            name: self.name,
            base_path: self.base_path,
            file_pattern: self.file_pattern,
            images_per_class: self
                .records
                .iter()
                .map(|r| (r.class_id, r.image_count))
                .collect(),
            class_names: self
                .records
                .into_iter()
                .map(|r| (r.class_id, r.name))
                .collect(),
            layout,
        };
        spec.validate()?;
        Ok(spec)
    }
}
