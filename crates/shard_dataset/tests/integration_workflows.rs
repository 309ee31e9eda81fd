use std::fs;
use std::path::Path;

use anyhow::Result;
use data_contracts::{DatasetSpecification, Split, SpecLayout, TRAIN_TEST_FILE_PATTERN};
use image::{Rgb, RgbImage};
use serde_json::json;
use shard_dataset::sources::alphabet::{AlphabetConfig, AlphabetSource};
use shard_dataset::sources::image_folder::{ImageFolderConfig, ImageFolderSource};
use shard_dataset::sources::taxonomy::{TaxonomyConfig, TaxonomySource};
use shard_dataset::sources::SplitSpec;
use shard_dataset::{read_shard, ConvertError, ConvertOptions, DatasetConverter};

fn write_pixel(path: &Path, value: u8) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    RgbImage::from_pixel(1, 1, Rgb([value, value, value]))
        .save(path)
        .unwrap();
}

/// Ten classes `class_0..class_9`; class k holds `k % 3 + 1` images.
fn image_folder_fixture(root: &Path) -> usize {
    let mut total = 0;
    for k in 0..10 {
        for i in 0..(k % 3 + 1) {
            write_pixel(&root.join(format!("class_{k}")).join(format!("{i}.png")), k as u8);
            total += 1;
        }
    }
    total
}

fn folder_source(root: &Path, skip_on_error: bool) -> ImageFolderSource {
    let mut config = ImageFolderConfig::new(
        root,
        SplitSpec::Counts {
            train: 7,
            valid: 2,
            test: 1,
        },
    );
    config.skip_on_error = skip_on_error;
    ImageFolderSource::new("toy", config).unwrap()
}

#[test]
fn image_folder_end_to_end() -> Result<()> {
    let data = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    let total = image_folder_fixture(data.path());
    let source = folder_source(data.path(), false);
    let options = ConvertOptions::new(&out.path().join("records"), &out.path().join("splits"), "toy");
    let spec_path = options.spec_path();

    let spec = DatasetConverter::new(&source, options).convert()?;
    let counts = spec.classes_per_split();
    assert_eq!(counts[&Split::Train], 7);
    assert_eq!(counts[&Split::Valid], 2);
    assert_eq!(counts[&Split::Test], 1);
    assert_eq!(spec.total_images(), total);
    assert_eq!(spec.class_id_range(Split::Valid), 7..9);

    let mut shard_images = 0;
    for class_id in 0..10u32 {
        let shard = read_shard(&spec.shard_path(class_id)?)?;
        assert_eq!(shard.label, class_id);
        assert!(shard.labels.iter().all(|l| *l == class_id));
        assert_eq!(shard.len(), spec.images_per_class[&class_id]);
        shard_images += shard.len();
    }
    assert_eq!(shard_images, total);

    let reloaded = DatasetSpecification::load(&spec_path)?;
    assert_eq!(reloaded, spec);
    Ok(())
}

#[test]
fn corrupt_example_skipped_when_class_is_resilient() -> Result<()> {
    let data = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    let total = image_folder_fixture(data.path());
    fs::write(data.path().join("class_2").join("broken.png"), b"not an image")?;
    let source = folder_source(data.path(), true);
    let options = ConvertOptions::new(&out.path().join("records"), &out.path().join("splits"), "toy");

    let spec = DatasetConverter::new(&source, options).convert()?;
    assert_eq!(spec.total_images(), total);
    let class_2 = spec
        .class_names
        .iter()
        .find(|(_, name)| name.as_str() == "class_2")
        .map(|(id, _)| *id)
        .unwrap();
    assert_eq!(spec.images_per_class[&class_2], 3);
    Ok(())
}

#[test]
fn corrupt_example_aborts_and_removes_stale_spec() -> Result<()> {
    let data = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    image_folder_fixture(data.path());
    let options = ConvertOptions::new(&out.path().join("records"), &out.path().join("splits"), "toy");
    let spec_path = options.spec_path();

    DatasetConverter::new(&folder_source(data.path(), false), options.clone()).convert()?;
    assert!(spec_path.exists());

    fs::write(data.path().join("class_0").join("broken.png"), b"not an image")?;
    let err = DatasetConverter::new(&folder_source(data.path(), false), options)
        .convert()
        .unwrap_err();
    assert!(matches!(err, ConvertError::Image { .. }));
    assert!(!spec_path.exists());
    Ok(())
}

#[test]
fn cached_splits_survive_a_seed_change() -> Result<()> {
    let data = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    image_folder_fixture(data.path());
    let source = folder_source(data.path(), false);
    let records = out.path().join("records");
    let splits = out.path().join("splits");

    let first = DatasetConverter::new(&source, ConvertOptions::new(&records, &splits, "toy"))
        .resolve_splits()?;
    assert!(!first.from_cache());
    assert!(splits.join("toy_splits.json").exists());
    let first = first.splits().clone();

    let second = DatasetConverter::new(
        &source,
        ConvertOptions::new(&records, &splits, "toy").with_seed(1234),
    )
    .resolve_splits()?;
    assert!(second.from_cache());
    assert_eq!(second.splits(), &first);

    let forced = DatasetConverter::new(
        &source,
        ConvertOptions::new(&records, &splits, "toy")
            .with_seed(1234)
            .with_force_splits(true),
    )
    .resolve_splits()?;
    assert!(!forced.from_cache());
    Ok(())
}

#[test]
fn parallel_conversion_matches_sequential() -> Result<()> {
    let data = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    image_folder_fixture(data.path());
    let source = folder_source(data.path(), false);
    let splits = out.path().join("splits");

    let sequential = DatasetConverter::new(
        &source,
        ConvertOptions::new(&out.path().join("seq"), &splits, "toy"),
    )
    .convert()?;
    let parallel = DatasetConverter::new(
        &source,
        ConvertOptions::new(&out.path().join("par"), &splits, "toy").with_jobs(4),
    )
    .convert()?;
    assert_eq!(sequential.class_names, parallel.class_names);
    assert_eq!(sequential.images_per_class, parallel.images_per_class);
    assert_eq!(sequential.layout, parallel.layout);
    Ok(())
}

#[test]
fn alphabet_dataset_builds_bilevel_spec() -> Result<()> {
    let data = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    let root = data.path();
    for (set, alphabet, character) in [
        ("images_background", "Latin", "character01"),
        ("images_background", "Latin", "character02"),
        ("images_background", "Tagalog", "character01"),
        ("images_evaluation", "Runic", "character01"),
    ] {
        write_pixel(&root.join(set).join(alphabet).join(character).join("a.png"), 255);
    }
    fs::create_dir_all(root.join("images_background").join("Empty"))?;

    let mut config = AlphabetConfig::new(root);
    config.validation_alphabets = vec!["Tagalog".to_string()];
    let source = AlphabetSource::new("alphabets", config)?;
    let spec = DatasetConverter::new(
        &source,
        ConvertOptions::new(&out.path().join("records"), &out.path().join("splits"), "alphabets"),
    )
    .convert()?;

    assert_eq!(spec.class_names[&0], "Latin-character01");
    assert_eq!(spec.class_names[&2], "Tagalog-character01");
    match &spec.layout {
        SpecLayout::BiLevel {
            superclasses_per_split,
            classes_per_superclass,
            superclass_names,
        } => {
            assert_eq!(superclasses_per_split[&Split::Train], 1);
            assert_eq!(superclasses_per_split[&Split::Valid], 1);
            assert_eq!(superclasses_per_split[&Split::Test], 1);
            assert_eq!(classes_per_superclass[&0], 2);
            assert_eq!(superclass_names[&2], "Runic");
        }
        other => panic!("unexpected layout {other:?}"),
    }
    // No split file for structurally split datasets.
    assert!(!out.path().join("splits").join("alphabets_splits.json").exists());
    Ok(())
}

#[test]
fn taxonomy_dataset_builds_hierarchical_spec() -> Result<()> {
    let data = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    let root = data.path();
    let graph = json!({
        "split_subgraphs": {
            "train": {"nodes": [
                {"id": "n00", "words": "entity", "children": ["n02", "n01"]},
                {"id": "n01", "words": "dog"},
                {"id": "n02", "words": "cat"}
            ]},
            "valid": {"nodes": [{"id": "n03", "words": "fish"}]},
            "test": {"nodes": [{"id": "n04", "words": "bird"}]}
        }
    });
    fs::write(root.join("taxonomy.json"), serde_json::to_vec_pretty(&graph)?)?;
    for (i, leaf) in ["n01", "n02", "n03", "n04"].iter().enumerate() {
        write_pixel(&root.join(leaf).join("a.png"), i as u8);
    }

    let source = TaxonomySource::new("tree", TaxonomyConfig::new(root))?;
    let spec = DatasetConverter::new(
        &source,
        ConvertOptions::new(&out.path().join("records"), &out.path().join("splits"), "tree"),
    )
    .convert()?;

    assert_eq!(spec.layout.kind(), "hierarchical");
    assert_eq!(spec.class_names[&0], "n01");
    assert_eq!(spec.class_names[&1], "n02");
    assert_eq!(spec.split_of(3), Some(Split::Test));
    assert_eq!(spec.total_images(), 4);
    Ok(())
}

#[test]
fn ppm_image_folder_converts() -> Result<()> {
    let data = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    for class in ["00000", "00001"] {
        let dir = data.path().join(class);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(format!("GT-{class}.csv")), b"Filename;ClassId\n")?;
        for i in 0..2 {
            let mut ppm = b"P6\n2 1\n255\n".to_vec();
            ppm.extend_from_slice(&[200, 10, 10, 10, 10, 200]);
            fs::write(dir.join(format!("{i:05}_00000.ppm")), ppm)?;
        }
    }
    let mut config = ImageFolderConfig::new(data.path(), SplitSpec::AllTest);
    config.files_to_skip = vec!["GT-{class}.csv".into()];
    let source = ImageFolderSource::new("signs", config)?;
    let spec = DatasetConverter::new(
        &source,
        ConvertOptions::new(&out.path().join("records"), &out.path().join("splits"), "signs"),
    )
    .convert()?;

    assert_eq!(spec.class_id_range(Split::Test), 0..2);
    assert_eq!(spec.total_images(), 4);
    let shard = read_shard(&spec.shard_path(1)?)?;
    let decoded = image::load_from_memory(&shard.images[0])?.to_rgb8();
    assert_eq!(decoded.dimensions(), (2, 1));
    Ok(())
}

#[test]
fn custom_file_pattern_names_shards_and_spec() -> Result<()> {
    let data = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    image_folder_fixture(data.path());
    let source = folder_source(data.path(), false);
    let records = out.path().join("records");
    let options = ConvertOptions::new(&records, &out.path().join("splits"), "toy")
        .with_file_pattern("class_{}.rec");

    let spec = DatasetConverter::new(&source, options).convert()?;
    assert_eq!(spec.file_pattern, "class_{}.rec");
    assert_eq!(spec.shard_path(4)?, records.join("toy").join("class_4.rec"));
    assert!(records.join("toy").join("class_9.rec").exists());
    assert!(!records.join("toy").join("0.shard").exists());
    Ok(())
}

#[test]
fn two_slot_pattern_is_rejected_before_writing() -> Result<()> {
    let data = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    image_folder_fixture(data.path());
    let source = folder_source(data.path(), false);
    let options = ConvertOptions::new(&out.path().join("records"), &out.path().join("splits"), "toy")
        .with_file_pattern(TRAIN_TEST_FILE_PATTERN);
    let records_path = options.records_path.clone();

    let err = DatasetConverter::new(&source, options).convert().unwrap_err();
    assert!(matches!(err, ConvertError::Config(_)));
    assert!(!records_path.exists());
    Ok(())
}
