//! One `.npy` array per class; each row is a flattened square grayscale image.

use data_contracts::{NativeClassId, SplitAssignment};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use super::{class_name_of, list_entries, DatasetSource, SplitSpec};
use crate::splits::SplitAssigner;
use crate::types::{ClassExamples, ConvertError, DatasetResult, ExampleSource, RawExample};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayFileConfig {
    pub data_root: PathBuf,
    #[serde(default)]
    pub split: SplitSpec,
}

pub struct ArrayFileSource {
    name: String,
    config: ArrayFileConfig,
    classes: Vec<String>,
}

impl ArrayFileSource {
    pub fn new(name: &str, config: ArrayFileConfig) -> DatasetResult<Self> {
        // `airplane.npy` → `airplane`
        let mut classes: Vec<String> = list_entries(&config.data_root, false)?
            .into_iter()
            .filter(|f| f.ends_with(".npy"))
            .filter_map(|f| f.split('.').next().map(str::to_string))
            .collect();
        classes.sort();
        classes.dedup();
        if classes.is_empty() {
            return Err(ConvertError::Config(format!(
                "{name}: no .npy files under {}",
                config.data_root.display()
            )));
        }
        Ok(Self {
            name: name.to_string(),
            config,
            classes,
        })
    }
}

impl DatasetSource for ArrayFileSource {
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
        let class_name = class_name_of(class)?;
        let path = self.config.data_root.join(format!("{class_name}.npy"));
        let rows = read_rows(&path)?;
        let examples = rows
            .into_iter()
            .enumerate()
            .map(|(i, pixels)| RawExample {
                source: ExampleSource::Intensities {
                    name: format!("{}[{i}]", path.display()),
                    pixels,
                },
                crop: None,
            })
            .collect();
        let mut out = ClassExamples::new(class_name, examples);
        out.count_known = true;
        Ok(out)
    }
}

/// Rows of a 2-D `u8` or `bool` array; booleans become 0/255.
pub fn read_rows(path: &Path) -> DatasetResult<Vec<Vec<u8>>> {
    let io_err = |e| ConvertError::Io {
        path: path.to_path_buf(),
        source: e,
    };
    let file = File::open(path).map_err(io_err)?;
    let npy = npyz::NpyFile::new(BufReader::new(file)).map_err(io_err)?;
    let shape = npy.shape().to_vec();
    let [rows, cols] = shape[..] else {
        return Err(ConvertError::Config(format!(
            "{}: expected a 2-D array, got shape {shape:?}",
            path.display()
        )));
    };
    let (rows, cols) = (rows as usize, cols as usize);
    let is_bool = match npy.dtype() {
        npyz::DType::Plain(ts) => ts.to_string().ends_with("b1"),
        _ => false,
    };
    let flat: Vec<u8> = if is_bool {
        npy.into_vec::<bool>()
            .map_err(io_err)?
            .into_iter()
            .map(|b| if b { 255 } else { 0 })
            .collect()
    } else {
        npy.into_vec::<u8>().map_err(io_err)?
    };
    if cols == 0 || flat.len() != rows * cols {
        return Err(ConvertError::Config(format!(
            "{}: {} values do not fill a {rows}x{cols} array",
            path.display(),
            flat.len()
        )));
    }
    Ok(flat.chunks(cols).map(<[u8]>::to_vec).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Minimal version-1.0 `.npy` writer for fixtures.
    fn write_npy(path: &Path, descr: &str, rows: usize, cols: usize, data: &[u8]) {
        let mut header = format!(
            "{{'descr': '{descr}', 'fortran_order': False, 'shape': ({rows}, {cols}), }}"
        );
        while (10 + header.len() + 1) % 64 != 0 {
            header.push(' ');
        }
        header.push('\n');
        let mut f = File::create(path).unwrap();
        f.write_all(b"\x93NUMPY\x01\x00").unwrap();
        f.write_all(&(header.len() as u16).to_le_bytes()).unwrap();
        f.write_all(header.as_bytes()).unwrap();
        f.write_all(data).unwrap();
    }

    #[test]
    fn bool_rows_scale_to_full_intensity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cat.npy");
        write_npy(&path, "|b1", 2, 4, &[1, 0, 0, 1, 0, 0, 0, 0]);
        let rows = read_rows(&path).unwrap();
        assert_eq!(rows, vec![vec![255, 0, 0, 255], vec![0, 0, 0, 0]]);
    }

    #[test]
    fn class_examples_are_count_known() {
        let dir = tempfile::tempdir().unwrap();
        write_npy(&dir.path().join("dog.npy"), "|u1", 3, 4, &[7u8; 12]);
        let source = ArrayFileSource::new(
            "draw",
            ArrayFileConfig {
                data_root: dir.path().to_path_buf(),
                split: SplitSpec::AllTest,
            },
        )
        .unwrap();
        let class = source.class_examples(&NativeClassId::from("dog")).unwrap();
        assert!(class.count_known);
        assert_eq!(class.examples.len(), 3);
    }
}
