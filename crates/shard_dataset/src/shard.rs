//! Per-class shard container.
//!
//! Layout (little-endian):
//! - header, 32 bytes: magic `CSH1`, version u32, label u32, reserved u32,
//!   sample count u64, index offset u64
//! - records: label u32, byte length u64, bytes
//! - index: one u64 record offset per sample
//!
//! The header is written as zeros-for-counts on create and patched on finish.

use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::types::{ConvertError, DatasetResult, ShardMetadata};

pub const SHARD_MAGIC: &[u8; 4] = b"CSH1";
pub const SHARD_VERSION: u32 = 1;
const HEADER_LEN: u64 = 32;
const RECORD_PREFIX_LEN: u64 = 4 + 8;

/// Whether the final sample count is known when the shard is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardCapacity {
    Known(usize),
    Unknown,
}

pub struct ShardWriter {
    path: PathBuf,
    file: BufWriter<File>,
    label: u32,
    offsets: Vec<u64>,
    position: u64,
    hasher: Sha256,
}

impl ShardWriter {
    /// Creates (or truncates) the container at `path`.
    pub fn create(path: &Path, label: u32, capacity: ShardCapacity) -> DatasetResult<Self> {
        let io_err = |e| ConvertError::Io {
            path: path.to_path_buf(),
            source: e,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| ConvertError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }
        let mut file = BufWriter::new(File::create(path).map_err(io_err)?);
        file.write_all(&encode_header(label, 0, 0)).map_err(io_err)?;
        let offsets = match capacity {
            ShardCapacity::Known(n) => Vec::with_capacity(n),
            ShardCapacity::Unknown => Vec::new(),
        };
        Ok(Self {
            path: path.to_path_buf(),
            file,
            label,
            offsets,
            position: HEADER_LEN,
            hasher: Sha256::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn label(&self) -> u32 {
        self.label
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Appends one slot. Every label of a shard equals the shard's class id.
    pub fn append(&mut self, image: &[u8], label: u32) -> DatasetResult<()> {
        if label != self.label {
            return Err(ConvertError::Consistency(format!(
                "label {label} appended to shard {} of class {}",
                self.path.display(),
                self.label
            )));
        }
        let mut prefix = [0u8; RECORD_PREFIX_LEN as usize];
        prefix[..4].copy_from_slice(&label.to_le_bytes());
        prefix[4..].copy_from_slice(&(image.len() as u64).to_le_bytes());
        self.write_hashed(&prefix)?;
        self.write_hashed(image)?;
        self.offsets.push(self.position);
        self.position += RECORD_PREFIX_LEN + image.len() as u64;
        Ok(())
    }

    /// Writes the index, patches the header and flushes to disk.
    pub fn finish(mut self) -> DatasetResult<ShardMetadata> {
        let path = self.path.clone();
        let io_err = |e| ConvertError::Io {
            path: path.clone(),
            source: e,
        };
        let index_offset = self.position;
        for offset in &self.offsets {
            self.file.write_all(&offset.to_le_bytes()).map_err(io_err)?;
        }
        self.file.seek(SeekFrom::Start(0)).map_err(io_err)?;
        self.file
            .write_all(&encode_header(
                self.label,
                self.offsets.len() as u64,
                index_offset,
            ))
            .map_err(io_err)?;
        self.file.flush().map_err(io_err)?;
        self.file.get_ref().sync_all().map_err(io_err)?;

        Ok(ShardMetadata {
            class_id: self.label,
            relative_path: self
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            shard_version: SHARD_VERSION,
            samples: self.offsets.len(),
            checksum_sha256: Some(format!("{:x}", self.hasher.finalize())),
        })
    }

    fn write_hashed(&mut self, bytes: &[u8]) -> DatasetResult<()> {
        self.hasher.update(bytes);
        self.file.write_all(bytes).map_err(|e| ConvertError::Io {
            path: self.path.clone(),
            source: e,
        })
    }
}

fn encode_header(label: u32, samples: u64, index_offset: u64) -> [u8; HEADER_LEN as usize] {
    let mut header = [0u8; HEADER_LEN as usize];
    header[0..4].copy_from_slice(SHARD_MAGIC);
    header[4..8].copy_from_slice(&SHARD_VERSION.to_le_bytes());
    header[8..12].copy_from_slice(&label.to_le_bytes());
    header[16..24].copy_from_slice(&samples.to_le_bytes());
    header[24..32].copy_from_slice(&index_offset.to_le_bytes());
    header
}

/// A fully loaded shard: two same-length sequences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardContents {
    pub label: u32,
    pub images: Vec<Vec<u8>>,
    pub labels: Vec<u32>,
    pub checksum_sha256: String,
}

impl ShardContents {
    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

fn read_u32_le(data: &[u8]) -> u32 {
    let mut arr = [0u8; 4];
    arr.copy_from_slice(data);
    u32::from_le_bytes(arr)
}

fn read_u64_le(data: &[u8]) -> u64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(data);
    u64::from_le_bytes(arr)
}

pub fn read_shard(path: &Path) -> DatasetResult<ShardContents> {
    let data = fs::read(path).map_err(|e| ConvertError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let bad = |msg: String| ConvertError::Shard {
        path: path.to_path_buf(),
        msg,
    };
    if data.len() < HEADER_LEN as usize {
        return Err(bad(format!("too small ({} bytes)", data.len())));
    }
    if &data[0..4] != SHARD_MAGIC {
        return Err(bad("bad magic".into()));
    }
    let version = read_u32_le(&data[4..8]);
    if version != SHARD_VERSION {
        return Err(bad(format!(
            "unsupported version {version} (expected {SHARD_VERSION})"
        )));
    }
    let label = read_u32_le(&data[8..12]);
    let samples = read_u64_le(&data[16..24]) as usize;
    let index_offset = read_u64_le(&data[24..32]) as usize;
    if index_offset == 0 {
        return Err(bad("unfinished shard (header never patched)".into()));
    }
    let index_end = samples
        .checked_mul(8)
        .and_then(|n| n.checked_add(index_offset))
        .ok_or_else(|| bad("overflow computing index size".into()))?;
    if index_offset < HEADER_LEN as usize || index_end > data.len() {
        return Err(bad("truncated index".into()));
    }

    let mut images = Vec::with_capacity(samples);
    let mut labels = Vec::with_capacity(samples);
    for slot in 0..samples {
        let at = index_offset + slot * 8;
        let offset = read_u64_le(&data[at..at + 8]) as usize;
        if offset
            .checked_add(RECORD_PREFIX_LEN as usize)
            .map_or(true, |prefix_end| prefix_end > index_offset)
        {
            return Err(bad(format!("record {slot} starts past the record region")));
        }
        let record_label = read_u32_le(&data[offset..offset + 4]);
        let len = read_u64_le(&data[offset + 4..offset + 12]) as usize;
        let start = offset + RECORD_PREFIX_LEN as usize;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= index_offset)
            .ok_or_else(|| bad(format!("record {slot} truncated")))?;
        labels.push(record_label);
        images.push(data[start..end].to_vec());
    }
    let checksum = Sha256::digest(&data[HEADER_LEN as usize..index_offset]);
    Ok(ShardContents {
        label,
        images,
        labels,
        checksum_sha256: format!("{:x}", checksum),
    })
}
