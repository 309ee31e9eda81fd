use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use shard_dataset::{CanonicalFormat, DatasetSourceConfig, DEFAULT_SEED};
use tracing::warn;

const DEFAULT_CONFIG_NAME: &str = "shard-tools.toml";
const CONFIG_ENV: &str = "SHARD_TOOLS_CONFIG";

#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub records_root: PathBuf,
    pub splits_root: PathBuf,
    pub seed: u64,
    pub format: CanonicalFormat,
    /// `[datasets.<name>]` tables; `kind` picks the strategy.
    pub datasets: BTreeMap<String, DatasetSourceConfig>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            records_root: PathBuf::from("records"),
            splits_root: PathBuf::from("splits"),
            seed: DEFAULT_SEED,
            format: CanonicalFormat::default(),
            datasets: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct ToolConfigFile {
    records_root: Option<String>,
    splits_root: Option<String>,
    seed: Option<u64>,
    format: Option<CanonicalFormat>,
    datasets: Option<BTreeMap<String, toml::Value>>,
}

impl ToolConfig {
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            let cfg = Self::from_path(Path::new(&path)).unwrap_or_default();
            cfg.warn_if_invalid();
            return cfg;
        }
        let cfg = Self::from_path(Path::new(DEFAULT_CONFIG_NAME)).unwrap_or_default();
        cfg.warn_if_invalid();
        cfg
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        let raw = std::fs::read_to_string(path).ok()?;
        let file: ToolConfigFile = match toml::from_str(&raw) {
            Ok(file) => file,
            Err(err) => {
                warn!("tools config {}: {err}; using defaults", path.display());
                return None;
            }
        };
        Some(Self::from_file(file))
    }

    fn from_file(file: ToolConfigFile) -> Self {
        let mut datasets = BTreeMap::new();
        for (name, mut value) in file.datasets.unwrap_or_default() {
            expand_value(&mut value);
            match value.try_into::<DatasetSourceConfig>() {
                Ok(cfg) => {
                    datasets.insert(name, cfg);
                }
                Err(err) => warn!("tools config: dataset {name} ignored: {err}"),
            }
        }
        ToolConfig {
            records_root: file
                .records_root
                .map(|v| expand_path(&v))
                .unwrap_or_else(|| PathBuf::from("records")),
            splits_root: file
                .splits_root
                .map(|v| expand_path(&v))
                .unwrap_or_else(|| PathBuf::from("splits")),
            seed: file.seed.unwrap_or(DEFAULT_SEED),
            format: file.format.unwrap_or_default(),
            datasets,
        }
    }

    pub fn dataset(&self, name: &str) -> Option<&DatasetSourceConfig> {
        self.datasets.get(name)
    }

    fn warn_if_invalid(&self) {
        if self.records_root.as_os_str().is_empty() {
            warn!("tools config: records_root is empty; shards land in the working directory");
        }
        if self.splits_root.as_os_str().is_empty() {
            warn!("tools config: splits_root is empty; split files land in the working directory");
        }
        if self.datasets.is_empty() {
            warn!("tools config: no [datasets.<name>] tables; convert_dataset has nothing to run");
        }
    }
}

/// Expands every string of a dataset table so source paths accept `~` and `${VAR}`.
fn expand_value(value: &mut toml::Value) {
    match value {
        toml::Value::String(s) => *s = expand_str(s),
        toml::Value::Array(items) => items.iter_mut().for_each(expand_value),
        toml::Value::Table(table) => table.iter_mut().for_each(|(_, v)| expand_value(v)),
        _ => {}
    }
}

fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(expand_str(raw))
}

fn expand_str(raw: &str) -> String {
    let mut out = raw.to_string();
    if let Some(stripped) = out.strip_prefix('~') {
        if let Ok(home) = std::env::var("HOME") {
            out = format!("{home}{stripped}");
        }
    }
    expand_env(&out)
}

/// `${VAR}` is replaced when set and kept verbatim otherwise.
fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start + 2..].find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let key = &rest[start + 2..start + 2 + len];
        match std::env::var(key) {
            Ok(val) => out.push_str(&val),
            Err(_) => out.push_str(&rest[start..start + 3 + len]),
        }
        rest = &rest[start + 3 + len..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_variables_are_kept() {
        assert_eq!(
            expand_env("a/${SHARD_TOOLS_SURELY_UNSET}/b"),
            "a/${SHARD_TOOLS_SURELY_UNSET}/b"
        );
        assert_eq!(expand_env("plain/${unterminated"), "plain/${unterminated");
    }

    #[test]
    fn set_variables_expand() {
        let path = std::env::var("PATH").unwrap_or_default();
        assert_eq!(expand_env("${PATH}/x"), format!("{path}/x"));
    }
}
