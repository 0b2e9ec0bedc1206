// ⚙️ Configuration - ledgerbook.toml
//
//   database = "ledger.db"
//   aliases = "aliases.toml"
//
//   [dedup]
//   Transaction = ["date", "sender", "receiver", "amount", "unit"]
//
// Relative `database` and `aliases` paths are taken from the directory of
// the config file. A missing file means defaults. An entity type absent from
// `[dedup]` keeps its default natural key; an empty list disables dedup for
// that type.

use crate::aliases::AliasConfig;
use crate::deduplication::DedupPolicy;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LedgerConfig {
    pub database: Option<String>,
    pub aliases: Option<String>,
    #[serde(default)]
    pub dedup: BTreeMap<String, Vec<String>>,
    /// Directory of the file this was loaded from
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("ledgerbook.toml")
}

pub fn default_database_path() -> PathBuf {
    PathBuf::from("ledger.db")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<LedgerConfig> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(LedgerConfig::default());
    }

    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    let mut config: LedgerConfig =
        toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
    config.base_dir = path.parent().map(Path::to_path_buf);
    Ok(config)
}

impl LedgerConfig {
    pub fn database_path(&self) -> PathBuf {
        self.database
            .as_deref()
            .map(|path| self.relative_to_config(path))
            .unwrap_or_else(default_database_path)
    }

    pub fn alias_path(&self) -> Option<PathBuf> {
        self.aliases.as_deref().map(|path| self.relative_to_config(path))
    }

    fn relative_to_config(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Default natural keys overridden per type by `[dedup]`
    pub fn dedup_policy(&self) -> anyhow::Result<DedupPolicy> {
        DedupPolicy::from_table(&self.dedup).context("invalid [dedup] table")
    }

    /// Alias file contents, or empty tables when none is configured
    pub fn alias_config(&self) -> anyhow::Result<AliasConfig> {
        match self.alias_path() {
            Some(path) => AliasConfig::load(&path)
                .with_context(|| format!("loading alias file {}", path.display())),
            None => Ok(AliasConfig::default()),
        }
    }
}
