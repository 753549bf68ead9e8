//! Static description of every loadable accelerator module
//!
//! The manifest is created once at startup and lives for the process. Its
//! wire format is `{"baseUrl": "...", "modules": [{id, url, size,
//! capabilities, version}, ...]}`; fetch URLs resolve as
//! `normalize(baseUrl) + entry.url`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;

/// Manifest entry for one loadable module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
  /// Unique module identifier.
  pub id: String,
  /// Location relative to the manifest's base URL.
  pub url: String,
  /// Declared size in bytes; used for download-progress totals when the
  /// transport does not know better.
  #[serde(default)]
  pub size: u64,
  /// Capability tags this module provides, e.g. `"chart-bar"`.
  #[serde(default)]
  pub capabilities: BTreeSet<String>,
  /// Semantic version string.
  pub version: String,
}

impl ManifestEntry {
  /// Cache key for this entry's bytes, `"{id}@{version}"`.
  ///
  /// A version bump on an unchanged id therefore bypasses stale persisted
  /// bytes without an explicit purge.
  pub fn cache_key(&self) -> String {
    format!("{}@{}", self.id, self.version)
  }
}

/// The full accelerator-module manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleManifest {
  #[serde(rename = "baseUrl")]
  pub base_url: String,
  pub modules: Vec<ManifestEntry>,
}

impl ModuleManifest {
  /// An empty manifest rooted at `base_url`.
  pub fn new(base_url: impl Into<String>) -> Self {
    Self {
      base_url: base_url.into(),
      modules: Vec::new(),
    }
  }

  /// Appends an entry; convenient for manifests built in code.
  pub fn with_module(mut self, entry: ManifestEntry) -> Self {
    self.modules.push(entry);
    self
  }

  /// Parses and validates a manifest from its JSON wire format.
  pub fn from_json(raw: &str) -> Result<Self> {
    let manifest: Self = serde_json::from_str(raw).map_err(|err| Error::InvalidManifest {
      reason: err.to_string(),
    })?;
    manifest.validate()?;
    Ok(manifest)
  }

  /// Reads and validates a manifest from a JSON file.
  pub fn from_file(path: &Path) -> Result<Self> {
    let raw = std::fs::read_to_string(path).map_err(|err| Error::InvalidManifest {
      reason: format!("read {}: {err}", path.display()),
    })?;
    Self::from_json(&raw)
  }

  /// Checks structural invariants: non-empty ids, urls, and versions, and
  /// id uniqueness.
  pub fn validate(&self) -> Result<()> {
    let mut seen = HashSet::new();
    for entry in &self.modules {
      if entry.id.trim().is_empty() {
        return Err(Error::InvalidManifest {
          reason: "module id is empty".to_string(),
        });
      }
      if entry.url.trim().is_empty() {
        return Err(Error::InvalidManifest {
          reason: format!("module '{}' has an empty url", entry.id),
        });
      }
      if entry.version.trim().is_empty() {
        return Err(Error::InvalidManifest {
          reason: format!("module '{}' has an empty version", entry.id),
        });
      }
      if !seen.insert(entry.id.as_str()) {
        return Err(Error::InvalidManifest {
          reason: format!("duplicate module id '{}'", entry.id),
        });
      }
    }
    Ok(())
  }

  /// Looks up an entry by module id.
  pub fn entry(&self, module_id: &str) -> Option<&ManifestEntry> {
    self.modules.iter().find(|entry| entry.id == module_id)
  }

  /// All entries providing a capability tag, in manifest order.
  pub fn modules_with_capability(&self, capability: &str) -> Vec<&ManifestEntry> {
    self
      .modules
      .iter()
      .filter(|entry| entry.capabilities.contains(capability))
      .collect()
  }
}
