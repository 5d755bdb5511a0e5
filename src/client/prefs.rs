//! Local UI preferences, stored as a flat JSON object of string keys.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;

/// Whether the sidebar is collapsed.
pub const SIDEBAR_COLLAPSED_KEY: &str = "benos.sidebar.collapsed";

const PREFS_FILE: &str = "preferences.json";

/// `<config dir>/benos/preferences.json`.
pub fn default_path() -> Result<PathBuf> {
    let base = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
    Ok(base.join("benos").join(PREFS_FILE))
}

#[derive(Debug, Clone)]
pub struct Preferences {
    path: PathBuf,
    values: BTreeMap<String, Value>,
}

impl Preferences {
    pub fn load_default() -> Result<Self> {
        Self::load(&default_path()?)
    }

    /// Load from `path`. A missing file yields empty preferences; a corrupt
    /// one is logged and ignored.
    pub fn load(path: &Path) -> Result<Self> {
        let values = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            match serde_json::from_str(&raw) {
                Ok(values) => values,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable preferences");
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            values,
        })
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: &str, value: Value) -> Result<()> {
        self.values.insert(key.to_string(), value);
        self.save()
    }

    pub fn sidebar_collapsed(&self) -> bool {
        self.get(SIDEBAR_COLLAPSED_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn set_sidebar_collapsed(&mut self, collapsed: bool) -> Result<()> {
        self.set(SIDEBAR_COLLAPSED_KEY, Value::Bool(collapsed))
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let raw = serde_json::to_string_pretty(&self.values)?;
        std::fs::write(&self.path, raw)
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }
}
