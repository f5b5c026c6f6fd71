//! Dialogue script files.
//!
//! A script is TOML with one `[[node]]` table per dialogue row and optional
//! `[[intent]]` tables mapping phrases to entry keys:
//!
//! ```toml
//! [[node]]
//! category = "GREETA"
//! item = 1
//! text = "Good {time-of-day}! Can I help you?"
//! action = "yesNo"
//! next = "YES-HELP-1|NO-BYE-1"
//!
//! [[intent]]
//! tag = "delivery"
//! patterns = ["package", "delivery", "parcel"]
//! key = "DELIV-1"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One row of the dialogue table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptRow {
    /// Falls back to the graph's default language when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub category: String,
    pub item: u32,
    pub text: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub next: String,
}

/// Phrases that route free speech to a dialogue entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentRow {
    pub tag: String,
    #[serde(default)]
    pub patterns: Vec<String>,
    pub key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    #[serde(default, rename = "node")]
    pub nodes: Vec<ScriptRow>,
    #[serde(default, rename = "intent")]
    pub intents: Vec<IntentRow>,
}

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("Failed to read dialogue script {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse dialogue script {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Dialogue row {index} is invalid: {reason}")]
    InvalidRow { index: usize, reason: String },
}

impl Script {
    pub fn load(path: &Path) -> Result<Self, ScriptError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ScriptError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&contents, path)
    }

    pub fn parse(contents: &str, path: &Path) -> Result<Self, ScriptError> {
        let script: Script = toml::from_str(contents).map_err(|e| ScriptError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        script.validate()?;
        Ok(script)
    }

    fn validate(&self) -> Result<(), ScriptError> {
        for (index, row) in self.nodes.iter().enumerate() {
            let invalid = |reason: &str| ScriptError::InvalidRow {
                index,
                reason: reason.to_string(),
            };
            if row.category.trim().is_empty() {
                return Err(invalid("empty category"));
            }
            if row.category.contains('-') {
                return Err(invalid("category may not contain '-'"));
            }
            if row.item == 0 {
                return Err(invalid("item 0 is reserved for random picks"));
            }
        }
        Ok(())
    }
}
