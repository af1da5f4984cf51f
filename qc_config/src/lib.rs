// Warning groups (as of rust 1.55)
#![deny(
    future_incompatible,
    nonstandard_style,
    rust_2018_compatibility,
    rust_2021_compatibility,
    rust_2018_idioms,
    unused
)]

//!
//! Static configuration of the ingestion pipeline.
//!
//! The configuration directory holds `assays.json`, which lists for every
//! assay the MultiQC sections to import and the tool behind each, and one
//! `tool_configs/<tool>.json` per tool mapping MultiQC field names to storage
//! column names.
//!

use log::info;
use std::path::{Path, PathBuf};

pub mod assay;
pub mod tool;

pub use assay::{AssayDefinition, AssayEntry};
pub use tool::{TableBinding, ToolDefinition, ToolFieldMap};

/// Environment variable overriding the bundled configuration directory.
pub const CONFIG_DIR_ENV: &str = "TRENDYQC_CONFIG_DIR";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("assay '{assay}' is not present in the assay config file {}", path.display())]
    AssayNotFound { assay: String, path: PathBuf },

    #[error("no tool config for '{tool}' at {}", path.display())]
    ToolNotFound { tool: String, path: PathBuf },

    #[error("tool config {} has no section for subtool '{subtool}' of '{tool}'", path.display())]
    SubtoolNotFound {
        tool: String,
        subtool: String,
        path: PathBuf,
    },

    #[error("could not read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid content in {}: {detail}", path.display())]
    Invalid { path: PathBuf, detail: String },

    #[error("{0}")]
    Registry(String),
}

/// Location of the static configuration files.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfigDir(PathBuf);

impl ConfigDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ConfigDir(path.into())
    }

    /// The `configs` directory shipped with this crate.
    pub fn bundled() -> Self {
        ConfigDir(Path::new(env!("CARGO_MANIFEST_DIR")).join("configs"))
    }

    /// Explicit path, then `TRENDYQC_CONFIG_DIR`, then the bundled directory.
    pub fn resolve(explicit: Option<&Path>) -> Self {
        let dir = if let Some(path) = explicit {
            ConfigDir::new(path)
        } else if let Some(path) = std::env::var_os(CONFIG_DIR_ENV) {
            ConfigDir::new(path)
        } else {
            ConfigDir::bundled()
        };
        info!("using configuration directory {}", dir.path().display());
        dir
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    pub fn assays_file(&self) -> PathBuf {
        self.0.join("assays.json")
    }

    pub fn tool_file(&self, tool: &str) -> PathBuf {
        self.0.join("tool_configs").join(format!("{tool}.json"))
    }
}

fn read_json(path: &Path) -> Result<serde_json::Value, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
pub(crate) mod test_utils {
    use std::fs;
    use tempfile::TempDir;

    /// Write a throwaway configuration directory.
    pub fn config_dir(assays: &str, tools: &[(&str, &str)]) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("assays.json"), assays).unwrap();
        let tool_dir = dir.path().join("tool_configs");
        fs::create_dir(&tool_dir).unwrap();
        for (tool, contents) in tools {
            fs::write(tool_dir.join(format!("{tool}.json")), contents).unwrap();
        }
        dir
    }
}
