//! Assay definitions: which MultiQC sections an assay's reports carry, and
//! which tool produced each of them.

use crate::{read_json, ConfigDir, ConfigError};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;

/// One MultiQC section of an assay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssayEntry {
    /// Key under `report_saved_raw_data`, e.g. `multiqc_picard_HsMetrics`.
    pub multiqc_field: String,
    pub tool: String,
    pub subtool: Option<String>,
}

/// The sections of one assay, in configuration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssayDefinition {
    pub name: String,
    pub entries: Vec<AssayEntry>,
}

impl ConfigDir {
    /// Load the definition of `assay` from `assays.json`.
    pub fn load_assay_definition(&self, assay: &str) -> Result<AssayDefinition, ConfigError> {
        let path = self.assays_file();
        let all = read_json(&path)?;
        let section = all
            .as_object()
            .ok_or_else(|| invalid(&path, "expected an object keyed by assay name"))?
            .get(assay)
            .ok_or_else(|| ConfigError::AssayNotFound {
                assay: assay.to_string(),
                path: path.clone(),
            })?;
        parse_assay(&path, assay, section)
    }

    /// Load every assay in `assays.json`, in file order.
    pub fn load_all_assays(&self) -> Result<Vec<AssayDefinition>, ConfigError> {
        let path = self.assays_file();
        let all = read_json(&path)?;
        all.as_object()
            .ok_or_else(|| invalid(&path, "expected an object keyed by assay name"))?
            .iter()
            .map(|(name, section)| parse_assay(&path, name, section))
            .collect()
    }
}

fn invalid(path: &Path, detail: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        path: path.to_path_buf(),
        detail: detail.into(),
    }
}

/// Parse `{ multiqc_field: [tool, subtool|null] }`.
fn parse_assay(path: &Path, name: &str, section: &Value) -> Result<AssayDefinition, ConfigError> {
    let fields = section
        .as_object()
        .ok_or_else(|| invalid(path, format!("assay '{name}' is not an object")))?;

    let entries = fields
        .iter()
        .map(|(multiqc_field, tool_metadata)| {
            let (tool, subtool): (String, Option<String>) =
                serde_json::from_value(tool_metadata.clone()).map_err(|_| {
                    invalid(
                        path,
                        format!(
                            "'{name}' -> '{multiqc_field}' should be [tool, subtool or null], \
                             got {tool_metadata}"
                        ),
                    )
                })?;
            Ok(AssayEntry {
                multiqc_field: multiqc_field.clone(),
                tool,
                subtool,
            })
        })
        .collect::<Result<Vec<_>, ConfigError>>()?;

    Ok(AssayDefinition {
        name: name.to_string(),
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::config_dir;
    use pretty_assertions::assert_eq;

    const ASSAYS: &str = r#"{
        "Test Assay": {
            "multiqc_samtools_flagstat": ["samtools_flagstat", null],
            "multiqc_picard_HsMetrics": ["picard", "hsmetrics"],
            "multiqc_fastqc": ["fastqc", null]
        },
        "Broken": {"multiqc_fastqc": "fastqc"}
    }"#;

    #[test]
    fn test_load_assay_keeps_order() {
        let dir = config_dir(ASSAYS, &[]);
        let config = ConfigDir::new(dir.path());
        let assay = config.load_assay_definition("Test Assay").unwrap();
        assert_eq!(assay.name, "Test Assay");
        assert_eq!(
            assay.entries,
            vec![
                AssayEntry {
                    multiqc_field: "multiqc_samtools_flagstat".to_string(),
                    tool: "samtools_flagstat".to_string(),
                    subtool: None,
                },
                AssayEntry {
                    multiqc_field: "multiqc_picard_HsMetrics".to_string(),
                    tool: "picard".to_string(),
                    subtool: Some("hsmetrics".to_string()),
                },
                AssayEntry {
                    multiqc_field: "multiqc_fastqc".to_string(),
                    tool: "fastqc".to_string(),
                    subtool: None,
                },
            ]
        );
    }

    #[test]
    fn test_unknown_assay() {
        let dir = config_dir(ASSAYS, &[]);
        let config = ConfigDir::new(dir.path());
        let err = config.load_assay_definition("Unknown assay").unwrap_err();
        match err {
            ConfigError::AssayNotFound { assay, .. } => assert_eq!(assay, "Unknown assay"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_malformed_entry() {
        let dir = config_dir(ASSAYS, &[]);
        let config = ConfigDir::new(dir.path());
        let err = config.load_assay_definition("Broken").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        assert!(config.load_all_assays().is_err());
    }

    #[test]
    fn test_missing_assays_file() {
        let config = ConfigDir::new("/nonexistent/trendyqc/configs");
        assert!(matches!(
            config.load_assay_definition("Test Assay"),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_bundled_assays_parse() {
        let assays = ConfigDir::bundled().load_all_assays().unwrap();
        assert!(!assays.is_empty());
        assert!(assays.iter().all(|a| !a.entries.is_empty()));
    }
}
