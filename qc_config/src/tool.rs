//! Tool definitions: field-name translation plus the storage binding of a
//! `(tool, subtool)` pair.

use crate::{read_json, ConfigDir, ConfigError};
use qc_types::table::{registry, HappyType, LinkTable, TableDescriptor, ToolKey};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// Placeholder given to declared fields a tool forgot to report.
const MISSING_FIELD_VALUE: &str = "NA";

/// Translation of a tool's MultiQC field names into storage column names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolFieldMap {
    fields: Vec<(String, String)>,
}

impl ToolFieldMap {
    fn from_object(path: &Path, object: &Map<String, Value>) -> Result<Self, ConfigError> {
        let fields = object
            .iter()
            .map(|(multiqc_field, canonical)| match canonical.as_str() {
                Some(c) => Ok((multiqc_field.clone(), c.to_string())),
                None => Err(ConfigError::Invalid {
                    path: path.to_path_buf(),
                    detail: format!(
                        "field '{multiqc_field}' maps to {canonical}, expected a string"
                    ),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ToolFieldMap { fields })
    }

    pub fn canonical(&self, multiqc_field: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(m, _)| m == multiqc_field)
            .map(|(_, c)| c.as_str())
    }

    pub fn canonical_fields(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(_, c)| c.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Rename the fields of one raw MultiQC record, dropping undeclared ones.
    ///
    /// Some tools omit fields they usually report. When a record carries some
    /// but not all of the declared fields, the missing ones are filled with
    /// `"NA"` so every row of a table has the same columns.
    pub fn convert(&self, record: &Map<String, Value>) -> BTreeMap<String, Value> {
        let mut converted: BTreeMap<String, Value> = record
            .iter()
            .filter_map(|(field, value)| Some((self.canonical(field)?.to_string(), value.clone())))
            .collect();

        let present = self
            .canonical_fields()
            .filter(|c| converted.contains_key(*c))
            .count();
        if present > 0 && present < self.len() {
            for canonical in self.canonical_fields() {
                converted
                    .entry(canonical.to_string())
                    .or_insert_with(|| Value::String(MISSING_FIELD_VALUE.to_string()));
            }
        }
        converted
    }
}

/// Where the records of a tool are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableBinding {
    Single(TableDescriptor),
    /// hap.py: the `Filter` column of each record picks the table.
    ByHappyType {
        pass: TableDescriptor,
        all: TableDescriptor,
    },
}

/// A configured tool: its field map and, when known, its storage binding.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub key: ToolKey,
    pub field_map: Arc<ToolFieldMap>,
    /// `None` when no storage table is registered for this tool.
    pub binding: Option<TableBinding>,
}

impl ToolDefinition {
    pub fn name(&self) -> &str {
        &self.key.tool
    }

    pub fn subtool(&self) -> Option<&str> {
        self.key.subtool.as_deref()
    }

    fn any_descriptor(&self) -> Option<&TableDescriptor> {
        match self.binding.as_ref()? {
            TableBinding::Single(d) => Some(d),
            TableBinding::ByHappyType { pass, .. } => Some(pass),
        }
    }

    /// Link table embedding this tool's table, `None` for `report_sample`.
    pub fn parent(&self) -> Option<LinkTable> {
        self.any_descriptor().and_then(|d| d.parent)
    }

    pub fn divided_by_lane_read(&self) -> bool {
        self.any_descriptor().is_some_and(|d| d.lane_read)
    }

    /// Raw field holding the PASS/ALL discriminator, for tools that have one.
    pub fn discriminator_field(&self) -> Option<&'static str> {
        match self.binding {
            Some(TableBinding::ByHappyType { .. }) => Some(HappyType::DISCRIMINATOR_FIELD),
            _ => None,
        }
    }

    /// Tool key and descriptor of the records of one variant.
    pub fn resolve(&self, happy_type: Option<HappyType>) -> Option<(ToolKey, TableDescriptor)> {
        match (self.binding?, happy_type) {
            (TableBinding::Single(d), None) => Some((self.key.clone(), d)),
            (TableBinding::ByHappyType { pass, all }, Some(happy_type)) => {
                let descriptor = match happy_type {
                    HappyType::Pass => pass,
                    HappyType::All => all,
                };
                Some((self.key.with_happy_type(happy_type), descriptor))
            }
            _ => None,
        }
    }
}

type FieldMapCache = Mutex<HashMap<(PathBuf, Option<String>), Arc<ToolFieldMap>>>;

/// Field maps are static for the lifetime of the process.
static FIELD_MAPS: OnceLock<FieldMapCache> = OnceLock::new();

impl ConfigDir {
    /// Load the field map of `(tool, subtool)` and bind it to its table.
    pub fn load_tool_definition(
        &self,
        tool: &str,
        subtool: Option<&str>,
    ) -> Result<ToolDefinition, ConfigError> {
        let field_map = self.load_field_map(tool, subtool)?;
        let registry = registry().map_err(|e| ConfigError::Registry(format!("{e:#}")))?;
        let key = ToolKey::new(tool, subtool);

        let binding = if registry.has_variants(tool, subtool) {
            let pass = registry.descriptor(&key.with_happy_type(HappyType::Pass));
            let all = registry.descriptor(&key.with_happy_type(HappyType::All));
            match (pass, all) {
                (Some(&pass), Some(&all)) => Some(TableBinding::ByHappyType { pass, all }),
                _ => None,
            }
        } else {
            registry.descriptor(&key).copied().map(TableBinding::Single)
        };

        Ok(ToolDefinition {
            key,
            field_map,
            binding,
        })
    }

    fn load_field_map(
        &self,
        tool: &str,
        subtool: Option<&str>,
    ) -> Result<Arc<ToolFieldMap>, ConfigError> {
        let path = self.tool_file(tool);
        let cache_key = (path.clone(), subtool.map(String::from));
        let cache = FIELD_MAPS.get_or_init(Default::default);

        if let Some(cached) = cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&cache_key)
        {
            return Ok(cached.clone());
        }

        if !path.is_file() {
            return Err(ConfigError::ToolNotFound {
                tool: tool.to_string(),
                path,
            });
        }
        let contents = read_json(&path)?;
        let object = contents.as_object().ok_or_else(|| ConfigError::Invalid {
            path: path.clone(),
            detail: "expected an object".to_string(),
        })?;

        let fields = match subtool {
            None => object,
            Some(subtool) => object
                .get(subtool)
                .and_then(Value::as_object)
                .ok_or_else(|| ConfigError::SubtoolNotFound {
                    tool: tool.to_string(),
                    subtool: subtool.to_string(),
                    path: path.clone(),
                })?,
        };
        let field_map = Arc::new(ToolFieldMap::from_object(&path, fields)?);

        cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(cache_key, field_map.clone());
        Ok(field_map)
    }
}
