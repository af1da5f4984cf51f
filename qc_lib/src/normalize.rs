//! Normalization of one MultiQC report.
//!
//! The raw document maps `report_saved_raw_data -> section -> sample label
//! -> field -> scalar`. [`ReportNormalizer::normalize`] turns it into typed
//! per-sample data keyed by resolved sample id and tool, using the assay and
//! tool configuration.

use crate::metadata::{ReportIds, ReportMetadata};
use crate::sample_name::{merge_overlapping_sample_ids, parse_label, Absorb};
use crate::source::MetadataLookup;
use crate::store::Storage;
use anyhow::{Context, Result};
use log::debug;
use qc_config::{ConfigDir, ToolDefinition};
use qc_types::{coerce, HappyType, Messages, QcValue, Table, TableDescriptor, ToolKey};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Top-level key holding the assay name.
pub const ASSAY_KEY: &str = "config_subtitle";
/// Top-level key holding the per-section raw data.
pub const RAW_DATA_KEY: &str = "report_saved_raw_data";
/// Sample label MultiQC uses for reads that matched no sample.
const UNDETERMINED_SAMPLE: &str = "undetermined";

pub type Fields = BTreeMap<String, QcValue>;

/// Sequencing lane and read of one lane/read divided record, e.g. `L001`, `R1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LaneRead {
    pub lane: String,
    pub read: String,
}

impl fmt::Display for LaneRead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.lane, self.read)
    }
}

/// Data of one tool for one sample.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolData {
    Fields(Fields),
    LaneRead(BTreeMap<LaneRead, Fields>),
}

/// Everything reported for one sample, by tool.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedSample {
    pub tools: BTreeMap<ToolKey, ToolData>,
}

impl Absorb for NormalizedSample {
    fn absorb(&mut self, other: Self) {
        for (key, data) in other.tools {
            let data = match (self.tools.get_mut(&key), data) {
                (Some(ToolData::LaneRead(mine)), ToolData::LaneRead(theirs)) => {
                    mine.extend(theirs);
                    continue;
                }
                (_, data) => data,
            };
            self.tools.insert(key, data);
        }
    }
}

/// Progress of one report through normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportState {
    Created,
    MetadataResolved,
    ToolsConfigured,
    Parsed,
    SampleNamesRepaired,
    Importable,
    NotImportable(String),
}

/// Outcome of normalizing one report.
#[derive(Debug, Clone)]
pub struct NormalizedReport {
    pub ids: ReportIds,
    pub assay: Option<String>,
    pub metadata: Option<ReportMetadata>,
    /// Storage table of every tool key found in the data, `None` for tools
    /// without one.
    pub descriptors: BTreeMap<ToolKey, Option<TableDescriptor>>,
    pub samples: BTreeMap<String, NormalizedSample>,
    pub state: ReportState,
    pub messages: Messages,
}

impl NormalizedReport {
    fn new(ids: ReportIds) -> Self {
        NormalizedReport {
            messages: Messages::new(ids.file_id.clone()),
            ids,
            assay: None,
            metadata: None,
            descriptors: BTreeMap::new(),
            samples: BTreeMap::new(),
            state: ReportState::Created,
        }
    }

    pub fn is_importable(&self) -> bool {
        self.state == ReportState::Importable
    }

    fn reject(mut self, reason: &str, message: String) -> Self {
        self.messages.warn(message);
        self.state = ReportState::NotImportable(reason.to_string());
        self
    }
}

/// A configured tool together with the section it reads.
struct SectionTool<'a> {
    section: &'a Map<String, Value>,
    tool: ToolDefinition,
}

pub struct ReportNormalizer<'a> {
    config: &'a ConfigDir,
    lookup: &'a dyn MetadataLookup,
    store: &'a dyn Storage,
}

impl<'a> ReportNormalizer<'a> {
    pub fn new(
        config: &'a ConfigDir,
        lookup: &'a dyn MetadataLookup,
        store: &'a dyn Storage,
    ) -> Self {
        ReportNormalizer {
            config,
            lookup,
            store,
        }
    }

    /// Normalize the MultiQC document `data`.
    ///
    /// Data problems end in [`ReportState::NotImportable`] with a message
    /// saying why. An assay name missing from the configuration is returned
    /// as a [`qc_config::ConfigError::AssayNotFound`] error, as are
    /// unreadable documents and metadata lookup failures.
    pub fn normalize(
        &self,
        ids: ReportIds,
        source_name: &str,
        data: &[u8],
    ) -> Result<NormalizedReport> {
        let mut report = NormalizedReport::new(ids);

        // Created -> MetadataResolved. A document without an assay name is
        // rejected before any platform lookup.
        let document: Value = serde_json::from_slice(data)
            .with_context(|| format!("parsing the MultiQC data of {}", report.ids.file_id))?;
        let assay = document
            .get(ASSAY_KEY)
            .and_then(Value::as_str)
            .filter(|a| !a.is_empty());
        let Some(assay) = assay else {
            return Ok(report.reject(
                "missing assay key",
                format!("the MultiQC JSON has no assay name ('{ASSAY_KEY}'), skipping"),
            ));
        };
        report.assay = Some(assay.to_string());

        let metadata =
            ReportMetadata::resolve(&report.ids, source_name, self.lookup, &mut report.messages)?;
        let file_id = QcValue::from(metadata.dnanexus_file_id.as_str());
        let name = QcValue::from(metadata.name.as_str());
        let filter = [("dnanexus_file_id", file_id), ("name", name)];
        let already_imported = self.store.exists(Table::Report, &filter)?;
        report.metadata = Some(metadata);
        if already_imported {
            let message = format!(
                "{} has already been imported in the database, skipping",
                report.ids.file_id
            );
            return Ok(report.reject("already imported", message));
        }

        let assay_definition = self.config.load_assay_definition(assay)?;
        report.state = ReportState::MetadataResolved;

        // MetadataResolved -> ToolsConfigured
        let empty = Map::new();
        let raw_data = document
            .get(RAW_DATA_KEY)
            .and_then(Value::as_object)
            .unwrap_or(&empty);

        let mut tools = Vec::new();
        let mut config_failed = false;
        for entry in &assay_definition.entries {
            let field = &entry.multiqc_field;
            let Some(section) = raw_data.get(field) else {
                report
                    .messages
                    .warn(format!("{field} is not present in the report"));
                continue;
            };
            let Some(section) = section.as_object() else {
                report
                    .messages
                    .warn(format!("{field} is not a mapping of samples, skipping"));
                continue;
            };
            match self
                .config
                .load_tool_definition(&entry.tool, entry.subtool.as_deref())
            {
                Ok(tool) => tools.push(SectionTool { section, tool }),
                Err(e) => {
                    report.messages.error(e.to_string());
                    config_failed = true;
                }
            }
        }
        if config_failed {
            report.state = ReportState::NotImportable("tool configuration missing".to_string());
            return Ok(report);
        }
        if tools.is_empty() {
            return Ok(report.reject(
                "no tool data",
                format!("none of the sections of assay '{assay}' are present in the report"),
            ));
        }
        if tools.iter().all(|t| t.tool.binding.is_none()) {
            return Ok(report.reject(
                "no storage table",
                format!("none of the tools of assay '{assay}' map to a storage table"),
            ));
        }
        report.state = ReportState::ToolsConfigured;

        // ToolsConfigured -> Parsed
        let mut samples: BTreeMap<String, NormalizedSample> = BTreeMap::new();
        for SectionTool { section, tool } in &tools {
            for (label, record) in section.iter() {
                if label == UNDETERMINED_SAMPLE {
                    continue;
                }
                self.parse_record(&mut report, &mut samples, tool, label, record);
            }
        }
        report.state = ReportState::Parsed;

        // Parsed -> SampleNamesRepaired
        report.samples = merge_overlapping_sample_ids(samples)?;
        report.state = ReportState::SampleNamesRepaired;

        if report.samples.is_empty() {
            return Ok(report.reject(
                "no sample data",
                "no sample data found in the report".to_string(),
            ));
        }
        report.state = ReportState::Importable;
        Ok(report)
    }

    /// Add the record of `label` for `tool` to `samples`.
    fn parse_record(
        &self,
        report: &mut NormalizedReport,
        samples: &mut BTreeMap<String, NormalizedSample>,
        tool: &ToolDefinition,
        label: &str,
        record: &Value,
    ) {
        let Some(record) = record.as_object() else {
            report
                .messages
                .warn(format!("{}: data of {label} is not a mapping, skipping", tool.key));
            return;
        };

        let (key, descriptor) = match tool.discriminator_field() {
            Some(field) => {
                let happy_type = record
                    .get(field)
                    .and_then(Value::as_str)
                    .and_then(HappyType::from_filter)
                    .or_else(|| HappyType::from_label(label));
                let Some(happy_type) = happy_type else {
                    report.messages.warn(format!(
                        "{}: cannot tell whether {label} holds PASS or ALL results, skipping",
                        tool.key
                    ));
                    return;
                };
                let key = tool.key.with_happy_type(happy_type);
                let descriptor = tool.resolve(Some(happy_type)).map(|(_, d)| d);
                (key, descriptor)
            }
            None => (tool.key.clone(), tool.resolve(None).map(|(_, d)| d)),
        };

        let fields: Fields = tool
            .field_map
            .convert(record)
            .into_iter()
            .map(|(field, value)| (field, coerce(&value)))
            .collect();

        let sample = parse_label(label, tool.divided_by_lane_read());
        if sample.sample_id.is_empty() {
            report
                .messages
                .warn(format!("{}: no sample id in label '{label}', skipping", tool.key));
            return;
        }

        if tool.divided_by_lane_read() && !sample.has_lane_read() {
            report.messages.warn(format!(
                "{}: no lane and read in label '{label}', skipping",
                tool.key
            ));
            return;
        }

        let sample_tools = &mut samples.entry(sample.sample_id.clone()).or_default().tools;
        if tool.divided_by_lane_read() {
            let lane_read = LaneRead {
                lane: sample.lane,
                read: sample.read,
            };
            match sample_tools
                .entry(key.clone())
                .or_insert_with(|| ToolData::LaneRead(BTreeMap::new()))
            {
                ToolData::LaneRead(by_lane_read) => {
                    by_lane_read.insert(lane_read, fields);
                }
                other => *other = ToolData::LaneRead(BTreeMap::from([(lane_read, fields)])),
            }
        } else {
            debug!(
                "{}: {key} data for {}",
                report.ids.file_id, sample.sample_id
            );
            sample_tools.insert(key.clone(), ToolData::Fields(fields));
        }
        report.descriptors.insert(key, descriptor);
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use crate::source::{JobDescription, MetadataLookup};
    use anyhow::Result;
    use std::fs;
    use tempfile::TempDir;

    pub const ASSAYS: &str = r#"{
        "Test Assay": {
            "multiqc_samtools_flagstat": ["samtools_flagstat", null],
            "multiqc_fastqc": ["fastqc", null],
            "multiqc_happy_snp_data": ["happy", "snp"],
            "multiqc_picard_HsMetrics": ["picard", "hsmetrics"],
            "multiqc_not_run": ["verifybamid", null]
        },
        "Broken Assay": {
            "multiqc_samtools_flagstat": ["samtools_flagstat", null],
            "multiqc_sompy": ["sompy", null]
        }
    }"#;

    pub const TOOLS: &[(&str, &str)] = &[
        (
            "samtools_flagstat",
            r#"{"total_passed": "total_passed", "flagstat_total": "flagstat_total"}"#,
        ),
        (
            "fastqc",
            r#"{"Total Sequences": "total_sequences", "%GC": "gc_pct"}"#,
        ),
        (
            "happy",
            r#"{"snp": {"Filter": "filter_snp", "METRIC.Recall": "metric_recall_snp"}}"#,
        ),
        (
            "picard",
            r#"{"hsmetrics": {"FOLD_ENRICHMENT": "fold_enrichment"}}"#,
        ),
        ("verifybamid", r#"{"FREEMIX": "freemix"}"#),
    ];

    /// Configuration directory with a "Test Assay".
    pub fn config_dir() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("assays.json"), ASSAYS).unwrap();
        let tool_dir = dir.path().join("tool_configs");
        fs::create_dir(&tool_dir).unwrap();
        for (tool, contents) in TOOLS {
            fs::write(tool_dir.join(format!("{tool}.json")), contents).unwrap();
        }
        dir
    }

    pub struct Lookup;

    impl MetadataLookup for Lookup {
        fn project_name(&self, _project_id: &str) -> Result<String> {
            Ok("002_230412_A01295_CEN".to_string())
        }

        fn describe_job(&self, _job_id: &str) -> Result<JobDescription> {
            Ok(JobDescription {
                created_ms: 1_681_300_000_000,
                html_report_name: Some("multiqc_report.html".to_string()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_utils::{config_dir, Lookup};
    use super::*;
    use crate::source::JobDescription;
    use crate::store::MemoryStore;
    use anyhow::bail;
    use pretty_assertions::assert_eq;
    use qc_config::ConfigError;
    use qc_types::Severity;
    use serde_json::json;

    fn ids() -> ReportIds {
        ReportIds {
            file_id: "file-1".to_string(),
            project_id: "project-1".to_string(),
            job_id: "job-1".to_string(),
        }
    }

    fn normalize(config: &ConfigDir, document: &Value) -> Result<NormalizedReport> {
        let store = MemoryStore::new();
        ReportNormalizer::new(config, &Lookup, &store).normalize(
            ids(),
            "multiqc_data.json",
            document.to_string().as_bytes(),
        )
    }

    fn warnings(report: &NormalizedReport) -> Vec<String> {
        report
            .messages
            .with_severity(Severity::Warning)
            .map(|m| m.text.clone())
            .collect()
    }

    #[test]
    fn test_normalize() {
        let dir = config_dir();
        let config = ConfigDir::new(dir.path());
        let document = json!({
            "config_subtitle": "Test Assay",
            "report_saved_raw_data": {
                "multiqc_samtools_flagstat": {
                    "S1_S1": {"total_passed": 100, "flagstat_total": "NA", "ignored": 1},
                    "undetermined": {"total_passed": 5}
                },
                "multiqc_fastqc": {
                    "S1_S1_L001_R1": {"Total Sequences": 10.0, "%GC": "41"},
                    "S1_S1_L001_R2": {"Total Sequences": 11.0, "%GC": "42"}
                },
                "multiqc_happy_snp_data": {
                    "S1_SNP_PASS": {"Filter": "PASS", "METRIC.Recall": "0.99"},
                    "S1_SNP_ALL": {"Filter": "ALL", "METRIC.Recall": "0.97"}
                },
                "multiqc_picard_HsMetrics": {
                    "S1_sorted": {"FOLD_ENRICHMENT": "?"}
                }
            }
        });
        let report = normalize(&config, &document).unwrap();
        assert!(report.is_importable());
        assert!(!report.messages.has_errors());
        assert_eq!(
            warnings(&report),
            vec!["multiqc_not_run is not present in the report"]
        );

        assert_eq!(report.samples.keys().collect::<Vec<_>>(), vec!["S1"]);
        let s1 = &report.samples["S1"];
        assert_eq!(
            s1.tools[&ToolKey::new("samtools_flagstat", None)],
            ToolData::Fields(BTreeMap::from([
                ("flagstat_total".to_string(), QcValue::Null),
                ("total_passed".to_string(), QcValue::Int(100)),
            ]))
        );
        let ToolData::LaneRead(fastqc) = &s1.tools[&ToolKey::new("fastqc", None)] else {
            panic!("fastqc is not split by lane and read");
        };
        assert_eq!(fastqc.len(), 2);
        assert_eq!(
            fastqc[&LaneRead {
                lane: "L001".to_string(),
                read: "R2".to_string()
            }]["gc_pct"],
            QcValue::Int(42)
        );

        let snp = ToolKey::new("happy", Some("snp"));
        let ToolData::Fields(pass) = &s1.tools[&snp.with_happy_type(HappyType::Pass)] else {
            panic!("happy data is not flat");
        };
        assert_eq!(pass["metric_recall_snp"], QcValue::Float(0.99));
        let all = snp.with_happy_type(HappyType::All);
        assert!(s1.tools.contains_key(&all));
        assert_eq!(
            report.descriptors[&all].map(|d| d.table),
            Some(Table::HappySnpAll)
        );
        assert_eq!(report.metadata.unwrap().name, "multiqc_report.html");
    }

    #[test]
    fn test_missing_assay_key() {
        let dir = config_dir();
        let config = ConfigDir::new(dir.path());
        let report = normalize(&config, &json!({"report_saved_raw_data": {}})).unwrap();
        assert!(!report.is_importable());
        assert_eq!(
            report.state,
            ReportState::NotImportable("missing assay key".to_string())
        );
        assert!(warnings(&report)[0].contains("config_subtitle"));
    }

    /// Lookup for reports whose project and job are gone from the platform.
    struct FailingLookup;

    impl MetadataLookup for FailingLookup {
        fn project_name(&self, project_id: &str) -> Result<String> {
            bail!("project {project_id} not found")
        }

        fn describe_job(&self, job_id: &str) -> Result<JobDescription> {
            bail!("job {job_id} not found")
        }
    }

    #[test]
    fn test_missing_assay_key_needs_no_metadata() {
        let dir = config_dir();
        let config = ConfigDir::new(dir.path());
        let store = MemoryStore::new();
        let document = json!({"report_saved_raw_data": {}});
        let report = ReportNormalizer::new(&config, &FailingLookup, &store)
            .normalize(ids(), "multiqc_data.json", document.to_string().as_bytes())
            .unwrap();
        assert_eq!(
            report.state,
            ReportState::NotImportable("missing assay key".to_string())
        );
        assert!(report.metadata.is_none());
        assert!(!report.messages.has_errors());

        let document = json!({"config_subtitle": "Test Assay", "report_saved_raw_data": {}});
        assert!(ReportNormalizer::new(&config, &FailingLookup, &store)
            .normalize(ids(), "multiqc_data.json", document.to_string().as_bytes())
            .is_err());
    }

    #[test]
    fn test_unknown_assay() {
        let dir = config_dir();
        let config = ConfigDir::new(dir.path());
        let err = normalize(&config, &json!({"config_subtitle": "Unknown"})).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::AssayNotFound { .. })
        ));
    }

    #[test]
    fn test_missing_tool_config() {
        let dir = config_dir();
        let config = ConfigDir::new(dir.path());
        let document = json!({
            "config_subtitle": "Broken Assay",
            "report_saved_raw_data": {
                "multiqc_samtools_flagstat": {"S1": {"total_passed": 1}},
                "multiqc_sompy": {"S1": {"SNVs_recall": 1}}
            }
        });
        let report = normalize(&config, &document).unwrap();
        assert!(!report.is_importable());
        assert!(report.messages.has_errors());
    }

    #[test]
    fn test_happy_without_discriminator_is_skipped() {
        let dir = config_dir();
        let config = ConfigDir::new(dir.path());
        let document = json!({
            "config_subtitle": "Test Assay",
            "report_saved_raw_data": {
                "multiqc_samtools_flagstat": {"S1_S1": {"total_passed": 1}},
                "multiqc_happy_snp_data": {"S1": {"METRIC.Recall": "0.5"}},
                "multiqc_fastqc": {"S1_R1": {"Total Sequences": 3}}
            }
        });
        let report = normalize(&config, &document).unwrap();
        assert!(report.is_importable());
        let s1 = &report.samples["S1"];
        assert_eq!(s1.tools.len(), 1);
        let w = warnings(&report);
        assert!(w.iter().any(|m| m.contains("PASS or ALL")));
        assert!(w.iter().any(|m| m.contains("no lane and read")));
    }

    #[test]
    fn test_already_imported() {
        let dir = config_dir();
        let config = ConfigDir::new(dir.path());
        let mut store = MemoryStore::new();
        let report = qc_types::StorageRecord::new(Table::Report, "report")
            .with_value("dnanexus_file_id", "file-1")
            .with_value("name", "multiqc_report.html");
        store.insert_many(&[report]).unwrap();

        let document = json!({"config_subtitle": "Test Assay", "report_saved_raw_data": {}});
        let report = ReportNormalizer::new(&config, &Lookup, &store)
            .normalize(ids(), "multiqc_data.json", document.to_string().as_bytes())
            .unwrap();
        assert_eq!(
            report.state,
            ReportState::NotImportable("already imported".to_string())
        );
    }

    #[test]
    fn test_absorb_merges_lanes() {
        let key = ToolKey::new("fastqc", None);
        let lane = |l: &str| LaneRead {
            lane: l.to_string(),
            read: "R1".to_string(),
        };
        let mut a = NormalizedSample::default();
        a.tools.insert(
            key.clone(),
            ToolData::LaneRead(BTreeMap::from([(lane("L001"), Fields::new())])),
        );
        let mut b = NormalizedSample::default();
        b.tools.insert(
            key.clone(),
            ToolData::LaneRead(BTreeMap::from([(lane("L002"), Fields::new())])),
        );
        b.tools.insert(
            ToolKey::new("somalier", None),
            ToolData::Fields(Fields::new()),
        );
        a.absorb(b);
        assert_eq!(a.tools.len(), 2);
        let ToolData::LaneRead(lanes) = &a.tools[&key] else {
            panic!("expected lane/read data");
        };
        assert_eq!(lanes.len(), 2);
    }
}
