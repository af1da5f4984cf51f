//! Static registry of the storage tables and of the tool feeding each one.
//!
//! A MultiQC section is resolved to a table through its `(tool, subtool)`
//! pair, plus the PASS/ALL variant for hap.py. The registry is validated the
//! first time it is used; an invalid registry is a programming error that
//! every caller gets to see as an `Err`.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::OnceLock;
use strum_macros::{Display, EnumIter, EnumString};

/// Every table the ingestion pipeline writes to.
#[derive(
    EnumIter,
    EnumString,
    Display,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    #[strum(to_string = "report")]
    Report,
    #[strum(to_string = "sample")]
    Sample,
    #[strum(to_string = "report_sample")]
    ReportSample,
    #[strum(to_string = "fastqc")]
    Fastqc,
    #[strum(to_string = "fastqc_read_data")]
    FastqcReadData,
    #[strum(to_string = "bcl2fastq_data")]
    Bcl2fastqData,
    #[strum(to_string = "verifybamid_data")]
    VerifybamidData,
    #[strum(to_string = "samtools_data")]
    SamtoolsData,
    #[strum(to_string = "custom_coverage")]
    CustomCoverage,
    #[strum(to_string = "picard")]
    Picard,
    #[strum(to_string = "picard_hs_metrics")]
    PicardHsMetrics,
    #[strum(to_string = "picard_alignment_summary_metrics")]
    PicardAlignmentSummaryMetrics,
    #[strum(to_string = "picard_base_distribution_by_cycle_metrics")]
    PicardBaseDistributionByCycleMetrics,
    #[strum(to_string = "picard_duplication_metrics")]
    PicardDuplicationMetrics,
    #[strum(to_string = "picard_gc_bias_metrics")]
    PicardGcBiasMetrics,
    #[strum(to_string = "picard_insert_size_metrics")]
    PicardInsertSizeMetrics,
    #[strum(to_string = "picard_quality_yield_metrics")]
    PicardQualityYieldMetrics,
    #[strum(to_string = "picard_pcr_metrics")]
    PicardPcrMetrics,
    #[strum(to_string = "somalier_data")]
    SomalierData,
    #[strum(to_string = "sompy_data")]
    SompyData,
    #[strum(to_string = "vcfqc_data")]
    VcfqcData,
    #[strum(to_string = "happy")]
    Happy,
    #[strum(to_string = "happy_snp_all")]
    HappySnpAll,
    #[strum(to_string = "happy_snp_pass")]
    HappySnpPass,
    #[strum(to_string = "happy_indel_all")]
    HappyIndelAll,
    #[strum(to_string = "happy_indel_pass")]
    HappyIndelPass,
}

impl Table {
    /// The link table family this table is, if any.
    pub fn as_link(self) -> Option<LinkTable> {
        match self {
            Table::Fastqc => Some(LinkTable::Fastqc),
            Table::Picard => Some(LinkTable::Picard),
            Table::Happy => Some(LinkTable::Happy),
            _ => None,
        }
    }
}

/// Tables that only hold foreign keys to per-subtool tables.
#[derive(
    EnumIter, Display, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
)]
pub enum LinkTable {
    #[strum(to_string = "fastqc")]
    Fastqc,
    #[strum(to_string = "picard")]
    Picard,
    #[strum(to_string = "happy")]
    Happy,
}

impl LinkTable {
    pub fn table(self) -> Table {
        match self {
            LinkTable::Fastqc => Table::Fastqc,
            LinkTable::Picard => Table::Picard,
            LinkTable::Happy => Table::Happy,
        }
    }

    /// Name of the `report_sample` column referencing this link table.
    pub fn report_sample_field(self) -> &'static str {
        match self {
            LinkTable::Fastqc => "fastqc",
            LinkTable::Picard => "picard",
            LinkTable::Happy => "happy",
        }
    }
}

/// The two result variants hap.py reports for each variant type.
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HappyType {
    #[strum(to_string = "PASS")]
    Pass,
    #[strum(to_string = "ALL")]
    All,
}

impl HappyType {
    /// Raw hap.py column holding the PASS/ALL discriminator.
    pub const DISCRIMINATOR_FIELD: &'static str = "Filter";

    /// Parse a `Filter` column value.
    pub fn from_filter(value: &str) -> Option<HappyType> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PASS" => Some(HappyType::Pass),
            "ALL" => Some(HappyType::All),
            _ => None,
        }
    }

    /// Recover the variant from a sample label such as `NA12878_INDEL_PASS`.
    pub fn from_label(label: &str) -> Option<HappyType> {
        let upper = label.to_ascii_uppercase();
        if upper.ends_with("_PASS") {
            Some(HappyType::Pass)
        } else if upper.ends_with("_ALL") {
            Some(HappyType::All)
        } else {
            None
        }
    }
}

/// Identity of the tool that produced one block of per-sample data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ToolKey {
    pub tool: String,
    pub subtool: Option<String>,
    pub happy_type: Option<HappyType>,
}

impl ToolKey {
    pub fn new(tool: &str, subtool: Option<&str>) -> Self {
        ToolKey {
            tool: tool.to_string(),
            subtool: subtool.map(String::from),
            happy_type: None,
        }
    }

    pub fn with_happy_type(&self, happy_type: HappyType) -> Self {
        ToolKey {
            happy_type: Some(happy_type),
            ..self.clone()
        }
    }
}

impl fmt::Display for ToolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tool)?;
        if let Some(subtool) = &self.subtool {
            write!(f, "/{subtool}")?;
        }
        if let Some(happy_type) = self.happy_type {
            write!(f, " ({happy_type})")?;
        }
        Ok(())
    }
}

/// Where the data of one tool is stored and how it hangs off the
/// `report_sample` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableDescriptor {
    pub table: Table,
    /// Link table holding the foreign key, `None` when `report_sample`
    /// references the table directly.
    pub parent: Option<LinkTable>,
    /// Foreign key column in the parent. Lane/read divided tables use it as
    /// the prefix of `<field>_1st_lane_R1` style columns.
    pub field: &'static str,
    /// One record per sequencing lane and read instead of one per sample.
    pub lane_read: bool,
}

struct RegistryEntry {
    tool: &'static str,
    subtool: Option<&'static str>,
    happy_type: Option<HappyType>,
    descriptor: TableDescriptor,
}

const fn leaf(
    tool: &'static str,
    subtool: Option<&'static str>,
    table: Table,
    parent: Option<LinkTable>,
    field: &'static str,
) -> RegistryEntry {
    RegistryEntry {
        tool,
        subtool,
        happy_type: None,
        descriptor: TableDescriptor {
            table,
            parent,
            field,
            lane_read: false,
        },
    }
}

const fn happy(
    subtool: &'static str,
    happy_type: HappyType,
    table: Table,
    field: &'static str,
) -> RegistryEntry {
    RegistryEntry {
        tool: "happy",
        subtool: Some(subtool),
        happy_type: Some(happy_type),
        descriptor: TableDescriptor {
            table,
            parent: Some(LinkTable::Happy),
            field,
            lane_read: false,
        },
    }
}

const PICARD: Option<LinkTable> = Some(LinkTable::Picard);

const ENTRIES: &[RegistryEntry] = &[
    RegistryEntry {
        tool: "fastqc",
        subtool: None,
        happy_type: None,
        descriptor: TableDescriptor {
            table: Table::FastqcReadData,
            parent: Some(LinkTable::Fastqc),
            field: "fastqc",
            lane_read: true,
        },
    },
    leaf("bcl2fastq", None, Table::Bcl2fastqData, None, "bcl2fastq"),
    leaf(
        "verifybamid",
        None,
        Table::VerifybamidData,
        None,
        "verifybamid",
    ),
    leaf(
        "samtools_flagstat",
        None,
        Table::SamtoolsData,
        None,
        "samtools",
    ),
    leaf(
        "custom_coverage",
        None,
        Table::CustomCoverage,
        None,
        "custom_coverage",
    ),
    leaf("somalier", None, Table::SomalierData, None, "somalier"),
    leaf("sompy", None, Table::SompyData, None, "sompy"),
    leaf("vcfqc", None, Table::VcfqcData, None, "vcfqc"),
    leaf(
        "picard",
        Some("hsmetrics"),
        Table::PicardHsMetrics,
        PICARD,
        "hs_metrics",
    ),
    leaf(
        "picard",
        Some("alignment_summary_metrics"),
        Table::PicardAlignmentSummaryMetrics,
        PICARD,
        "alignment_summary_metrics",
    ),
    leaf(
        "picard",
        Some("base_distribution_by_cycle"),
        Table::PicardBaseDistributionByCycleMetrics,
        PICARD,
        "base_distribution_by_cycle_metrics",
    ),
    leaf(
        "picard",
        Some("duplication_metrics"),
        Table::PicardDuplicationMetrics,
        PICARD,
        "duplication_metrics",
    ),
    leaf(
        "picard",
        Some("gcbias"),
        Table::PicardGcBiasMetrics,
        PICARD,
        "gc_bias_metrics",
    ),
    leaf(
        "picard",
        Some("insertsize"),
        Table::PicardInsertSizeMetrics,
        PICARD,
        "insert_size_metrics",
    ),
    leaf(
        "picard",
        Some("quality_yield_metrics"),
        Table::PicardQualityYieldMetrics,
        PICARD,
        "quality_yield_metrics",
    ),
    leaf(
        "picard",
        Some("pcr_metrics"),
        Table::PicardPcrMetrics,
        PICARD,
        "pcr_metrics",
    ),
    happy(
        "snp",
        HappyType::Pass,
        Table::HappySnpPass,
        "happy_snp_pass",
    ),
    happy("snp", HappyType::All, Table::HappySnpAll, "happy_snp_all"),
    happy(
        "indel",
        HappyType::Pass,
        Table::HappyIndelPass,
        "happy_indel_pass",
    ),
    happy(
        "indel",
        HappyType::All,
        Table::HappyIndelAll,
        "happy_indel_all",
    ),
];

/// Columns of `report_sample` that are not tool foreign keys.
const RESERVED_REPORT_SAMPLE_FIELDS: [&str; 3] = ["report", "sample", "assay"];

/// Lookup from a tool to the table its data is stored in.
pub struct TableRegistry {
    descriptors: HashMap<ToolKey, TableDescriptor>,
    /// `(tool, subtool)` pairs whose data is split into PASS/ALL variants.
    variant_tools: HashSet<(String, Option<String>)>,
    lane_read_tools: HashSet<String>,
}

static REGISTRY: OnceLock<Result<TableRegistry, String>> = OnceLock::new();

/// Return the validated global registry.
pub fn registry() -> Result<&'static TableRegistry> {
    match REGISTRY.get_or_init(|| TableRegistry::build(ENTRIES).map_err(|e| format!("{e:#}"))) {
        Ok(r) => Ok(r),
        Err(e) => Err(anyhow::anyhow!("invalid table registry: {e}")),
    }
}

impl TableRegistry {
    fn build(entries: &[RegistryEntry]) -> Result<TableRegistry> {
        let mut descriptors = HashMap::new();
        let mut variant_tools = HashSet::new();
        let mut lane_read_tools = HashSet::new();
        let mut tables = HashSet::new();
        let mut fields = HashSet::new();

        for entry in entries {
            let d = entry.descriptor;
            let key = ToolKey {
                tool: entry.tool.to_string(),
                subtool: entry.subtool.map(String::from),
                happy_type: entry.happy_type,
            };
            if d.table.as_link().is_some()
                || matches!(d.table, Table::Report | Table::Sample | Table::ReportSample)
            {
                bail!(
                    "{key} cannot store its data in the structural table {}",
                    d.table
                );
            }
            if !tables.insert(d.table) {
                bail!("table {} is fed by more than one tool", d.table);
            }
            if !fields.insert((d.parent, d.field)) {
                bail!(
                    "field {} is declared twice under {}",
                    d.field,
                    d.parent.map_or("report_sample".to_string(), |p| p.to_string())
                );
            }
            if d.parent.is_none() && RESERVED_REPORT_SAMPLE_FIELDS.contains(&d.field) {
                bail!("{key} uses the reserved report_sample field {}", d.field);
            }
            if d.lane_read {
                if d.parent.is_none() {
                    bail!("lane/read divided {key} must hang off a link table");
                }
                lane_read_tools.insert(key.tool.clone());
            }
            if key.happy_type.is_some() {
                variant_tools.insert((key.tool.clone(), key.subtool.clone()));
            }
            if descriptors.insert(key.clone(), d).is_some() {
                bail!("{key} is registered twice");
            }
        }

        // a variant tool must declare every variant, and nothing else
        for (tool, subtool) in &variant_tools {
            let base = ToolKey {
                tool: tool.clone(),
                subtool: subtool.clone(),
                happy_type: None,
            };
            if descriptors.contains_key(&base) {
                bail!("{base} is registered both with and without PASS/ALL variants");
            }
            for happy_type in [HappyType::Pass, HappyType::All] {
                if !descriptors.contains_key(&base.with_happy_type(happy_type)) {
                    bail!("{base} is missing its {happy_type} variant");
                }
            }
        }

        Ok(TableRegistry {
            descriptors,
            variant_tools,
            lane_read_tools,
        })
    }

    /// Storage descriptor of a fully resolved tool key.
    pub fn descriptor(&self, key: &ToolKey) -> Option<&TableDescriptor> {
        self.descriptors.get(key)
    }

    /// Whether the data of `(tool, subtool)` is split into PASS/ALL variants.
    pub fn has_variants(&self, tool: &str, subtool: Option<&str>) -> bool {
        self.variant_tools.contains(&(tool.to_string(), subtool.map(String::from)))
    }

    /// Whether `tool` reports its data per lane and read.
    pub fn is_lane_read_divided(&self, tool: &str) -> bool {
        self.lane_read_tools.contains(tool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_registry_is_valid() {
        let r = registry().unwrap();
        assert!(r.is_lane_read_divided("fastqc"));
        assert!(!r.is_lane_read_divided("samtools_flagstat"));
        assert!(r.has_variants("happy", Some("snp")));
        assert!(!r.has_variants("picard", Some("hsmetrics")));
        assert!(r.has_variants("happy", Some("indel")));
        assert!(!r.has_variants("multiqc", None));
    }

    #[test]
    fn test_descriptor_lookup() {
        let r = registry().unwrap();
        let d = r
            .descriptor(&ToolKey::new("samtools_flagstat", None))
            .unwrap();
        assert_eq!(d.table, Table::SamtoolsData);
        assert_eq!(d.parent, None);
        assert_eq!(d.field, "samtools");

        let key = ToolKey::new("happy", Some("snp")).with_happy_type(HappyType::All);
        let d = r.descriptor(&key).unwrap();
        assert_eq!(d.table, Table::HappySnpAll);
        assert_eq!(d.parent, Some(LinkTable::Happy));
        assert!(r.descriptor(&ToolKey::new("happy", Some("snp"))).is_none());
    }

    #[test]
    fn test_duplicate_entries_rejected() {
        let entries = [
            leaf("a", None, Table::SompyData, None, "a"),
            leaf("a", None, Table::VcfqcData, None, "b"),
        ];
        let err = TableRegistry::build(&entries).err().unwrap();
        assert_eq!(err.to_string(), "a is registered twice");

        let entries = [
            leaf("a", None, Table::SompyData, None, "a"),
            leaf("b", None, Table::SompyData, None, "b"),
        ];
        assert!(TableRegistry::build(&entries).is_err());

        let entries = [leaf("a", None, Table::SompyData, None, "assay")];
        assert!(TableRegistry::build(&entries).is_err());
    }

    #[test]
    fn test_incomplete_variants_rejected() {
        let entries = [happy("snp", HappyType::Pass, Table::HappySnpPass, "p")];
        let err = TableRegistry::build(&entries).err().unwrap();
        assert_eq!(err.to_string(), "happy/snp is missing its ALL variant");
    }

    #[test]
    fn test_table_names_round_trip() {
        for table in Table::iter() {
            assert_eq!(Table::from_str(&table.to_string()).unwrap(), table);
            // serde and strum agree on the table name
            assert_eq!(
                serde_json::to_value(table).unwrap(),
                serde_json::Value::String(table.to_string())
            );
        }
    }

    #[test]
    fn test_happy_type_parsing() {
        assert_eq!(HappyType::from_filter("PASS"), Some(HappyType::Pass));
        assert_eq!(HappyType::from_filter(" all "), Some(HappyType::All));
        assert_eq!(HappyType::from_filter("SNP"), None);
        assert_eq!(
            HappyType::from_label("NA12878_INDEL_PASS"),
            Some(HappyType::Pass)
        );
        assert_eq!(
            HappyType::from_label("NA12878_SNP_ALL"),
            Some(HappyType::All)
        );
        assert_eq!(HappyType::from_label("NA12878"), None);
    }
}
