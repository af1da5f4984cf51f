//! Storage records of a normalized report.
//!
//! Every sample gets, in insertion order: the shared report record, its
//! sample record, one record per tool (one per lane and read for lane/read
//! divided tools), the link tables holding foreign keys to the per-subtool
//! tables, and finally the `report_sample` row tying them all together.

use crate::normalize::{Fields, LaneRead, NormalizedReport, NormalizedSample, ToolData};
use anyhow::{Context, Result};
use itertools::Itertools;
use qc_types::{LinkTable, RecordKey, StorageRecord, Table, TableDescriptor, ToolKey};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashSet};

/// Lanes kept per lane/read divided tool.
const MAX_LANES: usize = 2;
const LANE_ORDINALS: [&str; MAX_LANES] = ["1st", "2nd"];
const LINK_TABLES: [LinkTable; 3] = [LinkTable::Fastqc, LinkTable::Picard, LinkTable::Happy];

/// Records of one report, by sample, in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceGraph {
    pub samples: BTreeMap<String, Vec<StorageRecord>>,
}

impl InstanceGraph {
    /// All records, the shared report record first and only once.
    pub fn ordered_records(&self) -> Vec<StorageRecord> {
        let mut seen = HashSet::new();
        self.samples
            .values()
            .flatten()
            .filter(|r| seen.insert(r.key.clone()))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ordered_records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// A record waiting to be referenced from a link table or `report_sample`.
#[derive(Debug)]
enum Bucketed {
    Leaf {
        descriptor: TableDescriptor,
        key: RecordKey,
    },
    LaneRead {
        descriptor: TableDescriptor,
        /// `(lane ordinal, read, record)` of the kept lanes.
        entries: Vec<(&'static str, String, RecordKey)>,
    },
    Link {
        link: LinkTable,
        key: RecordKey,
    },
}

impl Bucketed {
    /// Link table holding the foreign key, `None` for `report_sample`.
    fn parent(&self) -> Option<LinkTable> {
        match self {
            Bucketed::Leaf { descriptor, .. } | Bucketed::LaneRead { descriptor, .. } => {
                descriptor.parent
            }
            Bucketed::Link { .. } => None,
        }
    }

    /// Set the foreign key(s) of this entry on `parent`.
    fn link_from(&self, parent: &mut StorageRecord) {
        match self {
            Bucketed::Leaf { descriptor, key } => parent.set_key_ref(descriptor.field, key.clone()),
            Bucketed::LaneRead {
                descriptor,
                entries,
            } => {
                for (ordinal, read, key) in entries {
                    let field = format!("{}_{ordinal}_lane_{read}", descriptor.field);
                    parent.set_key_ref(&field, key.clone());
                }
            }
            Bucketed::Link { link, key } => {
                parent.set_key_ref(link.report_sample_field(), key.clone())
            }
        }
    }
}

/// Records and warnings of one sample.
struct SampleGraph {
    records: Vec<StorageRecord>,
    warnings: Vec<String>,
}

/// Build the records of an importable report. Warnings are added to the
/// report's messages.
pub fn build_instances(report: &mut NormalizedReport) -> Result<InstanceGraph> {
    let metadata = report
        .metadata
        .as_ref()
        .context("report metadata has not been resolved")?;
    let assay = report.assay.as_deref().context("report has no assay")?;
    let report_record = metadata.to_record();

    let unbound: Vec<&ToolKey> = report
        .descriptors
        .iter()
        .filter(|(_, d)| d.is_none())
        .map(|(k, _)| k)
        .collect();
    let unbound_warnings: Vec<String> = unbound
        .iter()
        .map(|k| format!("{k} does not map to a storage table, its data is not imported"))
        .collect();

    let built: Vec<(String, SampleGraph)> = report
        .samples
        .par_iter()
        .map(|(sample_id, sample)| {
            let graph = build_sample(
                sample_id,
                sample,
                &report.descriptors,
                &report_record,
                assay,
            );
            (sample_id.clone(), graph)
        })
        .collect();

    for warning in unbound_warnings {
        report.messages.warn(warning);
    }
    let mut graph = InstanceGraph::default();
    for (sample_id, sample_graph) in built {
        for warning in sample_graph.warnings {
            report.messages.warn(warning);
        }
        graph.samples.insert(sample_id, sample_graph.records);
    }
    Ok(graph)
}

/// Build the records of one sample. Pure: nothing is shared between samples
/// but the report record they all reference.
fn build_sample(
    sample_id: &str,
    sample: &NormalizedSample,
    descriptors: &BTreeMap<ToolKey, Option<TableDescriptor>>,
    report_record: &StorageRecord,
    assay: &str,
) -> SampleGraph {
    let mut records = vec![report_record.clone()];
    let mut warnings = Vec::new();

    let sample_record = StorageRecord::new(Table::Sample, format!("sample/{sample_id}"))
        .with_value("sample_id", sample_id);
    let mut report_sample =
        StorageRecord::new(Table::ReportSample, format!("{sample_id}/report_sample"));
    report_sample.set_ref("report", report_record);
    report_sample.set_ref("sample", &sample_record);
    report_sample.set_value("assay", assay);
    records.push(sample_record);

    let mut buckets = Vec::new();
    for (tool_key, data) in &sample.tools {
        let Some(Some(descriptor)) = descriptors.get(tool_key) else {
            continue;
        };
        let table = descriptor.table;
        match data {
            ToolData::Fields(fields) => {
                let record = tool_record(table, format!("{sample_id}/{table}"), fields);
                buckets.push(Bucketed::Leaf {
                    descriptor: *descriptor,
                    key: record.key.clone(),
                });
                records.push(record);
            }
            ToolData::LaneRead(by_lane_read) => {
                let lanes = ordered_lanes(by_lane_read);
                if lanes.len() > MAX_LANES {
                    warnings.push(format!(
                        "{sample_id}: {tool_key} has more than {MAX_LANES} lanes ({}), keeping {}",
                        lanes.join(", "),
                        lanes[..MAX_LANES].join(", ")
                    ));
                }

                let mut entries = Vec::new();
                for (lane_read, fields) in by_lane_read {
                    let Some(position) = lanes[..lanes.len().min(MAX_LANES)]
                        .iter()
                        .position(|l| *l == lane_read.lane)
                    else {
                        continue;
                    };
                    let mut record =
                        tool_record(table, format!("{sample_id}/{table}/{lane_read}"), fields);
                    record.set_value("lane", lane_read.lane.as_str());
                    record.set_value("sample_read", lane_read.read.as_str());
                    entries.push((
                        LANE_ORDINALS[position],
                        lane_read.read.clone(),
                        record.key.clone(),
                    ));
                    records.push(record);
                }
                buckets.push(Bucketed::LaneRead {
                    descriptor: *descriptor,
                    entries,
                });
            }
        }
    }

    for link in LINK_TABLES {
        let children: Vec<&Bucketed> = buckets
            .iter()
            .filter(|b| b.parent() == Some(link))
            .collect();
        if children.is_empty() {
            continue;
        }
        let mut link_record = StorageRecord::new(link.table(), format!("{sample_id}/{link}"));
        for child in children {
            child.link_from(&mut link_record);
        }
        buckets.push(Bucketed::Link {
            link,
            key: link_record.key.clone(),
        });
        records.push(link_record);
    }

    for entry in buckets.iter().filter(|b| b.parent().is_none()) {
        entry.link_from(&mut report_sample);
    }
    records.push(report_sample);

    SampleGraph { records, warnings }
}

fn tool_record(table: Table, key: String, fields: &Fields) -> StorageRecord {
    let mut record = StorageRecord::new(table, key);
    for (field, value) in fields {
        record.set_value(field, value.clone());
    }
    record
}

/// Distinct lanes, lowest lane number first.
fn ordered_lanes(by_lane_read: &BTreeMap<LaneRead, Fields>) -> Vec<&str> {
    by_lane_read
        .keys()
        .map(|lr| lr.lane.as_str())
        .unique()
        .sorted_by_key(|lane| (lane_number(lane), lane.to_string()))
        .collect()
}

fn lane_number(lane: &str) -> Option<u32> {
    lane.trim_start_matches(|c: char| !c.is_ascii_digit()).parse().ok()
}
