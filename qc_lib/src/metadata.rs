//! Report-level metadata: run date, sequencer and report name.

use crate::source::MetadataLookup;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use qc_types::{Messages, StorageRecord, Table};
use serde::Serialize;

/// Platform identifiers of one MultiQC data file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportIds {
    pub file_id: String,
    pub project_id: String,
    pub job_id: String,
}

/// Fields of the `report` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportMetadata {
    pub name: String,
    pub project_name: String,
    pub project_id: String,
    pub date: DateTime<Utc>,
    pub sequencer_id: Option<String>,
    pub job_date: DateTime<Utc>,
    pub dnanexus_file_id: String,
}

/// Record key of the report row, shared by every sample of a report.
pub const REPORT_KEY: &str = "report";

impl ReportMetadata {
    /// Look up the project and job behind `ids`.
    ///
    /// Project names look like `002_230101_A01295_CEN`: the second token is
    /// the run date, the third the sequencer. A run date that does not parse
    /// falls back to the job creation time. `fallback_name` names the report
    /// when the job has no HTML report output.
    pub fn resolve(
        ids: &ReportIds,
        fallback_name: &str,
        lookup: &dyn MetadataLookup,
        messages: &mut Messages,
    ) -> Result<Self> {
        let project_name = lookup
            .project_name(&ids.project_id)
            .with_context(|| format!("looking up project {}", ids.project_id))?;
        let job = lookup
            .describe_job(&ids.job_id)
            .with_context(|| format!("looking up job {}", ids.job_id))?;

        let job_date = job_timestamp(job.created_ms)
            .with_context(|| format!("job {} has an invalid creation time", ids.job_id))?;

        let tokens: Vec<&str> = project_name.split('_').collect();
        let date = match tokens.get(1).and_then(|t| parse_run_date(t)) {
            Some(date) => date,
            None => {
                messages.warn(format!(
                    "no run date in project name '{project_name}', using the job date"
                ));
                job_date
            }
        };
        let sequencer_id = tokens.get(2).map(|s| s.to_string());
        if sequencer_id.is_none() {
            messages.warn(format!("no sequencer id in project name '{project_name}'"));
        }

        let name = match job.html_report_name {
            Some(name) => name,
            None => {
                messages.warn(format!(
                    "job {} has no HTML report output, naming the report '{fallback_name}'",
                    ids.job_id
                ));
                fallback_name.to_string()
            }
        };

        Ok(ReportMetadata {
            name,
            project_name,
            project_id: ids.project_id.clone(),
            date,
            sequencer_id,
            job_date,
            dnanexus_file_id: ids.file_id.clone(),
        })
    }

    pub fn to_record(&self) -> StorageRecord {
        let mut record = StorageRecord::new(Table::Report, REPORT_KEY)
            .with_value("name", self.name.as_str())
            .with_value("project_name", self.project_name.as_str())
            .with_value("project_id", self.project_id.as_str())
            .with_value("date", self.date.to_rfc3339())
            .with_value("job_date", self.job_date.to_rfc3339())
            .with_value("dnanexus_file_id", self.dnanexus_file_id.as_str());
        match &self.sequencer_id {
            Some(id) => record.set_value("sequencer_id", id.as_str()),
            None => record.set_value("sequencer_id", qc_types::QcValue::Null),
        }
        record
    }
}

/// `YYMMDD`, as midnight UTC.
fn parse_run_date(token: &str) -> Option<DateTime<Utc>> {
    if token.len() != 6 {
        return None;
    }
    let date = NaiveDate::parse_from_str(token, "%y%m%d").ok()?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

/// Epoch milliseconds, truncated to whole seconds.
fn job_timestamp(created_ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(created_ms.div_euclid(1000), 0).single()
}
