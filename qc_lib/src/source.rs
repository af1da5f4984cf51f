//! Where reports come from.
//!
//! [`ReportSource`] is one MultiQC data file on the storage platform and
//! [`MetadataLookup`] answers questions about the project and job that
//! produced it. [`LocalReportDir`] implements both over a directory tree.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Archival state of a live, readable object.
pub const LIVE: &str = "live";

/// File name of the MultiQC data document inside a local report directory.
pub const REPORT_FILE: &str = "multiqc_data.json";
/// File name of the platform metadata inside a local report directory.
pub const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescription {
    pub name: String,
    /// Id of the project holding the object.
    pub project: String,
    /// Id of the job that created the object.
    pub job: String,
    pub archival_state: String,
}

impl SourceDescription {
    pub fn is_archived(&self) -> bool {
        self.archival_state != LIVE
    }
}

/// One MultiQC data document on the storage platform.
pub trait ReportSource {
    fn id(&self) -> &str;
    fn describe(&self) -> Result<SourceDescription>;
    fn read(&self) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescription {
    /// Creation time, epoch milliseconds.
    pub created_ms: i64,
    /// Name of the job's HTML report output, for MultiQC jobs.
    pub html_report_name: Option<String>,
}

/// Project and job metadata.
pub trait MetadataLookup {
    fn project_name(&self, project_id: &str) -> Result<String>;
    fn describe_job(&self, job_id: &str) -> Result<JobDescription>;
}

/// Content of `metadata.json` next to a local report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalMetadata {
    pub file_id: String,
    pub project_id: String,
    pub project_name: String,
    pub job_id: String,
    pub job_created: i64,
    #[serde(default)]
    pub html_report_name: Option<String>,
    #[serde(default = "default_archival_state")]
    pub archival_state: String,
}

fn default_archival_state() -> String {
    LIVE.to_string()
}

/// A report directory holding `multiqc_data.json` and `metadata.json`.
#[derive(Debug, Clone)]
pub struct LocalReport {
    dir: PathBuf,
    metadata: LocalMetadata,
}

impl LocalReport {
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join(METADATA_FILE);
        let contents =
            fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        let metadata: LocalMetadata = serde_json::from_str(&contents)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(LocalReport {
            dir: dir.to_path_buf(),
            metadata,
        })
    }

    pub fn metadata(&self) -> &LocalMetadata {
        &self.metadata
    }
}

impl ReportSource for LocalReport {
    fn id(&self) -> &str {
        &self.metadata.file_id
    }

    fn describe(&self) -> Result<SourceDescription> {
        Ok(SourceDescription {
            name: REPORT_FILE.to_string(),
            project: self.metadata.project_id.clone(),
            job: self.metadata.job_id.clone(),
            archival_state: self.metadata.archival_state.clone(),
        })
    }

    fn read(&self) -> Result<Vec<u8>> {
        let path = self.dir.join(REPORT_FILE);
        fs::read(&path).with_context(|| format!("reading {}", path.display()))
    }
}

/// Every report found under one directory, which also serves as the
/// metadata lookup for them.
#[derive(Debug, Clone, Default)]
pub struct LocalReportDir {
    reports: Vec<LocalReport>,
    projects: HashMap<String, String>,
    jobs: HashMap<String, JobDescription>,
}

impl LocalReportDir {
    /// Collect the sub-directories of `root` that hold a `metadata.json`,
    /// sorted by path.
    pub fn discover(root: &Path) -> Result<Self> {
        let mut dirs = fs::read_dir(root)
            .with_context(|| format!("listing {}", root.display()))?
            .map(|entry| -> Result<PathBuf> { Ok(entry?.path()) })
            .collect::<Result<Vec<_>>>()?;
        dirs.retain(|d| d.join(METADATA_FILE).is_file());
        dirs.sort();

        let reports = dirs
            .iter()
            .map(|d| LocalReport::open(d))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_reports(reports))
    }

    pub fn from_reports(reports: Vec<LocalReport>) -> Self {
        let projects = reports
            .iter()
            .map(|r| {
                (
                    r.metadata.project_id.clone(),
                    r.metadata.project_name.clone(),
                )
            })
            .collect();
        let jobs = reports
            .iter()
            .map(|r| {
                (
                    r.metadata.job_id.clone(),
                    JobDescription {
                        created_ms: r.metadata.job_created,
                        html_report_name: r.metadata.html_report_name.clone(),
                    },
                )
            })
            .collect();
        LocalReportDir {
            reports,
            projects,
            jobs,
        }
    }

    pub fn reports(&self) -> &[LocalReport] {
        &self.reports
    }

    pub fn sources(&self) -> Vec<&dyn ReportSource> {
        self.reports.iter().map(|r| r as &dyn ReportSource).collect()
    }
}

impl MetadataLookup for LocalReportDir {
    fn project_name(&self, project_id: &str) -> Result<String> {
        self.projects
            .get(project_id)
            .cloned()
            .with_context(|| format!("unknown project {project_id}"))
    }

    fn describe_job(&self, job_id: &str) -> Result<JobDescription> {
        self.jobs
            .get(job_id)
            .cloned()
            .with_context(|| format!("unknown job {job_id}"))
    }
}
