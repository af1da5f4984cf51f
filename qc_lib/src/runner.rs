//! Batch ingestion: source -> normalized report -> records -> store.

use crate::instances::{build_instances, InstanceGraph};
use crate::metadata::ReportIds;
use crate::normalize::ReportNormalizer;
use crate::source::{MetadataLookup, ReportSource};
use crate::store::{Storage, StorageError};
use anyhow::Result;
use log::{error, info};
use qc_config::{ConfigDir, ConfigError};
use qc_types::{Messages, Severity};
use std::fmt;

/// What happened to one report.
#[derive(Debug, Clone)]
pub struct IngestionOutcome {
    pub report_id: String,
    pub assay: Option<String>,
    pub importable: bool,
    /// Records were committed to the store.
    pub imported: bool,
    pub messages: Messages,
    /// Records built for the report, empty unless importable.
    pub records: InstanceGraph,
}

impl IngestionOutcome {
    fn new(report_id: &str) -> Self {
        IngestionOutcome {
            report_id: report_id.to_string(),
            assay: None,
            importable: false,
            imported: false,
            messages: Messages::new(report_id),
            records: InstanceGraph::default(),
        }
    }
}

pub struct IngestionRunner<'a> {
    config: &'a ConfigDir,
    lookup: &'a dyn MetadataLookup,
    store: &'a mut dyn Storage,
    dry_run: bool,
}

impl<'a> IngestionRunner<'a> {
    pub fn new(
        config: &'a ConfigDir,
        lookup: &'a dyn MetadataLookup,
        store: &'a mut dyn Storage,
    ) -> Self {
        IngestionRunner {
            config,
            lookup,
            store,
            dry_run: false,
        }
    }

    /// Build the records of every report but write none of them.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Import `sources` one after the other.
    ///
    /// Problems with one report end up in its outcome and do not stop the
    /// batch. Only configuration errors, such as an assay missing from the
    /// assay config, are returned as `Err`.
    pub fn import_reports(
        &mut self,
        sources: &[&dyn ReportSource],
    ) -> Result<Vec<IngestionOutcome>> {
        let mut outcomes = Vec::with_capacity(sources.len());
        for source in sources {
            let outcome = self.import_report(*source)?;
            info!(
                "{}: importable={} imported={}",
                outcome.report_id, outcome.importable, outcome.imported
            );
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    fn import_report(&mut self, source: &dyn ReportSource) -> Result<IngestionOutcome> {
        let mut outcome = IngestionOutcome::new(source.id());

        let description = match source.describe() {
            Ok(d) => d,
            Err(e) => {
                outcome
                    .messages
                    .error(format!("could not describe {}: {e:#}", source.id()));
                return Ok(outcome);
            }
        };
        if description.is_archived() {
            outcome.messages.warn(format!(
                "{} ({}) is {}, skipping",
                description.name,
                source.id(),
                description.archival_state
            ));
            return Ok(outcome);
        }
        let data = match source.read() {
            Ok(data) => data,
            Err(e) => {
                outcome
                    .messages
                    .error(format!("could not read {}: {e:#}", source.id()));
                return Ok(outcome);
            }
        };

        let ids = ReportIds {
            file_id: source.id().to_string(),
            project_id: description.project,
            job_id: description.job,
        };
        let normalizer = ReportNormalizer::new(self.config, self.lookup, &*self.store);
        let mut report = match normalizer.normalize(ids, &description.name, &data) {
            Ok(report) => report,
            Err(e) if e.downcast_ref::<ConfigError>().is_some() => return Err(e),
            Err(e) => {
                error!("{}: {e:?}", source.id());
                outcome
                    .messages
                    .error(format!("failed to set up the report: {e:#}"));
                return Ok(outcome);
            }
        };
        outcome.assay = report.assay.clone();
        if !report.is_importable() {
            outcome.messages = report.messages;
            return Ok(outcome);
        }

        let built = build_instances(&mut report);
        outcome.messages = report.messages;
        let graph = match built {
            Ok(graph) => graph,
            Err(e) => {
                error!("{}: {e:?}", source.id());
                outcome
                    .messages
                    .error(format!("failed to build the records: {e:#}"));
                return Ok(outcome);
            }
        };
        outcome.importable = true;

        let records = graph.ordered_records();
        if self.dry_run {
            outcome.messages.info(format!(
                "dry run, {} records for {} samples not written",
                records.len(),
                graph.samples.len()
            ));
        } else {
            match self.store.insert_many(&records) {
                Ok(n) => {
                    outcome.imported = true;
                    outcome.messages.info(format!(
                        "imported {n} records for {} samples",
                        graph.samples.len()
                    ));
                }
                Err(e @ StorageError::UniqueViolation { .. }) => outcome.messages.error(format!(
                    "{} was imported by another run, nothing written: {e}",
                    source.id()
                )),
                Err(e) => outcome
                    .messages
                    .error(format!("could not write {}, nothing written: {e}", source.id())),
            }
        }
        outcome.records = graph;
        Ok(outcome)
    }
}

/// Batch summary for the notification layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    pub reports: usize,
    pub imported: usize,
    /// Importable reports whose records could not be written.
    pub failed: usize,
    pub skipped: usize,
    /// Most severe message of the batch, used to route the digest.
    pub severity: Option<Severity>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Digest {
    pub fn new(outcomes: &[IngestionOutcome]) -> Self {
        let collect = |severity: Severity| -> Vec<String> {
            outcomes
                .iter()
                .flat_map(|o| {
                    o.messages
                        .with_severity(severity)
                        .map(move |m| format!("{}: {}", o.report_id, m.text))
                })
                .collect()
        };
        Digest {
            reports: outcomes.len(),
            imported: outcomes.iter().filter(|o| o.imported).count(),
            failed: outcomes
                .iter()
                .filter(|o| o.importable && !o.imported && o.messages.has_errors())
                .count(),
            skipped: outcomes.iter().filter(|o| !o.importable).count(),
            severity: outcomes.iter().filter_map(|o| o.messages.worst()).max(),
            errors: collect(Severity::Error),
            warnings: collect(Severity::Warning),
        }
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "TrendyQC import: {} reports, {} imported, {} failed, {} not importable",
            self.reports, self.imported, self.failed, self.skipped
        )?;
        for (title, lines) in [("Errors", &self.errors), ("Warnings", &self.warnings)] {
            if lines.is_empty() {
                continue;
            }
            writeln!(f, "{title}:")?;
            for line in lines {
                writeln!(f, "- {line}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::test_utils::{config_dir, Lookup};
    use crate::source::SourceDescription;
    use crate::store::MemoryStore;
    use anyhow::bail;
    use pretty_assertions::assert_eq;
    use qc_types::Table;
    use serde_json::json;
    use std::cell::Cell;

    struct Source {
        id: &'static str,
        archival_state: &'static str,
        document: serde_json::Value,
        reads: Cell<usize>,
    }

    impl Source {
        fn new(id: &'static str, document: serde_json::Value) -> Self {
            Source {
                id,
                archival_state: "live",
                document,
                reads: Cell::new(0),
            }
        }
    }

    impl ReportSource for Source {
        fn id(&self) -> &str {
            self.id
        }

        fn describe(&self) -> Result<SourceDescription> {
            Ok(SourceDescription {
                name: "multiqc_data.json".to_string(),
                project: "project-1".to_string(),
                job: format!("job-{}", self.id),
                archival_state: self.archival_state.to_string(),
            })
        }

        fn read(&self) -> Result<Vec<u8>> {
            self.reads.set(self.reads.get() + 1);
            if self.document.is_null() {
                bail!("object is gone");
            }
            Ok(self.document.to_string().into_bytes())
        }
    }

    fn samtools_report() -> serde_json::Value {
        json!({
            "config_subtitle": "Test Assay",
            "report_saved_raw_data": {
                "multiqc_samtools_flagstat": {"S1_S1": {"total_passed": 100}}
            }
        })
    }

    #[test]
    fn test_batch_continues_past_bad_reports() {
        let dir = config_dir();
        let config = ConfigDir::new(dir.path());
        let mut store = MemoryStore::new();

        let good = Source::new("file-1", samtools_report());
        let unreadable = Source::new("file-2", serde_json::Value::Null);
        let mut archived = Source::new("file-3", samtools_report());
        archived.archival_state = "archived";
        let no_assay = Source::new("file-4", json!({"report_saved_raw_data": {}}));

        let sources: Vec<&dyn ReportSource> = vec![&good, &unreadable, &archived, &no_assay];
        let outcomes = IngestionRunner::new(&config, &Lookup, &mut store)
            .import_reports(&sources)
            .unwrap();

        assert_eq!(outcomes.len(), 4);
        assert!(outcomes[0].imported);
        assert!(outcomes[1].messages.has_errors());
        assert!(!outcomes[2].importable);
        assert_eq!(archived.reads.get(), 0);
        assert!(!outcomes[3].importable);
        assert!(!outcomes[3].messages.has_errors());
        assert!(outcomes.iter().all(|o| !o.messages.is_empty()));
        assert_eq!(store.tables().count(Table::Report), 1);

        let digest = Digest::new(&outcomes);
        assert_eq!(digest.reports, 4);
        assert_eq!(digest.imported, 1);
        assert_eq!(digest.failed, 0);
        assert_eq!(digest.skipped, 3);
        assert_eq!(digest.severity, Some(Severity::Error));
        assert_eq!(digest.errors.len(), 1);
        assert!(digest.warnings.iter().any(|w| w.starts_with("file-3: ")));
        let text = digest.to_string();
        assert!(text.find("Errors:").unwrap() < text.find("Warnings:").unwrap());
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let dir = config_dir();
        let config = ConfigDir::new(dir.path());
        let mut store = MemoryStore::new();
        let source = Source::new("file-1", samtools_report());

        let outcomes = IngestionRunner::new(&config, &Lookup, &mut store)
            .dry_run(true)
            .import_reports(&[&source])
            .unwrap();
        assert!(outcomes[0].importable);
        assert!(!outcomes[0].imported);
        assert_eq!(outcomes[0].records.len(), 4);
        assert_eq!(store.tables().count(Table::Report), 0);
        assert_eq!(Digest::new(&outcomes).failed, 0);
    }

    #[test]
    fn test_unknown_assay_stops_the_batch() {
        let dir = config_dir();
        let config = ConfigDir::new(dir.path());
        let mut store = MemoryStore::new();
        let source = Source::new("file-1", json!({"config_subtitle": "Nope"}));

        let err = IngestionRunner::new(&config, &Lookup, &mut store)
            .import_reports(&[&source])
            .unwrap_err();
        assert!(err.downcast_ref::<ConfigError>().is_some());
    }
}
