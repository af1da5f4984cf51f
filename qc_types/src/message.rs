//! Per-report message log.
//!
//! Ingestion never silently drops a report: every decision is recorded here
//! with a severity, and echoed to the `log` facade as it is recorded.

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// Ordered from least to most severe.
#[derive(
    Display, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[strum(to_string = "info")]
    Info,
    #[strum(to_string = "warning")]
    Warning,
    #[strum(to_string = "error")]
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub severity: Severity,
    pub text: String,
}

/// Messages collected for one report, tagged with the report's file id.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Messages {
    context: String,
    entries: Vec<Message>,
}

impl Messages {
    pub fn new(context: impl Into<String>) -> Self {
        Messages {
            context: context.into(),
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, severity: Severity, text: impl Into<String>) {
        let text = text.into();
        match severity {
            Severity::Info => info!("{}: {text}", self.context),
            Severity::Warning => warn!("{}: {text}", self.context),
            Severity::Error => error!("{}: {text}", self.context),
        }
        self.entries.push(Message { severity, text });
    }

    pub fn info(&mut self, text: impl Into<String>) {
        self.push(Severity::Info, text);
    }

    pub fn warn(&mut self, text: impl Into<String>) {
        self.push(Severity::Warning, text);
    }

    pub fn error(&mut self, text: impl Into<String>) {
        self.push(Severity::Error, text);
    }

    pub fn with_severity(&self, severity: Severity) -> impl Iterator<Item = &Message> {
        self.entries.iter().filter(move |m| m.severity == severity)
    }

    pub fn has_errors(&self) -> bool {
        self.with_severity(Severity::Error).next().is_some()
    }

    /// The most severe level recorded, `None` when empty.
    pub fn worst(&self) -> Option<Severity> {
        self.entries.iter().map(|m| m.severity).max()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_messages() {
        let mut msgs = Messages::new("file-1");
        assert_eq!(msgs.worst(), None);
        msgs.info("parsed");
        msgs.warn("section missing");
        assert_eq!(msgs.worst(), Some(Severity::Warning));
        assert!(!msgs.has_errors());

        msgs.error("boom");
        assert!(msgs.has_errors());
        assert_eq!(msgs.len(), 3);
        assert_eq!(
            msgs.with_severity(Severity::Error)
                .map(|m| m.text.as_str())
                .collect::<Vec<_>>(),
            vec!["boom"]
        );
        assert_eq!(Severity::Warning.to_string(), "warning");
    }
}
