use std::collections::HashMap;
use std::fmt;
use std::ops::Range;

use codespan_reporting::diagnostic::{self, Diagnostic, Label};
use serde::Serialize;

use crate::block::Uid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

/// Which pass raised an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    DuplicateHandler,
    NestedHandler,
    MissingHandler,
    EmptyCondition,
    DanglingBranch,
    TimerWithoutHandler,
    TimerName,
    LoopExit,
    LoopGuard,
    SuspiciousToken,
    Plugin,
}

/// What an issue is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Subject {
    Document,
    Block(Uid),
    /// Every member of a group, e.g. all handlers sharing a name.
    Blocks(Vec<Uid>),
}

/// One finding. Never mutated once built; a new pass builds new issues.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ValidationIssue {
    subject: Subject,
    severity: Severity,
    category: Category,
    message: String,
}

impl ValidationIssue {
    pub fn new(
        severity: Severity,
        category: Category,
        subject: Subject,
        message: impl Into<String>,
    ) -> Self {
        ValidationIssue {
            subject,
            severity,
            category,
            message: message.into(),
        }
    }

    pub fn error(category: Category, uid: Uid, message: impl Into<String>) -> Self {
        ValidationIssue::new(Severity::Error, category, Subject::Block(uid), message)
    }

    pub fn warning(category: Category, uid: Uid, message: impl Into<String>) -> Self {
        ValidationIssue::new(Severity::Warning, category, Subject::Block(uid), message)
    }

    pub fn info(category: Category, uid: Uid, message: impl Into<String>) -> Self {
        ValidationIssue::new(Severity::Info, category, Subject::Block(uid), message)
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Uids this issue cites, in order.
    pub fn uids(&self) -> &[Uid] {
        match &self.subject {
            Subject::Document => &[],
            Subject::Block(uid) => std::slice::from_ref(uid),
            Subject::Blocks(uids) => uids,
        }
    }

    pub fn concerns(&self, uid: Uid) -> bool {
        self.uids().contains(&uid)
    }

    /// Build a codespan diagnostic, labelling each cited block that has a
    /// known source span. The first is the primary label.
    pub fn to_diagnostic(
        &self,
        file_id: usize,
        spans: &HashMap<Uid, Range<usize>>,
    ) -> Diagnostic<usize> {
        let severity = match self.severity {
            Severity::Info => diagnostic::Severity::Note,
            Severity::Warning => diagnostic::Severity::Warning,
            Severity::Error => diagnostic::Severity::Error,
        };
        let mut labels = Vec::new();
        let mut notes = Vec::new();
        for (i, uid) in self.uids().iter().enumerate() {
            match spans.get(uid) {
                Some(span) if i == 0 => labels.push(Label::primary(file_id, span.clone())),
                Some(span) => {
                    labels.push(Label::secondary(file_id, span.clone()).with_message("also here"))
                }
                None => notes.push(format!("block {}", uid.short())),
            }
        }
        Diagnostic::new(severity)
            .with_message(&self.message)
            .with_labels(labels)
            .with_notes(notes)
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)
    }
}
