//! Failure accounting for crawl runs.
//!
//! Individual manifests failing to fetch or resolve never abort a run; they
//! are collected here and reported at the end.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Category of a recorded failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Manifest could not be obtained from any mirror
    Fetch,
    /// Manifest (or one of its ancestors) could not be parsed
    Malformed,
    /// Parent chain loops or is too deep
    CycleOrDepth,
    /// A dependency version could not be determined
    UnresolvedDependencyVersion,
    /// Abandoned because the crawl deadline passed
    Timeout,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Fetch => "fetch",
            FailureKind::Malformed => "malformed",
            FailureKind::CycleOrDepth => "cycle_or_depth",
            FailureKind::UnresolvedDependencyVersion => "unresolved_dependency_version",
            FailureKind::Timeout => "timeout",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One failed manifest or dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// Coordinate, artifact key or path the failure concerns
    pub subject: String,
    pub kind: FailureKind,
    pub message: String,
}

/// All failures recorded during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    failures: Vec<Failure>,
}

impl FailureReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure.
    pub fn record(
        &mut self,
        subject: impl Into<String>,
        kind: FailureKind,
        message: impl Into<String>,
    ) {
        self.failures.push(Failure {
            subject: subject.into(),
            kind,
            message: message.into(),
        });
    }

    /// Append every failure from another report.
    pub fn extend(&mut self, other: FailureReport) {
        self.failures.extend(other.failures);
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Failure> {
        self.failures.iter()
    }

    /// Failures of one kind.
    pub fn of_kind(&self, kind: FailureKind) -> impl Iterator<Item = &Failure> {
        self.failures.iter().filter(move |f| f.kind == kind)
    }

    /// Whether any failure concerns `subject`.
    pub fn contains_subject(&self, subject: &str) -> bool {
        self.failures.iter().any(|f| f.subject == subject)
    }

    /// Count of failures per kind.
    pub fn counts(&self) -> BTreeMap<FailureKind, usize> {
        let mut counts = BTreeMap::new();
        for failure in &self.failures {
            *counts.entry(failure.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Sort failures by subject then kind, for stable output.
    pub fn sort(&mut self) {
        self.failures
            .sort_by(|a, b| a.subject.cmp(&b.subject).then(a.kind.cmp(&b.kind)));
    }

    /// Pretty-printed JSON rendering.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for failure in &self.failures {
            writeln!(
                f,
                "[{}] {}: {}",
                failure.kind, failure.subject, failure.message
            )?;
        }
        Ok(())
    }
}
