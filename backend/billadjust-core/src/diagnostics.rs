// src/diagnostics.rs
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Non-fatal conditions recovered during a run. Each one has already been
/// logged when it is recorded; the list travels with the results so the
/// caller can show what was defaulted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Diagnostic {
    MalformedNumericValue {
        table: String,
        row: usize,
        column: String,
        raw: String,
    },
    NegativeValue {
        table: String,
        row: usize,
        column: String,
        raw: String,
    },
    UnparseableDate {
        row: usize,
        raw: String,
    },
    MissingForecastColumn {
        month: u32,
        year: i32,
    },
    MissingRate {
        employee_name: String,
    },
    UnmappedProjectCode {
        project_code: String,
        fallback_label: String,
    },
    DuplicateRateCard {
        employee_name: String,
    },
    UnknownProjectSelected {
        project_label: String,
    },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::MalformedNumericValue { table, row, column, raw } => write!(
                f,
                "{}: row {} column '{}' value '{}' is not numeric, using 0",
                table, row, column, raw
            ),
            Diagnostic::NegativeValue { table, row, column, raw } => write!(
                f,
                "{}: row {} column '{}' value '{}' is negative, using 0",
                table, row, column, raw
            ),
            Diagnostic::UnparseableDate { row, raw } => {
                write!(f, "time extract: row {} date '{}' could not be parsed", row, raw)
            }
            Diagnostic::MissingForecastColumn { month, year } => write!(
                f,
                "no forecast column for {:02}/{}, all estimates default to 0",
                month, year
            ),
            Diagnostic::MissingRate { employee_name } => {
                write!(f, "no rate card entry for '{}', rates default to 0", employee_name)
            }
            Diagnostic::UnmappedProjectCode { project_code, fallback_label } => write!(
                f,
                "project code '{}' is not mapped, using label '{}'",
                project_code, fallback_label
            ),
            Diagnostic::DuplicateRateCard { employee_name } => write!(
                f,
                "duplicate rate card entry for '{}', first one kept",
                employee_name
            ),
            Diagnostic::UnknownProjectSelected { project_label } => {
                write!(f, "selected project '{}' is not part of this run", project_label)
            }
        }
    }
}

/// Recorded diagnostics in the order they were raised. A set of the
/// entries sits alongside the list so `record_once` stays constant time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "DiagnosticList", into = "DiagnosticList")]
pub struct RunDiagnostics {
    entries: Vec<Diagnostic>,
    seen: HashSet<Diagnostic>,
}

#[derive(Serialize, Deserialize)]
struct DiagnosticList {
    entries: Vec<Diagnostic>,
}

impl From<DiagnosticList> for RunDiagnostics {
    fn from(list: DiagnosticList) -> Self {
        let seen = list.entries.iter().cloned().collect();
        Self {
            entries: list.entries,
            seen,
        }
    }
}

impl From<RunDiagnostics> for DiagnosticList {
    fn from(diagnostics: RunDiagnostics) -> Self {
        Self {
            entries: diagnostics.entries,
        }
    }
}

impl PartialEq for RunDiagnostics {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl RunDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, diagnostic: Diagnostic) {
        self.seen.insert(diagnostic.clone());
        self.entries.push(diagnostic);
    }

    /// Records the diagnostic unless an equal one is already present.
    /// Returns whether it was recorded.
    pub fn record_once(&mut self, diagnostic: Diagnostic) -> bool {
        if self.seen.contains(&diagnostic) {
            return false;
        }
        self.record(diagnostic);
        true
    }

    pub fn extend(&mut self, other: RunDiagnostics) {
        for diagnostic in other.entries {
            self.record_once(diagnostic);
        }
    }

    pub fn contains(&self, diagnostic: &Diagnostic) -> bool {
        self.seen.contains(diagnostic)
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn count_matching(&self, predicate: impl Fn(&Diagnostic) -> bool) -> usize {
        self.entries.iter().filter(|d| predicate(d)).count()
    }
}
