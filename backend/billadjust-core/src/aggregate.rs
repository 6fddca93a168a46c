// src/aggregate.rs
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::config::EstimateJoin;
use crate::diagnostics::{Diagnostic, RunDiagnostics};
use crate::error::{checked_add, checked_mul, EngineResult};
use crate::models::{
    BudgetEstimate, EmployeeProjectSummary, ProjectLabel, ProjectSummary, RateCard, TimeEntry,
};

// --- Employee-Project Aggregation ---

/// Sums hours per (project, employee, grade) and prices them with the rate
/// card. Employees without a rate are kept at rate 0.
pub fn aggregate_employee_projects(
    entries: &[TimeEntry],
    rates: &RateCard,
    diagnostics: &mut RunDiagnostics,
) -> EngineResult<Vec<EmployeeProjectSummary>> {
    let mut hours_by_key: BTreeMap<(String, String, String), Decimal> = BTreeMap::new();
    for entry in entries {
        let key = (
            entry.project_label.clone(),
            entry.employee_name.clone(),
            entry.grade.clone(),
        );
        let hours = hours_by_key.entry(key).or_insert(dec!(0));
        *hours = checked_add(*hours, entry.hours, "employee hours")?;
    }

    let mut summaries = Vec::with_capacity(hours_by_key.len());
    for ((project_label, employee_name, grade), total_hours) in hours_by_key {
        let (rate_primary, rate_secondary) = match rates.get(&employee_name) {
            Some(rate) => (rate.rate_primary, rate.rate_secondary),
            None => {
                let first = diagnostics.record_once(Diagnostic::MissingRate {
                    employee_name: employee_name.clone(),
                });
                if first {
                    warn!("No rate card entry for '{}', pricing at 0", employee_name);
                }
                (dec!(0), dec!(0))
            }
        };
        summaries.push(EmployeeProjectSummary {
            total_cost_primary: checked_mul(total_hours, rate_primary, "employee cost")?,
            total_cost_secondary: checked_mul(total_hours, rate_secondary, "employee cost")?,
            project_label,
            employee_name,
            grade,
            total_hours,
            rate_primary,
            rate_secondary,
        });
    }

    info!(
        "Aggregated {} time entries into {} employee-project rows",
        entries.len(),
        summaries.len()
    );
    Ok(summaries)
}

/// Estimate per label, 0 for labels the budget does not list.
pub fn estimate_lookup(estimates: &[BudgetEstimate]) -> EngineResult<BTreeMap<ProjectLabel, Decimal>> {
    let mut lookup = BTreeMap::new();
    for estimate in estimates {
        let amount = lookup
            .entry(estimate.project_label.clone())
            .or_insert(dec!(0));
        *amount = checked_add(*amount, estimate.estimated_amount, "project estimate")?;
    }
    Ok(lookup)
}

// --- Project Summaries ---

#[derive(Default)]
struct ProjectTotals {
    hours: Decimal,
    cost_primary: Decimal,
    cost_secondary: Decimal,
}

impl ProjectTotals {
    fn add(&mut self, row: &EmployeeProjectSummary) -> EngineResult<()> {
        self.hours = checked_add(self.hours, row.total_hours, "project hours")?;
        self.cost_primary = checked_add(self.cost_primary, row.total_cost_primary, "project cost")?;
        self.cost_secondary =
            checked_add(self.cost_secondary, row.total_cost_secondary, "project cost")?;
        Ok(())
    }
}

pub fn summarize_projects(
    summaries: &[EmployeeProjectSummary],
    estimates: &[BudgetEstimate],
    join: EstimateJoin,
) -> EngineResult<Vec<ProjectSummary>> {
    let mut totals: BTreeMap<&str, ProjectTotals> = BTreeMap::new();
    for row in summaries {
        totals
            .entry(row.project_label.as_str())
            .or_default()
            .add(row)?;
    }
    let estimates = estimate_lookup(estimates)?;

    let labels: BTreeSet<&str> = match join {
        EstimateJoin::EstimateLeft => estimates.keys().map(String::as_str).collect(),
        EstimateJoin::HoursLeft => totals.keys().copied().collect(),
    };
    debug!("Summarizing {} projects ({:?})", labels.len(), join);

    let empty = ProjectTotals::default();
    Ok(labels
        .into_iter()
        .map(|label| {
            let project = totals.get(label).unwrap_or(&empty);
            ProjectSummary {
                project_label: label.to_string(),
                total_hours: project.hours,
                total_cost_primary: project.cost_primary,
                total_cost_secondary: project.cost_secondary,
                estimated_amount: estimates.get(label).copied().unwrap_or(dec!(0)),
            }
        })
        .collect())
}
