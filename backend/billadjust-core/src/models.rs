// src/models.rs
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

use crate::error::{checked_mul, checked_sub, EngineResult};

// --- Core Data Structures ---

pub type ProjectLabel = String;
pub type EmployeeName = String;

/// One normalized line of the time-tracking extract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeEntry {
    pub project_code: String,
    pub project_label: ProjectLabel,
    pub employee_name: EmployeeName,
    pub grade: String,
    pub work_date: Option<NaiveDate>,
    pub hours: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateCardEntry {
    pub employee_name: EmployeeName,
    pub grade: String,
    pub rate_primary: Decimal,
    pub rate_secondary: Decimal,
}

/// Pay rates keyed by normalized employee name. Read-only once built.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateCard {
    entries: HashMap<EmployeeName, RateCardEntry>,
}

impl RateCard {
    /// Builds the card; a repeated employee keeps its first entry.
    /// Returns the names that were dropped as duplicates.
    pub fn from_entries(entries: Vec<RateCardEntry>) -> (Self, Vec<EmployeeName>) {
        let mut map = HashMap::with_capacity(entries.len());
        let mut duplicates = Vec::new();
        for entry in entries {
            if map.contains_key(&entry.employee_name) {
                warn!(
                    "Duplicate rate card entry for '{}', keeping the first one",
                    entry.employee_name
                );
                duplicates.push(entry.employee_name);
                continue;
            }
            map.insert(entry.employee_name.clone(), entry);
        }
        (Self { entries: map }, duplicates)
    }

    pub fn get(&self, employee_name: &str) -> Option<&RateCardEntry> {
        self.entries.get(employee_name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries ordered by employee name, a stable view for hashing.
    pub fn sorted_entries(&self) -> Vec<&RateCardEntry> {
        let mut entries: Vec<&RateCardEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| a.employee_name.cmp(&b.employee_name));
        entries
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectMapping {
    pub project_code: String,
    pub project_label: ProjectLabel,
    /// Customer identifier used by the budget extract for this project.
    pub customer_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetEstimate {
    pub project_label: ProjectLabel,
    pub estimated_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmployeeProjectSummary {
    pub project_label: ProjectLabel,
    pub employee_name: EmployeeName,
    pub grade: String,
    pub total_hours: Decimal,
    pub rate_primary: Decimal,
    pub rate_secondary: Decimal,
    pub total_cost_primary: Decimal,
    pub total_cost_secondary: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub project_label: ProjectLabel,
    pub total_hours: Decimal,
    pub total_cost_primary: Decimal,
    pub total_cost_secondary: Decimal,
    pub estimated_amount: Decimal,
}

/// Whether a row went through the coefficient formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationBasis {
    Proportional,
    /// Project has zero total cost or zero total rate; hours kept as logged.
    Unadjusted,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coefficients {
    pub cost_share_raw: Decimal,
    pub cost_share_effective: Decimal,
    pub priority: Decimal,
    pub final_coefficient: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationRow {
    pub id: String,
    pub project_label: ProjectLabel,
    pub employee_name: EmployeeName,
    pub grade: String,
    pub total_hours: Decimal,
    pub rate_primary: Decimal,
    pub total_cost_primary: Decimal,
    pub estimated_amount: Decimal,
    pub project_total_cost: Decimal,
    pub project_total_rate: Decimal,
    pub coefficients: Option<Coefficients>,
    pub adjusted_hours: Decimal,
    pub hours_removed: Decimal,
    pub adjusted_cost: Decimal,
    pub basis: AllocationBasis,
    /// Set once a manual override replaced the computed hours.
    #[serde(default)]
    pub overridden: bool,
}

impl AllocationRow {
    pub fn row_id(employee_name: &str, project_label: &str) -> String {
        format!("{} - {}", employee_name, project_label)
    }

    /// Sets adjusted hours and derives the dependent columns. The row is
    /// left unchanged when a dependent column overflows.
    pub fn set_adjusted_hours(&mut self, adjusted_hours: Decimal) -> EngineResult<()> {
        let hours_removed = checked_sub(self.total_hours, adjusted_hours, "hours removed")?;
        let adjusted_cost = checked_mul(adjusted_hours, self.rate_primary, "adjusted cost")?;
        self.adjusted_hours = adjusted_hours;
        self.hours_removed = hours_removed;
        self.adjusted_cost = adjusted_cost;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectResult {
    pub project_label: ProjectLabel,
    pub total_hours: Decimal,
    pub adjusted_hours: Decimal,
    pub hours_removed: Decimal,
    pub adjusted_cost: Decimal,
    pub estimated_amount: Decimal,
    pub variance: Decimal,
}
