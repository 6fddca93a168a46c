// src/reconcile.rs
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::allocation::round_hours;
use crate::error::{checked_add, checked_sub, EngineError, EngineResult};
use crate::models::{
    AllocationRow, Coefficients, EmployeeProjectSummary, ProjectLabel, ProjectResult,
    ProjectSummary,
};

// --- Project Results ---

#[derive(Default)]
struct ResultTotals {
    total_hours: Decimal,
    adjusted_hours: Decimal,
    hours_removed: Decimal,
    adjusted_cost: Decimal,
}

impl ResultTotals {
    fn add(&mut self, row: &AllocationRow) -> EngineResult<()> {
        self.total_hours = checked_add(self.total_hours, row.total_hours, "project hours")?;
        self.adjusted_hours =
            checked_add(self.adjusted_hours, row.adjusted_hours, "project adjusted hours")?;
        self.hours_removed =
            checked_add(self.hours_removed, row.hours_removed, "project hours removed")?;
        self.adjusted_cost =
            checked_add(self.adjusted_cost, row.adjusted_cost, "project adjusted cost")?;
        Ok(())
    }
}

/// Sums allocation rows per project and compares the adjusted cost with
/// the estimate. Projects that only appear in `estimates` get zero sums.
pub fn reconcile(
    rows: &[AllocationRow],
    estimates: &BTreeMap<ProjectLabel, Decimal>,
) -> EngineResult<Vec<ProjectResult>> {
    let mut totals: BTreeMap<&str, ResultTotals> = estimates
        .keys()
        .map(|label| (label.as_str(), ResultTotals::default()))
        .collect();
    for row in rows {
        totals
            .entry(row.project_label.as_str())
            .or_default()
            .add(row)?;
    }

    let results = totals
        .into_iter()
        .map(|(label, project)| {
            let estimated_amount = estimates.get(label).copied().unwrap_or(dec!(0));
            Ok(ProjectResult {
                project_label: label.to_string(),
                variance: checked_sub(estimated_amount, project.adjusted_cost, "variance")?,
                total_hours: project.total_hours,
                adjusted_hours: project.adjusted_hours,
                hours_removed: project.hours_removed,
                adjusted_cost: project.adjusted_cost,
                estimated_amount,
            })
        })
        .collect::<EngineResult<Vec<ProjectResult>>>()?;

    debug!("Reconciled {} project results", results.len());
    Ok(results)
}

/// Fails on the first id that appears twice.
pub fn ensure_unique_ids(rows: &[AllocationRow]) -> EngineResult<()> {
    let mut seen = HashSet::with_capacity(rows.len());
    for row in rows {
        if !seen.insert(row.id.as_str()) {
            return Err(EngineError::DuplicateAggregationKey {
                key: row.id.clone(),
            });
        }
    }
    Ok(())
}

// --- Manual Overrides ---

/// Replaces adjusted hours for the given row ids. Every override is
/// validated before any row changes, so a failed call leaves `rows` as it
/// was. Coefficients are kept; dependent columns are recomputed.
///
/// An id shared by several rows (one employee under two grades) cannot be
/// overridden and fails with `DuplicateAggregationKey`; other ids in the
/// same table are unaffected.
pub fn apply_overrides(
    rows: &mut [AllocationRow],
    overrides: &BTreeMap<String, Decimal>,
) -> EngineResult<usize> {
    let mut indices: HashMap<&str, Vec<usize>> = HashMap::with_capacity(rows.len());
    for (index, row) in rows.iter().enumerate() {
        indices.entry(row.id.as_str()).or_default().push(index);
    }

    let mut updates = Vec::with_capacity(overrides.len());
    for (id, value) in overrides {
        if *value < Decimal::ZERO {
            return Err(EngineError::InvalidOverride {
                id: id.clone(),
                value: *value,
            });
        }
        let index = match indices.get(id.as_str()).map(Vec::as_slice) {
            Some([index]) => *index,
            Some(_) => {
                return Err(EngineError::DuplicateAggregationKey { key: id.clone() });
            }
            None => return Err(EngineError::UnknownAllocationRow { id: id.clone() }),
        };

        let mut updated = rows[index].clone();
        updated.set_adjusted_hours(*value)?;
        updated.overridden = true;
        updates.push((index, updated));
    }

    let applied = updates.len();
    for (index, updated) in updates {
        let row = &mut rows[index];
        if updated.adjusted_hours > row.total_hours {
            warn!(
                "Override for '{}' sets {} hours, above the {} logged",
                row.id, updated.adjusted_hours, row.total_hours
            );
        }
        debug!(
            "Override '{}': {} -> {} hours",
            row.id, row.adjusted_hours, updated.adjusted_hours
        );
        *row = updated;
    }

    info!("Applied {} manual overrides", applied);
    Ok(applied)
}

// --- Presentation Rounding ---

pub fn round_coefficient(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(4, RoundingStrategy::MidpointNearestEven)
}

/// Rounding applied only when results are presented: whole units for
/// amounts and hours, four places for coefficients.
pub trait PresentationRound {
    fn rounded(&self) -> Self;
}

impl PresentationRound for EmployeeProjectSummary {
    fn rounded(&self) -> Self {
        Self {
            total_hours: round_hours(self.total_hours),
            rate_primary: round_hours(self.rate_primary),
            rate_secondary: round_hours(self.rate_secondary),
            total_cost_primary: round_hours(self.total_cost_primary),
            total_cost_secondary: round_hours(self.total_cost_secondary),
            ..self.clone()
        }
    }
}

impl PresentationRound for ProjectSummary {
    fn rounded(&self) -> Self {
        Self {
            total_hours: round_hours(self.total_hours),
            total_cost_primary: round_hours(self.total_cost_primary),
            total_cost_secondary: round_hours(self.total_cost_secondary),
            estimated_amount: round_hours(self.estimated_amount),
            ..self.clone()
        }
    }
}

impl PresentationRound for Coefficients {
    fn rounded(&self) -> Self {
        Self {
            cost_share_raw: round_coefficient(self.cost_share_raw),
            cost_share_effective: round_coefficient(self.cost_share_effective),
            priority: round_coefficient(self.priority),
            final_coefficient: round_coefficient(self.final_coefficient),
        }
    }
}

impl PresentationRound for AllocationRow {
    fn rounded(&self) -> Self {
        Self {
            total_hours: round_hours(self.total_hours),
            rate_primary: round_hours(self.rate_primary),
            total_cost_primary: round_hours(self.total_cost_primary),
            estimated_amount: round_hours(self.estimated_amount),
            project_total_cost: round_hours(self.project_total_cost),
            project_total_rate: round_hours(self.project_total_rate),
            coefficients: self.coefficients.as_ref().map(PresentationRound::rounded),
            adjusted_hours: round_hours(self.adjusted_hours),
            hours_removed: round_hours(self.hours_removed),
            adjusted_cost: round_hours(self.adjusted_cost),
            ..self.clone()
        }
    }
}

impl PresentationRound for ProjectResult {
    fn rounded(&self) -> Self {
        Self {
            total_hours: round_hours(self.total_hours),
            adjusted_hours: round_hours(self.adjusted_hours),
            hours_removed: round_hours(self.hours_removed),
            adjusted_cost: round_hours(self.adjusted_cost),
            estimated_amount: round_hours(self.estimated_amount),
            variance: round_hours(self.variance),
            ..self.clone()
        }
    }
}
