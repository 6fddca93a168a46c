// src/allocation.rs
//! Proportional hour allocation.
//!
//! Every employee-project row gets a share of its project's estimate,
//! weighted by the employee's rate against the project's summed rates:
//!
//! ```text
//! cost_share  = min(estimate / project_total_cost, 1)
//! priority    = rate_primary / project_total_rate
//! final       = cost_share * priority
//! adjusted    = max(round(total_hours * (1 - final)), 0)
//! ```
//!
//! A row that would lose every hour keeps a floor of `floor_ratio` of its
//! logged hours (at least one hour when the ratio rounds to nothing), never
//! more than it logged.

use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::{checked_add, checked_div, checked_mul, EngineResult};
use crate::models::{
    AllocationBasis, AllocationRow, Coefficients, EmployeeProjectSummary, ProjectLabel,
};

/// Half-to-even rounding to whole hours.
pub fn round_hours(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AllocationPolicy {
    pub floor_enabled: bool,
    pub floor_ratio: Decimal,
}

impl From<&EngineConfig> for AllocationPolicy {
    fn from(config: &EngineConfig) -> Self {
        Self {
            floor_enabled: config.floor_enabled,
            floor_ratio: config.floor_ratio,
        }
    }
}

impl Default for AllocationPolicy {
    fn default() -> Self {
        Self {
            floor_enabled: true,
            floor_ratio: dec!(0.3),
        }
    }
}

impl AllocationPolicy {
    /// Minimum allocation for a row whose formula result is zero.
    pub fn apply_floor(&self, adjusted_hours: Decimal, total_hours: Decimal) -> EngineResult<Decimal> {
        if !self.floor_enabled || adjusted_hours != Decimal::ZERO || total_hours <= Decimal::ZERO {
            return Ok(adjusted_hours);
        }
        let floored = round_hours(checked_mul(total_hours, self.floor_ratio, "floor hours")?);
        let floored = if floored > Decimal::ZERO {
            floored
        } else {
            total_hours.min(dec!(1))
        };
        Ok(floored.min(total_hours).max(Decimal::ZERO))
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct ProjectBasis {
    total_cost: Decimal,
    total_rate: Decimal,
}

/// Computes allocation rows in input order. `estimates` maps each label to
/// its budget estimate; labels missing from it allocate against 0.
pub fn allocate(
    summaries: &[EmployeeProjectSummary],
    estimates: &BTreeMap<ProjectLabel, Decimal>,
    policy: &AllocationPolicy,
) -> EngineResult<Vec<AllocationRow>> {
    // Project sums first; every coefficient depends on them
    let mut bases: BTreeMap<&str, ProjectBasis> = BTreeMap::new();
    for row in summaries {
        let basis = bases.entry(row.project_label.as_str()).or_default();
        basis.total_cost = checked_add(basis.total_cost, row.total_cost_primary, "project total cost")?;
        basis.total_rate = checked_add(basis.total_rate, row.rate_primary, "project total rate")?;
    }

    let rows = summaries
        .iter()
        .map(|row| {
            let basis = bases
                .get(row.project_label.as_str())
                .copied()
                .unwrap_or_default();
            let estimate = estimates
                .get(&row.project_label)
                .copied()
                .unwrap_or(Decimal::ZERO);
            allocate_row(row, basis, estimate, policy)
        })
        .collect::<EngineResult<Vec<AllocationRow>>>()?;

    let unadjusted = rows
        .iter()
        .filter(|r| r.basis == AllocationBasis::Unadjusted)
        .count();
    info!(
        "Allocated {} rows across {} projects ({} unadjusted)",
        rows.len(),
        bases.len(),
        unadjusted
    );
    Ok(rows)
}

fn allocate_row(
    row: &EmployeeProjectSummary,
    basis: ProjectBasis,
    estimate: Decimal,
    policy: &AllocationPolicy,
) -> EngineResult<AllocationRow> {
    let mut allocation = AllocationRow {
        id: AllocationRow::row_id(&row.employee_name, &row.project_label),
        project_label: row.project_label.clone(),
        employee_name: row.employee_name.clone(),
        grade: row.grade.clone(),
        total_hours: row.total_hours,
        rate_primary: row.rate_primary,
        total_cost_primary: row.total_cost_primary,
        estimated_amount: estimate,
        project_total_cost: basis.total_cost,
        project_total_rate: basis.total_rate,
        coefficients: None,
        adjusted_hours: row.total_hours,
        hours_removed: Decimal::ZERO,
        adjusted_cost: Decimal::ZERO,
        basis: AllocationBasis::Unadjusted,
        overridden: false,
    };

    if basis.total_cost <= Decimal::ZERO || basis.total_rate <= Decimal::ZERO {
        debug!(
            "'{}' has no cost or rate basis, keeping logged hours",
            allocation.id
        );
        allocation.set_adjusted_hours(row.total_hours)?;
        return Ok(allocation);
    }

    let cost_share_raw = checked_div(estimate, basis.total_cost, "cost share")?;
    let cost_share_effective = cost_share_raw.min(Decimal::ONE);
    let priority = checked_div(row.rate_primary, basis.total_rate, "rate priority")?;
    let final_coefficient = checked_mul(cost_share_effective, priority, "final coefficient")?;

    // Rounding a fractional total up must not hand out more than was logged
    let remaining = checked_mul(
        row.total_hours,
        Decimal::ONE - final_coefficient,
        "adjusted hours",
    )?;
    let naive = round_hours(remaining)
        .min(row.total_hours)
        .max(Decimal::ZERO);
    let adjusted_hours = policy.apply_floor(naive, row.total_hours)?;
    if adjusted_hours != naive {
        debug!(
            "'{}' floored from {} to {} hours",
            allocation.id, naive, adjusted_hours
        );
    }

    allocation.coefficients = Some(Coefficients {
        cost_share_raw,
        cost_share_effective,
        priority,
        final_coefficient,
    });
    allocation.basis = AllocationBasis::Proportional;
    allocation.set_adjusted_hours(adjusted_hours)?;
    Ok(allocation)
}
