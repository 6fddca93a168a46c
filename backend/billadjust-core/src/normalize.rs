// src/normalize.rs
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

use crate::columns::{self, budget_extract, mapping_extract, rate_extract, time_extract};
use crate::config::EngineConfig;
use crate::diagnostics::{Diagnostic, RunDiagnostics};
use crate::error::{checked_add, EngineError, EngineResult};
use crate::extract::RawTable;
use crate::models::{BudgetEstimate, ProjectMapping, RateCard, RateCardEntry, TimeEntry};
use crate::period::BudgetPeriod;

const NUMERIC_PLACEHOLDERS: [&str; 6] = ["", "-", "nan", "none", "null", "n/a"];
const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%d/%m/%Y", "%d.%m.%Y", "%Y/%m/%d"];
const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Join-key form of an employee name.
pub fn normalize_name(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Outcome of reading one numeric cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericCell {
    Value(Decimal),
    /// Empty cell or a textual placeholder such as `-` or `nan`.
    Placeholder,
    Malformed,
}

/// Parses a numeric cell. Accepts a comma decimal separator, thousands
/// separators and scientific notation.
pub fn parse_numeric(raw: &str) -> NumericCell {
    let trimmed = raw.trim();
    if NUMERIC_PLACEHOLDERS.contains(&trimmed.to_lowercase().as_str()) {
        return NumericCell::Placeholder;
    }

    let mut cleaned: String = trimmed
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}' && *c != '\u{202f}')
        .collect();
    if cleaned.contains(',') {
        cleaned = if cleaned.contains('.') {
            cleaned.replace(',', "")
        } else {
            cleaned.replace(',', ".")
        };
    }

    if let Ok(value) = Decimal::from_str(&cleaned) {
        return NumericCell::Value(value);
    }
    match Decimal::from_scientific(&cleaned) {
        Ok(value) => NumericCell::Value(value),
        Err(_) => NumericCell::Malformed,
    }
}

pub fn parse_work_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
                .map(|dt| dt.date())
        })
}

/// Lookup tables derived from the project mapping source.
#[derive(Debug, Clone, Default)]
pub struct MappingIndex {
    labels_by_code: HashMap<String, String>,
    labels_by_customer: HashMap<String, String>,
}

impl MappingIndex {
    pub fn new(mappings: &[ProjectMapping]) -> Self {
        let mut labels_by_code = HashMap::new();
        let mut labels_by_customer = HashMap::new();
        for mapping in mappings {
            labels_by_code
                .entry(mapping.project_code.clone())
                .or_insert_with(|| mapping.project_label.clone());
            if let Some(customer) = &mapping.customer_name {
                let key = normalize_name(customer);
                if !key.is_empty() {
                    labels_by_customer
                        .entry(key)
                        .or_insert_with(|| mapping.project_label.clone());
                }
            }
        }
        Self {
            labels_by_code,
            labels_by_customer,
        }
    }

    pub fn label_for_code(&self, project_code: &str) -> Option<&str> {
        self.labels_by_code.get(project_code.trim()).map(String::as_str)
    }

    pub fn label_for_customer(&self, customer_name: &str) -> Option<&str> {
        self.labels_by_customer
            .get(&normalize_name(customer_name))
            .map(String::as_str)
    }
}

/// Turns raw extracts into typed records, collecting every recovered
/// coercion in its diagnostics.
pub struct Normalizer<'a> {
    config: &'a EngineConfig,
    diagnostics: RunDiagnostics,
}

impl<'a> Normalizer<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self {
            config,
            diagnostics: RunDiagnostics::new(),
        }
    }

    pub fn into_diagnostics(self) -> RunDiagnostics {
        self.diagnostics
    }

    pub fn diagnostics(&self) -> &RunDiagnostics {
        &self.diagnostics
    }

    /// Non-negative decimal from a cell; anything unusable becomes 0.
    fn coerce_amount(&mut self, table: &RawTable, row: usize, column: usize) -> Decimal {
        let raw = table.cell(row, column);
        let column_name = table.headers.get(column).cloned().unwrap_or_default();
        match parse_numeric(raw) {
            NumericCell::Value(value) if value < Decimal::ZERO => {
                warn!(
                    "{}: negative value '{}' in row {} column '{}', using 0",
                    table.name, raw, row, column_name
                );
                self.diagnostics.record(Diagnostic::NegativeValue {
                    table: table.name.clone(),
                    row,
                    column: column_name,
                    raw: raw.to_string(),
                });
                dec!(0)
            }
            NumericCell::Value(value) => value,
            NumericCell::Placeholder => dec!(0),
            NumericCell::Malformed => {
                warn!(
                    "{}: could not parse '{}' in row {} column '{}' as a number, using 0",
                    table.name, raw, row, column_name
                );
                self.diagnostics.record(Diagnostic::MalformedNumericValue {
                    table: table.name.clone(),
                    row,
                    column: column_name,
                    raw: raw.to_string(),
                });
                dec!(0)
            }
        }
    }

    // --- Project mapping ---

    pub fn project_mappings(&mut self, table: &RawTable) -> EngineResult<Vec<ProjectMapping>> {
        if table.is_empty() {
            if self.config.allow_empty_mapping {
                warn!("Project mapping is empty; every code falls back to the unmapped policy");
                return Ok(Vec::new());
            }
            return Err(EngineError::MissingReferenceData {
                source_name: table.name.clone(),
            });
        }

        let code_col = columns::resolve_required(table, &mapping_extract::PROJECT_CODE)?;
        let label_col = columns::resolve_required(table, &mapping_extract::PROJECT_LABEL)?;
        let customer_col = columns::resolve(table, &mapping_extract::CUSTOMER_NAME)?;

        let mut mappings = Vec::with_capacity(table.rows.len());
        for row in 0..table.rows.len() {
            let project_code = table.cell(row, code_col).trim().to_string();
            if project_code.is_empty() {
                debug!("{}: row {} has no project code, skipping", table.name, row);
                continue;
            }
            let label = table.cell(row, label_col).trim();
            let project_label = if label.is_empty() {
                self.config.default_label.clone()
            } else {
                label.to_string()
            };
            let customer_name = customer_col
                .map(|col| table.cell(row, col).trim().to_string())
                .filter(|name| !name.is_empty());
            mappings.push(ProjectMapping {
                project_code,
                project_label,
                customer_name,
            });
        }
        info!("Normalized {} project mappings", mappings.len());
        Ok(mappings)
    }

    // --- Rate card ---

    pub fn rate_card(&mut self, table: &RawTable) -> EngineResult<RateCard> {
        if table.is_empty() {
            return Err(EngineError::MissingReferenceData {
                source_name: table.name.clone(),
            });
        }

        let name_col = columns::resolve_required(table, &rate_extract::EMPLOYEE_NAME)?;
        let grade_col = columns::resolve(table, &rate_extract::GRADE)?;
        let primary_col = columns::resolve_required(table, &rate_extract::RATE_PRIMARY)?;
        let secondary_col = columns::resolve(table, &rate_extract::RATE_SECONDARY)?;

        let mut entries = Vec::with_capacity(table.rows.len());
        for row in 0..table.rows.len() {
            let employee_name = normalize_name(table.cell(row, name_col));
            if employee_name.is_empty() {
                continue;
            }
            let grade = grade_col
                .map(|col| table.cell(row, col).trim().to_string())
                .unwrap_or_default();
            let rate_primary = self.coerce_amount(table, row, primary_col);
            let rate_secondary = match secondary_col {
                Some(col) => self.coerce_amount(table, row, col),
                None => dec!(0),
            };
            entries.push(RateCardEntry {
                employee_name,
                grade,
                rate_primary,
                rate_secondary,
            });
        }

        let (card, duplicates) = RateCard::from_entries(entries);
        for employee_name in duplicates {
            self.diagnostics
                .record(Diagnostic::DuplicateRateCard { employee_name });
        }
        if card.is_empty() {
            return Err(EngineError::MissingReferenceData {
                source_name: table.name.clone(),
            });
        }
        info!("Normalized rate card with {} employees", card.len());
        Ok(card)
    }

    // --- Time entries ---

    pub fn time_entries(
        &mut self,
        table: &RawTable,
        mapping: &MappingIndex,
    ) -> EngineResult<Vec<TimeEntry>> {
        let code_col = columns::resolve_required(table, &time_extract::PROJECT_CODE)?;
        let name_col = columns::resolve_required(table, &time_extract::EMPLOYEE_NAME)?;
        let grade_col = columns::resolve_required(table, &time_extract::GRADE)?;
        let date_col = columns::resolve_required(table, &time_extract::WORK_DATE)?;
        let hours_col = columns::resolve_required(table, &time_extract::HOURS)?;

        let mut entries = Vec::with_capacity(table.rows.len());
        for row in 0..table.rows.len() {
            let project_code = table.cell(row, code_col).trim().to_string();
            let project_label = match mapping.label_for_code(&project_code) {
                Some(label) => label.to_string(),
                None => {
                    let fallback_label = self.config.fallback_label(&project_code);
                    let first = self.diagnostics.record_once(Diagnostic::UnmappedProjectCode {
                        project_code: project_code.clone(),
                        fallback_label: fallback_label.clone(),
                    });
                    if first {
                        warn!(
                            "Project code '{}' has no mapping, using label '{}'",
                            project_code, fallback_label
                        );
                    }
                    fallback_label
                }
            };

            let raw_date = table.cell(row, date_col);
            let work_date = parse_work_date(raw_date);
            if work_date.is_none() && !raw_date.trim().is_empty() {
                warn!("{}: unparseable date '{}' in row {}", table.name, raw_date, row);
                self.diagnostics.record(Diagnostic::UnparseableDate {
                    row,
                    raw: raw_date.to_string(),
                });
            }

            let hours = self.coerce_amount(table, row, hours_col);
            entries.push(TimeEntry {
                project_code,
                project_label,
                employee_name: normalize_name(table.cell(row, name_col)),
                grade: table.cell(row, grade_col).trim().to_string(),
                work_date,
                hours,
            });
        }
        info!("Normalized {} time entries", entries.len());
        Ok(entries)
    }

    // --- Budget estimates ---

    /// Picks the forecast column for `period` and resolves each customer to
    /// a project label. Estimates for the same label are summed.
    pub fn budget_estimates(
        &mut self,
        table: &RawTable,
        period: &BudgetPeriod,
        mapping: &MappingIndex,
    ) -> EngineResult<Vec<BudgetEstimate>> {
        let Some(forecast_col) = period.find_forecast_column(&table.headers) else {
            warn!(
                "No forecast column for {} in {}; all estimates default to 0",
                period, table.name
            );
            self.diagnostics.record(Diagnostic::MissingForecastColumn {
                month: period.month,
                year: period.year,
            });
            return Ok(Vec::new());
        };
        let customer_col = columns::resolve_required(table, &budget_extract::CUSTOMER_NAME)?;
        let country_col = columns::resolve(table, &budget_extract::COUNTRY)?;
        info!(
            "Using forecast column '{}' for {}",
            table.headers[forecast_col], period
        );

        let mut totals: BTreeMap<String, Decimal> = BTreeMap::new();
        for row in 0..table.rows.len() {
            let customer = table.cell(row, customer_col).trim();
            if customer.is_empty() {
                continue;
            }
            let label = mapping
                .label_for_customer(customer)
                .unwrap_or(customer)
                .to_string();
            let amount = self.coerce_amount(table, row, forecast_col);
            if let Some(col) = country_col {
                debug!(
                    "Budget row {}: {} ({}) -> '{}' = {}",
                    row,
                    customer,
                    table.cell(row, col).trim(),
                    label,
                    amount
                );
            }
            let total = totals.entry(label).or_insert(dec!(0));
            *total = checked_add(*total, amount, "budget estimate")?;
        }

        Ok(totals
            .into_iter()
            .map(|(project_label, estimated_amount)| BudgetEstimate {
                project_label,
                estimated_amount,
            })
            .collect())
    }
}
