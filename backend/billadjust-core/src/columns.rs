// src/columns.rs
//! Explicit header resolution: each logical field declares the header
//! aliases it accepts, and resolution fails with a named error when a
//! required field has no match.

use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::extract::{clean_header, RawTable};

#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    pub field: &'static str,
    pub aliases: &'static [&'static str],
    pub required: bool,
}

impl ColumnSpec {
    pub const fn required(field: &'static str, aliases: &'static [&'static str]) -> Self {
        Self {
            field,
            aliases,
            required: true,
        }
    }

    pub const fn optional(field: &'static str, aliases: &'static [&'static str]) -> Self {
        Self {
            field,
            aliases,
            required: false,
        }
    }
}

// --- Declared aliases per extract ---

pub mod time_extract {
    use super::ColumnSpec;

    pub const PROJECT_CODE: ColumnSpec = ColumnSpec::required(
        "project_code",
        &["Code projet", "Project Code", "OTP L2", "SWIFT Code"],
    );
    pub const EMPLOYEE_NAME: ColumnSpec =
        ColumnSpec::required("employee_name", &["Nom", "Name", "Employee", "Employee Name"]);
    pub const GRADE: ColumnSpec = ColumnSpec::required("grade", &["Grade"]);
    pub const WORK_DATE: ColumnSpec = ColumnSpec::required("work_date", &["Date", "Work Date"]);
    pub const HOURS: ColumnSpec = ColumnSpec::required("hours", &["Heures", "Hours"]);
}

pub mod rate_extract {
    use super::ColumnSpec;

    pub const EMPLOYEE_NAME: ColumnSpec =
        ColumnSpec::required("employee_name", &["Nom", "Name", "Employee", "Full Name"]);
    pub const GRADE: ColumnSpec = ColumnSpec::optional("grade", &["Grade"]);
    pub const RATE_PRIMARY: ColumnSpec =
        ColumnSpec::required("rate_primary", &["Rate", "Rate IBM", "Rate Primary"]);
    pub const RATE_SECONDARY: ColumnSpec =
        ColumnSpec::optional("rate_secondary", &["Rate DES", "Rate Secondary"]);
}

pub mod mapping_extract {
    use super::ColumnSpec;

    pub const PROJECT_CODE: ColumnSpec = ColumnSpec::required(
        "project_code",
        &["Code projet", "OTP L2", "SWIFT Code", "Project Code"],
    );
    pub const PROJECT_LABEL: ColumnSpec = ColumnSpec::required(
        "project_label",
        &["Libelle projet", "Libellé de projet", "Libelle de projet", "Project Label"],
    );
    pub const CUSTOMER_NAME: ColumnSpec =
        ColumnSpec::optional("customer_name", &["Customer Name", "Belgian Name"]);
}

pub mod budget_extract {
    use super::ColumnSpec;

    pub const CUSTOMER_NAME: ColumnSpec = ColumnSpec::required("customer_name", &["Customer Name"]);
    pub const COUNTRY: ColumnSpec = ColumnSpec::optional("country", &["Country"]);
}

/// Case-folded form used for header comparison.
fn header_key(raw: &str) -> String {
    clean_header(raw).to_lowercase()
}

/// Resolves `spec` against the table headers. Aliases are tried in
/// declaration order; the first alias with a matching header wins.
pub fn resolve(table: &RawTable, spec: &ColumnSpec) -> EngineResult<Option<usize>> {
    let keys: Vec<String> = table.headers.iter().map(|h| header_key(h)).collect();
    for alias in spec.aliases {
        let wanted = header_key(alias);
        if let Some(index) = keys.iter().position(|k| *k == wanted) {
            debug!(
                "{}: field '{}' resolved to column {} ('{}')",
                table.name, spec.field, index, table.headers[index]
            );
            return Ok(Some(index));
        }
    }
    if spec.required {
        return Err(EngineError::MissingColumn {
            table: table.name.clone(),
            field: spec.field.to_string(),
            aliases: spec.aliases.iter().map(|a| a.to_string()).collect(),
        });
    }
    debug!("{}: optional field '{}' not present", table.name, spec.field);
    Ok(None)
}

/// Like [`resolve`] for a field declared as required.
pub fn resolve_required(table: &RawTable, spec: &ColumnSpec) -> EngineResult<usize> {
    match resolve(table, spec)? {
        Some(index) => Ok(index),
        None => Err(EngineError::MissingColumn {
            table: table.name.clone(),
            field: spec.field.to_string(),
            aliases: spec.aliases.iter().map(|a| a.to_string()).collect(),
        }),
    }
}
