// src/export.rs
use rust_decimal::Decimal;
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::allocation::round_hours;
use crate::engine::Results;
use crate::error::{io_context, EngineResult};
use crate::models::{AllocationRow, Coefficients, TimeEntry};
use crate::reconcile::round_coefficient;

const MIN_COLUMN_WIDTH: usize = 15;
const LAYOUT_FILE: &str = "_layout.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ColumnFormat {
    Text,
    /// Whole number, half-to-even.
    Integer,
    /// Four decimal places.
    Decimal4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Column {
    pub header: &'static str,
    pub format: ColumnFormat,
}

const fn text(header: &'static str) -> Column {
    Column {
        header,
        format: ColumnFormat::Text,
    }
}

const fn integer(header: &'static str) -> Column {
    Column {
        header,
        format: ColumnFormat::Integer,
    }
}

const fn decimal4(header: &'static str) -> Column {
    Column {
        header,
        format: ColumnFormat::Decimal4,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(Decimal),
    Empty,
}

impl Cell {
    fn render(&self, format: ColumnFormat) -> String {
        match (self, format) {
            (Cell::Empty, _) => String::new(),
            (Cell::Text(value), _) => value.clone(),
            (Cell::Number(value), ColumnFormat::Integer) => {
                let rounded = round_hours(*value);
                if rounded.is_zero() {
                    "0".to_string()
                } else {
                    rounded.normalize().to_string()
                }
            }
            (Cell::Number(value), ColumnFormat::Decimal4) => {
                format!("{:.4}", round_coefficient(*value))
            }
            (Cell::Number(value), ColumnFormat::Text) => value.normalize().to_string(),
        }
    }
}

/// A named table with fixed columns, rendered as one CSV file.
#[derive(Debug, Clone)]
pub struct Sheet {
    pub name: &'static str,
    pub columns: &'static [Column],
    pub rows: Vec<Vec<Cell>>,
}

#[derive(Debug, Serialize)]
struct SheetLayout<'a> {
    sheet: &'a str,
    columns: Vec<ColumnLayout<'a>>,
}

#[derive(Debug, Serialize)]
struct ColumnLayout<'a> {
    header: &'a str,
    format: ColumnFormat,
    width: usize,
}

impl Sheet {
    pub fn headers(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.header).collect()
    }

    pub fn rendered_rows(&self) -> Vec<Vec<String>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .enumerate()
                    .map(|(i, column)| {
                        row.get(i)
                            .map(|cell| cell.render(column.format))
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .collect()
    }

    /// `max(15, header + 2)`, widened to the longest rendered cell.
    pub fn column_widths(&self) -> Vec<usize> {
        let rendered = self.rendered_rows();
        self.columns
            .iter()
            .enumerate()
            .map(|(i, column)| {
                let longest_cell = rendered
                    .iter()
                    .filter_map(|row| row.get(i))
                    .map(|cell| cell.chars().count())
                    .max()
                    .unwrap_or(0);
                MIN_COLUMN_WIDTH
                    .max(column.header.chars().count() + 2)
                    .max(longest_cell)
            })
            .collect()
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> EngineResult<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(self.headers())?;
        for row in self.rendered_rows() {
            csv_writer.write_record(&row)?;
        }
        csv_writer
            .flush()
            .map_err(|e| io_context(e, format!("Failed to flush sheet {}", self.name)))?;
        Ok(())
    }

    fn layout(&self) -> SheetLayout<'_> {
        SheetLayout {
            sheet: self.name,
            columns: self
                .columns
                .iter()
                .zip(self.column_widths())
                .map(|(column, width)| ColumnLayout {
                    header: column.header,
                    format: column.format,
                    width,
                })
                .collect(),
        }
    }
}

// --- Sheet definitions ---

pub const BASE_COLUMNS: &[Column] = &[
    text("Date"),
    text("Code projet"),
    text("Nom"),
    text("Grade"),
    decimal4("Heures"),
    text("Libelle projet"),
];

pub const EMPLOYEE_SUMMARY_COLUMNS: &[Column] = &[
    text("Libelle projet"),
    text("Nom"),
    text("Grade"),
    integer("Total Heures"),
    integer("Rate"),
    integer("Rate DES"),
    integer("Total"),
    integer("Total DES"),
];

pub const GLOBAL_SUMMARY_COLUMNS: &[Column] = &[
    text("Libelle projet"),
    integer("Total Heures"),
    integer("Total"),
    integer("Total DES"),
    integer("Estimees"),
];

pub const ADJUSTED_COLUMNS: &[Column] = &[
    text("ID"),
    text("Libelle projet"),
    text("Nom"),
    text("Grade"),
    integer("Total Heures"),
    integer("Rate"),
    integer("Total"),
    integer("Estimees"),
    integer("Total Projet Cout"),
    integer("Total Rate Projet"),
    decimal4("Coeff Total"),
    decimal4("Priority Coeff"),
    decimal4("Final Coeff"),
    integer("Adjusted Hours"),
    integer("Heures Retirees"),
    integer("Adjusted Cost"),
];

pub const RESULT_COLUMNS: &[Column] = &[
    text("Libelle projet"),
    integer("Total Heures"),
    integer("Adjusted Hours"),
    integer("Heures Retirees"),
    integer("Adjusted Cost"),
    integer("Estimees"),
    integer("Ecart"),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct ExportOptions {
    /// Drop rows with zero logged hours from the detail sheets.
    pub hide_zero_hours: bool,
}

fn num(value: Decimal) -> Cell {
    Cell::Number(value)
}

fn txt(value: &str) -> Cell {
    Cell::Text(value.to_string())
}

pub fn base_sheet(entries: &[TimeEntry], options: &ExportOptions) -> Sheet {
    let rows = entries
        .iter()
        .filter(|e| !options.hide_zero_hours || !e.hours.is_zero())
        .map(|e| {
            vec![
                e.work_date
                    .map(|d| Cell::Text(d.format("%Y-%m-%d").to_string()))
                    .unwrap_or(Cell::Empty),
                txt(&e.project_code),
                txt(&e.employee_name),
                txt(&e.grade),
                num(e.hours),
                txt(&e.project_label),
            ]
        })
        .collect();
    Sheet {
        name: "00_Base",
        columns: BASE_COLUMNS,
        rows,
    }
}

fn coefficient_cells(coefficients: Option<&Coefficients>) -> [Cell; 3] {
    match coefficients {
        // The cost share column shows the capped value used in the formula
        Some(c) => [
            num(c.cost_share_effective),
            num(c.priority),
            num(c.final_coefficient),
        ],
        None => [Cell::Empty, Cell::Empty, Cell::Empty],
    }
}

fn adjusted_row(row: &AllocationRow) -> Vec<Cell> {
    let [cost_share, priority, final_coefficient] = coefficient_cells(row.coefficients.as_ref());
    vec![
        txt(&row.id),
        txt(&row.project_label),
        txt(&row.employee_name),
        txt(&row.grade),
        num(row.total_hours),
        num(row.rate_primary),
        num(row.total_cost_primary),
        num(row.estimated_amount),
        num(row.project_total_cost),
        num(row.project_total_rate),
        cost_share,
        priority,
        final_coefficient,
        num(row.adjusted_hours),
        num(row.hours_removed),
        num(row.adjusted_cost),
    ]
}

/// The five sheets of a run, in output order.
pub fn workbook(results: &Results, options: &ExportOptions) -> Vec<Sheet> {
    let keep = |hours: Decimal| !options.hide_zero_hours || !hours.is_zero();

    let employee_summary = Sheet {
        name: "01_Employee_Summary",
        columns: EMPLOYEE_SUMMARY_COLUMNS,
        rows: results
            .employee_summaries
            .iter()
            .filter(|r| keep(r.total_hours))
            .map(|r| {
                vec![
                    txt(&r.project_label),
                    txt(&r.employee_name),
                    txt(&r.grade),
                    num(r.total_hours),
                    num(r.rate_primary),
                    num(r.rate_secondary),
                    num(r.total_cost_primary),
                    num(r.total_cost_secondary),
                ]
            })
            .collect(),
    };

    let global_summary = Sheet {
        name: "02_Global_Summary",
        columns: GLOBAL_SUMMARY_COLUMNS,
        rows: results
            .project_summaries
            .iter()
            .map(|r| {
                vec![
                    txt(&r.project_label),
                    num(r.total_hours),
                    num(r.total_cost_primary),
                    num(r.total_cost_secondary),
                    num(r.estimated_amount),
                ]
            })
            .collect(),
    };

    let adjusted = Sheet {
        name: "03_Adjusted",
        columns: ADJUSTED_COLUMNS,
        rows: results
            .allocations
            .iter()
            .filter(|r| keep(r.total_hours))
            .map(adjusted_row)
            .collect(),
    };

    let result = Sheet {
        name: "04_Result",
        columns: RESULT_COLUMNS,
        rows: results
            .project_results
            .iter()
            .map(|r| {
                vec![
                    txt(&r.project_label),
                    num(r.total_hours),
                    num(r.adjusted_hours),
                    num(r.hours_removed),
                    num(r.adjusted_cost),
                    num(r.estimated_amount),
                    num(r.variance),
                ]
            })
            .collect(),
    };

    vec![
        base_sheet(&results.time_entries, options),
        employee_summary,
        global_summary,
        adjusted,
        result,
    ]
}

/// Writes each sheet as `<name>.csv` under `dir`, plus a layout file with
/// column formats and widths. Returns the written CSV paths in order.
pub fn write_workbook(dir: &Path, sheets: &[Sheet]) -> EngineResult<Vec<PathBuf>> {
    fs::create_dir_all(dir)
        .map_err(|e| io_context(e, format!("Failed to create output directory: {:?}", dir)))?;

    let mut paths = Vec::with_capacity(sheets.len());
    for sheet in sheets {
        let path = dir.join(format!("{}.csv", sheet.name));
        let file = File::create(&path)
            .map_err(|e| io_context(e, format!("Failed to create sheet file: {:?}", path)))?;
        sheet.write_csv(file)?;
        debug!("Wrote {} rows to {:?}", sheet.rows.len(), path);
        paths.push(path);
    }

    let layouts: Vec<SheetLayout<'_>> = sheets.iter().map(Sheet::layout).collect();
    let layout_path = dir.join(LAYOUT_FILE);
    let json_string = serde_json::to_string_pretty(&layouts)?;
    fs::write(&layout_path, json_string)
        .map_err(|e| io_context(e, format!("Failed to write layout file: {:?}", layout_path)))?;

    info!("Exported {} sheets to {:?}", sheets.len(), dir);
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::{Engine, ProjectSelection, RunInputs};
    use crate::extract::RawTable;
    use crate::normalize::{MappingIndex, Normalizer};
    use crate::models::ProjectMapping;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn results() -> Results {
        let engine = Engine::from_rate_extract(
            &RawTable::new(
                "rates",
                &["Nom", "Rate", "Rate DES"],
                vec![vec!["alice", "100", "90"], vec!["bob", "50", "40"]],
            ),
            EngineConfig::default(),
        )
        .unwrap();
        let inputs = RunInputs {
            time_extract: RawTable::new(
                "time",
                &["Date", "Code projet", "Nom", "Grade", "Heures"],
                vec![
                    vec!["2024-05-02", "C1", "alice", "G1", "10"],
                    vec!["2024-05-02", "C1", "bob", "G1", "10"],
                    vec!["2024-05-03", "C2", "bob", "G1", "0"],
                ],
            ),
            mapping: RawTable::new(
                "mapping",
                &["Code projet", "Libelle projet", "Customer Name"],
                vec![vec!["C1", "P1", "Acme"], vec!["C2", "P2", "Hooli"]],
            ),
            budget: RawTable::new(
                "budget",
                &["Customer Name", "May 24 Forecasts"],
                vec![vec!["Acme", "1200"]],
            ),
            period_label: "May 2024".to_string(),
        };
        engine.run(&inputs, &ProjectSelection::All).unwrap()
    }

    #[test]
    fn workbook_has_stable_sheets_and_columns() {
        let sheets = workbook(&results(), &ExportOptions::default());
        let names: Vec<&str> = sheets.iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec![
                "00_Base",
                "01_Employee_Summary",
                "02_Global_Summary",
                "03_Adjusted",
                "04_Result"
            ]
        );
        assert_eq!(
            sheets[4].headers(),
            vec![
                "Libelle projet",
                "Total Heures",
                "Adjusted Hours",
                "Heures Retirees",
                "Adjusted Cost",
                "Estimees",
                "Ecart"
            ]
        );
        assert_eq!(sheets[3].headers().len(), 16);
    }

    #[test]
    fn cells_render_by_column_format() {
        let sheets = workbook(&results(), &ExportOptions::default());
        let adjusted = sheets[3].rendered_rows();
        let alice = &adjusted[0];
        assert_eq!(alice[0], "alice - P1");
        assert_eq!(alice[10], "0.8000");
        assert_eq!(alice[11], "0.6667");
        assert_eq!(alice[13], "5");
        assert_eq!(alice[15], "500");

        // Zero-basis project leaves the coefficient cells blank
        let bob_p2 = adjusted.iter().find(|r| r[0] == "bob - P2").unwrap();
        assert_eq!(bob_p2[10], "");
        assert_eq!(bob_p2[13], "0");
    }

    #[test]
    fn hide_zero_hours_filters_detail_rows() {
        let options = ExportOptions {
            hide_zero_hours: true,
        };
        let sheets = workbook(&results(), &options);
        assert_eq!(sheets[0].rows.len(), 2);
        assert_eq!(sheets[1].rows.len(), 2);
        assert_eq!(sheets[3].rows.len(), 2);
        // Project-level sheets are not filtered
        assert_eq!(sheets[4].rows.len(), 2);
    }

    #[test]
    fn widths_have_a_minimum_and_grow_with_content() {
        const COLUMNS: &[Column] = &[text("ID"), text("Total Projet Cout Header")];
        let sheet = Sheet {
            name: "t",
            columns: COLUMNS,
            rows: vec![vec![txt("a very long identifier value"), txt("x")]],
        };
        assert_eq!(sheet.column_widths(), vec![28, 26]);

        let empty = Sheet {
            name: "t",
            columns: RESULT_COLUMNS,
            rows: Vec::new(),
        };
        assert_eq!(empty.column_widths(), vec![16, 15, 16, 17, 15, 15, 15]);
    }

    #[test]
    fn write_workbook_creates_csv_and_layout_files() {
        let dir = tempfile::tempdir().unwrap();
        let sheets = workbook(&results(), &ExportOptions::default());
        let paths = write_workbook(dir.path(), &sheets).unwrap();
        assert_eq!(paths.len(), 5);

        let result_csv = fs::read_to_string(dir.path().join("04_Result.csv")).unwrap();
        let mut lines = result_csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "Libelle projet,Total Heures,Adjusted Hours,Heures Retirees,Adjusted Cost,Estimees,Ecart"
        );
        assert_eq!(lines.next().unwrap(), "P1,20,12,8,850,1200,350");

        let layout: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join(LAYOUT_FILE)).unwrap())
                .unwrap();
        assert_eq!(layout[0]["sheet"], "00_Base");
        assert_eq!(layout[3]["columns"][10]["format"], "Decimal4");
    }

    #[test]
    fn base_sheet_normalizes_back_to_the_same_entries() {
        let entries = vec![
            TimeEntry {
                project_code: "C1".to_string(),
                project_label: "P1".to_string(),
                employee_name: "alice".to_string(),
                grade: "G1".to_string(),
                work_date: NaiveDate::from_ymd_opt(2024, 5, 2),
                hours: dec!(7.5),
            },
            TimeEntry {
                project_code: "C2".to_string(),
                project_label: "P2".to_string(),
                employee_name: "bob".to_string(),
                grade: "G2".to_string(),
                work_date: None,
                hours: dec!(0),
            },
        ];
        let sheet = base_sheet(&entries, &ExportOptions::default());
        let mut buffer = Vec::new();
        sheet.write_csv(&mut buffer).unwrap();
        let table = RawTable::from_csv_reader("base", buffer.as_slice(), 0).unwrap();

        let mapping = MappingIndex::new(&[
            ProjectMapping {
                project_code: "C1".to_string(),
                project_label: "P1".to_string(),
                customer_name: None,
            },
            ProjectMapping {
                project_code: "C2".to_string(),
                project_label: "P2".to_string(),
                customer_name: None,
            },
        ]);
        let config = EngineConfig::default();
        let mut normalizer = Normalizer::new(&config);
        let renormalized = normalizer.time_entries(&table, &mapping).unwrap();
        assert_eq!(renormalized, entries);
        assert!(normalizer.diagnostics().is_empty());
    }
}
