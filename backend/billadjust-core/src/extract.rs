// src/extract.rs
use csv::{ReaderBuilder, StringRecord, Trim};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{io_context, EngineResult};

/// A raw tabular extract: cleaned headers plus string cells.
///
/// Every stage after reading works on `RawTable`, so callers that already
/// hold the data in memory can build one directly with [`RawTable::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTable {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(name: &str, headers: &[&str], rows: Vec<Vec<&str>>) -> Self {
        Self {
            name: name.to_string(),
            headers: headers.iter().map(|h| clean_header(h)).collect(),
            rows: rows
                .into_iter()
                .map(|row| row.into_iter().map(String::from).collect())
                .collect(),
        }
    }

    /// Reads a CSV file. `header_row` lines above the header are skipped.
    pub fn from_csv_path(name: &str, path: &Path, header_row: usize) -> EngineResult<Self> {
        info!("Reading {} extract from {}", name, path.display());
        let file = File::open(path)
            .map_err(|e| io_context(e, format!("Failed to open {} extract: {:?}", name, path)))?;
        Self::from_csv_reader(name, file, header_row)
    }

    pub fn from_csv_reader<R: Read>(name: &str, reader: R, header_row: usize) -> EngineResult<Self> {
        let mut csv_reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(Trim::None)
            .from_reader(reader);

        let mut records = csv_reader.records();
        for skipped in 0..header_row {
            if records.next().transpose()?.is_none() {
                debug!("{} extract ended while skipping banner line {}", name, skipped);
                return Ok(Self {
                    name: name.to_string(),
                    headers: Vec::new(),
                    rows: Vec::new(),
                });
            }
        }

        let headers: Vec<String> = match records.next().transpose()? {
            Some(record) => record.iter().map(clean_header).collect(),
            None => Vec::new(),
        };

        let mut rows = Vec::new();
        for record in records {
            let record: StringRecord = record?;
            if record.iter().all(|cell| cell.trim().is_empty()) {
                continue;
            }
            rows.push(record.iter().map(String::from).collect());
        }

        debug!(
            "{} extract: {} columns, {} data rows",
            name,
            headers.len(),
            rows.len()
        );
        Ok(Self {
            name: name.to_string(),
            headers,
            rows,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell at `(row, column)`; short rows read as empty.
    pub fn cell(&self, row: usize, column: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Trims, turns embedded line breaks into spaces and collapses runs of
/// whitespace.
pub fn clean_header(raw: &str) -> String {
    raw.replace(['\n', '\r'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
