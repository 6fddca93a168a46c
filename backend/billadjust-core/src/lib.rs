// src/lib.rs
//! Budget allocation and reconciliation over monthly time extracts.
//!
//! [`Engine::prepare`] normalizes the extracts and aggregates hours per
//! employee and project; [`Engine::execute`] allocates each project's
//! budget estimate across those rows and reconciles the result.

pub mod aggregate;
pub mod allocation;
pub mod columns;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod export;
pub mod extract;
pub mod models;
pub mod normalize;
pub mod period;
pub mod reconcile;
pub mod snapshot;


pub use config::{EngineConfig, EstimateJoin, UnmappedCodePolicy};
pub use diagnostics::{Diagnostic, RunDiagnostics};
pub use engine::{Engine, ProjectSelection, Results, RunHandle, RunInputs};
pub use error::{EngineError, EngineResult};
pub use export::{workbook, write_workbook, ExportOptions, Sheet};
pub use extract::RawTable;
pub use models::*;
pub use period::BudgetPeriod;
pub use snapshot::SnapshotStore;
