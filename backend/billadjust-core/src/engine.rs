// src/engine.rs
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{info, warn};

use crate::aggregate::{aggregate_employee_projects, estimate_lookup, summarize_projects};
use crate::allocation::{allocate, AllocationPolicy};
use crate::config::EngineConfig;
use crate::diagnostics::{Diagnostic, RunDiagnostics};
use crate::error::EngineResult;
use crate::extract::RawTable;
use crate::models::{
    AllocationRow, BudgetEstimate, EmployeeProjectSummary, ProjectLabel, ProjectResult,
    ProjectSummary, RateCard, TimeEntry,
};
use crate::normalize::{MappingIndex, Normalizer};
use crate::period::BudgetPeriod;
use crate::reconcile::{self, PresentationRound};

const RUN_ID_LEN: usize = 16;
const SELECTION_KEY_LEN: usize = 8;

/// Per-run extracts. The rate card is held by the [`Engine`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInputs {
    pub time_extract: RawTable,
    pub mapping: RawTable,
    pub budget: RawTable,
    pub period_label: String,
}

impl RunInputs {
    /// Deterministic id: hex prefix of the SHA-256 of the serialized inputs
    /// and the rate card they are priced with.
    pub fn run_id(&self, rates: &RateCard) -> EngineResult<String> {
        let bytes = serde_json::to_vec(&(self, rates.sorted_entries()))?;
        let digest = Sha256::digest(&bytes);
        let mut id = hex::encode(digest);
        id.truncate(RUN_ID_LEN);
        Ok(id)
    }
}

/// Output of [`Engine::prepare`]: everything up to the employee summaries,
/// ready for one or more selections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunHandle {
    pub run_id: String,
    pub period_label: String,
    pub period: BudgetPeriod,
    pub time_entries: Vec<TimeEntry>,
    pub estimates: Vec<BudgetEstimate>,
    pub employee_summaries: Vec<EmployeeProjectSummary>,
    pub diagnostics: RunDiagnostics,
}

impl RunHandle {
    /// Every label with logged hours or a budget estimate, sorted.
    pub fn available_projects(&self) -> Vec<ProjectLabel> {
        let labels: BTreeSet<&str> = self
            .employee_summaries
            .iter()
            .map(|s| s.project_label.as_str())
            .chain(self.estimates.iter().map(|e| e.project_label.as_str()))
            .collect();
        labels.into_iter().map(String::from).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectSelection {
    All,
    Only(BTreeSet<ProjectLabel>),
}

impl ProjectSelection {
    pub fn only<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ProjectSelection::Only(labels.into_iter().map(Into::into).collect())
    }

    pub fn includes(&self, label: &str) -> bool {
        match self {
            ProjectSelection::All => true,
            ProjectSelection::Only(labels) => labels.contains(label),
        }
    }

    /// Storage key for results of `run_id` under this selection. `All`
    /// uses the bare run id; a subset appends a short hash of its labels.
    pub fn results_key(&self, run_id: &str) -> String {
        match self {
            ProjectSelection::All => run_id.to_string(),
            ProjectSelection::Only(labels) => {
                let mut hasher = Sha256::new();
                for label in labels {
                    hasher.update(label.as_bytes());
                    hasher.update([0u8]);
                }
                let mut suffix = hex::encode(hasher.finalize());
                suffix.truncate(SELECTION_KEY_LEN);
                format!("{}-{}", run_id, suffix)
            }
        }
    }
}

/// The derived tables of one executed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Results {
    pub run_id: String,
    pub period: BudgetPeriod,
    pub selection: ProjectSelection,
    pub time_entries: Vec<TimeEntry>,
    pub employee_summaries: Vec<EmployeeProjectSummary>,
    pub project_summaries: Vec<ProjectSummary>,
    pub allocations: Vec<AllocationRow>,
    pub project_results: Vec<ProjectResult>,
    /// Estimates of the selected projects, kept for re-reconciliation.
    pub estimates: BTreeMap<ProjectLabel, Decimal>,
    pub diagnostics: RunDiagnostics,
}

impl Results {
    /// Returns new results with the given adjusted hours applied and the
    /// project results re-aggregated. `self` is left as it was.
    pub fn apply_overrides(&self, overrides: &BTreeMap<String, Decimal>) -> EngineResult<Results> {
        let mut updated = self.clone();
        reconcile::apply_overrides(&mut updated.allocations, overrides)?;
        updated.project_results = reconcile::reconcile(&updated.allocations, &updated.estimates)?;
        Ok(updated)
    }

    /// Key the results are stored under; see [`ProjectSelection::results_key`].
    pub fn results_key(&self) -> String {
        self.selection.results_key(&self.run_id)
    }

    /// Copy with every table rounded for presentation.
    pub fn rounded(&self) -> Results {
        Results {
            employee_summaries: self.employee_summaries.iter().map(|r| r.rounded()).collect(),
            project_summaries: self.project_summaries.iter().map(|r| r.rounded()).collect(),
            allocations: self.allocations.iter().map(|r| r.rounded()).collect(),
            project_results: self.project_results.iter().map(|r| r.rounded()).collect(),
            ..self.clone()
        }
    }

    pub fn allocation(&self, id: &str) -> Option<&AllocationRow> {
        self.allocations.iter().find(|r| r.id == id)
    }

    pub fn project_result(&self, label: &str) -> Option<&ProjectResult> {
        self.project_results.iter().find(|r| r.project_label == label)
    }
}

// --- Engine ---

/// Runs the pipeline against a shared, read-only rate card. Holds no
/// per-run state, so one engine can serve concurrent runs.
#[derive(Debug, Clone)]
pub struct Engine {
    rates: Arc<RateCard>,
    config: Arc<EngineConfig>,
    rate_diagnostics: RunDiagnostics,
}

impl Engine {
    pub fn new(rates: Arc<RateCard>, config: EngineConfig) -> Self {
        Self {
            rates,
            config: Arc::new(config),
            rate_diagnostics: RunDiagnostics::new(),
        }
    }

    /// Normalizes a rate extract and builds an engine around it. Coercions
    /// made while reading the rate card are reported with every run.
    pub fn from_rate_extract(table: &RawTable, config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let mut normalizer = Normalizer::new(&config);
        let rates = normalizer.rate_card(table)?;
        let rate_diagnostics = normalizer.into_diagnostics();
        Ok(Self {
            rates: Arc::new(rates),
            config: Arc::new(config),
            rate_diagnostics,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn rates(&self) -> &Arc<RateCard> {
        &self.rates
    }

    /// Normalization, label resolution and aggregation.
    pub fn prepare(&self, inputs: &RunInputs) -> EngineResult<RunHandle> {
        let run_id = inputs.run_id(&self.rates)?;
        info!("Preparing run {} for '{}'", run_id, inputs.period_label);
        let period = BudgetPeriod::parse(&inputs.period_label)?;

        let mut normalizer = Normalizer::new(&self.config);
        let mappings = normalizer.project_mappings(&inputs.mapping)?;
        let index = MappingIndex::new(&mappings);
        let time_entries = normalizer.time_entries(&inputs.time_extract, &index)?;
        let estimates = normalizer.budget_estimates(&inputs.budget, &period, &index)?;

        let mut diagnostics = self.rate_diagnostics.clone();
        diagnostics.extend(normalizer.into_diagnostics());
        let employee_summaries =
            aggregate_employee_projects(&time_entries, &self.rates, &mut diagnostics)?;

        let handle = RunHandle {
            run_id,
            period_label: inputs.period_label.clone(),
            period,
            time_entries,
            estimates,
            employee_summaries,
            diagnostics,
        };
        info!(
            "Run {} prepared: {} projects available, {} diagnostics",
            handle.run_id,
            handle.available_projects().len(),
            handle.diagnostics.len()
        );
        Ok(handle)
    }

    /// Summary, allocation and reconciliation for the selected projects.
    pub fn execute(&self, handle: &RunHandle, selection: &ProjectSelection) -> EngineResult<Results> {
        let mut diagnostics = handle.diagnostics.clone();
        if let ProjectSelection::Only(labels) = selection {
            let available = handle.available_projects();
            for label in labels {
                if !available.contains(label) {
                    warn!("Selected project '{}' is not part of run {}", label, handle.run_id);
                    diagnostics.record_once(Diagnostic::UnknownProjectSelected {
                        project_label: label.clone(),
                    });
                }
            }
        }

        let time_entries: Vec<TimeEntry> = handle
            .time_entries
            .iter()
            .filter(|e| selection.includes(&e.project_label))
            .cloned()
            .collect();
        let employee_summaries: Vec<EmployeeProjectSummary> = handle
            .employee_summaries
            .iter()
            .filter(|s| selection.includes(&s.project_label))
            .cloned()
            .collect();
        let selected_estimates: Vec<BudgetEstimate> = handle
            .estimates
            .iter()
            .filter(|e| selection.includes(&e.project_label))
            .cloned()
            .collect();

        let project_summaries = summarize_projects(
            &employee_summaries,
            &selected_estimates,
            self.config.estimate_join,
        )?;
        let estimates = estimate_lookup(&selected_estimates)?;
        let allocations = allocate(
            &employee_summaries,
            &estimates,
            &AllocationPolicy::from(self.config.as_ref()),
        )?;
        if let Err(e) = reconcile::ensure_unique_ids(&allocations) {
            warn!("Run {}: {}; overrides on that id will be rejected", handle.run_id, e);
        }
        let project_results = reconcile::reconcile(&allocations, &estimates)?;

        info!(
            "Run {} executed: {} allocation rows, {} project results",
            handle.run_id,
            allocations.len(),
            project_results.len()
        );
        Ok(Results {
            run_id: handle.run_id.clone(),
            period: handle.period,
            selection: selection.clone(),
            time_entries,
            employee_summaries,
            project_summaries,
            allocations,
            project_results,
            estimates,
            diagnostics,
        })
    }

    pub fn run(&self, inputs: &RunInputs, selection: &ProjectSelection) -> EngineResult<Results> {
        let handle = self.prepare(inputs)?;
        self.execute(&handle, selection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EstimateJoin;
    use crate::error::EngineError;
    use rust_decimal_macros::dec;

    fn rate_extract() -> RawTable {
        RawTable::new(
            "rates",
            &["Nom", "Grade", "Rate", "Rate DES"],
            vec![
                vec!["Alice", "G1", "100", "90"],
                vec!["Bob", "G1", "50", "45"],
                vec!["Carol", "G2", "80", "-"],
            ],
        )
    }

    fn inputs(estimate: &str) -> RunInputs {
        RunInputs {
            time_extract: RawTable::new(
                "time",
                &["Date", "Code projet", "Nom", "Grade", "Heures"],
                vec![
                    vec!["2024-05-02", "C1", "alice", "G1", "6"],
                    vec!["2024-05-03", "C1", "ALICE", "G1", "4"],
                    vec!["2024-05-02", "C1", "bob", "G1", "10"],
                    vec!["2024-05-06", "C2", "carol", "G2", "4"],
                    vec!["2024-05-07", "C7", "dan", "G3", "3"],
                ],
            ),
            mapping: RawTable::new(
                "mapping",
                &["Code projet", "Libelle projet", "Customer Name"],
                vec![
                    vec!["C1", "P1", "Acme"],
                    vec!["C2", "P2", "Globex"],
                    vec!["C3", "P3", "Initech"],
                ],
            ),
            budget: RawTable::new(
                "budget",
                &["Country", "Customer Name", "May 24 Forecasts"],
                vec![
                    vec!["FR", "Acme", estimate],
                    vec!["FR", "Globex", "320"],
                    vec!["FR", "Initech", "75"],
                ],
            ),
            period_label: "Heures IBM Mai 24.xlsx".to_string(),
        }
    }

    fn engine() -> Engine {
        Engine::from_rate_extract(&rate_extract(), EngineConfig::default()).unwrap()
    }

    #[test]
    fn run_produces_expected_allocation() {
        let results = engine()
            .run(&inputs("1200"), &ProjectSelection::All)
            .unwrap();

        assert_eq!(results.period, BudgetPeriod { month: 5, year: 2024 });
        assert_eq!(results.allocation("alice - P1").unwrap().adjusted_hours, dec!(5));
        assert_eq!(results.allocation("bob - P1").unwrap().adjusted_hours, dec!(7));
        // carol: estimate 320 covers her whole cost, floor keeps round(4 * 0.3)
        assert_eq!(results.allocation("carol - P2").unwrap().adjusted_hours, dec!(1));

        let p1 = results.project_result("P1").unwrap();
        assert_eq!(p1.adjusted_cost, dec!(850));
        assert_eq!(p1.variance, dec!(350));

        // Budget-only project appears with zero sums
        let p3 = results.project_result("P3").unwrap();
        assert_eq!(p3.total_hours, dec!(0));
        assert_eq!(p3.variance, dec!(75));

        // Unmapped code falls back to the default label; dan has no rate
        let fallback = results.allocation("dan - Code France").unwrap();
        assert_eq!(fallback.adjusted_hours, dec!(3));
        assert_eq!(
            results
                .diagnostics
                .count_matching(|d| matches!(d, Diagnostic::MissingRate { .. })),
            1
        );
        assert_eq!(
            results
                .diagnostics
                .count_matching(|d| matches!(d, Diagnostic::UnmappedProjectCode { .. })),
            1
        );
    }

    #[test]
    fn estimate_left_summary_omits_unbudgeted_projects() {
        let results = engine()
            .run(&inputs("1200"), &ProjectSelection::All)
            .unwrap();
        let labels: Vec<&str> = results
            .project_summaries
            .iter()
            .map(|s| s.project_label.as_str())
            .collect();
        assert_eq!(labels, vec!["P1", "P2", "P3"]);

        let config = EngineConfig {
            estimate_join: EstimateJoin::HoursLeft,
            ..EngineConfig::default()
        };
        let engine = Engine::from_rate_extract(&rate_extract(), config).unwrap();
        let results = engine.run(&inputs("1200"), &ProjectSelection::All).unwrap();
        let labels: Vec<&str> = results
            .project_summaries
            .iter()
            .map(|s| s.project_label.as_str())
            .collect();
        assert_eq!(labels, vec!["Code France", "P1", "P2"]);
    }

    #[test]
    fn estimate_above_cost_and_zero_estimate() {
        let results = engine().run(&inputs("2000"), &ProjectSelection::All).unwrap();
        assert_eq!(results.allocation("alice - P1").unwrap().adjusted_hours, dec!(3));
        assert_eq!(results.allocation("bob - P1").unwrap().adjusted_hours, dec!(7));

        let results = engine().run(&inputs("-"), &ProjectSelection::All).unwrap();
        assert_eq!(results.allocation("alice - P1").unwrap().adjusted_hours, dec!(10));
        assert_eq!(results.allocation("bob - P1").unwrap().adjusted_hours, dec!(10));
    }

    #[test]
    fn prepare_is_deterministic_and_serializable() {
        let engine = engine();
        let first = engine.prepare(&inputs("1200")).unwrap();
        let second = engine.prepare(&inputs("1200")).unwrap();
        assert_eq!(first.run_id, second.run_id);
        assert_eq!(first.run_id.len(), 16);
        assert_ne!(first.run_id, engine.prepare(&inputs("1300")).unwrap().run_id);

        let json = serde_json::to_string(&first).unwrap();
        let restored: RunHandle = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, first);
        assert_eq!(
            restored.available_projects(),
            vec!["Code France", "P1", "P2", "P3"]
        );
    }

    #[test]
    fn run_id_changes_with_the_rate_card() {
        let priced_at = |rate: &str| {
            let rates = RawTable::new("rates", &["Nom", "Rate"], vec![vec!["alice", rate]]);
            Engine::from_rate_extract(&rates, EngineConfig::default()).unwrap()
        };
        let cheap = priced_at("100").prepare(&inputs("1200")).unwrap();
        let dear = priced_at("300").prepare(&inputs("1200")).unwrap();
        assert_ne!(cheap.run_id, dear.run_id);
        assert_eq!(cheap.run_id, priced_at("100").prepare(&inputs("1200")).unwrap().run_id);
    }

    #[test]
    fn results_key_separates_selections() {
        let engine = engine();
        let handle = engine.prepare(&inputs("1200")).unwrap();
        let all = engine.execute(&handle, &ProjectSelection::All).unwrap();
        let p1 = engine
            .execute(&handle, &ProjectSelection::only(["P1"]))
            .unwrap();
        let p2 = engine
            .execute(&handle, &ProjectSelection::only(["P2"]))
            .unwrap();

        assert_eq!(all.results_key(), handle.run_id);
        assert!(p1.results_key().starts_with(&format!("{}-", handle.run_id)));
        assert_eq!(p1.results_key().len(), 16 + 1 + 8);
        assert_ne!(p1.results_key(), p2.results_key());
        assert_eq!(
            ProjectSelection::only(["P2", "P1"]).results_key("r"),
            ProjectSelection::only(["P1", "P2"]).results_key("r")
        );
    }

    #[test]
    fn overflowing_hours_and_rates_fail_the_run() {
        let rates = RawTable::new("rates", &["Nom", "Rate"], vec![vec!["alice", "1e15"]]);
        let engine = Engine::from_rate_extract(&rates, EngineConfig::default()).unwrap();
        let mut huge = inputs("1200");
        huge.time_extract = RawTable::new(
            "time",
            &["Date", "Code projet", "Nom", "Grade", "Heures"],
            vec![vec!["2024-05-02", "C1", "alice", "G1", "1e15"]],
        );

        let result = engine.run(&huge, &ProjectSelection::All);
        if let Err(EngineError::ArithmeticOverflow { operation }) = result {
            assert_eq!(operation, "employee cost");
        } else {
            panic!("Wrong error type returned");
        }
    }

    #[test]
    fn invalid_floor_ratio_is_rejected_by_the_engine() {
        let config = EngineConfig {
            floor_ratio: dec!(2),
            ..EngineConfig::default()
        };
        let result = Engine::from_rate_extract(&rate_extract(), config);
        if let Err(EngineError::InvalidConfig { field, .. }) = result {
            assert_eq!(field, "floor_ratio");
        } else {
            panic!("Wrong error type returned");
        }
    }

    #[test]
    fn selection_restricts_projects_and_reports_unknown_labels() {
        let engine = engine();
        let handle = engine.prepare(&inputs("1200")).unwrap();
        let results = engine
            .execute(&handle, &ProjectSelection::only(["P1", "P42"]))
            .unwrap();

        assert!(results.allocations.iter().all(|r| r.project_label == "P1"));
        assert!(results.time_entries.iter().all(|e| e.project_label == "P1"));
        assert_eq!(results.project_results.len(), 1);
        assert!(results
            .diagnostics
            .entries()
            .contains(&Diagnostic::UnknownProjectSelected {
                project_label: "P42".to_string()
            }));
    }

    #[test]
    fn overrides_produce_new_results() {
        let results = engine().run(&inputs("1200"), &ProjectSelection::All).unwrap();
        let overrides: BTreeMap<String, Decimal> =
            [("alice - P1".to_string(), dec!(8))].into_iter().collect();
        let edited = results.apply_overrides(&overrides).unwrap();

        let alice = edited.allocation("alice - P1").unwrap();
        assert_eq!(alice.hours_removed, dec!(2));
        assert_eq!(alice.adjusted_cost, dec!(800));
        let p1 = edited.project_result("P1").unwrap();
        assert_eq!(p1.adjusted_hours, dec!(15));
        assert_eq!(p1.variance, dec!(50));

        // The input results are left as they were
        assert_eq!(results.allocation("alice - P1").unwrap().adjusted_hours, dec!(5));
    }

    #[test]
    fn fatal_conditions_abort_the_run() {
        let mut bad_period = inputs("1200");
        bad_period.period_label = "Heures IBM.xlsx".to_string();
        let result = engine().prepare(&bad_period);
        if let Err(EngineError::PeriodNotRecognized { label }) = result {
            assert_eq!(label, "Heures IBM.xlsx");
        } else {
            panic!("Wrong error type returned");
        }

        let empty_rates = RawTable::new("rates", &["Nom", "Rate"], vec![]);
        let result = Engine::from_rate_extract(&empty_rates, EngineConfig::default());
        assert!(matches!(result, Err(EngineError::MissingReferenceData { .. })));
    }

    #[test]
    fn rounded_results_keep_coefficients_at_four_places() {
        let results = engine().run(&inputs("1200"), &ProjectSelection::All).unwrap().rounded();
        let alice = results.allocation("alice - P1").unwrap();
        assert_eq!(alice.coefficients.unwrap().priority, dec!(0.6667));
    }
}
