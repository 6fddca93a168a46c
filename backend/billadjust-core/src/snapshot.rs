// src/snapshot.rs
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use crate::engine::{Results, RunHandle};
use crate::error::{io_context, EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    Handle,
    Results,
}

impl SnapshotKind {
    fn file_suffix(self) -> &'static str {
        match self {
            SnapshotKind::Handle => "handle",
            SnapshotKind::Results => "results",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub run_id: String,
    /// File key: the run id for handles, the run id plus a selection hash
    /// for results of a project subset.
    pub key: String,
    pub saved_at_unix_secs: u64,
    pub kind: SnapshotKind,
}

impl SnapshotMetadata {
    fn new(run_id: &str, key: &str, kind: SnapshotKind) -> EngineResult<Self> {
        Ok(Self {
            run_id: run_id.to_string(),
            key: key.to_string(),
            saved_at_unix_secs: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_err(|e| {
                    EngineError::Snapshot(format!("Failed to read system time for snapshot: {}", e))
                })?
                .as_secs(),
            kind,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot<T> {
    metadata: SnapshotMetadata,
    data: T,
}

const DRAFT_DIR: &str = "draft";

/// JSON files keyed by run id: `<run_id>.handle.json` and
/// `<results key>.results.json`. A file about to be overwritten is first
/// copied to `draft/<name>.<timestamp>.json`.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn draft_dir(&self) -> PathBuf {
        self.dir.join(DRAFT_DIR)
    }

    fn file_path(&self, key: &str, kind: SnapshotKind) -> PathBuf {
        let safe_key = key.replace(|c: char| !c.is_ascii_alphanumeric() && c != '-', "_");
        self.dir
            .join(format!("{}.{}.json", safe_key, kind.file_suffix()))
    }

    fn backup_existing(&self, path: &Path) -> EngineResult<Option<PathBuf>> {
        if !path.exists() {
            return Ok(None);
        }
        let draft_dir = self.draft_dir();
        fs::create_dir_all(&draft_dir).map_err(|e| {
            io_context(e, format!("Failed to create draft directory: {:?}", draft_dir))
        })?;

        let stem = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("snapshot");
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%3f").to_string();
        let mut backup = draft_dir.join(format!("{}.{}.json", stem, stamp));
        let mut attempt = 1;
        while backup.exists() {
            backup = draft_dir.join(format!("{}.{}-{}.json", stem, stamp, attempt));
            attempt += 1;
        }

        fs::copy(path, &backup)
            .map_err(|e| io_context(e, format!("Failed to back up snapshot {:?}", path)))?;
        info!("Kept previous snapshot as {:?}", backup);
        Ok(Some(backup))
    }

    fn save<T: Serialize>(
        &self,
        run_id: &str,
        key: &str,
        kind: SnapshotKind,
        data: &T,
    ) -> EngineResult<PathBuf> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            io_context(e, format!("Failed to create snapshot directory: {:?}", self.dir))
        })?;

        let path = self.file_path(key, kind);
        let snapshot = Snapshot {
            metadata: SnapshotMetadata::new(run_id, key, kind)?,
            data,
        };
        let json_string = serde_json::to_string_pretty(&snapshot)?;
        self.backup_existing(&path)?;

        let mut file = File::create(&path)
            .map_err(|e| io_context(e, format!("Failed to create snapshot file: {:?}", path)))?;
        file.write_all(json_string.as_bytes())
            .map_err(|e| io_context(e, format!("Failed to write snapshot file: {:?}", path)))?;

        debug!("Saved {:?} snapshot {} to {:?}", kind, key, path);
        Ok(path)
    }

    fn load<T: DeserializeOwned>(
        &self,
        key: &str,
        kind: SnapshotKind,
    ) -> EngineResult<Option<(SnapshotMetadata, T)>> {
        let path = self.file_path(key, kind);
        if !path.exists() {
            debug!("No {:?} snapshot for {}", kind, key);
            return Ok(None);
        }

        let json_string = fs::read_to_string(&path)
            .map_err(|e| io_context(e, format!("Failed to read snapshot file: {:?}", path)))?;
        let snapshot: Snapshot<T> = serde_json::from_str(&json_string).map_err(|e| {
            warn!("Snapshot {:?} could not be parsed: {}", path, e);
            EngineError::Snapshot(format!("Corrupt snapshot {:?}: {}", path, e))
        })?;

        if snapshot.metadata.key != key || snapshot.metadata.kind != kind {
            return Err(EngineError::Snapshot(format!(
                "Snapshot {:?} holds {:?} for {}, expected {:?} for {}",
                path, snapshot.metadata.kind, snapshot.metadata.key, kind, key
            )));
        }
        Ok(Some((snapshot.metadata, snapshot.data)))
    }

    pub fn save_handle(&self, handle: &RunHandle) -> EngineResult<PathBuf> {
        let path = self.save(&handle.run_id, &handle.run_id, SnapshotKind::Handle, handle)?;
        info!("Stored prepared run {}", handle.run_id);
        Ok(path)
    }

    pub fn load_handle(&self, run_id: &str) -> EngineResult<Option<RunHandle>> {
        Ok(self
            .load::<RunHandle>(run_id, SnapshotKind::Handle)?
            .map(|(_, handle)| handle))
    }

    /// Stores results under [`Results::results_key`], so each project
    /// selection of a run keeps its own file.
    pub fn save_results(&self, results: &Results) -> EngineResult<PathBuf> {
        let key = results.results_key();
        let path = self.save(&results.run_id, &key, SnapshotKind::Results, results)?;
        info!("Stored results {} for run {}", key, results.run_id);
        Ok(path)
    }

    pub fn load_results(&self, key: &str) -> EngineResult<Option<Results>> {
        Ok(self
            .load::<Results>(key, SnapshotKind::Results)?
            .map(|(_, results)| results))
    }

    /// Metadata of a stored snapshot without keeping its payload.
    pub fn metadata(&self, key: &str, kind: SnapshotKind) -> EngineResult<Option<SnapshotMetadata>> {
        Ok(self
            .load::<serde_json::Value>(key, kind)?
            .map(|(metadata, _)| metadata))
    }

    /// Backups in `draft/`, oldest name first.
    pub fn drafts(&self) -> EngineResult<Vec<PathBuf>> {
        let draft_dir = self.draft_dir();
        if !draft_dir.exists() {
            return Ok(Vec::new());
        }
        let mut paths = Vec::new();
        for entry in fs::read_dir(&draft_dir)
            .map_err(|e| io_context(e, format!("Failed to list drafts in {:?}", draft_dir)))?
        {
            let entry =
                entry.map_err(|e| io_context(e, format!("Failed to list drafts in {:?}", draft_dir)))?;
            paths.push(entry.path());
        }
        paths.sort();
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::{Engine, ProjectSelection, RunInputs};
    use crate::extract::RawTable;

    fn engine_and_inputs() -> (Engine, RunInputs) {
        let engine = Engine::from_rate_extract(
            &RawTable::new("rates", &["Nom", "Rate"], vec![vec!["alice", "100"]]),
            EngineConfig::default(),
        )
        .unwrap();
        let inputs = RunInputs {
            time_extract: RawTable::new(
                "time",
                &["Date", "Code projet", "Nom", "Grade", "Heures"],
                vec![vec!["2024-06-03", "C1", "alice", "G1", "8"]],
            ),
            mapping: RawTable::new(
                "mapping",
                &["Code projet", "Libelle projet"],
                vec![vec!["C1", "P1"]],
            ),
            budget: RawTable::new(
                "budget",
                &["Customer Name", "Jun 24 Forecasts"],
                vec![vec!["P1", "400"]],
            ),
            period_label: "Juin 24".to_string(),
        };
        (engine, inputs)
    }

    #[test]
    fn handle_and_results_survive_a_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let (engine, inputs) = engine_and_inputs();

        let handle = engine.prepare(&inputs).unwrap();
        store.save_handle(&handle).unwrap();
        let loaded = store.load_handle(&handle.run_id).unwrap().unwrap();
        assert_eq!(loaded, handle);

        let results = engine.execute(&loaded, &ProjectSelection::All).unwrap();
        let path = store.save_results(&results).unwrap();
        assert!(path.ends_with(format!("{}.results.json", results.run_id)));
        assert_eq!(store.load_results(&results.run_id).unwrap().unwrap(), results);
        assert!(store.drafts().unwrap().is_empty());

        let metadata = store
            .metadata(&results.run_id, SnapshotKind::Results)
            .unwrap()
            .unwrap();
        assert_eq!(metadata.run_id, results.run_id);
        assert_eq!(metadata.key, results.run_id);
        assert_eq!(metadata.kind, SnapshotKind::Results);
        assert!(metadata.saved_at_unix_secs > 0);
    }

    #[test]
    fn missing_snapshot_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        assert!(store.load_handle("0123456789abcdef").unwrap().is_none());
        assert!(store.load_results("0123456789abcdef").unwrap().is_none());
    }

    #[test]
    fn corrupt_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        fs::write(dir.path().join("abc.handle.json"), "{ not json").unwrap();
        let result = store.load_handle("abc");
        if let Err(EngineError::Snapshot(message)) = result {
            assert!(message.contains("Corrupt snapshot"));
        } else {
            panic!("Wrong error type returned");
        }
    }

    #[test]
    fn selections_are_stored_side_by_side() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let (engine, mut inputs) = engine_and_inputs();
        inputs.mapping = RawTable::new(
            "mapping",
            &["Code projet", "Libelle projet"],
            vec![vec!["C1", "P1"], vec!["C2", "P2"]],
        );
        inputs.time_extract = RawTable::new(
            "time",
            &["Date", "Code projet", "Nom", "Grade", "Heures"],
            vec![
                vec!["2024-06-03", "C1", "alice", "G1", "8"],
                vec!["2024-06-04", "C2", "alice", "G1", "6"],
            ],
        );
        let handle = engine.prepare(&inputs).unwrap();

        let p1 = engine
            .execute(&handle, &ProjectSelection::only(["P1"]))
            .unwrap();
        let p2 = engine
            .execute(&handle, &ProjectSelection::only(["P2"]))
            .unwrap();
        store.save_results(&p1).unwrap();
        store.save_results(&p2).unwrap();

        assert_eq!(store.load_results(&p1.results_key()).unwrap().unwrap(), p1);
        assert_eq!(store.load_results(&p2.results_key()).unwrap().unwrap(), p2);
        assert!(store.load_results(&handle.run_id).unwrap().is_none());
        assert!(store.drafts().unwrap().is_empty());
    }

    #[test]
    fn overwriting_keeps_a_draft_copy() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let (engine, inputs) = engine_and_inputs();
        let results = engine.run(&inputs, &ProjectSelection::All).unwrap();
        let path = store.save_results(&results).unwrap();
        let original = fs::read_to_string(&path).unwrap();

        let overrides: std::collections::BTreeMap<String, rust_decimal::Decimal> =
            [("alice - P1".to_string(), rust_decimal_macros::dec!(2))]
                .into_iter()
                .collect();
        let edited = results.apply_overrides(&overrides).unwrap();
        store.save_results(&edited).unwrap();
        store.save_results(&edited).unwrap();

        let drafts = store.drafts().unwrap();
        assert_eq!(drafts.len(), 2);
        assert!(drafts.iter().all(|p| p.starts_with(store.draft_dir())));
        let name = drafts[0].file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(&format!("{}.results.", results.run_id)));
        assert!(drafts
            .iter()
            .any(|p| fs::read_to_string(p).unwrap() == original));
        assert_eq!(store.load_results(&results.run_id).unwrap().unwrap(), edited);
    }
}
