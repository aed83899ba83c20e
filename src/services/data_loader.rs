use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};

use anyhow::{Result, bail};
use tracing::{info, warn};

use crate::models::StageResult;
use crate::services::ranking_aggregator::RankingOptions;
use crate::services::series_store::SeriesSnapshot;
use crate::services::storage::DataFolder;

#[derive(Debug)]
pub enum LoaderEvent {
    Started,
    Progress {
        files_read: u64,
    },
    FileError {
        path: String,
        message: String,
    },
    Finished {
        files_read: u64,
        error_count: u64,
        snapshot: Box<SeriesSnapshot>,
        warnings: Vec<String>,
    },
    Failed {
        message: String,
    },
}

#[derive(Debug)]
pub struct LoadReport {
    pub files_read: u64,
    pub error_count: u64,
    pub warnings: Vec<String>,
}

fn emit_file_error(tx: &Sender<LoaderEvent>, path: &str, message: impl Into<String>) -> u64 {
    let message = message.into();
    warn!("Skipping {}: {}", path, message);
    let _ = tx.send(LoaderEvent::FileError {
        path: path.to_string(),
        message,
    });
    1
}

fn load_folder(tx: &Sender<LoaderEvent>, folder: &DataFolder, options: &RankingOptions) {
    if !folder.root().is_dir() {
        let _ = tx.send(LoaderEvent::Failed {
            message: format!(
                "Data source unavailable: '{}' is not a readable folder",
                folder.root().display()
            ),
        });
        return;
    }

    let registry = match folder.read_races() {
        Ok(registry) => registry,
        Err(err) => {
            let _ = tx.send(LoaderEvent::Failed {
                message: format!("Failed to load races: {err}"),
            });
            return;
        }
    };

    let files = match folder.result_files() {
        Ok(files) => files,
        Err(err) => {
            let _ = tx.send(LoaderEvent::Failed {
                message: format!("Failed to list results: {err}"),
            });
            return;
        }
    };

    let mut files_read: u64 = 1;
    let mut error_count: u64 = 0;
    let mut warnings = Vec::new();
    let mut results: BTreeMap<String, Arc<[StageResult]>> = BTreeMap::new();

    for (race_id, path) in files {
        files_read += 1;
        let display_path = path.display().to_string();

        if registry.get(&race_id).is_none() {
            let warning = format!("Results file {display_path} belongs to no registered race");
            warn!("{warning}");
            warnings.push(warning);
            continue;
        }

        match folder.read_results(&path) {
            Ok(stage) => {
                info!("Loaded {} results for race {}", stage.len(), race_id);
                results.insert(race_id, Arc::from(stage));
            }
            Err(err) => error_count += emit_file_error(tx, &display_path, err.to_string()),
        }

        if files_read.is_multiple_of(10) {
            let _ = tx.send(LoaderEvent::Progress { files_read });
        }
    }

    let snapshot = SeriesSnapshot::build(0, registry, results, options);
    let _ = tx.send(LoaderEvent::Finished {
        files_read,
        error_count,
        snapshot: Box::new(snapshot),
        warnings,
    });
}

/// Reads the data folder on a worker thread, reporting progress as it goes.
/// Unreadable result files are reported and skipped; a missing folder or
/// races file that cannot be parsed fails the whole load.
pub fn spawn_data_loader(folder: DataFolder, options: RankingOptions) -> Receiver<LoaderEvent> {
    let (tx, rx) = mpsc::channel::<LoaderEvent>();

    std::thread::spawn(move || {
        let _ = tx.send(LoaderEvent::Started);
        load_folder(&tx, &folder, &options);
    });

    rx
}

/// Drains a loader until it finishes.
pub fn wait_for_snapshot(events: Receiver<LoaderEvent>) -> Result<(SeriesSnapshot, LoadReport)> {
    for event in events {
        match event {
            LoaderEvent::Started => info!("Loading series data"),
            LoaderEvent::Progress { files_read } => info!("Read {} files", files_read),
            LoaderEvent::FileError { path, message } => warn!("{}: {}", path, message),
            LoaderEvent::Finished {
                files_read,
                error_count,
                snapshot,
                warnings,
            } => {
                info!(
                    "Load complete: {} files, {} errors, {} races, {} ranking entries",
                    files_read,
                    error_count,
                    snapshot.registry.len(),
                    snapshot.ranking.len()
                );
                return Ok((
                    *snapshot,
                    LoadReport {
                        files_read,
                        error_count,
                        warnings,
                    },
                ));
            }
            LoaderEvent::Failed { message } => bail!(message),
        }
    }
    bail!("Data loader stopped without reporting a result")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn missing_folder_fails_explicitly() {
        let dir = tempfile::tempdir().expect("tempdir");
        let folder = DataFolder::new(dir.path().join("absent"));
        let err = wait_for_snapshot(spawn_data_loader(folder, RankingOptions::default()))
            .unwrap_err();
        assert!(err.to_string().starts_with("Data source unavailable"), "{err}");
    }

    #[test]
    fn bad_result_file_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("races.json"),
            r#"{
                "etapa-1": { "id": "etapa-1", "name": "Etapa 1", "city": "RP", "date": "2025-03-09", "category": "series" },
                "etapa-2": { "id": "etapa-2", "name": "Etapa 2", "city": "RP", "date": "2025-04-13", "category": "series" }
            }"#,
        )
        .expect("races");
        fs::create_dir_all(dir.path().join("results")).expect("results dir");
        fs::write(
            dir.path().join("results/etapa-1.json"),
            r#"[{ "athlete_name": "Ana", "distance": "5K", "gender": "female", "stage_placement": 1, "points": 20 }]"#,
        )
        .expect("stage 1");
        fs::write(dir.path().join("results/etapa-2.json"), "{ broken").expect("stage 2");
        fs::write(dir.path().join("results/orphan.json"), "[]").expect("orphan");

        let (snapshot, report) = wait_for_snapshot(spawn_data_loader(
            DataFolder::new(dir.path()),
            RankingOptions::default(),
        ))
        .expect("load");

        assert_eq!(report.error_count, 1);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(snapshot.registry.len(), 2);
        assert!(snapshot.has_results("etapa-1"));
        assert!(!snapshot.has_results("etapa-2"));
        assert_eq!(snapshot.ranking.len(), 1);
        assert_eq!(snapshot.ranking[0].cumulative_points, 20);
    }
}
