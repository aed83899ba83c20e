use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::models::StageResult;
use crate::services::race_registry::{RaceRegistry, RegistryError};

const RACES_FILE: &str = "races.json";
const RESULTS_DIR: &str = "results";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed data in {}: {source}", .path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Race id '{0}' cannot be used as a file name")]
    InvalidRaceId(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Bytes of a result file as they were before a change, `None` when the file
/// did not exist.
#[derive(Debug)]
pub struct ResultsBackup {
    race_id: String,
    bytes: Option<Vec<u8>>,
}

/// On-disk layout of a series: `races.json` plus one normalized result file
/// per published stage under `results/`.
#[derive(Debug, Clone)]
pub struct DataFolder {
    root: PathBuf,
}

impl DataFolder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn races_path(&self) -> PathBuf {
        self.root.join(RACES_FILE)
    }

    pub fn results_dir(&self) -> PathBuf {
        self.root.join(RESULTS_DIR)
    }

    pub fn results_path(&self, race_id: &str) -> Result<PathBuf, StoreError> {
        let usable = !race_id.is_empty()
            && race_id != "."
            && race_id != ".."
            && !race_id.contains(['/', '\\']);
        if !usable {
            return Err(StoreError::InvalidRaceId(race_id.to_string()));
        }
        Ok(self.results_dir().join(format!("{race_id}.json")))
    }

    /// A missing `races.json` is an empty registry, not an error.
    pub fn read_races(&self) -> Result<RaceRegistry, StoreError> {
        let path = self.races_path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!("{} not found, starting with no races", path.display());
                return Ok(RaceRegistry::new());
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        serde_json::from_str(&raw).map_err(|source| StoreError::Malformed { path, source })
    }

    pub fn write_races(&self, registry: &RaceRegistry) -> Result<(), StoreError> {
        let path = self.races_path();
        let bytes = serde_json::to_vec_pretty(registry).map_err(|source| StoreError::Malformed {
            path: path.clone(),
            source,
        })?;
        write_atomically(&path, &bytes)?;
        debug!("Wrote {} races to {}", registry.len(), path.display());
        Ok(())
    }

    pub fn read_results(&self, path: &Path) -> Result<Vec<StageResult>, StoreError> {
        let raw = fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| StoreError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn write_results(&self, race_id: &str, results: &[StageResult]) -> Result<(), StoreError> {
        let path = self.results_path(race_id)?;
        let bytes = serde_json::to_vec_pretty(results).map_err(|source| StoreError::Malformed {
            path: path.clone(),
            source,
        })?;
        write_atomically(&path, &bytes)?;
        info!("Stored {} results for race {}", results.len(), race_id);
        Ok(())
    }

    /// Returns whether a result file existed.
    pub fn remove_results(&self, race_id: &str) -> Result<bool, StoreError> {
        let path = self.results_path(race_id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    pub fn backup_results(&self, race_id: &str) -> Result<ResultsBackup, StoreError> {
        let path = self.results_path(race_id)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        Ok(ResultsBackup {
            race_id: race_id.to_string(),
            bytes,
        })
    }

    /// Puts a result file back exactly as `backup` saw it.
    pub fn restore_results(&self, backup: ResultsBackup) -> Result<(), StoreError> {
        match backup.bytes {
            Some(bytes) => write_atomically(&self.results_path(&backup.race_id)?, &bytes),
            None => self.remove_results(&backup.race_id).map(|_| ()),
        }
    }

    /// `(race id, path)` of every stored result file, sorted by race id.
    pub fn result_files(&self) -> Result<Vec<(String, PathBuf)>, StoreError> {
        let dir = self.results_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(StoreError::Io { path: dir, source }),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(race_id) = path.file_stem().and_then(|stem| stem.to_str()) {
                files.push((race_id.to_string(), path.clone()));
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Writes next to the target and renames over it, so readers never observe a
/// half-written file.
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| StoreError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, bytes).map_err(|source| StoreError::Io {
        path: tmp_path.clone(),
        source,
    })?;
    fs::rename(&tmp_path, path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}
