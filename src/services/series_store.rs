use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::mpsc::Receiver;

use tracing::{error, info, warn};

use crate::models::{Race, RaceStatus, RankingEntry, StageResult};
use crate::services::race_registry::{RaceDraft, RaceRegistry, RegistryError};
use crate::services::ranking_aggregator::{RankingOptions, compute_ranking};
use crate::services::storage::{DataFolder, ResultsBackup, StoreError};

/// Everything readers see at one point in time. Never mutated after it is
/// built; a change produces a new snapshot.
#[derive(Debug, Clone, Default)]
pub struct SeriesSnapshot {
    pub revision: u64,
    pub registry: RaceRegistry,
    pub results: BTreeMap<String, Arc<[StageResult]>>,
    pub ranking: Vec<RankingEntry>,
}

impl SeriesSnapshot {
    pub fn build(
        revision: u64,
        registry: RaceRegistry,
        results: BTreeMap<String, Arc<[StageResult]>>,
        options: &RankingOptions,
    ) -> Self {
        let races = registry.to_vec();
        let ranking = compute_ranking(&races, &results, options);
        Self {
            revision,
            registry,
            results,
            ranking,
        }
    }

    pub fn results_for(&self, race_id: &str) -> Option<&[StageResult]> {
        self.results.get(race_id).map(|results| results.as_ref())
    }

    pub fn has_results(&self, race_id: &str) -> bool {
        self.results.contains_key(race_id)
    }
}

#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// Creates a race when `id` is `None`, edits it otherwise.
    UpsertRace {
        id: Option<String>,
        draft: RaceDraft,
    },
    DeleteRace {
        id: String,
    },
    /// Replaces the whole result set of one race.
    PublishResults {
        race_id: String,
        results: Vec<StageResult>,
    },
    RetractResults {
        race_id: String,
    },
    /// Swaps in data read from the source by someone else (e.g. a reload).
    Reload {
        registry: RaceRegistry,
        results: BTreeMap<String, Arc<[StageResult]>>,
    },
}

#[derive(Debug, Clone)]
pub struct EventOutcome {
    pub snapshot: Arc<SeriesSnapshot>,
    /// The race an upsert or delete touched.
    pub race: Option<Race>,
}

/// Owner of the current snapshot. Events are applied one at a time; each one
/// persists its change (when backed by a folder), recomputes the ranking from
/// scratch and swaps the shared reference.
pub struct SeriesStore {
    current: Arc<SeriesSnapshot>,
    folder: Option<DataFolder>,
    options: RankingOptions,
}

impl SeriesStore {
    pub fn in_memory(options: RankingOptions) -> Self {
        Self {
            current: Arc::new(SeriesSnapshot::default()),
            folder: None,
            options,
        }
    }

    pub fn with_folder(folder: DataFolder, snapshot: SeriesSnapshot, options: RankingOptions) -> Self {
        Self {
            current: Arc::new(snapshot),
            folder: Some(folder),
            options,
        }
    }

    pub fn snapshot(&self) -> Arc<SeriesSnapshot> {
        Arc::clone(&self.current)
    }

    pub fn apply(&mut self, event: StoreEvent) -> Result<EventOutcome, StoreError> {
        let mut registry = self.current.registry.clone();
        let mut results = self.current.results.clone();
        let mut touched_race = None;

        match event {
            StoreEvent::UpsertRace { id, draft } => {
                let race = match id {
                    Some(id) => registry.update(&id, draft)?,
                    None => registry.create(draft)?,
                };
                self.persist_races(&registry)?;
                touched_race = Some(race);
            }
            StoreEvent::DeleteRace { id } => {
                let race = registry.delete(&id)?;
                let backup = self.backup_results(&id)?;
                if results.remove(&id).is_some() {
                    info!("Dropping results of deleted race {}", id);
                }
                if let Some(folder) = &self.folder {
                    folder.remove_results(&id)?;
                }
                self.persist_races_or_restore(&registry, backup)?;
                touched_race = Some(race);
            }
            StoreEvent::PublishResults { race_id, results: stage } => {
                if registry.get(&race_id).is_none() {
                    return Err(RegistryError::UnknownRace(race_id).into());
                }
                let backup = self.backup_results(&race_id)?;
                if let Some(folder) = &self.folder {
                    folder.write_results(&race_id, &stage)?;
                }
                registry.set_status(&race_id, RaceStatus::Completed)?;
                self.persist_races_or_restore(&registry, backup)?;
                info!("Published {} results for race {}", stage.len(), race_id);
                results.insert(race_id, Arc::from(stage));
            }
            StoreEvent::RetractResults { race_id } => {
                if registry.get(&race_id).is_none() {
                    return Err(RegistryError::UnknownRace(race_id).into());
                }
                let backup = self.backup_results(&race_id)?;
                if let Some(folder) = &self.folder {
                    folder.remove_results(&race_id)?;
                }
                if results.remove(&race_id).is_none() {
                    warn!("Race {} had no results to retract", race_id);
                }
                registry.set_status(&race_id, RaceStatus::Scheduled)?;
                self.persist_races_or_restore(&registry, backup)?;
            }
            StoreEvent::Reload {
                registry: reloaded,
                results: reloaded_results,
            } => {
                registry = reloaded;
                results = reloaded_results;
            }
        }

        let next = SeriesSnapshot::build(self.current.revision + 1, registry, results, &self.options);
        self.current = Arc::new(next);
        info!("Series snapshot now at revision {}", self.current.revision);

        Ok(EventOutcome {
            snapshot: self.snapshot(),
            race: touched_race,
        })
    }

    /// Applies events in arrival order until every sender is dropped, handing
    /// each new snapshot to `on_snapshot`. A failed event leaves the previous
    /// snapshot in place.
    pub fn run(&mut self, events: Receiver<StoreEvent>, mut on_snapshot: impl FnMut(Arc<SeriesSnapshot>)) {
        for event in events {
            match self.apply(event) {
                Ok(outcome) => on_snapshot(outcome.snapshot),
                Err(err) => error!("Failed to apply store event: {err}"),
            }
        }
    }

    fn persist_races(&self, registry: &RaceRegistry) -> Result<(), StoreError> {
        match &self.folder {
            Some(folder) => folder.write_races(registry),
            None => Ok(()),
        }
    }

    fn backup_results(&self, race_id: &str) -> Result<Option<ResultsBackup>, StoreError> {
        self.folder
            .as_ref()
            .map(|folder| folder.backup_results(race_id))
            .transpose()
    }

    /// Writes `races.json`; if that fails, the result file touched by the same
    /// event is put back so the folder still matches the current snapshot.
    fn persist_races_or_restore(
        &self,
        registry: &RaceRegistry,
        backup: Option<ResultsBackup>,
    ) -> Result<(), StoreError> {
        let Err(err) = self.persist_races(registry) else {
            return Ok(());
        };
        if let (Some(folder), Some(backup)) = (&self.folder, backup)
            && let Err(restore_err) = folder.restore_results(backup)
        {
            error!("Failed to restore results after a failed race save: {restore_err}");
        }
        Err(err)
    }
}
