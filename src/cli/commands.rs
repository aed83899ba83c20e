//! # CLI Command Implementations

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

use copa::models::{
    CategoryKey, Distance, Gender, Race, RaceCategory, RaceStatus, RankingEntry, StageResult,
};
use copa::services::config_loader::{CopaConfig, load_copa_config};
use copa::services::data_loader::{spawn_data_loader, wait_for_snapshot};
use copa::services::query::{
    self, BracketGroup, SortColumn, SortConfig, SortDirection, ViewState,
};
use copa::services::race_registry::RaceDraft;
use copa::services::ranking_aggregator::RankingOptions;
use copa::services::result_ingestion::{UploadPayload, normalize, validate_payload};
use copa::services::series_store::{SeriesSnapshot, SeriesStore, StoreEvent};
use copa::services::storage::DataFolder;

/// Maximum size of a results upload (20 MB).
const MAX_UPLOAD_FILE_SIZE: u64 = 20 * 1024 * 1024;

const NO_TEAM: &str = "Individual";
const SKIPPED: &str = "-";

/// Data folder, configuration and output mode shared by every command.
pub struct CommandContext {
    pub folder: DataFolder,
    pub config: CopaConfig,
    pub json: bool,
}

impl CommandContext {
    /// `create` makes the data folder first, for commands that write to it.
    pub fn open(data_dir: PathBuf, json: bool, create: bool) -> Result<Self> {
        if create {
            fs::create_dir_all(&data_dir).with_context(|| {
                format!("Failed to create data folder {}", data_dir.display())
            })?;
        }
        let config = load_copa_config(&data_dir)?;
        Ok(Self {
            folder: DataFolder::new(data_dir),
            config,
            json,
        })
    }

    fn options(&self) -> RankingOptions {
        RankingOptions::from(&self.config)
    }

    fn load_snapshot(&self) -> Result<SeriesSnapshot, String> {
        let events = spawn_data_loader(self.folder.clone(), self.options());
        match wait_for_snapshot(events) {
            Ok((snapshot, report)) => {
                if report.error_count > 0 {
                    warn!(
                        "{} result files could not be read and were left out",
                        report.error_count
                    );
                }
                Ok(snapshot)
            }
            Err(err) => Err(format!("{err:#}")),
        }
    }

    /// Snapshot for a read-only view. An unreadable data folder is reported
    /// as such (and as an `unavailable` document in JSON mode), never as an
    /// empty table.
    fn snapshot(&self) -> Result<SeriesSnapshot> {
        match self.load_snapshot() {
            Ok(snapshot) => Ok(snapshot),
            Err(reason) => {
                if self.json {
                    let view = ViewState::<()>::Unavailable(reason.clone());
                    println!("{}", serde_json::to_string_pretty(&view)?);
                }
                bail!(reason)
            }
        }
    }

    fn store(&self) -> Result<SeriesStore> {
        let snapshot = self.load_snapshot().map_err(|reason| anyhow!(reason))?;
        Ok(SeriesStore::with_folder(
            self.folder.clone(),
            snapshot,
            self.options(),
        ))
    }

    fn emit<T: Serialize>(
        &self,
        view: ViewState<Vec<T>>,
        empty_message: &str,
        render_text: impl FnOnce(Vec<T>),
    ) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(&view)?);
            if let ViewState::Unavailable(reason) = view {
                bail!(reason);
            }
            return Ok(());
        }
        match view {
            ViewState::Ready(rows) => render_text(rows),
            ViewState::Empty => println!("{empty_message}"),
            ViewState::Unavailable(reason) => bail!(reason),
        }
        Ok(())
    }

    fn report_race(&self, verb: &str, race: Option<Race>) -> Result<()> {
        let race = race.ok_or_else(|| anyhow!("Race store did not report the {verb} race"))?;
        if self.json {
            println!("{}", serde_json::to_string_pretty(&race)?);
        } else {
            println!(
                "{verb} race {} ({}, {} {})",
                race.id,
                race.name,
                race.city,
                query::format_date_pt_br(&race)
            );
        }
        Ok(())
    }
}

// =============================================================================
// RACE CALENDAR COMMANDS
// =============================================================================

/// Overrides for `races edit`; `None` keeps the stored value.
#[derive(Debug, Default)]
pub struct RaceEdit {
    pub name: Option<String>,
    pub city: Option<String>,
    pub date: Option<NaiveDate>,
    pub link: Option<String>,
    pub category: Option<RaceCategory>,
}

impl RaceEdit {
    fn into_draft(self, current: Race) -> RaceDraft {
        RaceDraft {
            name: self.name.unwrap_or(current.name),
            city: self.city.unwrap_or(current.city),
            date: self.date.unwrap_or(current.date),
            registration_link: self.link.or(current.registration_link),
            category: self.category.unwrap_or(current.category),
        }
    }
}

fn status_label(status: RaceStatus) -> &'static str {
    match status {
        RaceStatus::Scheduled => "scheduled",
        RaceStatus::Completed => "completed",
    }
}

pub fn cmd_races_list(ctx: &CommandContext, category: Option<RaceCategory>) -> Result<()> {
    let snapshot = ctx.snapshot()?;
    let races = match category {
        Some(category) => snapshot.registry.list(category),
        None => snapshot.registry.list_for_results_select(),
    };

    ctx.emit(ViewState::from_rows(races), "No races registered", |races| {
        let rows = races
            .iter()
            .map(|race| {
                vec![
                    race.id.clone(),
                    query::format_date_pt_br(race),
                    race.name.clone(),
                    race.city.clone(),
                    race.category.to_string(),
                    status_label(race.status).to_string(),
                    if snapshot.has_results(&race.id) {
                        "yes".to_string()
                    } else {
                        SKIPPED.to_string()
                    },
                ]
            })
            .collect::<Vec<_>>();
        print_table(
            &["ID", "DATE", "NAME", "CITY", "CALENDAR", "STATUS", "RESULTS"],
            &rows,
        );
    })
}

pub fn cmd_races_add(
    ctx: &CommandContext,
    name: String,
    city: String,
    date: NaiveDate,
    link: Option<String>,
    category: RaceCategory,
) -> Result<()> {
    let mut store = ctx.store()?;
    let outcome = store.apply(StoreEvent::UpsertRace {
        id: None,
        draft: RaceDraft {
            name,
            city,
            date,
            registration_link: link,
            category,
        },
    })?;
    ctx.report_race("Created", outcome.race)
}

pub fn cmd_races_edit(ctx: &CommandContext, id: &str, edit: RaceEdit) -> Result<()> {
    let mut store = ctx.store()?;
    let current = store
        .snapshot()
        .registry
        .get(id)
        .cloned()
        .ok_or_else(|| anyhow!("Unknown race {id}"))?;
    let outcome = store.apply(StoreEvent::UpsertRace {
        id: Some(id.to_string()),
        draft: edit.into_draft(current),
    })?;
    ctx.report_race("Updated", outcome.race)
}

pub fn cmd_races_delete(ctx: &CommandContext, id: &str) -> Result<()> {
    let mut store = ctx.store()?;
    let outcome = store.apply(StoreEvent::DeleteRace { id: id.to_string() })?;
    ctx.report_race("Deleted", outcome.race)
}

// =============================================================================
// RESULT COMMANDS
// =============================================================================

fn read_upload(path: &Path) -> Result<String> {
    let metadata = fs::metadata(path)
        .with_context(|| format!("Cannot read upload file {}", path.display()))?;
    if !metadata.is_file() {
        bail!("Upload path {} is not a regular file", path.display());
    }
    if metadata.len() > MAX_UPLOAD_FILE_SIZE {
        bail!(
            "Upload file size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            MAX_UPLOAD_FILE_SIZE
        );
    }
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn validated_upload(path: &Path) -> Result<UploadPayload> {
    let raw = read_upload(path)?;
    validate_payload(&raw)
        .with_context(|| format!("{} is not a valid results upload", path.display()))
}

fn normalized_results(ctx: &CommandContext, payload: &UploadPayload) -> Vec<StageResult> {
    let strategy = ctx.config.points.strategy();
    normalize(payload, strategy.as_ref(), ctx.config.identity)
}

fn category_counts(results: &[StageResult]) -> BTreeMap<CategoryKey, usize> {
    let mut counts = BTreeMap::new();
    for result in results {
        *counts.entry(result.category()).or_insert(0) += 1;
    }
    counts
}

pub fn cmd_validate(ctx: &CommandContext, file: &Path) -> Result<()> {
    let payload = validated_upload(file)?;
    let results = normalized_results(ctx, &payload);
    let counts = category_counts(&results);

    if ctx.json {
        let categories: Vec<_> = counts
            .iter()
            .map(|(key, count)| serde_json::json!({ "category": key, "finishers": count }))
            .collect();
        let output = serde_json::json!({
            "valid": true,
            "shape": payload.shape_name(),
            "finishers": payload.finisher_count(),
            "results": results.len(),
            "categories": categories,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!(
        "Valid {} upload: {} finishers, {} results after de-duplication",
        payload.shape_name(),
        payload.finisher_count(),
        results.len()
    );
    for (key, count) in counts {
        println!("  {key}: {count}");
    }
    Ok(())
}

pub fn cmd_upload(ctx: &CommandContext, race_id: &str, file: &Path) -> Result<()> {
    // Nothing is stored unless the whole file validates.
    let payload = validated_upload(file)?;
    let mut store = ctx.store()?;
    let race = store
        .snapshot()
        .registry
        .get(race_id)
        .cloned()
        .ok_or_else(|| anyhow!("Unknown race {race_id}"))?;
    if race.category != RaceCategory::SeriesStage {
        warn!(
            "Race {} is a standalone race, its results will not count towards the ranking",
            race_id
        );
    }

    let results = normalized_results(ctx, &payload);
    let published = results.len();
    let outcome = store.apply(StoreEvent::PublishResults {
        race_id: race_id.to_string(),
        results,
    })?;
    info!(
        "Upload of {} for {} published at revision {}",
        file.display(),
        race_id,
        outcome.snapshot.revision
    );

    if ctx.json {
        let output = serde_json::json!({
            "race": race_id,
            "results": published,
            "ranking_entries": outcome.snapshot.ranking.len(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!(
            "Published {} results for {} ({}); the ranking now lists {} athletes",
            published,
            race.name,
            race_id,
            outcome.snapshot.ranking.len()
        );
    }
    Ok(())
}

pub fn cmd_retract(ctx: &CommandContext, race_id: &str) -> Result<()> {
    let mut store = ctx.store()?;
    let outcome = store.apply(StoreEvent::RetractResults {
        race_id: race_id.to_string(),
    })?;

    if ctx.json {
        let output = serde_json::json!({
            "race": race_id,
            "ranking_entries": outcome.snapshot.ranking.len(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!(
            "Retracted results of {}; the ranking now lists {} athletes",
            race_id,
            outcome.snapshot.ranking.len()
        );
    }
    Ok(())
}

// =============================================================================
// PUBLIC VIEWS
// =============================================================================

#[derive(Serialize)]
struct CategoryTable<'a> {
    category: CategoryKey,
    entries: Vec<&'a RankingEntry>,
}

#[derive(Serialize)]
struct BracketTable<'a> {
    category: CategoryKey,
    groups: Vec<BracketGroup<'a>>,
}

pub fn cmd_ranking(
    ctx: &CommandContext,
    distance: Option<&str>,
    gender: Option<Gender>,
    column: SortColumn,
    descending: bool,
    brackets: bool,
) -> Result<()> {
    let snapshot = ctx.snapshot()?;
    let distance = distance.map(Distance::new);
    let categories: Vec<CategoryKey> = query::categories(&snapshot.ranking)
        .into_iter()
        .filter(|key| {
            distance.as_ref().is_none_or(|d| &key.distance == d)
                && gender.is_none_or(|g| key.gender == g)
        })
        .collect();
    let configured_columns = ctx.config.series.stage_columns;
    let series_name = &ctx.config.series.name;

    if brackets {
        let tables: Vec<BracketTable> = categories
            .into_iter()
            .map(|category| BracketTable {
                groups: query::age_bracket_view(
                    &snapshot.ranking,
                    &category.distance,
                    category.gender,
                    &ctx.config.age_brackets,
                ),
                category,
            })
            .filter(|table| !table.groups.is_empty())
            .collect();
        return ctx.emit(
            ViewState::from_rows(tables),
            "No athlete in the ranking has a known age",
            |tables| {
                println!("{series_name} ranking by age bracket");
                for table in tables {
                    println!();
                    println!("{}", table.category);
                    for group in table.groups {
                        println!("  {}", group.label);
                        print_ranking_table(&group.entries, configured_columns, true);
                    }
                }
            },
        );
    }

    let sort = SortConfig {
        column,
        direction: if descending {
            SortDirection::Descending
        } else {
            SortDirection::Ascending
        },
    };
    let tables: Vec<CategoryTable> = categories
        .into_iter()
        .map(|category| {
            let mut entries =
                query::ranking_for(&snapshot.ranking, &category.distance, category.gender);
            query::sort_entries(&mut entries, &sort);
            CategoryTable { category, entries }
        })
        .collect();

    ctx.emit(
        ViewState::from_rows(tables),
        "No ranking yet: no series stage has published results",
        |tables| {
            println!("{series_name} ranking");
            for table in tables {
                println!();
                println!("{}", table.category);
                print_ranking_table(&table.entries, configured_columns, false);
            }
        },
    )
}

pub fn cmd_search(ctx: &CommandContext, race_id: &str, term: &str) -> Result<()> {
    let snapshot = ctx.snapshot()?;
    let race = snapshot
        .registry
        .get(race_id)
        .ok_or_else(|| anyhow!("Unknown race {race_id}"))?;
    let hits = query::search_athlete(&snapshot, race_id, term, ctx.config.query.min_search_len)?;
    let empty_message = format!("No athlete matching '{}' in {}", term.trim(), race.name);

    ctx.emit(ViewState::from_rows(hits), &empty_message, |hits| {
        let rows = hits
            .iter()
            .map(|hit| {
                vec![
                    hit.distance.to_string(),
                    hit.gender.to_string(),
                    optional_cell(hit.stage_placement),
                    hit.athlete_name.clone(),
                    hit.finish_time.clone().unwrap_or_else(|| SKIPPED.to_string()),
                    hit.team.clone().unwrap_or_else(|| NO_TEAM.to_string()),
                ]
            })
            .collect::<Vec<_>>();
        println!("{} ({})", race.name, query::format_date_pt_br(race));
        print_table(
            &["DISTANCE", "GENDER", "#", "ATHLETE", "TIME", "TEAM"],
            &rows,
        );
    })
}

pub fn cmd_calendar(ctx: &CommandContext, category: RaceCategory) -> Result<()> {
    let snapshot = ctx.snapshot()?;
    let cards = query::calendar(&snapshot, category);

    ctx.emit(ViewState::from_rows(cards), "No races on this calendar", |cards| {
        let rows = cards
            .iter()
            .map(|card| {
                vec![
                    format!("{} {}", card.day, card.month),
                    card.race.name.clone(),
                    card.race.city.clone(),
                    card.date_label.clone(),
                    if card.has_results {
                        "available".to_string()
                    } else {
                        SKIPPED.to_string()
                    },
                    match (&card.race.registration_link, card.registration_open) {
                        (Some(link), true) => link.clone(),
                        _ => SKIPPED.to_string(),
                    },
                ]
            })
            .collect::<Vec<_>>();
        print_table(
            &["DAY", "RACE", "CITY", "DATE", "RESULTS", "REGISTRATION"],
            &rows,
        );
    })
}

// =============================================================================
// TEXT RENDERING
// =============================================================================

fn optional_cell<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| SKIPPED.to_string(), |value| value.to_string())
}

/// `bracket` shows the bracket placement instead of the overall one.
fn print_ranking_table(entries: &[&RankingEntry], configured_columns: usize, bracket: bool) {
    let stages = query::stage_columns(entries, configured_columns);
    let mut headers: Vec<String> = vec!["#".into(), "ATHLETE".into(), "TEAM".into()];
    headers.extend(stages.iter().map(|stage| format!("E{stage}")));
    headers.push("TOTAL".into());

    let rows: Vec<Vec<String>> = entries
        .iter()
        .map(|entry| {
            let placement = if bracket {
                optional_cell(entry.age_bracket_placement)
            } else {
                entry.overall_placement.to_string()
            };
            let mut row = vec![
                placement,
                entry.athlete_name.clone(),
                entry.team.clone().unwrap_or_else(|| NO_TEAM.to_string()),
            ];
            row.extend(stages.iter().map(|stage| optional_cell(entry.stage_points(*stage))));
            row.push(entry.cumulative_points.to_string());
            row
        })
        .collect();

    let headers: Vec<&str> = headers.iter().map(String::as_str).collect();
    print_table(&headers, &rows);
}

fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let header_cells: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
    println!("{}", format_row(&header_cells, &widths));
    for row in rows {
        println!("{}", format_row(row, &widths));
    }
}

fn format_row(cells: &[String], widths: &[usize]) -> String {
    cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| {
            let padding = width.saturating_sub(cell.chars().count());
            format!("{cell}{}", " ".repeat(padding))
        })
        .collect::<Vec<_>>()
        .join("  ")
        .trim_end()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_padded_by_character_count() {
        let widths = [7, 3];
        let row = vec!["Sertãozinho".chars().take(5).collect::<String>(), "10".to_string()];
        assert_eq!(format_row(&row, &widths), "Sertã    10");
    }

    #[test]
    fn edit_keeps_unset_fields() {
        let current = Race {
            id: "2025-03-09-etapa-1".to_string(),
            name: "Etapa 1".to_string(),
            city: "Ribeirão Preto".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 3, 9).expect("date"),
            registration_link: Some("https://example.com".to_string()),
            category: RaceCategory::SeriesStage,
            status: RaceStatus::Scheduled,
        };
        let draft = RaceEdit {
            city: Some("Sertãozinho".to_string()),
            ..RaceEdit::default()
        }
        .into_draft(current);
        assert_eq!(draft.name, "Etapa 1");
        assert_eq!(draft.city, "Sertãozinho");
        assert_eq!(draft.registration_link.as_deref(), Some("https://example.com"));
        assert_eq!(draft.category, RaceCategory::SeriesStage);
    }

    #[test]
    fn upload_to_missing_race_stores_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let upload = dir.path().join("upload.json");
        fs::write(
            &upload,
            r#"[{ "numero_peito": "1", "nome_completo": "Ana", "distancia": "5K",
                  "sexo": "F", "classificacoes": { "geral": 1 } }]"#,
        )
        .expect("write");
        let ctx = CommandContext::open(dir.path().join("data"), false, true).expect("ctx");

        let err = cmd_upload(&ctx, "ghost", &upload).unwrap_err();
        assert!(err.to_string().contains("Unknown race ghost"), "{err}");
        assert!(!dir.path().join("data/results").exists());
    }

    #[test]
    fn views_over_a_missing_folder_report_unavailable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = CommandContext::open(dir.path().join("absent"), false, false).expect("ctx");
        let err = cmd_calendar(&ctx, RaceCategory::SeriesStage).unwrap_err();
        assert!(err.to_string().starts_with("Data source unavailable"), "{err}");
    }
}
