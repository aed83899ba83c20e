//! Read-side helpers over a snapshot: category filters, table sorting, the
//! age-bracket table, athlete lookup in a stage and the race calendar.

use std::str::FromStr;

use chrono::Datelike;
use serde::Serialize;

use crate::models::{
    CategoryKey, Distance, Gender, Race, RaceCategory, RaceStatus, RankingEntry, StageResult,
    normalize_name,
};
use crate::services::config_loader::AgeBracket;
use crate::services::series_store::SeriesSnapshot;

const MONTHS_PT_BR: [&str; 12] = [
    "JAN", "FEV", "MAR", "ABR", "MAI", "JUN", "JUL", "AGO", "SET", "OUT", "NOV", "DEZ",
];

/// What a view should show: never an empty table when the data source failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum ViewState<T> {
    Ready(T),
    Empty,
    Unavailable(String),
}

impl<T> ViewState<Vec<T>> {
    pub fn from_rows(rows: Vec<T>) -> Self {
        if rows.is_empty() {
            ViewState::Empty
        } else {
            ViewState::Ready(rows)
        }
    }
}

pub fn categories(entries: &[RankingEntry]) -> Vec<CategoryKey> {
    let mut keys: Vec<CategoryKey> = entries.iter().map(RankingEntry::category).collect();
    keys.sort();
    keys.dedup();
    keys
}

pub fn ranking_for<'a>(
    entries: &'a [RankingEntry],
    distance: &Distance,
    gender: Gender,
) -> Vec<&'a RankingEntry> {
    entries
        .iter()
        .filter(|entry| &entry.distance == distance && entry.gender == gender)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortColumn {
    Placement,
    Name,
    Stage(usize),
    Cumulative,
}

impl FromStr for SortColumn {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let lowered = raw.trim().to_lowercase();
        match lowered.as_str() {
            "placement" | "classificacao" | "#" => return Ok(SortColumn::Placement),
            "name" | "nome" => return Ok(SortColumn::Name),
            "total" | "cumulative" | "acumulado" => return Ok(SortColumn::Cumulative),
            _ => {}
        }
        ["stage", "etapa"]
            .iter()
            .find_map(|prefix| lowered.strip_prefix(prefix))
            .and_then(|index| index.parse::<usize>().ok())
            .filter(|index| *index > 0)
            .map(SortColumn::Stage)
            .ok_or_else(|| format!("unknown sort column '{raw}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortConfig {
    pub column: SortColumn,
    pub direction: SortDirection,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            column: SortColumn::Placement,
            direction: SortDirection::Ascending,
        }
    }
}

impl SortConfig {
    /// Clicking the active column flips direction; another column starts ascending.
    pub fn toggle(&mut self, column: SortColumn) {
        if self.column == column {
            self.direction = match self.direction {
                SortDirection::Ascending => SortDirection::Descending,
                SortDirection::Descending => SortDirection::Ascending,
            };
        } else {
            self.column = column;
            self.direction = SortDirection::Ascending;
        }
    }
}

/// Stable sort; a stage the athlete skipped sorts as zero points.
pub fn sort_entries(entries: &mut [&RankingEntry], config: &SortConfig) {
    entries.sort_by(|a, b| {
        let ordering = match config.column {
            SortColumn::Placement => a.overall_placement.cmp(&b.overall_placement),
            SortColumn::Name => normalize_name(&a.athlete_name).cmp(&normalize_name(&b.athlete_name)),
            SortColumn::Stage(index) => a
                .stage_points(index)
                .unwrap_or(0)
                .cmp(&b.stage_points(index).unwrap_or(0)),
            SortColumn::Cumulative => a.cumulative_points.cmp(&b.cumulative_points),
        };
        match config.direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    });
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BracketGroup<'a> {
    pub label: String,
    pub entries: Vec<&'a RankingEntry>,
}

/// One group per configured bracket that has athletes, in configuration
/// order, each sorted by bracket placement.
pub fn age_bracket_view<'a>(
    entries: &'a [RankingEntry],
    distance: &Distance,
    gender: Gender,
    brackets: &[AgeBracket],
) -> Vec<BracketGroup<'a>> {
    let category = ranking_for(entries, distance, gender);
    brackets
        .iter()
        .filter_map(|bracket| {
            let mut members: Vec<&RankingEntry> = category
                .iter()
                .copied()
                .filter(|entry| entry.age_bracket.as_deref() == Some(bracket.label.as_str()))
                .collect();
            if members.is_empty() {
                return None;
            }
            members.sort_by_key(|entry| entry.age_bracket_placement);
            Some(BracketGroup {
                label: bracket.label.clone(),
                entries: members,
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SearchError {
    #[error("Type at least {min} letters")]
    TooShort { min: usize },
    #[error("No results published for race {0}")]
    NoResults(String),
}

/// Case-insensitive substring match on athlete names across every category of
/// one stage.
pub fn search_athlete<'a>(
    snapshot: &'a SeriesSnapshot,
    race_id: &str,
    term: &str,
    min_len: usize,
) -> Result<Vec<&'a StageResult>, SearchError> {
    let needle = term.trim().to_uppercase();
    if needle.chars().count() < min_len {
        return Err(SearchError::TooShort { min: min_len });
    }
    let results = snapshot
        .results_for(race_id)
        .ok_or_else(|| SearchError::NoResults(race_id.to_string()))?;

    let mut hits: Vec<&StageResult> = results
        .iter()
        .filter(|result| result.athlete_name.to_uppercase().contains(&needle))
        .collect();
    hits.sort_by(|a, b| {
        a.category()
            .cmp(&b.category())
            .then_with(|| a.stage_placement.cmp(&b.stage_placement))
    });
    Ok(hits)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalendarCard<'a> {
    pub race: &'a Race,
    pub has_results: bool,
    pub registration_open: bool,
    /// Two-digit day of month, e.g. `"09"`.
    pub day: String,
    /// Abbreviated Portuguese month, e.g. `"MAR"`.
    pub month: String,
    /// `dd/mm/yyyy`.
    pub date_label: String,
}

pub fn format_date_pt_br(race: &Race) -> String {
    race.reference_datetime().format("%d/%m/%Y").to_string()
}

pub fn calendar<'a>(snapshot: &'a SeriesSnapshot, category: RaceCategory) -> Vec<CalendarCard<'a>> {
    snapshot
        .registry
        .list(category)
        .into_iter()
        .map(|race| {
            let anchored = race.reference_datetime();
            let month_index = usize::try_from(anchored.month0()).unwrap_or(0);
            CalendarCard {
                race,
                has_results: snapshot.has_results(&race.id),
                registration_open: race.registration_link.is_some()
                    && race.status == RaceStatus::Scheduled,
                day: format!("{:02}", anchored.day()),
                month: MONTHS_PT_BR.get(month_index).copied().unwrap_or("").to_string(),
                date_label: format_date_pt_br(race),
            }
        })
        .collect()
}

/// Column order a results table should render: stage 1..N, where N covers
/// both the configured column count and every stage present in the data.
pub fn stage_columns(entries: &[&RankingEntry], configured: usize) -> Vec<usize> {
    let seen = entries
        .iter()
        .filter_map(|entry| entry.per_stage_points.keys().next_back().copied())
        .max()
        .unwrap_or(0);
    (1..=configured.max(seen)).collect()
}
