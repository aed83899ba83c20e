use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info, warn};

use crate::models::{CategoryKey, Race, RaceCategory, RankingEntry, StageResult, normalize_name};
use crate::services::config_loader::{AgeBracket, CopaConfig, IdentityPolicy};

/// Inputs to a recompute that come from configuration rather than data.
#[derive(Debug, Clone, Default)]
pub struct RankingOptions {
    pub identity: IdentityPolicy,
    pub age_brackets: Vec<AgeBracket>,
}

impl From<&CopaConfig> for RankingOptions {
    fn from(config: &CopaConfig) -> Self {
        Self {
            identity: config.identity,
            age_brackets: config.age_brackets.clone(),
        }
    }
}

/// Join key for an athlete within a category.
pub fn athlete_key(result: &StageResult, policy: IdentityPolicy) -> String {
    match (policy, result.athlete_id.as_deref().map(str::trim)) {
        (IdentityPolicy::AthleteId, Some(id)) if !id.is_empty() => format!("id:{id}"),
        _ => format!("name:{}", result.normalized_name()),
    }
}

/// Series races in stage order: date ascending, ties by id.
pub fn series_stages<'a>(races: impl IntoIterator<Item = &'a Race>) -> Vec<&'a Race> {
    let mut stages: Vec<&Race> = races
        .into_iter()
        .filter(|race| race.category == RaceCategory::SeriesStage)
        .collect();
    stages.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
    stages
}

pub fn bracket_for(age: Option<u32>, brackets: &[AgeBracket]) -> Option<&AgeBracket> {
    let age = age?;
    brackets.iter().find(|bracket| bracket.contains(age))
}

#[derive(Debug, Default)]
struct AthleteTally {
    display_name: String,
    age: Option<u32>,
    team: Option<String>,
    per_stage_points: BTreeMap<usize, u64>,
}

impl AthleteTally {
    fn add_result(&mut self, stage_index: usize, result: &StageResult) {
        // Later stages overwrite display attributes.
        let name = result.athlete_name.trim();
        if !name.is_empty() {
            self.display_name = name.to_string();
        }
        if result.age.is_some() {
            self.age = result.age;
        }
        if let Some(team) = result.team.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            self.team = Some(team.to_string());
        }

        // Stage awards are u32, so u64 sums cannot overflow.
        let points = u64::from(result.points.unwrap_or(0));
        *self.per_stage_points.entry(stage_index).or_insert(0) += points;
    }
}

struct Standing {
    key: String,
    sort_name: String,
    entry: RankingEntry,
}

impl PartialEq for Standing {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Standing {}

impl PartialOrd for Standing {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Standing {
    fn cmp(&self, other: &Self) -> Ordering {
        // Most points first
        other
            .entry
            .cumulative_points
            .cmp(&self.entry.cumulative_points)
            // Then by case-insensitive name
            .then_with(|| self.sort_name.cmp(&other.sort_name))
            // Distinct ids sharing a name still need a stable order
            .then_with(|| self.key.cmp(&other.key))
    }
}

/// Folds every published stage of the series into cumulative standings.
///
/// Pure: output depends only on the arguments. Results are expected to be
/// deduplicated per athlete and race already; a duplicate that slips through
/// is summed into the same stage cell.
pub fn compute_ranking<R>(
    races: &[Race],
    results_by_race: &BTreeMap<String, R>,
    options: &RankingOptions,
) -> Vec<RankingEntry>
where
    R: AsRef<[StageResult]>,
{
    let stages = series_stages(races);
    let stage_ids: HashMap<&str, usize> = stages
        .iter()
        .enumerate()
        .map(|(position, race)| (race.id.as_str(), position + 1))
        .collect();

    for race_id in results_by_race.keys() {
        if !stage_ids.contains_key(race_id.as_str()) {
            warn!("Results for race {} are not part of the series, skipping", race_id);
        }
    }

    let mut categories: BTreeMap<CategoryKey, BTreeMap<String, AthleteTally>> = BTreeMap::new();
    for (position, race) in stages.iter().enumerate() {
        let stage_index = position + 1;
        let Some(results) = results_by_race.get(&race.id) else {
            debug!("Stage {} ({}) has no results yet", stage_index, race.name);
            continue;
        };

        for result in results.as_ref() {
            categories
                .entry(result.category())
                .or_default()
                .entry(athlete_key(result, options.identity))
                .or_default()
                .add_result(stage_index, result);
        }
    }

    let mut ranking = Vec::new();
    for (category, athletes) in categories {
        let mut standings: Vec<Standing> = athletes
            .into_iter()
            .map(|(key, tally)| to_standing(&category, key, tally, &options.age_brackets))
            .collect();
        standings.sort();
        assign_placements(&mut standings);

        debug!("Category {}: {} athletes", category, standings.len());
        for standing in &standings {
            debug!(
                "{} Rank {:0>3} Points {} Athlete: {}",
                category,
                standing.entry.overall_placement,
                standing.entry.cumulative_points,
                standing.entry.athlete_name
            );
        }

        ranking.extend(standings.into_iter().map(|standing| standing.entry));
    }

    info!(
        "Computed ranking: {} entries over {} stages",
        ranking.len(),
        stages.len()
    );
    ranking
}

fn to_standing(
    category: &CategoryKey,
    key: String,
    tally: AthleteTally,
    brackets: &[AgeBracket],
) -> Standing {
    let cumulative_points: u64 = tally.per_stage_points.values().sum();
    let age_bracket = bracket_for(tally.age, brackets).map(|bracket| bracket.label.clone());

    Standing {
        sort_name: normalize_name(&tally.display_name),
        key: key.clone(),
        entry: RankingEntry {
            athlete_name: tally.display_name,
            athlete_key: key,
            distance: category.distance.clone(),
            gender: category.gender,
            age: tally.age,
            team: tally.team,
            per_stage_points: tally.per_stage_points,
            cumulative_points,
            overall_placement: 0,
            age_bracket,
            age_bracket_placement: None,
        },
    }
}

/// Expects `standings` already sorted. A bracket is a subset of the category
/// ranked by the same ordering, so walking the sorted list and counting per
/// bracket yields the same placements as sorting each bracket on its own.
fn assign_placements(standings: &mut [Standing]) {
    let mut bracket_counters: HashMap<String, u32> = HashMap::new();
    for (rank, standing) in standings.iter_mut().enumerate() {
        standing.entry.overall_placement = u32::try_from(rank + 1).unwrap_or(u32::MAX);
        if let Some(bracket) = standing.entry.age_bracket.as_ref() {
            let counter = bracket_counters.entry(bracket.clone()).or_insert(0);
            *counter += 1;
            standing.entry.age_bracket_placement = Some(*counter);
        }
    }
}
