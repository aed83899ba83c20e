use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::{Race, RaceCategory, RaceStatus};
use crate::services::ranking_aggregator;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Unknown race {0}")]
    UnknownRace(String),
    #[error("Invalid race: {0}")]
    InvalidDraft(String),
}

/// Organizer-supplied fields of a race; id and status are owned by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaceDraft {
    pub name: String,
    pub city: String,
    pub date: NaiveDate,
    pub registration_link: Option<String>,
    pub category: RaceCategory,
}

impl RaceDraft {
    fn validate(&self) -> Result<(), RegistryError> {
        if self.name.trim().is_empty() {
            return Err(RegistryError::InvalidDraft("name is empty".to_string()));
        }
        if self.city.trim().is_empty() {
            return Err(RegistryError::InvalidDraft("city is empty".to_string()));
        }
        if let Some(link) = self.registration_link.as_deref().map(str::trim)
            && !link.is_empty()
            && !(link.starts_with("https://") || link.starts_with("http://"))
        {
            return Err(RegistryError::InvalidDraft(format!(
                "registration link must be an http(s) URL: {link}"
            )));
        }
        Ok(())
    }

    fn apply_to(&self, race: &mut Race) {
        race.name = self.name.trim().to_string();
        race.city = self.city.trim().to_string();
        race.date = self.date;
        race.registration_link = self
            .registration_link
            .as_deref()
            .map(str::trim)
            .filter(|link| !link.is_empty())
            .map(str::to_string);
        race.category = self.category;
    }
}

/// Every race the organizer has registered, series stages and standalone
/// races alike, keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RaceRegistry {
    races: BTreeMap<String, Race>,
}

impl RaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.races.len()
    }

    pub fn is_empty(&self) -> bool {
        self.races.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Race> {
        self.races.get(id)
    }

    pub fn to_vec(&self) -> Vec<Race> {
        self.races.values().cloned().collect()
    }

    pub fn create(&mut self, draft: RaceDraft) -> Result<Race, RegistryError> {
        draft.validate()?;
        let id = self.next_id(&draft);
        let mut race = Race {
            id: id.clone(),
            name: String::new(),
            city: String::new(),
            date: draft.date,
            registration_link: None,
            category: draft.category,
            status: RaceStatus::Scheduled,
        };
        draft.apply_to(&mut race);
        info!("Added new race {} ({})", race.name, id);
        self.races.insert(id, race.clone());
        Ok(race)
    }

    pub fn update(&mut self, id: &str, draft: RaceDraft) -> Result<Race, RegistryError> {
        draft.validate()?;
        let race = self
            .races
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownRace(id.to_string()))?;
        draft.apply_to(race);
        info!("Updated race {} ({})", race.name, id);
        Ok(race.clone())
    }

    pub fn delete(&mut self, id: &str) -> Result<Race, RegistryError> {
        let race = self
            .races
            .remove(id)
            .ok_or_else(|| RegistryError::UnknownRace(id.to_string()))?;
        info!("Deleted race {} ({})", race.name, id);
        Ok(race)
    }

    pub fn set_status(&mut self, id: &str, status: RaceStatus) -> Result<(), RegistryError> {
        let race = self
            .races
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownRace(id.to_string()))?;
        race.status = status;
        Ok(())
    }

    /// Races of one calendar, earliest first.
    pub fn list(&self, category: RaceCategory) -> Vec<&Race> {
        let mut races: Vec<&Race> = self
            .races
            .values()
            .filter(|race| race.category == category)
            .collect();
        races.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
        races
    }

    /// All races, latest first, for picking which race an upload belongs to.
    pub fn list_for_results_select(&self) -> Vec<&Race> {
        let mut races: Vec<&Race> = self.races.values().collect();
        races.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.id.cmp(&b.id)));
        races
    }

    /// Series races in stage order; the position is the 1-based stage index.
    pub fn series_stages(&self) -> Vec<&Race> {
        ranking_aggregator::series_stages(self.races.values())
    }

    fn next_id(&self, draft: &RaceDraft) -> String {
        let base = format!("{}-{}", draft.date.format("%Y-%m-%d"), slugify(&draft.name));
        if !self.races.contains_key(&base) {
            return base;
        }
        let mut suffix = 2;
        loop {
            let candidate = format!("{base}-{suffix}");
            if !self.races.contains_key(&candidate) {
                return candidate;
            }
            suffix += 1;
        }
    }
}

fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for ch in name.chars().map(fold_accent).flat_map(char::to_lowercase) {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            slug.push(ch);
            pending_dash = false;
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        "race".to_string()
    } else {
        slug
    }
}

fn fold_accent(ch: char) -> char {
    match ch {
        'á' | 'à' | 'â' | 'ã' | 'ä' | 'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => 'a',
        'é' | 'è' | 'ê' | 'ë' | 'É' | 'È' | 'Ê' | 'Ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' | 'Í' | 'Ì' | 'Î' | 'Ï' => 'i',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' | 'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' | 'Ú' | 'Ù' | 'Û' | 'Ü' => 'u',
        'ç' | 'Ç' => 'c',
        other => other,
    }
}
