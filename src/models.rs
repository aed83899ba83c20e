use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use serde::{self, Deserialize, Deserializer, Serialize};

/// Hour of day (UTC) a race date is anchored at whenever a timestamp is needed.
pub const RACE_REFERENCE_HOUR: u32 = 12;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RaceCategory {
    #[serde(rename = "series", alias = "copaAlcer", alias = "copa")]
    SeriesStage,
    #[serde(rename = "standalone", alias = "geral")]
    Standalone,
}

impl fmt::Display for RaceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RaceCategory::SeriesStage => write!(f, "series"),
            RaceCategory::Standalone => write!(f, "standalone"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum RaceStatus {
    #[default]
    #[serde(rename = "scheduled")]
    Scheduled,
    #[serde(rename = "completed")]
    Completed,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Race {
    pub id: String,
    #[serde(alias = "nome")]
    pub name: String,
    #[serde(alias = "cidade")]
    pub city: String,
    #[serde(alias = "data")]
    pub date: NaiveDate,
    #[serde(
        default,
        alias = "linkInscricao",
        deserialize_with = "from_opt_non_empty_string"
    )]
    pub registration_link: Option<String>,
    pub category: RaceCategory,
    #[serde(default)]
    pub status: RaceStatus,
}

impl Race {
    /// The race date pinned to noon UTC, so that rendering in any nearby
    /// timezone still lands on the same calendar day.
    pub fn reference_datetime(&self) -> DateTime<FixedOffset> {
        let noon = NaiveTime::from_hms_opt(RACE_REFERENCE_HOUR, 0, 0).unwrap_or_default();
        self.date
            .and_time(noon)
            .and_utc()
            .fixed_offset()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Gender {
    #[serde(rename = "female", alias = "Feminino")]
    Female,
    #[serde(rename = "male", alias = "Masculino")]
    Male,
    #[serde(rename = "unspecified")]
    Unspecified,
}

impl Gender {
    /// Accepts the Portuguese labels used by the timing companies as well as
    /// English ones and single-letter codes.
    pub fn parse(label: &str) -> Option<Gender> {
        match label.trim().to_lowercase().as_str() {
            "f" | "fem" | "feminino" | "female" | "w" | "women" => Some(Gender::Female),
            "m" | "masc" | "masculino" | "male" | "men" => Some(Gender::Male),
            "" | "unspecified" | "geral" => Some(Gender::Unspecified),
            _ => None,
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gender::Female => write!(f, "female"),
            Gender::Male => write!(f, "male"),
            Gender::Unspecified => write!(f, "unspecified"),
        }
    }
}

/// Course distance label such as `5K` or `10K`.
///
/// Ordered by the leading number so that `5K` sorts before `10K`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct Distance(String);

impl Distance {
    pub fn new(label: &str) -> Self {
        Distance(label.trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn leading_number(&self) -> Option<u64> {
        let digits: String = self.0.chars().take_while(char::is_ascii_digit).collect();
        digits.parse().ok()
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Ord for Distance {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.leading_number(), other.leading_number()) {
            (Some(a), Some(b)) if a != b => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            _ => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for Distance {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A (distance, gender) partition. Placements never cross categories.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CategoryKey {
    pub distance: Distance,
    pub gender: Gender,
}

impl fmt::Display for CategoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.distance, self.gender)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StageResult {
    pub athlete_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub athlete_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bib: Option<String>,
    #[serde(default, deserialize_with = "from_opt_lenient_u32")]
    pub age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    pub distance: Distance,
    pub gender: Gender,
    #[serde(default, deserialize_with = "from_opt_lenient_u32")]
    pub stage_placement: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_time: Option<String>,
    #[serde(default, deserialize_with = "from_opt_lenient_u32")]
    pub points: Option<u32>,
}

impl StageResult {
    pub fn category(&self) -> CategoryKey {
        CategoryKey {
            distance: self.distance.clone(),
            gender: self.gender,
        }
    }

    pub fn normalized_name(&self) -> String {
        normalize_name(&self.athlete_name)
    }
}

/// Case-insensitive, whitespace-trimmed form of a name used for matching and
/// for deterministic tie-breaks.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RankingEntry {
    pub athlete_name: String,
    /// Join key the athlete was grouped by (normalized name or explicit id).
    pub athlete_key: String,
    pub distance: Distance,
    pub gender: Gender,
    pub age: Option<u32>,
    pub team: Option<String>,
    /// Stage index (1-based) to points; stages the athlete skipped are absent.
    pub per_stage_points: BTreeMap<usize, u64>,
    pub cumulative_points: u64,
    pub overall_placement: u32,
    pub age_bracket: Option<String>,
    pub age_bracket_placement: Option<u32>,
}

impl RankingEntry {
    pub fn category(&self) -> CategoryKey {
        CategoryKey {
            distance: self.distance.clone(),
            gender: self.gender,
        }
    }

    pub fn stages_completed(&self) -> usize {
        self.per_stage_points.len()
    }

    pub fn stage_points(&self, stage_index: usize) -> Option<u64> {
        self.per_stage_points.get(&stage_index).copied()
    }
}

/// Accepts a JSON number, a numeric string, or null. Anything else becomes `None`
/// rather than failing the whole record.
pub fn from_opt_lenient_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(lenient_u32))
}

pub fn lenient_u32(value: &serde_json::Value) -> Option<u32> {
    match value {
        serde_json::Value::Number(number) => number
            .as_u64()
            .or_else(|| {
                number
                    .as_f64()
                    .filter(|float| float.is_finite() && *float >= 0.0)
                    .map(|float| float.round() as u64)
            })
            .and_then(|n| u32::try_from(n).ok()),
        serde_json::Value::String(text) => {
            let trimmed = text.trim().trim_start_matches('º').trim_end_matches('º');
            trimmed.parse::<u32>().ok()
        }
        _ => None,
    }
}

/// Accepts a string or a number, yielding its text; blank strings become `None`.
pub fn from_opt_lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(text)) => non_empty(text),
        Some(serde_json::Value::Number(number)) => Some(number.to_string()),
        _ => None,
    })
}

fn from_opt_non_empty_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.and_then(non_empty))
}

fn non_empty(text: String) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn distance_orders_by_leading_number() {
        let mut distances = vec![Distance::new("10K"), Distance::new("5k"), Distance::new("21K")];
        distances.sort();
        let labels: Vec<&str> = distances.iter().map(Distance::as_str).collect();
        assert_eq!(labels, vec!["5K", "10K", "21K"]);
    }

    #[test]
    fn gender_accepts_portuguese_and_english_labels() {
        assert_eq!(Gender::parse("Feminino"), Some(Gender::Female));
        assert_eq!(Gender::parse(" male "), Some(Gender::Male));
        assert_eq!(Gender::parse("M"), Some(Gender::Male));
        assert_eq!(Gender::parse("x-large"), None);
    }

    #[test]
    fn lenient_numbers() {
        assert_eq!(lenient_u32(&json!(7)), Some(7));
        assert_eq!(lenient_u32(&json!("12")), Some(12));
        assert_eq!(lenient_u32(&json!("12º")), Some(12));
        assert_eq!(lenient_u32(&json!(9.6)), Some(10));
        assert_eq!(lenient_u32(&json!("DNF")), None);
        assert_eq!(lenient_u32(&json!(-3)), None);
        assert_eq!(lenient_u32(&json!(null)), None);
    }

    #[test]
    fn race_deserializes_portuguese_field_names() {
        let race: Race = serde_json::from_value(json!({
            "id": "etapa-1",
            "nome": "Etapa Centro",
            "cidade": "Ribeirão Preto",
            "data": "2025-03-09",
            "linkInscricao": "",
            "category": "copaAlcer"
        }))
        .expect("race");
        assert_eq!(race.category, RaceCategory::SeriesStage);
        assert_eq!(race.registration_link, None);
        assert_eq!(race.status, RaceStatus::Scheduled);
        assert_eq!(race.reference_datetime().to_rfc3339(), "2025-03-09T12:00:00+00:00");
    }

    #[test]
    fn normalized_name_is_trimmed_and_lowercase() {
        assert_eq!(normalize_name("  Ana Souza "), "ana souza");
    }
}
