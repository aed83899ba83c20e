use std::collections::{BTreeMap, HashMap};

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::models::{
    self, CategoryKey, Distance, Gender, StageResult, from_opt_lenient_string,
    from_opt_lenient_u32,
};
use crate::services::config_loader::IdentityPolicy;
use crate::services::points::PointsStrategy;
use crate::services::ranking_aggregator::athlete_key;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Upload is not valid JSON: {0}")]
    Json(String),
    #[error("Upload must be a list of finishers or an object keyed by distance, found {0}")]
    UnsupportedShape(&'static str),
    #[error("Upload contains no finishers")]
    Empty,
    #[error("{path}: {message}")]
    Record { path: String, message: String },
}

impl ValidationError {
    fn record(path: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationError::Record {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Flat export from the timing company: one object per finisher.
#[derive(Debug, Clone, Deserialize)]
pub struct FlatRecord {
    #[serde(deserialize_with = "from_required_text")]
    pub numero_peito: String,
    pub nome_completo: String,
    #[serde(deserialize_with = "from_required_text")]
    pub distancia: String,
    pub classificacoes: Classifications,
    #[serde(default, alias = "genero")]
    pub sexo: Option<String>,
    #[serde(default, deserialize_with = "from_opt_lenient_u32")]
    pub idade: Option<u32>,
    #[serde(default, alias = "assessoria", deserialize_with = "from_opt_lenient_string")]
    pub equipe: Option<String>,
    #[serde(default, deserialize_with = "from_opt_lenient_string")]
    pub tempo: Option<String>,
    #[serde(default, deserialize_with = "from_opt_lenient_u32")]
    pub pontos: Option<u32>,
    #[serde(default, deserialize_with = "from_opt_lenient_string")]
    pub id_atleta: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Classifications {
    /// Placement across the whole distance, all genders.
    #[serde(deserialize_with = "from_required_placement")]
    pub geral: u32,
    /// Placement within the finisher's gender, when the export carries it.
    #[serde(default, alias = "genero", deserialize_with = "from_opt_lenient_u32")]
    pub sexo: Option<u32>,
}

/// Leaf of the nested `distance -> gender -> [finisher]` shape.
#[derive(Debug, Clone, Deserialize)]
pub struct NestedRecord {
    #[serde(alias = "nome_completo")]
    pub nome: String,
    #[serde(deserialize_with = "from_required_placement")]
    pub classificacao: u32,
    #[serde(default, deserialize_with = "from_opt_lenient_string")]
    pub tempo: Option<String>,
    #[serde(default, alias = "equipe", deserialize_with = "from_opt_lenient_string")]
    pub assessoria: Option<String>,
    #[serde(default, deserialize_with = "from_opt_lenient_u32")]
    pub idade: Option<u32>,
    #[serde(default, deserialize_with = "from_opt_lenient_u32")]
    pub pontos: Option<u32>,
    #[serde(default, deserialize_with = "from_opt_lenient_string")]
    pub id_atleta: Option<String>,
    #[serde(default, deserialize_with = "from_opt_lenient_string")]
    pub numero_peito: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NestedGroup {
    pub distance: Distance,
    pub gender: Gender,
    pub finishers: Vec<NestedRecord>,
}

#[derive(Debug, Clone)]
pub enum UploadPayload {
    Flat(Vec<FlatRecord>),
    Nested(Vec<NestedGroup>),
}

impl UploadPayload {
    pub fn shape_name(&self) -> &'static str {
        match self {
            UploadPayload::Flat(_) => "flat",
            UploadPayload::Nested(_) => "nested",
        }
    }

    pub fn finisher_count(&self) -> usize {
        match self {
            UploadPayload::Flat(records) => records.len(),
            UploadPayload::Nested(groups) => groups.iter().map(|g| g.finishers.len()).sum(),
        }
    }
}

pub fn validate_payload(raw: &str) -> Result<UploadPayload, ValidationError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|err| ValidationError::Json(err.to_string()))?;
    validate_value(&value)
}

/// Picks the payload variant from the top-level JSON kind, then validates
/// every record of that variant.
pub fn validate_value(value: &Value) -> Result<UploadPayload, ValidationError> {
    let payload = match value {
        Value::Array(items) => UploadPayload::Flat(validate_flat(items)?),
        Value::Object(distances) => UploadPayload::Nested(validate_nested(distances)?),
        Value::Null => return Err(ValidationError::UnsupportedShape("null")),
        Value::Bool(_) => return Err(ValidationError::UnsupportedShape("a boolean")),
        Value::Number(_) => return Err(ValidationError::UnsupportedShape("a number")),
        Value::String(_) => return Err(ValidationError::UnsupportedShape("a string")),
    };

    if payload.finisher_count() == 0 {
        return Err(ValidationError::Empty);
    }

    info!(
        "Validated {} upload with {} finishers",
        payload.shape_name(),
        payload.finisher_count()
    );
    Ok(payload)
}

fn validate_flat(items: &[Value]) -> Result<Vec<FlatRecord>, ValidationError> {
    let mut records = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let path = format!("[{index}]");
        let record: FlatRecord = parse_record(&path, item)?;
        if record.nome_completo.trim().is_empty() {
            return Err(ValidationError::record(path, "nome_completo is empty"));
        }
        if let Some(label) = record.sexo.as_deref()
            && Gender::parse(label).is_none()
        {
            return Err(ValidationError::record(
                path,
                format!("unknown gender label '{label}'"),
            ));
        }
        records.push(record);
    }
    Ok(records)
}

fn validate_nested(
    distances: &serde_json::Map<String, Value>,
) -> Result<Vec<NestedGroup>, ValidationError> {
    let mut groups = Vec::new();
    for (distance_label, genders) in distances {
        let Value::Object(genders) = genders else {
            return Err(ValidationError::record(
                distance_label.clone(),
                "expected an object keyed by gender",
            ));
        };
        for (gender_label, finishers) in genders {
            let path = format!("{distance_label}/{gender_label}");
            let gender = Gender::parse(gender_label).ok_or_else(|| {
                ValidationError::record(path.clone(), format!("unknown gender label '{gender_label}'"))
            })?;
            let Value::Array(items) = finishers else {
                return Err(ValidationError::record(path, "expected a list of finishers"));
            };

            let mut records = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                let record_path = format!("{path}[{index}]");
                let record: NestedRecord = parse_record(&record_path, item)?;
                if record.nome.trim().is_empty() {
                    return Err(ValidationError::record(record_path, "nome is empty"));
                }
                records.push(record);
            }

            groups.push(NestedGroup {
                distance: Distance::new(distance_label),
                gender,
                finishers: records,
            });
        }
    }
    Ok(groups)
}

fn parse_record<T: DeserializeOwned>(path: &str, item: &Value) -> Result<T, ValidationError> {
    if !item.is_object() {
        return Err(ValidationError::record(path, "expected a finisher object"));
    }
    T::deserialize(item).map_err(|err| ValidationError::record(path, err.to_string()))
}

/// Turns a validated upload into the stored per-stage rows for one race.
///
/// Duplicate athletes within a category keep the last row seen.
pub fn normalize(
    payload: &UploadPayload,
    strategy: &dyn PointsStrategy,
    identity: IdentityPolicy,
) -> Vec<StageResult> {
    let rows = match payload {
        UploadPayload::Flat(records) => normalize_flat(records),
        UploadPayload::Nested(groups) => normalize_nested(groups),
    };

    let mut results: Vec<StageResult> = Vec::with_capacity(rows.len());
    let mut seen: HashMap<(CategoryKey, String), usize> = HashMap::new();
    for (mut row, uploaded_points) in rows {
        row.points = strategy.award(row.stage_placement, uploaded_points);
        let key = (row.category(), athlete_key(&row, identity));
        match seen.get(&key) {
            Some(&index) => {
                warn!(
                    "Duplicate result for {} in {}, keeping the last one",
                    row.athlete_name, key.0
                );
                results[index] = row;
            }
            None => {
                seen.insert(key, results.len());
                results.push(row);
            }
        }
    }

    info!("Normalized {} stage results", results.len());
    results
}

fn normalize_flat(records: &[FlatRecord]) -> Vec<(StageResult, Option<u32>)> {
    let mut rows: Vec<(StageResult, Option<u32>, u32)> = records
        .iter()
        .map(|record| {
            let gender = record
                .sexo
                .as_deref()
                .and_then(Gender::parse)
                .unwrap_or(Gender::Unspecified);
            let row = StageResult {
                athlete_name: record.nome_completo.trim().to_string(),
                athlete_id: record.id_atleta.clone(),
                bib: Some(record.numero_peito.clone()),
                age: record.idade,
                team: record.equipe.clone(),
                distance: Distance::new(&record.distancia),
                gender,
                stage_placement: record.classificacoes.sexo,
                finish_time: record.tempo.clone(),
                points: None,
            };
            (row, record.pontos, record.classificacoes.geral)
        })
        .collect();

    derive_missing_category_placements(&mut rows);

    rows.into_iter()
        .map(|(row, uploaded, _)| (row, uploaded))
        .collect()
}

/// Categories where any row lacks a gender placement are re-ranked from the
/// overall placement, so the whole category uses one consistent source.
fn derive_missing_category_placements(rows: &mut [(StageResult, Option<u32>, u32)]) {
    let mut by_category: BTreeMap<CategoryKey, Vec<usize>> = BTreeMap::new();
    for (index, (row, _, _)) in rows.iter().enumerate() {
        by_category.entry(row.category()).or_default().push(index);
    }

    for (category, mut indices) in by_category {
        if indices.iter().all(|&i| rows[i].0.stage_placement.is_some()) {
            continue;
        }
        debug!("Deriving {} placements from overall classification", category);
        indices.sort_by_key(|&i| (rows[i].2, i));
        for (rank, index) in indices.into_iter().enumerate() {
            rows[index].0.stage_placement = u32::try_from(rank + 1).ok();
        }
    }
}

fn normalize_nested(groups: &[NestedGroup]) -> Vec<(StageResult, Option<u32>)> {
    groups
        .iter()
        .flat_map(|group| {
            group.finishers.iter().map(|record| {
                let row = StageResult {
                    athlete_name: record.nome.trim().to_string(),
                    athlete_id: record.id_atleta.clone(),
                    bib: record.numero_peito.clone(),
                    age: record.idade,
                    team: record.assessoria.clone(),
                    distance: group.distance.clone(),
                    gender: group.gender,
                    stage_placement: Some(record.classificacao),
                    finish_time: record.tempo.clone(),
                    points: None,
                };
                (row, record.pontos)
            })
        })
        .collect()
}

fn from_required_placement<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    models::lenient_u32(&value)
        .filter(|placement| *placement > 0)
        .ok_or_else(|| D::Error::custom(format!("expected a positive placement, found {value}")))
}

fn from_required_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    from_opt_lenient_string(deserializer)?
        .ok_or_else(|| D::Error::custom("expected a non-empty string or number"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::points::{PointsConfig, TableCurve};
    use serde_json::json;

    fn table() -> TableCurve {
        TableCurve {
            points: vec![10, 8, 6, 4],
        }
    }

    #[test]
    fn accepts_flat_shape() {
        let payload = validate_value(&json!([
            {
                "numero_peito": 101,
                "nome_completo": "Maria Silva",
                "distancia": "5K",
                "sexo": "F",
                "classificacoes": { "geral": 4, "sexo": 1 },
                "tempo": "00:21:10"
            }
        ]))
        .expect("flat payload");
        assert_eq!(payload.shape_name(), "flat");
        assert_eq!(payload.finisher_count(), 1);
    }

    #[test]
    fn accepts_nested_shape() {
        let payload = validate_value(&json!({
            "5K": {
                "Feminino": [
                    { "nome": "Ana", "classificacao": 1, "tempo": "00:19:55", "assessoria": "Run RP" }
                ],
                "Masculino": []
            }
        }))
        .expect("nested payload");
        assert_eq!(payload.shape_name(), "nested");
        assert_eq!(payload.finisher_count(), 1);
    }

    #[test]
    fn rejects_unsupported_shapes() {
        assert_eq!(
            validate_value(&json!("results")).unwrap_err(),
            ValidationError::UnsupportedShape("a string")
        );
        assert_eq!(validate_value(&json!([])).unwrap_err(), ValidationError::Empty);
        assert_eq!(validate_value(&json!({})).unwrap_err(), ValidationError::Empty);
        assert!(matches!(
            validate_payload("{not json").unwrap_err(),
            ValidationError::Json(_)
        ));
    }

    #[test]
    fn reports_path_of_bad_flat_record() {
        let err = validate_value(&json!([
            {
                "numero_peito": 1,
                "nome_completo": "Ana",
                "distancia": "5K",
                "classificacoes": { "geral": 1 }
            },
            {
                "numero_peito": 2,
                "nome_completo": "Bia",
                "distancia": "5K",
                "classificacoes": {}
            }
        ]))
        .unwrap_err();
        match err {
            ValidationError::Record { path, message } => {
                assert_eq!(path, "[1]");
                assert!(message.contains("geral"), "{message}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn reports_path_of_bad_nested_record() {
        let err = validate_value(&json!({
            "10K": { "Masculino": [ { "nome": "Caio", "classificacao": "DNF" } ] }
        }))
        .unwrap_err();
        assert_eq!(
            err,
            ValidationError::record(
                "10K/Masculino[0]",
                "expected a positive placement, found \"DNF\""
            )
        );
    }

    #[test]
    fn rejects_unknown_gender_labels() {
        let err = validate_value(&json!({ "5K": { "Juvenil": [] } })).unwrap_err();
        assert!(matches!(err, ValidationError::Record { ref path, .. } if path == "5K/Juvenil"));
    }

    #[test]
    fn flat_upload_derives_category_placement_from_overall() {
        let payload = validate_value(&json!([
            { "numero_peito": 1, "nome_completo": "Ana", "distancia": "5K", "sexo": "F", "classificacoes": { "geral": 3 } },
            { "numero_peito": 2, "nome_completo": "Caio", "distancia": "5K", "sexo": "M", "classificacoes": { "geral": 1 } },
            { "numero_peito": 3, "nome_completo": "Bia", "distancia": "5K", "sexo": "F", "classificacoes": { "geral": 2 } }
        ]))
        .expect("payload");
        let results = normalize(&payload, &table(), IdentityPolicy::NormalizedName);

        let placement = |name: &str| {
            results
                .iter()
                .find(|r| r.athlete_name == name)
                .and_then(|r| r.stage_placement)
        };
        assert_eq!(placement("Bia"), Some(1));
        assert_eq!(placement("Ana"), Some(2));
        assert_eq!(placement("Caio"), Some(1));
        let ana = results.iter().find(|r| r.athlete_name == "Ana").expect("ana");
        assert_eq!(ana.points, Some(8));
        assert_eq!(ana.bib.as_deref(), Some("1"));
    }

    #[test]
    fn flat_records_without_gender_share_unspecified_category() {
        let payload = validate_value(&json!([
            { "numero_peito": "7", "nome_completo": "Ana", "distancia": "5K", "classificacoes": { "geral": 1 } }
        ]))
        .expect("payload");
        let results = normalize(&payload, &table(), IdentityPolicy::NormalizedName);
        assert_eq!(results[0].gender, Gender::Unspecified);
    }

    #[test]
    fn duplicates_keep_the_last_row() {
        let payload = validate_value(&json!({
            "5K": { "Feminino": [
                { "nome": "Ana", "classificacao": 2 },
                { "nome": " ana ", "classificacao": 1 }
            ] }
        }))
        .expect("payload");
        let results = normalize(&payload, &table(), IdentityPolicy::NormalizedName);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].stage_placement, Some(1));
        assert_eq!(results[0].points, Some(10));
    }

    #[test]
    fn uploaded_points_strategy_keeps_bad_points_as_missing() {
        let payload = validate_value(&json!({
            "5K": { "Feminino": [
                { "nome": "Ana", "classificacao": 1, "pontos": "vinte" },
                { "nome": "Bia", "classificacao": 2, "pontos": "18" }
            ] }
        }))
        .expect("payload");
        let strategy = PointsConfig::Uploaded.strategy();
        let results = normalize(&payload, strategy.as_ref(), IdentityPolicy::NormalizedName);
        assert_eq!(results[0].points, None);
        assert_eq!(results[1].points, Some(18));
    }
}
