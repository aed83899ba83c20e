//! Uploads flowing through validation, the series store and a reload from disk.

use std::fs;

use chrono::NaiveDate;
use copa::models::{Distance, Gender, RaceCategory, RankingEntry};
use copa::services::config_loader::{CopaConfig, parse_copa_config};
use copa::services::data_loader::{spawn_data_loader, wait_for_snapshot};
use copa::services::query::{self, SortColumn, SortConfig, ViewState};
use copa::services::race_registry::RaceDraft;
use copa::services::ranking_aggregator::RankingOptions;
use copa::services::result_ingestion::{normalize, validate_payload};
use copa::services::series_store::{SeriesSnapshot, SeriesStore, StoreEvent};
use copa::services::storage::DataFolder;

fn uploaded_points_config() -> CopaConfig {
    parse_copa_config(
        r#"
        [series]
        name = "Copa Alcer"

        [points]
        strategy = "uploaded"
        "#,
    )
    .expect("config")
}

fn stage_draft(name: &str, month: u32) -> RaceDraft {
    RaceDraft {
        name: name.to_string(),
        city: "Ribeirão Preto".to_string(),
        date: NaiveDate::from_ymd_opt(2025, month, 9).expect("date"),
        registration_link: None,
        category: RaceCategory::SeriesStage,
    }
}

fn create_stage(store: &mut SeriesStore, name: &str, month: u32) -> String {
    store
        .apply(StoreEvent::UpsertRace {
            id: None,
            draft: stage_draft(name, month),
        })
        .expect("create race")
        .race
        .expect("race")
        .id
}

fn publish(store: &mut SeriesStore, config: &CopaConfig, race_id: &str, upload: &str) {
    let payload = validate_payload(upload).expect("valid upload");
    let strategy = config.points.strategy();
    let results = normalize(&payload, strategy.as_ref(), config.identity);
    store
        .apply(StoreEvent::PublishResults {
            race_id: race_id.to_string(),
            results,
        })
        .expect("publish");
}

fn female_5k(snapshot: &SeriesSnapshot) -> Vec<&RankingEntry> {
    query::ranking_for(&snapshot.ranking, &Distance::new("5K"), Gender::Female)
}

fn points_of(entries: &[&RankingEntry], name: &str) -> u64 {
    entries
        .iter()
        .find(|entry| entry.athlete_name == name)
        .map(|entry| entry.cumulative_points)
        .unwrap_or_else(|| panic!("{name} missing from ranking"))
}

#[test]
fn three_stage_series_ranks_ana_over_maria() {
    let dir = tempfile::tempdir().expect("tempdir");
    let folder = DataFolder::new(dir.path());
    let config = uploaded_points_config();
    let options = RankingOptions::from(&config);
    let mut store = SeriesStore::with_folder(folder.clone(), SeriesSnapshot::default(), options.clone());

    let first = create_stage(&mut store, "Etapa 1", 3);
    let second = create_stage(&mut store, "Etapa 2", 5);
    let third = create_stage(&mut store, "Etapa 3", 7);

    publish(
        &mut store,
        &config,
        &first,
        r#"{ "5K": { "Feminino": [
            { "nome": "Maria", "classificacao": 1, "pontos": 10, "idade": 34 },
            { "nome": "Ana", "classificacao": 2, "pontos": 7, "assessoria": "Corre RP" }
        ] } }"#,
    );

    // Stage 1 only
    let partial = store.snapshot();
    let table = female_5k(&partial);
    assert_eq!(table[0].athlete_name, "Maria");
    assert_eq!(table[0].cumulative_points, 10);
    assert_eq!(points_of(&table, "Ana"), 7);

    publish(
        &mut store,
        &config,
        &second,
        r#"{ "5K": { "Feminino": [
            { "nome": "Ana", "classificacao": 1, "pontos": 9 },
            { "nome": "MARIA ", "classificacao": 2, "pontos": 8 }
        ] } }"#,
    );
    publish(
        &mut store,
        &config,
        &third,
        r#"{ "5K": { "Feminino": [
            { "nome": "Ana", "classificacao": 1, "pontos": 10 }
        ] } }"#,
    );

    let snapshot = store.snapshot();
    let table = female_5k(&snapshot);
    assert_eq!(table.len(), 2);
    assert_eq!(table[0].athlete_name, "Ana");
    assert_eq!(table[0].cumulative_points, 26);
    assert_eq!(table[0].overall_placement, 1);
    assert_eq!(table[1].cumulative_points, 18);
    assert_eq!(table[1].overall_placement, 2);
    assert_eq!(table[1].stage_points(3), None);
    assert_eq!(table[1].stages_completed(), 2);

    // The earlier snapshot is untouched by later publishes.
    assert_eq!(female_5k(&partial)[0].cumulative_points, 10);

    // A fresh load from disk yields the same ranking.
    let (reloaded, report) =
        wait_for_snapshot(spawn_data_loader(folder, options)).expect("reload");
    assert_eq!(report.error_count, 0);
    assert_eq!(reloaded.ranking, snapshot.ranking);
}

#[test]
fn equal_points_tie_break_on_name() {
    let config = uploaded_points_config();
    let mut store = SeriesStore::in_memory(RankingOptions::from(&config));
    let race = create_stage(&mut store, "Etapa 1", 3);
    publish(
        &mut store,
        &config,
        &race,
        r#"{ "5K": { "F": [
            { "nome": "Bruno", "classificacao": 1, "pontos": 50 },
            { "nome": "ana", "classificacao": 2, "pontos": 50 }
        ] } }"#,
    );

    let snapshot = store.snapshot();
    let names: Vec<&str> = female_5k(&snapshot)
        .iter()
        .map(|entry| entry.athlete_name.as_str())
        .collect();
    assert_eq!(names, vec!["ana", "Bruno"]);
}

#[test]
fn missing_age_keeps_overall_placement_only() {
    let config = uploaded_points_config();
    let mut store = SeriesStore::in_memory(RankingOptions::from(&config));
    let race = create_stage(&mut store, "Etapa 1", 3);
    publish(
        &mut store,
        &config,
        &race,
        r#"{ "5K": { "Feminino": [
            { "nome": "Carla", "classificacao": 1, "pontos": 20 },
            { "nome": "Dora", "classificacao": 2, "pontos": 18, "idade": 41 }
        ] } }"#,
    );

    let snapshot = store.snapshot();
    let table = female_5k(&snapshot);
    assert_eq!(table[0].athlete_name, "Carla");
    assert_eq!(table[0].overall_placement, 1);
    assert_eq!(table[0].age_bracket, None);
    assert_eq!(table[0].age_bracket_placement, None);
    assert_eq!(table[1].age_bracket.as_deref(), Some("40-44"));
    assert_eq!(table[1].age_bracket_placement, Some(1));

    let groups = query::age_bracket_view(
        &snapshot.ranking,
        &Distance::new("5K"),
        Gender::Female,
        &config.age_brackets,
    );
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].entries[0].athlete_name, "Dora");
}

#[test]
fn flat_upload_uses_the_default_points_table() {
    let config = CopaConfig::default();
    let mut store = SeriesStore::in_memory(RankingOptions::from(&config));
    let race = create_stage(&mut store, "Etapa 1", 3);
    publish(
        &mut store,
        &config,
        &race,
        r#"[
            { "numero_peito": 101, "nome_completo": "Elisa", "distancia": "10k", "sexo": "F",
              "classificacoes": { "geral": 3 } },
            { "numero_peito": "102", "nome_completo": "Fábio", "distancia": "10K", "sexo": "M",
              "classificacoes": { "geral": 1 } },
            { "numero_peito": "103", "nome_completo": "Gabi", "distancia": "10K", "sexo": "F",
              "classificacoes": { "geral": 2 } }
        ]"#,
    );

    let snapshot = store.snapshot();
    let women = query::ranking_for(&snapshot.ranking, &Distance::new("10K"), Gender::Female);
    assert_eq!(women.len(), 2);
    assert_eq!(women[0].athlete_name, "Gabi");
    assert_eq!(women[0].cumulative_points, 20);
    assert_eq!(women[1].cumulative_points, 18);

    let men = query::ranking_for(&snapshot.ranking, &Distance::new("10K"), Gender::Male);
    assert_eq!(men[0].cumulative_points, 20);

    let mut sorted = women.clone();
    let mut sort = SortConfig::default();
    sort.toggle(SortColumn::Name);
    query::sort_entries(&mut sorted, &sort);
    assert_eq!(sorted[0].athlete_name, "Elisa");
}

#[test]
fn invalid_upload_leaves_the_stage_untouched() {
    let dir = tempfile::tempdir().expect("tempdir");
    let folder = DataFolder::new(dir.path());
    let config = CopaConfig::default();
    let mut store = SeriesStore::with_folder(
        folder.clone(),
        SeriesSnapshot::default(),
        RankingOptions::from(&config),
    );
    let race = create_stage(&mut store, "Etapa 1", 3);

    let err = validate_payload(r#"[{ "nome_completo": "Sem Peito", "distancia": "5K",
        "classificacoes": { "geral": 1 } }]"#)
    .unwrap_err();
    assert!(err.to_string().starts_with("[0]"), "{err}");
    assert!(validate_payload("42").is_err());
    assert!(validate_payload("[]").is_err());

    assert!(!store.snapshot().has_results(&race));
    assert!(!folder.results_path(&race).expect("path").exists());
}

#[test]
fn calendar_and_search_read_the_published_snapshot() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(
        dir.path().join("config.toml"),
        "[points]\nstrategy = \"linear\"\nbaseline = 10\n\n[query]\nmin_search_len = 4\n",
    )
    .expect("config");
    let config =
        copa::services::config_loader::load_copa_config(dir.path()).expect("load config");
    let mut store = SeriesStore::with_folder(
        DataFolder::new(dir.path()),
        SeriesSnapshot::default(),
        RankingOptions::from(&config),
    );
    let race = create_stage(&mut store, "Etapa 1", 3);
    store
        .apply(StoreEvent::UpsertRace {
            id: None,
            draft: RaceDraft {
                registration_link: Some("https://inscricoes.example.com/noturna".to_string()),
                category: RaceCategory::Standalone,
                ..stage_draft("Noturna", 11)
            },
        })
        .expect("standalone");
    publish(
        &mut store,
        &config,
        &race,
        r#"{ "10K": { "Masculino": [
            { "nome": "Heitor Lima", "classificacao": 1, "tempo": "00:34:10" },
            { "nome": "Igor Lima", "classificacao": 2, "tempo": "00:35:02" }
        ] } }"#,
    );

    let snapshot = store.snapshot();
    assert_eq!(snapshot.ranking[0].cumulative_points, 10);
    assert_eq!(snapshot.ranking[1].cumulative_points, 9);

    let series = query::calendar(&snapshot, RaceCategory::SeriesStage);
    assert_eq!(series.len(), 1);
    assert!(series[0].has_results);
    assert!(!series[0].registration_open);
    assert_eq!((series[0].day.as_str(), series[0].month.as_str()), ("09", "MAR"));

    let standalone = query::calendar(&snapshot, RaceCategory::Standalone);
    assert!(standalone[0].registration_open);
    assert_eq!(standalone[0].date_label, "09/11/2025");

    let min = config.query.min_search_len;
    assert!(query::search_athlete(&snapshot, &race, "lim", min).is_err());
    let hits = query::search_athlete(&snapshot, &race, " lima", min).expect("search");
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].athlete_name, "Heitor Lima");

    match ViewState::from_rows(query::search_athlete(&snapshot, &race, "Zuleica", min).expect("search")) {
        ViewState::Empty => {}
        other => panic!("expected an empty view, got {other:?}"),
    }
}
