pub mod config_loader;
pub mod data_loader;
pub mod points;
pub mod query;
pub mod race_registry;
pub mod ranking_aggregator;
pub mod result_ingestion;
pub mod series_store;
pub mod storage;
