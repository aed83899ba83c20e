//! Cumulative standings for a multi-stage running series.
//!
//! Races live in a [`services::race_registry::RaceRegistry`], per-stage
//! uploads go through [`services::result_ingestion`], and every change yields
//! a fresh [`services::series_store::SeriesSnapshot`] whose ranking is
//! recomputed by [`services::ranking_aggregator::compute_ranking`].

pub mod models;
pub mod services;
