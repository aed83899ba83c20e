//! Command line front end: race calendar administration, result uploads and
//! the public ranking, calendar and athlete search views.

mod commands;

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use copa::models::{Gender, RaceCategory};
use copa::services::query::SortColumn;

pub use commands::*;

/// Copa - cumulative standings for a multi-stage running series
#[derive(Parser, Debug)]
#[command(name = "copa")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Folder holding config.toml, races.json and results/
    #[arg(short = 'd', long, global = true, default_value = ".")]
    pub data_dir: PathBuf,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage the race calendar
    Races {
        #[command(subcommand)]
        action: RaceCommand,
    },

    /// Check an upload file without storing anything
    Validate {
        /// Results export (flat list or nested by distance and gender)
        file: PathBuf,
    },

    /// Validate, normalize and publish the results of one race
    Upload {
        race_id: String,
        file: PathBuf,
    },

    /// Remove the published results of one race
    Retract { race_id: String },

    /// Show the cumulative series ranking
    Ranking {
        /// Only this distance, e.g. 5K
        #[arg(long)]
        distance: Option<String>,

        /// Only this gender (female, male, feminino, masculino, ...)
        #[arg(long, value_parser = parse_gender)]
        gender: Option<Gender>,

        /// placement, name, stageN or total
        #[arg(long, value_parser = parse_sort_column, default_value = "placement")]
        sort: SortColumn,

        /// Sort descending
        #[arg(long)]
        desc: bool,

        /// Group by age bracket instead of the overall table
        #[arg(long)]
        brackets: bool,
    },

    /// Find athletes by name in the results of one race
    Search { race_id: String, term: String },

    /// Show the public race calendar
    Calendar {
        #[arg(long, value_parser = parse_category, default_value = "series")]
        category: RaceCategory,
    },
}

impl Commands {
    /// Whether the command writes to the data folder.
    pub fn writes_data(&self) -> bool {
        match self {
            Commands::Races { action } => !matches!(action, RaceCommand::List { .. }),
            Commands::Upload { .. } | Commands::Retract { .. } => true,
            Commands::Validate { .. }
            | Commands::Ranking { .. }
            | Commands::Search { .. }
            | Commands::Calendar { .. } => false,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum RaceCommand {
    /// List races; without a category every race is listed, latest first
    List {
        #[arg(long, value_parser = parse_category)]
        category: Option<RaceCategory>,
    },

    /// Register a new race
    Add {
        #[arg(long)]
        name: String,

        #[arg(long)]
        city: String,

        /// YYYY-MM-DD
        #[arg(long, value_parser = parse_date)]
        date: NaiveDate,

        /// Registration URL
        #[arg(long)]
        link: Option<String>,

        #[arg(long, value_parser = parse_category, default_value = "series")]
        category: RaceCategory,
    },

    /// Edit a race; omitted fields keep their value, an empty --link clears it
    Edit {
        id: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        city: Option<String>,

        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,

        #[arg(long)]
        link: Option<String>,

        #[arg(long, value_parser = parse_category)]
        category: Option<RaceCategory>,
    },

    /// Delete a race together with its results
    Delete { id: String },
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("expected YYYY-MM-DD: {err}"))
}

fn parse_category(raw: &str) -> Result<RaceCategory, String> {
    match raw.trim().to_lowercase().as_str() {
        "series" | "copa" | "copaalcer" => Ok(RaceCategory::SeriesStage),
        "standalone" | "geral" => Ok(RaceCategory::Standalone),
        other => Err(format!("unknown category '{other}' (series or standalone)")),
    }
}

fn parse_gender(raw: &str) -> Result<Gender, String> {
    Gender::parse(raw).ok_or_else(|| format!("unknown gender '{raw}'"))
}

fn parse_sort_column(raw: &str) -> Result<SortColumn, String> {
    raw.parse()
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let Cli {
        data_dir,
        json,
        command,
    } = cli;
    let ctx = CommandContext::open(data_dir, json, command.writes_data())?;

    match command {
        Commands::Races { action } => match action {
            RaceCommand::List { category } => cmd_races_list(&ctx, category),
            RaceCommand::Add {
                name,
                city,
                date,
                link,
                category,
            } => cmd_races_add(&ctx, name, city, date, link, category),
            RaceCommand::Edit {
                id,
                name,
                city,
                date,
                link,
                category,
            } => cmd_races_edit(
                &ctx,
                &id,
                RaceEdit {
                    name,
                    city,
                    date,
                    link,
                    category,
                },
            ),
            RaceCommand::Delete { id } => cmd_races_delete(&ctx, &id),
        },
        Commands::Validate { file } => cmd_validate(&ctx, &file),
        Commands::Upload { race_id, file } => cmd_upload(&ctx, &race_id, &file),
        Commands::Retract { race_id } => cmd_retract(&ctx, &race_id),
        Commands::Ranking {
            distance,
            gender,
            sort,
            desc,
            brackets,
        } => cmd_ranking(&ctx, distance.as_deref(), gender, sort, desc, brackets),
        Commands::Search { race_id, term } => cmd_search(&ctx, &race_id, &term),
        Commands::Calendar { category } => cmd_calendar(&ctx, category),
    }
}
