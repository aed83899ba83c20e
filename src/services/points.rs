//! Point curves applied to stage placements at ingestion time.
//!
//! The aggregator never looks at placements; it only sums whatever points
//! ingestion stored, so any curve can be swapped in here.

use serde::Deserialize;

/// Turns a finisher's placement within their category into a point award.
pub trait PointsStrategy {
    /// `placement` is 1-based within (distance, gender). `uploaded` is the
    /// points value carried by the upload itself, if any.
    fn award(&self, placement: Option<u32>, uploaded: Option<u32>) -> Option<u32>;
}

/// Descending lookup table: first place gets `points[0]`, and so on.
/// Placements past the end of the table score zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableCurve {
    pub points: Vec<u32>,
}

impl PointsStrategy for TableCurve {
    fn award(&self, placement: Option<u32>, _uploaded: Option<u32>) -> Option<u32> {
        let placement = placement.filter(|p| *p > 0)?;
        let index = usize::try_from(placement - 1).ok()?;
        Some(self.points.get(index).copied().unwrap_or(0))
    }
}

/// `max(0, baseline - placement + 1)`: first place earns `baseline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearCurve {
    pub baseline: u32,
}

impl PointsStrategy for LinearCurve {
    fn award(&self, placement: Option<u32>, _uploaded: Option<u32>) -> Option<u32> {
        let placement = placement.filter(|p| *p > 0)?;
        Some(self.baseline.saturating_add(1).saturating_sub(placement))
    }
}

/// Trusts the points column of the upload.
#[derive(Debug, Clone, Copy, Default)]
pub struct UploadedPoints;

impl PointsStrategy for UploadedPoints {
    fn award(&self, _placement: Option<u32>, uploaded: Option<u32>) -> Option<u32> {
        uploaded
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum PointsConfig {
    Table {
        #[serde(default = "default_table")]
        points: Vec<u32>,
    },
    Linear {
        baseline: u32,
    },
    Uploaded,
}

impl Default for PointsConfig {
    fn default() -> Self {
        PointsConfig::Table {
            points: default_table(),
        }
    }
}

impl PointsConfig {
    pub fn strategy(&self) -> Box<dyn PointsStrategy + Send + Sync> {
        match self {
            PointsConfig::Table { points } => Box::new(TableCurve {
                points: points.clone(),
            }),
            PointsConfig::Linear { baseline } => Box::new(LinearCurve {
                baseline: *baseline,
            }),
            PointsConfig::Uploaded => Box::new(UploadedPoints),
        }
    }
}

fn default_table() -> Vec<u32> {
    let mut table = vec![20, 18, 16];
    table.extend((1..=15).rev());
    table
}
