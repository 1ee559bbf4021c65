//! External collaborators
//!
//! The engine never computes features or labels itself. It consumes:
//! - a [`TrainingDataProvider`] for labelled history,
//! - a [`GroundTruthProvider`] for delayed realized outcomes,
//! - zero or more [`IncumbentReloader`] hooks exposed by the production scorer.

pub mod memory;
pub mod sqlite;

pub use memory::{InMemoryGroundTruth, StaticTrainingData};
pub use sqlite::SignalStore;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::models::TrainingExample;

/// Delay after which a signal's realized outcome is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OutcomeHorizon {
    #[serde(rename = "1h", alias = "one_hour")]
    OneHour,
    #[serde(rename = "4h", alias = "four_hours")]
    FourHours,
    #[default]
    #[serde(rename = "EOD", alias = "end_of_day")]
    EndOfDay,
}

impl OutcomeHorizon {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeHorizon::OneHour => "1h",
            OutcomeHorizon::FourHours => "4h",
            OutcomeHorizon::EndOfDay => "EOD",
        }
    }
}

impl fmt::Display for OutcomeHorizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutcomeHorizon {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1h" | "one_hour" => Ok(OutcomeHorizon::OneHour),
            "4h" | "four_hours" => Ok(OutcomeHorizon::FourHours),
            "eod" | "end_of_day" => Ok(OutcomeHorizon::EndOfDay),
            other => Err(format!("Unknown outcome horizon: {}", other)),
        }
    }
}

/// Source of labelled history for the trainer.
#[async_trait::async_trait]
pub trait TrainingDataProvider: Send + Sync {
    /// Labelled rows observed within the last `lookback_days`, oldest first.
    async fn fetch_training_set(&self, lookback_days: u32) -> Result<Vec<TrainingExample>>;
}

/// Source of delayed realized outcomes.
#[async_trait::async_trait]
pub trait GroundTruthProvider: Send + Sync {
    /// Cost-adjusted realized return, or `None` while not yet known.
    async fn realized_outcome(&self, signal_id: &str, horizon: OutcomeHorizon)
        -> Result<Option<f64>>;
}

/// Hook the production scorer exposes so a promotion can force a fresh read
/// of the canonical incumbent pair.
pub trait IncumbentReloader: Send + Sync {
    fn reload(&self) -> Result<()>;
}
