//! Run summary: what one scheduled run did, as counts only.

pub mod generator;

use crate::aggregate::AggregationReport;
use crate::builder::BuildReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use generator::{generate_json_summary, generate_markdown_summary, write_summary};

/// Exit status of a run with no logged failures.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit status when a fatal error aborted the run.
pub const EXIT_FATAL: i32 = 1;
/// Exit status when the run finished but logged per-user or per-subgroup failures.
pub const EXIT_PARTIAL: i32 = 2;

/// Everything reported about one run. Never holds identities or pseudonyms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub as_of: DateTime<Utc>,
    pub period: String,
    pub duration_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<AggregationReport>,
}

impl RunSummary {
    pub fn new(as_of: DateTime<Utc>, period: String) -> Self {
        Self {
            as_of,
            period,
            duration_seconds: 0.0,
            build: None,
            aggregation: None,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.build.as_ref().is_some_and(|b| b.has_failures())
            || self.aggregation.as_ref().is_some_and(|a| a.has_failures())
    }

    pub fn exit_code(&self) -> i32 {
        if self.has_failures() {
            EXIT_PARTIAL
        } else {
            EXIT_SUCCESS
        }
    }
}
