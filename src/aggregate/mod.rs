//! Trend aggregator.
//!
//! Reads one snapshot of the contribution window, groups it per category,
//! drops every subgroup below its cohort floor, and upserts the rest keyed
//! by (category, subgroup, metric, period). Running it again over the same
//! window rewrites the same rows with the same values.

pub mod categories;

use crate::config::{CohortFloors, Config};
use crate::error::Result;
use crate::models::TrendCategory;
use crate::store::Stores;
use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, error, info};

pub use categories::{compute_category, latest_per_pseudonym};

/// Settings for one aggregation run.
#[derive(Debug, Clone)]
pub struct AggregatorOptions {
    pub as_of: DateTime<Utc>,
    /// Already clamped to the retention window.
    pub window_days: i64,
    pub global_floor: usize,
    pub top_flags: usize,
    pub floors: CohortFloors,
}

impl AggregatorOptions {
    pub fn from_config(config: &Config, as_of: DateTime<Utc>) -> Self {
        Self {
            as_of,
            window_days: config.effective_window_days(),
            global_floor: config.aggregation.global_floor,
            top_flags: config.aggregation.top_flags,
            floors: config.aggregation.floors.clone(),
        }
    }
}

/// ISO week of `as_of`, e.g. `2026-W42`.
pub fn period_of(as_of: DateTime<Utc>) -> String {
    let week = as_of.iso_week();
    format!("{}-W{:02}", week.year(), week.week())
}

/// How an aggregation run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationOutcome {
    Published,
    /// Too few contributors in the window; nothing was written.
    InsufficientPopulation,
}

/// Per-category counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryReport {
    pub written: usize,
    pub suppressed: usize,
    pub failed: usize,
}

/// Counts from one aggregation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationReport {
    pub outcome: AggregationOutcome,
    pub period: String,
    pub window_days: i64,
    pub contributions_in_window: usize,
    pub distinct_contributors: usize,
    pub categories: BTreeMap<TrendCategory, CategoryReport>,
}

impl AggregationReport {
    pub fn trends_written(&self) -> usize {
        self.categories.values().map(|c| c.written).sum()
    }

    pub fn trends_suppressed(&self) -> usize {
        self.categories.values().map(|c| c.suppressed).sum()
    }

    pub fn has_failures(&self) -> bool {
        self.categories.values().any(|c| c.failed > 0)
    }
}

/// Recomputes published trends from the contribution window.
pub struct TrendAggregator {
    stores: Stores,
    options: AggregatorOptions,
}

impl TrendAggregator {
    pub fn new(stores: Stores, options: AggregatorOptions) -> Self {
        Self { stores, options }
    }

    /// Run one aggregation pass.
    ///
    /// The caller must hold the aggregation lock. A failing upsert is
    /// counted against its category; only an unreadable contribution
    /// window is an error.
    pub async fn recompute_trends(&self) -> Result<AggregationReport> {
        let as_of = self.options.as_of;
        let since = as_of - Duration::days(self.options.window_days);
        let period = period_of(as_of);

        let contributions = self
            .stores
            .contributions
            .list_contributions(since, as_of)
            .await?;
        let in_window = contributions.len();
        let snapshot = latest_per_pseudonym(contributions);

        let mut report = AggregationReport {
            outcome: AggregationOutcome::Published,
            period: period.clone(),
            window_days: self.options.window_days,
            contributions_in_window: in_window,
            distinct_contributors: snapshot.len(),
            categories: BTreeMap::new(),
        };

        if snapshot.len() < self.options.global_floor {
            info!(
                "Insufficient population for {}: {} contributors (need {}), nothing published",
                period,
                snapshot.len(),
                self.options.global_floor
            );
            report.outcome = AggregationOutcome::InsufficientPopulation;
            return Ok(report);
        }

        for category in TrendCategory::ALL {
            let floor = self.options.floors.for_category(category);
            let mut counts = CategoryReport::default();

            for record in compute_category(&snapshot, category, self.options.top_flags, &period) {
                if record.sample_size < floor {
                    debug!(
                        "Suppressed {} / {} / {}: {} members (floor {})",
                        category, record.subgroup, record.metric, record.sample_size, floor
                    );
                    counts.suppressed += 1;
                    continue;
                }

                match self.stores.trends.upsert_trend(&record).await {
                    Ok(()) => counts.written += 1,
                    Err(e) => {
                        error!(
                            "Failed to write trend {} / {} / {}: {}",
                            category, record.subgroup, record.metric, e
                        );
                        counts.failed += 1;
                    }
                }
            }

            report.categories.insert(category, counts);
        }

        info!(
            "Aggregation for {} complete: {} trends written, {} suppressed, {} contributors",
            period,
            report.trends_written(),
            report.trends_suppressed(),
            report.distinct_contributors
        );

        Ok(report)
    }
}
