//! Contribution builder.
//!
//! For every eligible identity: derive the pseudonym, skip it if it already
//! contributed inside the cadence window, fetch each raw-record domain
//! independently, generalize what was fetched, and persist one
//! contribution. Users are processed on a bounded pool; a failure for one
//! user or one domain never aborts the pass.

use crate::error::Result;
use crate::generalize::{self, GeneralizeOptions};
use crate::models::Contribution;
use crate::pseudonym::Pseudonymizer;
use crate::records::Domain;
use crate::store::{fetch_domain, EligibleIdentity, Stores};
use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Settings for one builder pass.
#[derive(Debug, Clone)]
pub struct BuilderOptions {
    pub as_of: DateTime<Utc>,
    pub cadence: Duration,
    pub fetch_limit: usize,
    pub concurrency: usize,
    pub generalize: GeneralizeOptions,
    pub show_progress: bool,
}

impl BuilderOptions {
    pub fn new(as_of: DateTime<Utc>) -> Self {
        Self {
            as_of,
            cadence: Duration::days(7),
            fetch_limit: 50,
            concurrency: 8,
            generalize: GeneralizeOptions::new(as_of),
            show_progress: false,
        }
    }

    /// Options derived from configuration.
    pub fn from_config(config: &crate::config::Config, as_of: DateTime<Utc>) -> Self {
        let mut options = Self::new(as_of);
        options.cadence = Duration::days(config.builder.cadence_days);
        options.fetch_limit = config.builder.fetch_limit;
        options.concurrency = config.general.concurrency;
        options.generalize.max_list_len = config.builder.max_list_len;
        options.generalize.max_text_len = config.builder.max_text_len;
        options
    }
}

/// Counts from one builder pass. Never contains identities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildReport {
    pub eligible: usize,
    pub written: usize,
    pub skipped_recent: usize,
    pub skipped_empty: usize,
    pub failed_users: usize,
    /// Failed fetches per domain.
    pub domain_failures: BTreeMap<Domain, usize>,
}

impl BuildReport {
    /// Whether any per-user or per-domain failure was logged.
    pub fn has_failures(&self) -> bool {
        self.failed_users > 0 || self.domain_failures.values().any(|n| *n > 0)
    }

    fn record(&mut self, outcome: UserOutcome) {
        let failed_domains = match outcome {
            UserOutcome::Written(failed) => {
                self.written += 1;
                failed
            }
            UserOutcome::SkippedRecent => {
                self.skipped_recent += 1;
                Vec::new()
            }
            UserOutcome::SkippedEmpty(failed) => {
                self.skipped_empty += 1;
                failed
            }
            UserOutcome::Failed(failed) => {
                self.failed_users += 1;
                failed
            }
        };

        for domain in failed_domains {
            *self.domain_failures.entry(domain).or_default() += 1;
        }
    }
}

/// What happened to one user. Carries the domains that failed to fetch.
#[derive(Debug)]
enum UserOutcome {
    Written(Vec<Domain>),
    SkippedRecent,
    SkippedEmpty(Vec<Domain>),
    Failed(Vec<Domain>),
}

/// Builds and persists contributions for all eligible users.
pub struct ContributionBuilder {
    stores: Stores,
    pseudonymizer: Arc<Pseudonymizer>,
    options: BuilderOptions,
}

impl ContributionBuilder {
    pub fn new(stores: Stores, pseudonymizer: Arc<Pseudonymizer>, options: BuilderOptions) -> Self {
        Self {
            stores,
            pseudonymizer,
            options,
        }
    }

    /// Run one pass over every eligible identity.
    ///
    /// Only an unreachable record store or consent registry is an error;
    /// everything else is counted in the report.
    pub async fn build_contributions(&self) -> Result<BuildReport> {
        self.stores.records.ping().await?;
        let eligible = self.stores.consent.list_eligible_identities().await?;

        info!(
            "Building contributions for {} eligible identities (as of {})",
            eligible.len(),
            self.options.as_of.format("%Y-%m-%d %H:%M:%S UTC")
        );

        let mut report = BuildReport {
            eligible: eligible.len(),
            ..Default::default()
        };

        let progress = self.progress_bar(eligible.len() as u64);

        let outcomes: Vec<UserOutcome> = stream::iter(eligible)
            .map(|identity| self.process_user(identity))
            .buffer_unordered(self.options.concurrency.max(1))
            .inspect(|_| progress.inc(1))
            .collect()
            .await;

        progress.finish_and_clear();

        for outcome in outcomes {
            report.record(outcome);
        }

        info!(
            "Builder pass complete: {} written, {} skipped (recent), {} skipped (empty), {} failed",
            report.written, report.skipped_recent, report.skipped_empty, report.failed_users
        );

        Ok(report)
    }

    async fn process_user(&self, eligible: EligibleIdentity) -> UserOutcome {
        let pseudonym = self.pseudonymizer.pseudonymize(&eligible.identity);
        let as_of = self.options.as_of;

        match self
            .stores
            .contributions
            .has_recent_contribution(&pseudonym, self.options.cadence, as_of)
            .await
        {
            Ok(true) => {
                debug!("{}: contributed within cadence window, skipping", pseudonym.short());
                return UserOutcome::SkippedRecent;
            }
            Ok(false) => {}
            Err(e) => {
                error!("{}: cadence check failed: {}", pseudonym.short(), e);
                return UserOutcome::Failed(Vec::new());
            }
        }

        let fetches = Domain::ALL.iter().map(|domain| {
            fetch_domain(
                self.stores.records.as_ref(),
                &eligible.identity,
                *domain,
                self.options.fetch_limit,
            )
        });
        let results = futures::future::join_all(fetches).await;

        let mut contribution = Contribution::new(pseudonym.clone(), as_of);
        let mut failed = Vec::new();

        for (domain, result) in Domain::ALL.iter().zip(results) {
            match result {
                Ok(records) => {
                    let records = records.since(eligible.consented_since);
                    if records.is_empty() {
                        debug!("{}: no {} records", pseudonym.short(), records.domain());
                        continue;
                    }
                    generalize::apply(&records, &self.options.generalize, &mut contribution);
                }
                Err(e) if e.is_fatal() => {
                    error!("{}: omitting {}: {}", pseudonym.short(), domain, e);
                    failed.push(*domain);
                }
                Err(e) => {
                    warn!("{}: omitting {}: {}", pseudonym.short(), domain, e);
                    failed.push(*domain);
                }
            }
        }

        if contribution.is_empty() {
            debug!("{}: nothing to contribute", pseudonym.short());
            return UserOutcome::SkippedEmpty(failed);
        }

        match self.stores.contributions.write_contribution(&contribution).await {
            Ok(()) => UserOutcome::Written(failed),
            Err(e) => {
                error!("{}: failed to write contribution: {}", pseudonym.short(), e);
                UserOutcome::Failed(failed)
            }
        }
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.options.show_progress {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new(len);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} users ({eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    }
}
