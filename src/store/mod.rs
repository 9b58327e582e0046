//! Collaborator interfaces consumed by the pipeline.
//!
//! The consent registry and record store are read-only; contributions and
//! trends are written here. All implementations are shared as `Arc<dyn _>`
//! across the builder's worker pool.

pub mod json;
#[cfg(test)]
pub mod memory;

use crate::error::Result;
use crate::models::{Contribution, Pseudonym, TrendRecord};
use crate::records::{
    CompoundInterestEvent, CounterfeitCheck, Domain, DomainRecords, LabReport, Profile,
    ProtocolLog, SideEffectLog,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// An identity with active consent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibleIdentity {
    pub identity: String,
    pub consented_since: DateTime<Utc>,
}

/// Which identities may contribute.
#[async_trait]
pub trait ConsentRegistry: Send + Sync {
    /// Identities with active, non-revoked consent.
    async fn list_eligible_identities(&self) -> Result<Vec<EligibleIdentity>>;
}

/// Per-domain raw records. Every accessor may fail on its own.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Connectivity check run once before a builder pass.
    async fn ping(&self) -> Result<()>;

    async fn get_profile(&self, identity: &str) -> Result<Option<Profile>>;

    async fn get_lab_reports(&self, identity: &str, limit: usize) -> Result<Vec<LabReport>>;

    async fn get_protocol_logs(&self, identity: &str, limit: usize) -> Result<Vec<ProtocolLog>>;

    async fn get_side_effect_logs(&self, identity: &str, limit: usize)
        -> Result<Vec<SideEffectLog>>;

    async fn get_compound_interest_events(
        &self,
        identity: &str,
        limit: usize,
    ) -> Result<Vec<CompoundInterestEvent>>;

    async fn get_counterfeit_checks(
        &self,
        identity: &str,
        limit: usize,
    ) -> Result<Vec<CounterfeitCheck>>;
}

/// Fetch a single domain through the matching accessor.
pub async fn fetch_domain(
    store: &dyn RecordStore,
    identity: &str,
    domain: Domain,
    limit: usize,
) -> Result<DomainRecords> {
    Ok(match domain {
        Domain::Profile => DomainRecords::Profile(store.get_profile(identity).await?),
        Domain::LabReports => {
            DomainRecords::LabReports(store.get_lab_reports(identity, limit).await?)
        }
        Domain::ProtocolLogs => {
            DomainRecords::ProtocolLogs(store.get_protocol_logs(identity, limit).await?)
        }
        Domain::SideEffectLogs => {
            DomainRecords::SideEffectLogs(store.get_side_effect_logs(identity, limit).await?)
        }
        Domain::CompoundInterest => DomainRecords::CompoundInterest(
            store.get_compound_interest_events(identity, limit).await?,
        ),
        Domain::CounterfeitChecks => {
            DomainRecords::CounterfeitChecks(store.get_counterfeit_checks(identity, limit).await?)
        }
    })
}

/// Durable generalized contributions.
#[async_trait]
pub trait ContributionStore: Send + Sync {
    /// Whether `pseudonym` contributed less than `within` before `as_of`.
    async fn has_recent_contribution(
        &self,
        pseudonym: &Pseudonym,
        within: Duration,
        as_of: DateTime<Utc>,
    ) -> Result<bool>;

    async fn write_contribution(&self, contribution: &Contribution) -> Result<()>;

    /// Snapshot of contributions with `since < contributed_at <= until`.
    async fn list_contributions(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Contribution>>;
}

/// Published statistics, unique on (category, subgroup, metric, period).
#[async_trait]
pub trait TrendStore: Send + Sync {
    /// Insert, or replace value and sample size of the existing row.
    async fn upsert_trend(&self, record: &TrendRecord) -> Result<()>;
}

/// The full set of collaborators for one run.
#[derive(Clone)]
pub struct Stores {
    pub consent: Arc<dyn ConsentRegistry>,
    pub records: Arc<dyn RecordStore>,
    pub contributions: Arc<dyn ContributionStore>,
    pub trends: Arc<dyn TrendStore>,
}
