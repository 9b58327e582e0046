//! In-memory stores for pipeline tests, with injectable failures.

use crate::error::{PipelineError, Result};
use crate::models::{Contribution, Pseudonym, TrendCategory, TrendKey, TrendRecord};
use crate::records::{
    CompoundInterestEvent, CounterfeitCheck, Domain, LabReport, Profile, ProtocolLog,
    SideEffectLog,
};
use crate::store::{
    ConsentRegistry, ContributionStore, EligibleIdentity, RecordStore, Stores, TrendStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Raw records for one identity.
#[derive(Debug, Clone, Default)]
pub struct UserRecords {
    pub profile: Option<Profile>,
    pub lab_reports: Vec<LabReport>,
    pub protocol_logs: Vec<ProtocolLog>,
    pub side_effect_logs: Vec<SideEffectLog>,
    pub compound_interest: Vec<CompoundInterestEvent>,
    pub counterfeit_checks: Vec<CounterfeitCheck>,
}

#[derive(Default)]
pub struct MemoryConsentRegistry {
    pub identities: Mutex<Vec<EligibleIdentity>>,
}

#[async_trait]
impl ConsentRegistry for MemoryConsentRegistry {
    async fn list_eligible_identities(&self) -> Result<Vec<EligibleIdentity>> {
        Ok(self.identities.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct MemoryRecordStore {
    pub users: Mutex<HashMap<String, UserRecords>>,
    /// (identity, domain) pairs whose fetch fails.
    pub failing: Mutex<HashSet<(String, Domain)>>,
    pub unreachable: Mutex<bool>,
}

impl MemoryRecordStore {
    fn check(&self, identity: &str, domain: Domain) -> Result<()> {
        if self
            .failing
            .lock()
            .unwrap()
            .contains(&(identity.to_string(), domain))
        {
            return Err(PipelineError::DomainFetch {
                domain: domain.as_str(),
                reason: "injected failure".into(),
            });
        }
        Ok(())
    }

    fn with_user<T>(&self, identity: &str, f: impl FnOnce(&UserRecords) -> T) -> Option<T> {
        self.users.lock().unwrap().get(identity).map(f)
    }
}

fn limited<T: Clone>(items: &[T], limit: usize) -> Vec<T> {
    items.iter().take(limit).cloned().collect()
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn ping(&self) -> Result<()> {
        if *self.unreachable.lock().unwrap() {
            return Err(PipelineError::StoreUnavailable {
                store: "record store",
                reason: "injected outage".into(),
            });
        }
        Ok(())
    }

    async fn get_profile(&self, identity: &str) -> Result<Option<Profile>> {
        self.check(identity, Domain::Profile)?;
        Ok(self.with_user(identity, |u| u.profile.clone()).flatten())
    }

    async fn get_lab_reports(&self, identity: &str, limit: usize) -> Result<Vec<LabReport>> {
        self.check(identity, Domain::LabReports)?;
        Ok(self
            .with_user(identity, |u| limited(&u.lab_reports, limit))
            .unwrap_or_default())
    }

    async fn get_protocol_logs(&self, identity: &str, limit: usize) -> Result<Vec<ProtocolLog>> {
        self.check(identity, Domain::ProtocolLogs)?;
        Ok(self
            .with_user(identity, |u| limited(&u.protocol_logs, limit))
            .unwrap_or_default())
    }

    async fn get_side_effect_logs(
        &self,
        identity: &str,
        limit: usize,
    ) -> Result<Vec<SideEffectLog>> {
        self.check(identity, Domain::SideEffectLogs)?;
        Ok(self
            .with_user(identity, |u| limited(&u.side_effect_logs, limit))
            .unwrap_or_default())
    }

    async fn get_compound_interest_events(
        &self,
        identity: &str,
        limit: usize,
    ) -> Result<Vec<CompoundInterestEvent>> {
        self.check(identity, Domain::CompoundInterest)?;
        Ok(self
            .with_user(identity, |u| limited(&u.compound_interest, limit))
            .unwrap_or_default())
    }

    async fn get_counterfeit_checks(
        &self,
        identity: &str,
        limit: usize,
    ) -> Result<Vec<CounterfeitCheck>> {
        self.check(identity, Domain::CounterfeitChecks)?;
        Ok(self
            .with_user(identity, |u| limited(&u.counterfeit_checks, limit))
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct MemoryContributionStore {
    pub contributions: Mutex<Vec<Contribution>>,
}

#[async_trait]
impl ContributionStore for MemoryContributionStore {
    async fn has_recent_contribution(
        &self,
        pseudonym: &Pseudonym,
        within: Duration,
        as_of: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self
            .contributions
            .lock()
            .unwrap()
            .iter()
            .any(|c| &c.pseudonym == pseudonym && as_of - c.contributed_at < within))
    }

    async fn write_contribution(&self, contribution: &Contribution) -> Result<()> {
        self.contributions.lock().unwrap().push(contribution.clone());
        Ok(())
    }

    async fn list_contributions(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Contribution>> {
        Ok(self
            .contributions
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.contributed_at > since && c.contributed_at <= until)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryTrendStore {
    pub rows: Mutex<BTreeMap<TrendKey, TrendRecord>>,
    /// Total upsert calls, including replacements.
    pub upserts: Mutex<usize>,
    /// Upserts for this category fail.
    pub failing_category: Mutex<Option<TrendCategory>>,
}

#[async_trait]
impl TrendStore for MemoryTrendStore {
    async fn upsert_trend(&self, record: &TrendRecord) -> Result<()> {
        if *self.failing_category.lock().unwrap() == Some(record.category) {
            return Err(PipelineError::Write("injected trend write failure".into()));
        }
        self.rows.lock().unwrap().insert(record.key(), record.clone());
        *self.upserts.lock().unwrap() += 1;
        Ok(())
    }
}

/// Concrete handles alongside the trait-object bundle.
pub struct MemoryStores {
    pub consent: Arc<MemoryConsentRegistry>,
    pub records: Arc<MemoryRecordStore>,
    pub contributions: Arc<MemoryContributionStore>,
    pub trends: Arc<MemoryTrendStore>,
}

impl MemoryStores {
    pub fn new() -> Self {
        Self {
            consent: Arc::new(MemoryConsentRegistry::default()),
            records: Arc::new(MemoryRecordStore::default()),
            contributions: Arc::new(MemoryContributionStore::default()),
            trends: Arc::new(MemoryTrendStore::default()),
        }
    }

    pub fn stores(&self) -> Stores {
        Stores {
            consent: self.consent.clone(),
            records: self.records.clone(),
            contributions: self.contributions.clone(),
            trends: self.trends.clone(),
        }
    }

    /// Register an eligible identity and its records.
    pub fn add_user(&self, identity: &str, consented_since: DateTime<Utc>, records: UserRecords) {
        self.consent.identities.lock().unwrap().push(EligibleIdentity {
            identity: identity.to_string(),
            consented_since,
        });
        self.records
            .users
            .lock()
            .unwrap()
            .insert(identity.to_string(), records);
    }

    pub fn fail_domain(&self, identity: &str, domain: Domain) {
        self.records
            .failing
            .lock()
            .unwrap()
            .insert((identity.to_string(), domain));
    }
}
