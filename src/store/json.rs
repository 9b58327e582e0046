//! File-backed stores rooted at a data directory.
//!
//! Layout:
//! - `consent.json`: consent registry entries
//! - `records/<identity>.json`: one object per user, one key per domain
//! - `contributions.jsonl`: append-only contributions
//! - `trends.json`: published trend rows, replaced atomically on upsert

use crate::error::{PipelineError, Result};
use crate::models::{Contribution, Pseudonym, TrendKey, TrendRecord};
use crate::records::{
    CompoundInterestEvent, CounterfeitCheck, Domain, LabReport, Profile, ProtocolLog,
    SideEffectLog,
};
use crate::store::{
    ConsentRegistry, ContributionStore, EligibleIdentity, RecordStore, Stores, TrendStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

pub const CONSENT_FILE: &str = "consent.json";
pub const RECORDS_DIR: &str = "records";
pub const CONTRIBUTIONS_FILE: &str = "contributions.jsonl";
pub const TRENDS_FILE: &str = "trends.json";

/// Open every file-backed collaborator under `data_dir`.
pub async fn open_stores(data_dir: &Path) -> Result<Stores> {
    if !data_dir.is_dir() {
        return Err(PipelineError::StoreUnavailable {
            store: "data directory",
            reason: format!("{} is not a directory", data_dir.display()),
        });
    }

    Ok(Stores {
        consent: Arc::new(JsonConsentRegistry::new(data_dir.join(CONSENT_FILE))),
        records: Arc::new(JsonRecordStore::new(data_dir.join(RECORDS_DIR))),
        contributions: Arc::new(
            JsonContributionStore::open(data_dir.join(CONTRIBUTIONS_FILE)).await?,
        ),
        trends: Arc::new(JsonTrendStore::open(data_dir.join(TRENDS_FILE)).await?),
    })
}

/// One entry in `consent.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentEntry {
    pub identity: String,
    pub consented_since: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
}

/// Consent registry read from a JSON array.
pub struct JsonConsentRegistry {
    path: PathBuf,
}

impl JsonConsentRegistry {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl ConsentRegistry for JsonConsentRegistry {
    async fn list_eligible_identities(&self) -> Result<Vec<EligibleIdentity>> {
        let unavailable = |reason: String| PipelineError::StoreUnavailable {
            store: "consent registry",
            reason,
        };

        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| unavailable(format!("{}: {}", self.path.display(), e)))?;
        let entries: Vec<ConsentEntry> =
            serde_json::from_str(&content).map_err(|e| unavailable(e.to_string()))?;

        Ok(entries
            .into_iter()
            .filter(|e| e.revoked_at.is_none())
            .map(|e| EligibleIdentity {
                identity: e.identity,
                consented_since: e.consented_since,
            })
            .collect())
    }
}

/// Record store with one JSON document per identity.
pub struct JsonRecordStore {
    dir: PathBuf,
}

impl JsonRecordStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn record_path(&self, identity: &str, domain: Domain) -> Result<PathBuf> {
        let valid = !identity.is_empty()
            && !identity.starts_with('.')
            && identity
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'));
        if !valid {
            return Err(domain_error(domain, "identity is not a valid record key"));
        }
        Ok(self.dir.join(format!("{}.json", identity)))
    }

    /// Read and decode one domain. A missing file or key means no records.
    async fn load_domain<T: DeserializeOwned>(
        &self,
        identity: &str,
        domain: Domain,
    ) -> Result<Option<T>> {
        let path = self.record_path(identity, domain)?;

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(domain_error(domain, e)),
        };

        let mut doc: Map<String, Value> =
            serde_json::from_str(&content).map_err(|e| domain_error(domain, e))?;

        match doc.remove(domain.as_str()) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| domain_error(domain, e)),
        }
    }

    async fn load_list<T, K, F>(
        &self,
        identity: &str,
        domain: Domain,
        limit: usize,
        key: F,
    ) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
        K: Ord,
        F: Fn(&T) -> K,
    {
        let mut items: Vec<T> = self.load_domain(identity, domain).await?.unwrap_or_default();
        items.sort_by(|a, b| key(b).cmp(&key(a)));
        items.truncate(limit);
        Ok(items)
    }
}

fn domain_error(domain: Domain, reason: impl ToString) -> PipelineError {
    PipelineError::DomainFetch {
        domain: domain.as_str(),
        reason: reason.to_string(),
    }
}

#[async_trait]
impl RecordStore for JsonRecordStore {
    async fn ping(&self) -> Result<()> {
        match tokio::fs::metadata(&self.dir).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(PipelineError::StoreUnavailable {
                store: "record store",
                reason: format!("{} is not a directory", self.dir.display()),
            }),
            Err(e) => Err(PipelineError::StoreUnavailable {
                store: "record store",
                reason: format!("{}: {}", self.dir.display(), e),
            }),
        }
    }

    async fn get_profile(&self, identity: &str) -> Result<Option<Profile>> {
        self.load_domain(identity, Domain::Profile).await
    }

    async fn get_lab_reports(&self, identity: &str, limit: usize) -> Result<Vec<LabReport>> {
        self.load_list(identity, Domain::LabReports, limit, |r: &LabReport| r.date)
            .await
    }

    async fn get_protocol_logs(&self, identity: &str, limit: usize) -> Result<Vec<ProtocolLog>> {
        self.load_list(identity, Domain::ProtocolLogs, limit, |r: &ProtocolLog| {
            r.created_at
        })
        .await
    }

    async fn get_side_effect_logs(
        &self,
        identity: &str,
        limit: usize,
    ) -> Result<Vec<SideEffectLog>> {
        self.load_list(identity, Domain::SideEffectLogs, limit, |r: &SideEffectLog| {
            r.logged_at
        })
        .await
    }

    async fn get_compound_interest_events(
        &self,
        identity: &str,
        limit: usize,
    ) -> Result<Vec<CompoundInterestEvent>> {
        self.load_list(
            identity,
            Domain::CompoundInterest,
            limit,
            |r: &CompoundInterestEvent| r.occurred_at,
        )
        .await
    }

    async fn get_counterfeit_checks(
        &self,
        identity: &str,
        limit: usize,
    ) -> Result<Vec<CounterfeitCheck>> {
        self.load_list(
            identity,
            Domain::CounterfeitChecks,
            limit,
            |r: &CounterfeitCheck| r.checked_at,
        )
        .await
    }
}

/// Append-only JSON-lines contribution log, held in memory once opened.
///
/// `latest` maps each pseudonym to its newest `contributed_at` and answers
/// cadence checks without touching the log.
pub struct JsonContributionStore {
    path: PathBuf,
    contributions: Mutex<Vec<Contribution>>,
    latest: RwLock<HashMap<Pseudonym, DateTime<Utc>>>,
}

fn record_latest(latest: &mut HashMap<Pseudonym, DateTime<Utc>>, contribution: &Contribution) {
    latest
        .entry(contribution.pseudonym.clone())
        .and_modify(|at| *at = (*at).max(contribution.contributed_at))
        .or_insert(contribution.contributed_at);
}

impl JsonContributionStore {
    pub async fn open(path: PathBuf) -> Result<Self> {
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(PipelineError::StoreUnavailable {
                    store: "contribution store",
                    reason: format!("{}: {}", path.display(), e),
                })
            }
        };

        let mut contributions = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Contribution>(line) {
                Ok(c) => contributions.push(c),
                Err(e) => warn!(
                    "Skipping malformed contribution at {}:{}: {}",
                    path.display(),
                    lineno + 1,
                    e
                ),
            }
        }
        let mut latest = HashMap::new();
        for contribution in &contributions {
            record_latest(&mut latest, contribution);
        }
        debug!(
            "Loaded {} contributions from {} pseudonyms",
            contributions.len(),
            latest.len()
        );

        Ok(Self {
            path,
            contributions: Mutex::new(contributions),
            latest: RwLock::new(latest),
        })
    }
}

#[async_trait]
impl ContributionStore for JsonContributionStore {
    async fn has_recent_contribution(
        &self,
        pseudonym: &Pseudonym,
        within: Duration,
        as_of: DateTime<Utc>,
    ) -> Result<bool> {
        let latest = self.latest.read().await;
        Ok(latest
            .get(pseudonym)
            .is_some_and(|at| as_of - *at < within))
    }

    async fn write_contribution(&self, contribution: &Contribution) -> Result<()> {
        let mut line = serde_json::to_string(contribution)?;
        line.push('\n');

        let mut contributions = self.contributions.lock().await;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| PipelineError::Write(format!("{}: {}", self.path.display(), e)))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| PipelineError::Write(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| PipelineError::Write(e.to_string()))?;

        contributions.push(contribution.clone());
        record_latest(&mut *self.latest.write().await, contribution);
        Ok(())
    }

    async fn list_contributions(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Contribution>> {
        let contributions = self.contributions.lock().await;
        Ok(contributions
            .iter()
            .filter(|c| c.contributed_at > since && c.contributed_at <= until)
            .cloned()
            .collect())
    }
}

/// Trend table persisted as a sorted JSON array.
pub struct JsonTrendStore {
    path: PathBuf,
    rows: Mutex<BTreeMap<TrendKey, TrendRecord>>,
}

impl JsonTrendStore {
    pub async fn open(path: PathBuf) -> Result<Self> {
        let rows = match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let records: Vec<TrendRecord> = serde_json::from_str(&content).map_err(|e| {
                    PipelineError::StoreUnavailable {
                        store: "trend store",
                        reason: format!("{}: {}", path.display(), e),
                    }
                })?;
                records.into_iter().map(|r| (r.key(), r)).collect()
            }
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(PipelineError::StoreUnavailable {
                    store: "trend store",
                    reason: format!("{}: {}", path.display(), e),
                })
            }
        };

        Ok(Self {
            path,
            rows: Mutex::new(rows),
        })
    }

    fn persist(&self, rows: &BTreeMap<TrendKey, TrendRecord>) -> Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| PipelineError::Write(e.to_string()))?;

        let records: Vec<&TrendRecord> = rows.values().collect();
        serde_json::to_writer_pretty(&mut tmp, &records)?;

        tmp.persist(&self.path)
            .map_err(|e| PipelineError::Write(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl TrendStore for JsonTrendStore {
    async fn upsert_trend(&self, record: &TrendRecord) -> Result<()> {
        let mut rows = self.rows.lock().await;
        let key = record.key();
        let previous = rows.insert(key.clone(), record.clone());

        if let Err(e) = self.persist(&rows) {
            match previous {
                Some(prev) => rows.insert(key, prev),
                None => rows.remove(&key),
            };
            return Err(e);
        }
        Ok(())
    }
}
