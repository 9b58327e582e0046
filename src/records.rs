//! Raw per-domain records as read from the record store.
//!
//! These shapes are read-only to the pipeline. Each struct keeps any
//! upstream field it does not know about in `extra`, so schema drift is
//! visible to tests; generalizers never read from `extra`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Raw-record domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Profile,
    LabReports,
    ProtocolLogs,
    SideEffectLogs,
    CompoundInterest,
    CounterfeitChecks,
}

impl Domain {
    /// Every domain, in fetch order.
    pub const ALL: [Domain; 6] = [
        Domain::Profile,
        Domain::LabReports,
        Domain::ProtocolLogs,
        Domain::SideEffectLogs,
        Domain::CompoundInterest,
        Domain::CounterfeitChecks,
    ];

    /// Stable snake_case name, also used as the record-file key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Profile => "profile",
            Domain::LabReports => "lab_reports",
            Domain::ProtocolLogs => "protocol_logs",
            Domain::SideEffectLogs => "side_effect_logs",
            Domain::CompoundInterest => "compound_interest",
            Domain::CounterfeitChecks => "counterfeit_checks",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// User profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub experience_level: Option<String>,
    #[serde(default)]
    pub primary_goal: Option<String>,
    /// Upstream fields this pipeline does not model.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Lab-marker report: named markers with numeric values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabReport {
    pub markers: BTreeMap<String, f64>,
    pub date: NaiveDate,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Supplement / protocol log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolLog {
    #[serde(default)]
    pub items: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Side-effect log: compounds taken and symptoms observed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SideEffectLog {
    #[serde(default)]
    pub compounds: Vec<String>,
    #[serde(default)]
    pub symptoms: Vec<String>,
    pub logged_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A single "user looked into this compound" event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompoundInterestEvent {
    pub compound: String,
    pub occurred_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A counterfeit-product check with the red flags the user reported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterfeitCheck {
    pub product_type: String,
    #[serde(default)]
    pub flags: Vec<String>,
    pub checked_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Everything fetched from one domain for one user.
#[derive(Debug, Clone)]
pub enum DomainRecords {
    Profile(Option<Profile>),
    LabReports(Vec<LabReport>),
    ProtocolLogs(Vec<ProtocolLog>),
    SideEffectLogs(Vec<SideEffectLog>),
    CompoundInterest(Vec<CompoundInterestEvent>),
    CounterfeitChecks(Vec<CounterfeitCheck>),
}

impl DomainRecords {
    /// The domain these records came from.
    pub fn domain(&self) -> Domain {
        match self {
            DomainRecords::Profile(_) => Domain::Profile,
            DomainRecords::LabReports(_) => Domain::LabReports,
            DomainRecords::ProtocolLogs(_) => Domain::ProtocolLogs,
            DomainRecords::SideEffectLogs(_) => Domain::SideEffectLogs,
            DomainRecords::CompoundInterest(_) => Domain::CompoundInterest,
            DomainRecords::CounterfeitChecks(_) => Domain::CounterfeitChecks,
        }
    }

    /// Drop timestamped records that predate the user's consent.
    ///
    /// The profile is current state and is kept as-is.
    pub fn since(self, consented_since: DateTime<Utc>) -> Self {
        let since_date = consented_since.date_naive();
        match self {
            DomainRecords::Profile(p) => DomainRecords::Profile(p),
            DomainRecords::LabReports(mut v) => {
                v.retain(|r| r.date >= since_date);
                DomainRecords::LabReports(v)
            }
            DomainRecords::ProtocolLogs(mut v) => {
                v.retain(|r| r.created_at >= consented_since);
                DomainRecords::ProtocolLogs(v)
            }
            DomainRecords::SideEffectLogs(mut v) => {
                v.retain(|r| r.logged_at >= consented_since);
                DomainRecords::SideEffectLogs(v)
            }
            DomainRecords::CompoundInterest(mut v) => {
                v.retain(|r| r.occurred_at >= consented_since);
                DomainRecords::CompoundInterest(v)
            }
            DomainRecords::CounterfeitChecks(mut v) => {
                v.retain(|r| r.checked_at >= consented_since);
                DomainRecords::CounterfeitChecks(v)
            }
        }
    }

    /// Whether there is nothing to generalize.
    pub fn is_empty(&self) -> bool {
        match self {
            DomainRecords::Profile(p) => p.is_none(),
            DomainRecords::LabReports(v) => v.is_empty(),
            DomainRecords::ProtocolLogs(v) => v.is_empty(),
            DomainRecords::SideEffectLogs(v) => v.is_empty(),
            DomainRecords::CompoundInterest(v) => v.is_empty(),
            DomainRecords::CounterfeitChecks(v) => v.is_empty(),
        }
    }
}
