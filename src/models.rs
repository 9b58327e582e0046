//! Data models for the aggregation pipeline.
//!
//! This module contains the generalized output types: pseudonyms,
//! contributions and their bucketed fields, and published trend records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Opaque salted hash standing in for a user identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pseudonym(String);

impl Pseudonym {
    pub fn new(token: String) -> Self {
        Self(token)
    }

    /// First 8 characters, for log lines.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(8);
        &self.0[..end]
    }
}

impl fmt::Display for Pseudonym {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Width of every numeric bucket.
pub const BUCKET_WIDTH: i64 = 10;

/// Decile bucket `[start, start + 9]`, serialized as `"40-49"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MarkerRange {
    start: i64,
}

impl MarkerRange {
    /// Largest bucket index whose range and midpoint still fit in `i64`.
    const MAX_BUCKET: i64 = i64::MAX / BUCKET_WIDTH - 1;

    /// Bucket a value. Returns `None` for NaN, infinities, and magnitudes
    /// too large to label.
    pub fn from_value(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        let bucket = (value / BUCKET_WIDTH as f64).floor();
        if bucket.abs() >= Self::MAX_BUCKET as f64 {
            return None;
        }
        let range = Self::from_start((bucket as i64).checked_mul(BUCKET_WIDTH)?)?;
        // Division can round across a bucket edge for values just below it.
        if range.contains(value) {
            Some(range)
        } else if value < range.start as f64 {
            Self::from_start(range.start.checked_sub(BUCKET_WIDTH)?)
        } else {
            Self::from_start(range.start.checked_add(BUCKET_WIDTH)?)
        }
    }

    /// A bucket starting at `start`, if it is aligned and in range.
    fn from_start(start: i64) -> Option<Self> {
        if start % BUCKET_WIDTH != 0 || (start / BUCKET_WIDTH).abs() > Self::MAX_BUCKET {
            return None;
        }
        Some(Self { start })
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    /// Inclusive label end.
    pub fn end(&self) -> i64 {
        self.start + BUCKET_WIDTH - 1
    }

    /// Point estimate used when averaging: `start + 5`.
    pub fn midpoint(&self) -> f64 {
        (self.start + BUCKET_WIDTH / 2) as f64
    }

    /// Whether `value` falls in this bucket (`start <= value < start + 10`).
    pub fn contains(&self, value: f64) -> bool {
        value >= self.start as f64 && value < (self.start + BUCKET_WIDTH) as f64
    }
}

impl fmt::Display for MarkerRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start(), self.end())
    }
}

impl From<MarkerRange> for String {
    fn from(range: MarkerRange) -> Self {
        range.to_string()
    }
}

impl TryFrom<String> for MarkerRange {
    type Error = String;

    fn try_from(label: String) -> Result<Self, Self::Error> {
        // The start may itself be negative ("-10--1").
        let split = label
            .char_indices()
            .skip(1)
            .find(|(_, c)| *c == '-')
            .map(|(i, _)| i)
            .ok_or_else(|| format!("invalid range label: {}", label))?;

        let start: i64 = label[..split]
            .parse()
            .map_err(|_| format!("invalid range start: {}", label))?;
        let end: i64 = label[split + 1..]
            .parse()
            .map_err(|_| format!("invalid range end: {}", label))?;

        let range = Self::from_start(start)
            .ok_or_else(|| format!("not a decile range: {}", label))?;
        if end != range.end() {
            return Err(format!("not a decile range: {}", label));
        }
        Ok(range)
    }
}

/// Age bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AgeBucket {
    #[serde(rename = "18_29")]
    Under30,
    #[serde(rename = "30_39")]
    Thirties,
    #[serde(rename = "40_plus")]
    FortyPlus,
}

impl AgeBucket {
    pub fn from_age(age: u32) -> Self {
        match age {
            0..=29 => AgeBucket::Under30,
            30..=39 => AgeBucket::Thirties,
            _ => AgeBucket::FortyPlus,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgeBucket::Under30 => "18_29",
            AgeBucket::Thirties => "30_39",
            AgeBucket::FortyPlus => "40_plus",
        }
    }
}

/// Self-reported experience level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperienceLevel {
    Beginner,
    Intermediate,
    Advanced,
}

impl ExperienceLevel {
    /// Parse a free-form level; anything outside the closed set is `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "beginner" => Some(ExperienceLevel::Beginner),
            "intermediate" => Some(ExperienceLevel::Intermediate),
            "advanced" => Some(ExperienceLevel::Advanced),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExperienceLevel::Beginner => "beginner",
            ExperienceLevel::Intermediate => "intermediate",
            ExperienceLevel::Advanced => "advanced",
        }
    }
}

/// Days since a protocol was created, bucketed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProtocolAgeBucket {
    #[serde(rename = "0_30")]
    Recent,
    #[serde(rename = "31_90")]
    Established,
    #[serde(rename = "91_plus")]
    LongRunning,
}

impl ProtocolAgeBucket {
    pub fn from_days(days: i64) -> Self {
        match days {
            i64::MIN..=30 => ProtocolAgeBucket::Recent,
            31..=90 => ProtocolAgeBucket::Established,
            _ => ProtocolAgeBucket::LongRunning,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolAgeBucket::Recent => "0_30",
            ProtocolAgeBucket::Established => "31_90",
            ProtocolAgeBucket::LongRunning => "91_plus",
        }
    }
}

/// Generalized profile fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileBucket {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_bucket: Option<AgeBucket>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experience: Option<ExperienceLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
}

impl ProfileBucket {
    pub fn is_empty(&self) -> bool {
        self.age_bucket.is_none() && self.experience.is_none() && self.goal.is_none()
    }
}

/// Generalized bloodwork snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Bloodwork {
    /// `YYYY-Qn` of the report date.
    pub quarter: String,
    pub markers: BTreeMap<String, MarkerRange>,
}

/// Generalized protocol age.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProtocolBucket {
    pub age_bucket: ProtocolAgeBucket,
}

/// One (compound, symptom) pair from a side-effect log.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SideEffectPair {
    pub compound: String,
    pub symptom: String,
}

/// Generalized counterfeit-check fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CounterfeitSummary {
    pub product_types: Vec<String>,
    pub flags: Vec<String>,
}

/// One user's generalized snapshot. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Contribution {
    pub pseudonym: Pseudonym,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<ProfileBucket>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bloodwork: Option<Bloodwork>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<ProtocolBucket>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub side_effects: Vec<SideEffectPair>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compound_interest: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterfeit: Option<CounterfeitSummary>,
    pub contributed_at: DateTime<Utc>,
}

impl Contribution {
    /// An empty contribution for `pseudonym`, stamped at `contributed_at`.
    pub fn new(pseudonym: Pseudonym, contributed_at: DateTime<Utc>) -> Self {
        Self {
            pseudonym,
            profile: None,
            bloodwork: None,
            protocol: None,
            side_effects: Vec::new(),
            compound_interest: Vec::new(),
            counterfeit: None,
            contributed_at,
        }
    }

    /// Whether no domain contributed any field.
    pub fn is_empty(&self) -> bool {
        self.profile.is_none()
            && self.bloodwork.is_none()
            && self.protocol.is_none()
            && self.side_effects.is_empty()
            && self.compound_interest.is_empty()
            && self.counterfeit.is_none()
    }
}

/// Published statistic category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendCategory {
    BloodworkByExperience,
    BloodworkByAge,
    BloodworkByGoal,
    ProtocolAge,
    CompoundInterest,
    SideEffects,
    CounterfeitProductType,
    CounterfeitFlags,
}

impl TrendCategory {
    pub const ALL: [TrendCategory; 8] = [
        TrendCategory::BloodworkByExperience,
        TrendCategory::BloodworkByAge,
        TrendCategory::BloodworkByGoal,
        TrendCategory::ProtocolAge,
        TrendCategory::CompoundInterest,
        TrendCategory::SideEffects,
        TrendCategory::CounterfeitProductType,
        TrendCategory::CounterfeitFlags,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TrendCategory::BloodworkByExperience => "bloodwork_by_experience",
            TrendCategory::BloodworkByAge => "bloodwork_by_age",
            TrendCategory::BloodworkByGoal => "bloodwork_by_goal",
            TrendCategory::ProtocolAge => "protocol_age",
            TrendCategory::CompoundInterest => "compound_interest",
            TrendCategory::SideEffects => "side_effects",
            TrendCategory::CounterfeitProductType => "counterfeit_product_type",
            TrendCategory::CounterfeitFlags => "counterfeit_flags",
        }
    }
}

impl fmt::Display for TrendCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unique key of a trend row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TrendKey {
    pub category: TrendCategory,
    pub subgroup: String,
    pub metric: String,
    pub period: String,
}

/// One published population statistic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendRecord {
    pub category: TrendCategory,
    pub subgroup: String,
    pub metric: String,
    pub value: Value,
    pub sample_size: usize,
    pub period: String,
}

impl TrendRecord {
    pub fn key(&self) -> TrendKey {
        TrendKey {
            category: self.category,
            subgroup: self.subgroup.clone(),
            metric: self.metric.clone(),
            period: self.period.clone(),
        }
    }
}
