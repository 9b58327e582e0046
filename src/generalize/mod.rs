//! Per-domain generalizers.
//!
//! Each generalizer projects a raw record onto an explicit output schema:
//! only the fields named here ever reach a [`Contribution`]. Numeric values
//! become decile ranges, dates become quarters or age buckets, free text is
//! normalized and truncated, and vocabulary lists are capped.

pub mod text;

use crate::models::{
    AgeBucket, Bloodwork, Contribution, CounterfeitSummary, ExperienceLevel, MarkerRange,
    ProfileBucket, ProtocolAgeBucket, ProtocolBucket, SideEffectPair,
};
use crate::records::{
    CompoundInterestEvent, CounterfeitCheck, DomainRecords, LabReport, Profile, ProtocolLog,
    SideEffectLog,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};

pub use text::{capped_vocabulary, normalize_text, quarter_of};

/// Limits applied while generalizing.
#[derive(Debug, Clone, Copy)]
pub struct GeneralizeOptions {
    /// Reference time for relative ages.
    pub as_of: DateTime<Utc>,
    /// Maximum members of any list field.
    pub max_list_len: usize,
    /// Maximum characters of any normalized free-text value.
    pub max_text_len: usize,
}

impl GeneralizeOptions {
    pub fn new(as_of: DateTime<Utc>) -> Self {
        Self {
            as_of,
            max_list_len: 30,
            max_text_len: 80,
        }
    }
}

/// Generalize one domain's records into `contribution`.
pub fn apply(records: &DomainRecords, opts: &GeneralizeOptions, contribution: &mut Contribution) {
    match records {
        DomainRecords::Profile(profile) => {
            contribution.profile = profile.as_ref().and_then(|p| generalize_profile(p, opts));
        }
        DomainRecords::LabReports(reports) => {
            contribution.bloodwork = generalize_lab_reports(reports, opts);
        }
        DomainRecords::ProtocolLogs(logs) => {
            contribution.protocol = generalize_protocol_logs(logs, opts);
        }
        DomainRecords::SideEffectLogs(logs) => {
            contribution.side_effects = generalize_side_effects(logs, opts);
        }
        DomainRecords::CompoundInterest(events) => {
            contribution.compound_interest = generalize_compound_interest(events, opts);
        }
        DomainRecords::CounterfeitChecks(checks) => {
            contribution.counterfeit = generalize_counterfeit_checks(checks, opts);
        }
    }
}

/// Age bucket, closed-set experience level and normalized goal.
pub fn generalize_profile(profile: &Profile, opts: &GeneralizeOptions) -> Option<ProfileBucket> {
    let bucket = ProfileBucket {
        age_bucket: profile.age.map(AgeBucket::from_age),
        experience: profile
            .experience_level
            .as_deref()
            .and_then(ExperienceLevel::parse),
        goal: profile
            .primary_goal
            .as_deref()
            .and_then(|g| normalize_text(g, opts.max_text_len)),
    };

    if bucket.is_empty() {
        None
    } else {
        Some(bucket)
    }
}

/// Most recent report only: its quarter and each marker's decile range.
pub fn generalize_lab_reports(reports: &[LabReport], opts: &GeneralizeOptions) -> Option<Bloodwork> {
    let latest = reports.iter().max_by_key(|r| r.date)?;

    let markers: BTreeMap<String, MarkerRange> = latest
        .markers
        .iter()
        .filter_map(|(name, value)| {
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            MarkerRange::from_value(*value).map(|range| (name.to_string(), range))
        })
        .take(opts.max_list_len)
        .collect();

    if markers.is_empty() {
        return None;
    }

    Some(Bloodwork {
        quarter: quarter_of(latest.date),
        markers,
    })
}

/// Age bucket of the most recently created protocol.
pub fn generalize_protocol_logs(
    logs: &[ProtocolLog],
    opts: &GeneralizeOptions,
) -> Option<ProtocolBucket> {
    let latest = logs.iter().max_by_key(|l| l.created_at)?;
    let days = (opts.as_of - latest.created_at).num_days();

    Some(ProtocolBucket {
        age_bucket: ProtocolAgeBucket::from_days(days),
    })
}

/// Distinct (compound, symptom) pairs, newest logs first, capped.
pub fn generalize_side_effects(
    logs: &[SideEffectLog],
    opts: &GeneralizeOptions,
) -> Vec<SideEffectPair> {
    let mut ordered: Vec<&SideEffectLog> = logs.iter().collect();
    ordered.sort_by(|a, b| b.logged_at.cmp(&a.logged_at));

    let mut seen = HashSet::new();
    let mut pairs = Vec::new();

    'logs: for log in ordered {
        let compounds = capped_vocabulary(&log.compounds, opts.max_list_len);
        let symptoms = capped_vocabulary(&log.symptoms, opts.max_list_len);

        for compound in &compounds {
            for symptom in &symptoms {
                if pairs.len() >= opts.max_list_len {
                    break 'logs;
                }
                let pair = SideEffectPair {
                    compound: compound.clone(),
                    symptom: symptom.clone(),
                };
                if seen.insert(pair.clone()) {
                    pairs.push(pair);
                }
            }
        }
    }

    pairs.sort();
    pairs
}

/// Distinct compound names, newest events first, capped.
pub fn generalize_compound_interest(
    events: &[CompoundInterestEvent],
    opts: &GeneralizeOptions,
) -> Vec<String> {
    let mut ordered: Vec<&CompoundInterestEvent> = events.iter().collect();
    ordered.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));

    let mut names = capped_vocabulary(ordered.iter().map(|e| &e.compound), opts.max_list_len);
    names.sort();
    names
}

/// Normalized product types and flag strings, newest checks first, capped.
pub fn generalize_counterfeit_checks(
    checks: &[CounterfeitCheck],
    opts: &GeneralizeOptions,
) -> Option<CounterfeitSummary> {
    let mut ordered: Vec<&CounterfeitCheck> = checks.iter().collect();
    ordered.sort_by(|a, b| b.checked_at.cmp(&a.checked_at));

    let product_types = capped_vocabulary(
        ordered
            .iter()
            .filter_map(|c| normalize_text(&c.product_type, opts.max_text_len)),
        opts.max_list_len,
    );
    let flags = capped_vocabulary(
        ordered
            .iter()
            .flat_map(|c| c.flags.iter())
            .filter_map(|f| normalize_text(f, opts.max_text_len)),
        opts.max_list_len,
    );

    if product_types.is_empty() && flags.is_empty() {
        return None;
    }

    let mut summary = CounterfeitSummary {
        product_types,
        flags,
    };
    summary.product_types.sort();
    summary.flags.sort();
    Some(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Pseudonym;
    use chrono::{Duration, NaiveDate, TimeZone};
    use serde_json::Value;

    fn as_of() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 12, 0, 0, 0).unwrap()
    }

    fn opts() -> GeneralizeOptions {
        GeneralizeOptions::new(as_of())
    }

    fn extra(pairs: &[(&str, &str)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(*v)))
            .collect()
    }

    #[test]
    fn test_profile_generalization() {
        let profile = Profile {
            age: Some(41),
            experience_level: Some("Intermediate".into()),
            primary_goal: Some("  Build   Muscle ".into()),
            extra: BTreeMap::new(),
        };
        let bucket = generalize_profile(&profile, &opts()).unwrap();
        assert_eq!(bucket.age_bucket, Some(AgeBucket::FortyPlus));
        assert_eq!(bucket.experience, Some(ExperienceLevel::Intermediate));
        assert_eq!(bucket.goal.as_deref(), Some("build_muscle"));
    }

    #[test]
    fn test_empty_profile_yields_nothing() {
        let profile = Profile {
            experience_level: Some("wizard".into()),
            ..Default::default()
        };
        assert!(generalize_profile(&profile, &opts()).is_none());
    }

    #[test]
    fn test_unseen_upstream_fields_never_emitted() {
        let at = as_of();
        let mut contribution = Contribution::new(Pseudonym::new("p".repeat(64)), at);

        let profile = Profile {
            age: Some(33),
            experience_level: Some("beginner".into()),
            primary_goal: Some("longevity".into()),
            extra: extra(&[
                ("email", "someone@example.com"),
                ("full_name", "Jane Q Public"),
                ("new_upstream_field", "zip 90210"),
            ]),
        };
        let report = LabReport {
            markers: [("testosterone".to_string(), 612.0)].into_iter().collect(),
            date: NaiveDate::from_ymd_opt(2026, 8, 3).unwrap(),
            extra: extra(&[("lab_name", "Downtown Clinic"), ("patient_id", "MRN-991")]),
        };
        let check = CounterfeitCheck {
            product_type: "Injectable".into(),
            flags: vec!["Bad seal".into()],
            checked_at: at - Duration::days(2),
            extra: extra(&[("seller_address", "12 Main St")]),
        };

        apply(&DomainRecords::Profile(Some(profile)), &opts(), &mut contribution);
        apply(&DomainRecords::LabReports(vec![report]), &opts(), &mut contribution);
        apply(&DomainRecords::CounterfeitChecks(vec![check]), &opts(), &mut contribution);

        let json = serde_json::to_string(&contribution).unwrap();
        for leaked in [
            "email",
            "someone@example.com",
            "full_name",
            "Jane",
            "new_upstream_field",
            "90210",
            "lab_name",
            "Downtown",
            "patient_id",
            "MRN-991",
            "seller_address",
            "Main St",
            "2026-08-03",
        ] {
            assert!(!json.contains(leaked), "leaked {leaked}: {json}");
        }
        assert!(json.contains("2026-Q3"));
        assert!(json.contains("610-619"));
    }

    #[test]
    fn test_lab_reports_use_latest_report() {
        let older = LabReport {
            markers: [("ldl".to_string(), 160.0)].into_iter().collect(),
            date: NaiveDate::from_ymd_opt(2026, 1, 10).unwrap(),
            extra: BTreeMap::new(),
        };
        let newer = LabReport {
            markers: [("ldl".to_string(), 47.0), ("hdl".to_string(), f64::NAN)]
                .into_iter()
                .collect(),
            date: NaiveDate::from_ymd_opt(2026, 5, 2).unwrap(),
            extra: BTreeMap::new(),
        };

        let bw = generalize_lab_reports(&[older, newer], &opts()).unwrap();
        assert_eq!(bw.quarter, "2026-Q2");
        assert_eq!(bw.markers.len(), 1);
        assert_eq!(bw.markers["ldl"].to_string(), "40-49");
    }

    #[test]
    fn test_protocol_age_relative_to_as_of() {
        let log = |days: i64| ProtocolLog {
            items: vec!["creatine".into()],
            created_at: as_of() - Duration::days(days),
            extra: BTreeMap::new(),
        };

        let bucket = generalize_protocol_logs(&[log(200), log(45)], &opts()).unwrap();
        assert_eq!(bucket.age_bucket, ProtocolAgeBucket::Established);
        assert!(generalize_protocol_logs(&[], &opts()).is_none());
    }

    #[test]
    fn test_side_effect_pairs_capped_and_distinct() {
        let log = SideEffectLog {
            compounds: (0..10).map(|i| format!("c{i}")).collect(),
            symptoms: (0..10).map(|i| format!("s{i}")).collect(),
            logged_at: as_of(),
            extra: BTreeMap::new(),
        };
        let pairs = generalize_side_effects(&[log.clone(), log], &opts());
        assert_eq!(pairs.len(), 30);

        let distinct: HashSet<_> = pairs.iter().collect();
        assert_eq!(distinct.len(), pairs.len());
    }

    #[test]
    fn test_compound_names_verbatim_and_capped() {
        let events: Vec<_> = (0..40)
            .map(|i| CompoundInterestEvent {
                compound: format!("Compound {i}"),
                occurred_at: as_of() - Duration::hours(i),
                extra: BTreeMap::new(),
            })
            .collect();

        let names = generalize_compound_interest(&events, &opts());
        assert_eq!(names.len(), 30);
        assert!(names.contains(&"Compound 0".to_string()));
        // Newest 30 are kept.
        assert!(!names.contains(&"Compound 39".to_string()));
    }

    #[test]
    fn test_counterfeit_flags_normalized_and_truncated() {
        let check = CounterfeitCheck {
            product_type: "Oral  Tablet".into(),
            flags: vec![
                "Misspelled LABEL".into(),
                "misspelled label".into(),
                "x ".repeat(100),
            ],
            checked_at: as_of(),
            extra: BTreeMap::new(),
        };

        let summary = generalize_counterfeit_checks(&[check], &opts()).unwrap();
        assert_eq!(summary.product_types, vec!["oral_tablet"]);
        assert_eq!(summary.flags.len(), 2);
        assert!(summary.flags.contains(&"misspelled_label".to_string()));
        assert!(summary.flags.iter().all(|f| f.chars().count() <= 80));
    }
}
