//! Subgroup keys and metrics for each trend category.
//!
//! Everything here is pure and iterates ordered maps only, so the same
//! snapshot always yields the same records in the same order.

use crate::models::{Contribution, ProfileBucket, Pseudonym, TrendCategory, TrendRecord};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};

pub const METRIC_PROTOCOL_COUNT: &str = "protocol_count";
pub const METRIC_EXPLORATION_COUNT: &str = "exploration_count";
pub const METRIC_CO_OCCURRENCE_COUNT: &str = "co_occurrence_count";
pub const METRIC_CHECK_COUNT: &str = "check_count";
pub const METRIC_FLAG_COUNT: &str = "flag_count";

/// Keep only the newest contribution of each pseudonym, ordered by pseudonym.
pub fn latest_per_pseudonym(contributions: Vec<Contribution>) -> Vec<Contribution> {
    let mut latest: BTreeMap<Pseudonym, Contribution> = BTreeMap::new();
    for contribution in contributions {
        match latest.get(&contribution.pseudonym) {
            Some(existing) if existing.contributed_at >= contribution.contributed_at => {}
            _ => {
                latest.insert(contribution.pseudonym.clone(), contribution);
            }
        }
    }
    latest.into_values().collect()
}

/// Candidate records for one category, before cohort floors.
///
/// `sample_size` is the number of distinct members behind each record.
pub fn compute_category(
    snapshot: &[Contribution],
    category: TrendCategory,
    top_flags: usize,
    period: &str,
) -> Vec<TrendRecord> {
    match category {
        TrendCategory::BloodworkByExperience => bloodwork_by(snapshot, category, period, |p| {
            p.experience.map(|e| e.as_str().to_string())
        }),
        TrendCategory::BloodworkByAge => bloodwork_by(snapshot, category, period, |p| {
            p.age_bucket.map(|a| a.as_str().to_string())
        }),
        TrendCategory::BloodworkByGoal => {
            bloodwork_by(snapshot, category, period, |p| p.goal.clone())
        }
        TrendCategory::ProtocolAge => {
            let counts = count_members(snapshot, |c| {
                c.protocol
                    .iter()
                    .map(|p| p.age_bucket.as_str().to_string())
                    .collect()
            });
            count_records(category, METRIC_PROTOCOL_COUNT, counts, period)
        }
        TrendCategory::CompoundInterest => {
            let counts = count_members(snapshot, |c| c.compound_interest.clone());
            count_records(category, METRIC_EXPLORATION_COUNT, counts, period)
        }
        TrendCategory::SideEffects => {
            let counts = count_members(snapshot, |c| {
                c.side_effects
                    .iter()
                    .map(|pair| format!("{}|{}", pair.compound, pair.symptom))
                    .collect()
            });
            count_records(category, METRIC_CO_OCCURRENCE_COUNT, counts, period)
        }
        TrendCategory::CounterfeitProductType => {
            let counts = count_members(snapshot, |c| {
                c.counterfeit
                    .as_ref()
                    .map(|s| s.product_types.clone())
                    .unwrap_or_default()
            });
            count_records(category, METRIC_CHECK_COUNT, counts, period)
        }
        TrendCategory::CounterfeitFlags => {
            let counts = count_members(snapshot, |c| {
                c.counterfeit
                    .as_ref()
                    .map(|s| s.flags.clone())
                    .unwrap_or_default()
            });
            count_records(category, METRIC_FLAG_COUNT, top_n(counts, top_flags), period)
        }
    }
}

/// Members per subgroup key. A member counts once per key however many
/// times the key appears in its contribution.
fn count_members<F>(snapshot: &[Contribution], keys: F) -> BTreeMap<String, usize>
where
    F: Fn(&Contribution) -> Vec<String>,
{
    let mut counts = BTreeMap::new();
    for contribution in snapshot {
        let distinct: BTreeSet<String> = keys(contribution).into_iter().collect();
        for key in distinct {
            *counts.entry(key).or_insert(0) += 1;
        }
    }
    counts
}

/// Highest counts first, ties by key; keep `n`.
fn top_n(counts: BTreeMap<String, usize>, n: usize) -> Vec<(String, usize)> {
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(n);
    ranked
}

fn count_records<I>(category: TrendCategory, metric: &str, counts: I, period: &str) -> Vec<TrendRecord>
where
    I: IntoIterator<Item = (String, usize)>,
{
    counts
        .into_iter()
        .map(|(subgroup, count)| TrendRecord {
            category,
            subgroup,
            metric: metric.to_string(),
            value: json!({ "count": count }),
            sample_size: count,
            period: period.to_string(),
        })
        .collect()
}

/// Per-marker average of range midpoints, one record per (subgroup, marker).
fn bloodwork_by<F>(
    snapshot: &[Contribution],
    category: TrendCategory,
    period: &str,
    subgroup_of: F,
) -> Vec<TrendRecord>
where
    F: Fn(&ProfileBucket) -> Option<String>,
{
    // subgroup -> marker -> (sum of midpoints, members)
    let mut groups: BTreeMap<String, BTreeMap<String, (f64, usize)>> = BTreeMap::new();

    for contribution in snapshot {
        let (Some(profile), Some(bloodwork)) = (&contribution.profile, &contribution.bloodwork)
        else {
            continue;
        };
        let Some(subgroup) = subgroup_of(profile) else {
            continue;
        };

        let markers = groups.entry(subgroup).or_default();
        for (marker, range) in &bloodwork.markers {
            let entry = markers.entry(marker.clone()).or_insert((0.0, 0));
            entry.0 += range.midpoint();
            entry.1 += 1;
        }
    }

    let mut records = Vec::new();
    for (subgroup, markers) in groups {
        for (marker, (sum, members)) in markers {
            records.push(TrendRecord {
                category,
                subgroup: subgroup.clone(),
                metric: marker,
                value: json!({ "mean_estimate": round2(sum / members as f64) }),
                sample_size: members,
                period: period.to_string(),
            });
        }
    }
    records
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AgeBucket, Bloodwork, CounterfeitSummary, ExperienceLevel, MarkerRange, SideEffectPair,
    };
    use chrono::{Duration, TimeZone, Utc};

    fn contribution(id: &str) -> Contribution {
        Contribution::new(
            Pseudonym::new(id.to_string()),
            Utc.with_ymd_and_hms(2026, 10, 10, 0, 0, 0).unwrap(),
        )
    }

    fn with_bloodwork(id: &str, level: ExperienceLevel, ldl: f64) -> Contribution {
        let mut c = contribution(id);
        c.profile = Some(ProfileBucket {
            age_bucket: Some(AgeBucket::Thirties),
            experience: Some(level),
            goal: None,
        });
        c.bloodwork = Some(Bloodwork {
            quarter: "2026-Q4".into(),
            markers: [("ldl".to_string(), MarkerRange::from_value(ldl).unwrap())]
                .into_iter()
                .collect(),
        });
        c
    }

    #[test]
    fn test_bloodwork_mean_uses_midpoints() {
        let snapshot = vec![
            with_bloodwork("a", ExperienceLevel::Beginner, 47.0),
            with_bloodwork("b", ExperienceLevel::Beginner, 53.0),
            with_bloodwork("c", ExperienceLevel::Advanced, 12.0),
        ];

        let records = compute_category(&snapshot, TrendCategory::BloodworkByExperience, 20, "2026-W41");
        assert_eq!(records.len(), 2);

        let beginner = records.iter().find(|r| r.subgroup == "beginner").unwrap();
        assert_eq!(beginner.metric, "ldl");
        assert_eq!(beginner.value, json!({ "mean_estimate": 50.0 }));
        assert_eq!(beginner.sample_size, 2);

        let advanced = records.iter().find(|r| r.subgroup == "advanced").unwrap();
        assert_eq!(advanced.value, json!({ "mean_estimate": 15.0 }));
    }

    #[test]
    fn test_mean_is_rounded() {
        let snapshot = vec![
            with_bloodwork("a", ExperienceLevel::Beginner, 0.0),
            with_bloodwork("b", ExperienceLevel::Beginner, 0.0),
            with_bloodwork("c", ExperienceLevel::Beginner, 10.0),
        ];
        let records = compute_category(&snapshot, TrendCategory::BloodworkByExperience, 20, "p");
        // (5 + 5 + 15) / 3
        assert_eq!(records[0].value, json!({ "mean_estimate": 8.33 }));
    }

    #[test]
    fn test_counts_distinct_members() {
        let mut a = contribution("a");
        a.compound_interest = vec!["Compound A".into(), "Compound B".into()];
        let mut b = contribution("b");
        b.compound_interest = vec!["Compound A".into()];

        let records = compute_category(&[a, b], TrendCategory::CompoundInterest, 20, "p");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].subgroup, "Compound A");
        assert_eq!(records[0].metric, METRIC_EXPLORATION_COUNT);
        assert_eq!(records[0].value, json!({ "count": 2 }));
        assert_eq!(records[0].sample_size, 2);
    }

    #[test]
    fn test_side_effect_pair_key() {
        let mut a = contribution("a");
        a.side_effects = vec![SideEffectPair {
            compound: "Compound A".into(),
            symptom: "headache".into(),
        }];
        let records = compute_category(&[a], TrendCategory::SideEffects, 20, "p");
        assert_eq!(records[0].subgroup, "Compound A|headache");
        assert_eq!(records[0].metric, METRIC_CO_OCCURRENCE_COUNT);
    }

    #[test]
    fn test_flag_ranking_and_cap() {
        let flags = |id: &str, flags: &[&str]| {
            let mut c = contribution(id);
            c.counterfeit = Some(CounterfeitSummary {
                product_types: vec!["vial".into()],
                flags: flags.iter().map(|f| f.to_string()).collect(),
            });
            c
        };
        let snapshot = vec![
            flags("a", &["bad_seal", "wrong_color"]),
            flags("b", &["bad_seal", "odd_label"]),
            flags("c", &["bad_seal", "wrong_color"]),
        ];

        let records = compute_category(&snapshot, TrendCategory::CounterfeitFlags, 2, "p");
        let ranked: Vec<(&str, usize)> = records
            .iter()
            .map(|r| (r.subgroup.as_str(), r.sample_size))
            .collect();
        assert_eq!(ranked, vec![("bad_seal", 3), ("wrong_color", 2)]);

        let types = compute_category(&snapshot, TrendCategory::CounterfeitProductType, 2, "p");
        assert_eq!(types[0].subgroup, "vial");
        assert_eq!(types[0].sample_size, 3);
    }

    #[test]
    fn test_latest_per_pseudonym() {
        let mut old = contribution("a");
        old.compound_interest = vec!["Old".into()];
        let mut new = contribution("a");
        new.contributed_at = old.contributed_at + Duration::days(7);
        new.compound_interest = vec!["New".into()];

        let latest = latest_per_pseudonym(vec![new.clone(), old, contribution("b")]);
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0], new);
    }

    #[test]
    fn test_records_are_deterministic() {
        let snapshot = vec![
            with_bloodwork("b", ExperienceLevel::Advanced, 88.0),
            with_bloodwork("a", ExperienceLevel::Beginner, 47.0),
        ];
        for category in TrendCategory::ALL {
            assert_eq!(
                compute_category(&snapshot, category, 20, "p"),
                compute_category(&snapshot, category, 20, "p")
            );
        }
    }
}
