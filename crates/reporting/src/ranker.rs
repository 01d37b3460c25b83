//! Per-group activity totals and top-N group selection.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};

use funnel_core::config::{parse_top_n, FunnelConfig};
use funnel_core::error::ConfigurationError;
use funnel_core::types::{DedupedEvent, GroupTotals, RankBy, RankedGroup};
use rayon::prelude::*;

pub struct GroupRanker {
    top_n: usize,
    unknown_label: String,
    rank_by: RankBy,
}

impl GroupRanker {
    pub fn new(
        top_n: i64,
        unknown_label: impl Into<String>,
        rank_by: RankBy,
    ) -> Result<Self, ConfigurationError> {
        let top_n = parse_top_n(top_n)?;
        let unknown_label = unknown_label.into();
        if unknown_label.trim().is_empty() {
            return Err(ConfigurationError::BlankUnknownLabel);
        }
        Ok(Self {
            top_n,
            unknown_label,
            rank_by,
        })
    }

    pub fn from_config(config: &FunnelConfig) -> Result<Self, ConfigurationError> {
        Self::new(
            config.top_n_groups,
            config.unknown_group_label.clone(),
            config.rank_by,
        )
    }

    pub fn top_n(&self) -> usize {
        self.top_n
    }

    pub fn unknown_label(&self) -> &str {
        &self.unknown_label
    }

    /// The group an event is attributed to; a missing group maps to the
    /// unknown label.
    pub fn resolve_group<'a>(&'a self, event: &'a DedupedEvent) -> &'a str {
        event.group.as_deref().unwrap_or(&self.unknown_label)
    }

    pub fn totals(&self, events: &[DedupedEvent]) -> GroupTotals {
        match self.rank_by {
            RankBy::Events => {
                let mut totals = GroupTotals::new();
                for event in events {
                    *totals
                        .entry(self.resolve_group(event).to_string())
                        .or_default() += 1;
                }
                totals
            }
            RankBy::UniqueUsers => {
                let mut users: HashMap<&str, HashSet<&str>> = HashMap::new();
                for event in events {
                    users
                        .entry(self.resolve_group(event))
                        .or_default()
                        .insert(event.user_id.as_str());
                }
                users
                    .into_iter()
                    .map(|(group, users)| (group.to_string(), users.len() as u64))
                    .collect()
            }
        }
    }

    /// Parallel version of [`GroupRanker::totals`]; partial sums are merged
    /// by addition (or set union for unique users).
    pub fn totals_parallel(&self, events: &[DedupedEvent]) -> GroupTotals {
        match self.rank_by {
            RankBy::Events => events
                .par_iter()
                .fold(HashMap::new, |mut acc: HashMap<&str, u64>, event| {
                    *acc.entry(self.resolve_group(event)).or_default() += 1;
                    acc
                })
                .reduce(HashMap::new, |mut left, right| {
                    for (group, count) in right {
                        *left.entry(group).or_default() += count;
                    }
                    left
                })
                .into_iter()
                .map(|(group, count)| (group.to_string(), count))
                .collect(),
            RankBy::UniqueUsers => events
                .par_iter()
                .fold(
                    HashMap::new,
                    |mut acc: HashMap<&str, HashSet<&str>>, event| {
                        acc.entry(self.resolve_group(event))
                            .or_default()
                            .insert(event.user_id.as_str());
                        acc
                    },
                )
                .reduce(HashMap::new, |mut left, right| {
                    for (group, users) in right {
                        left.entry(group).or_default().extend(users);
                    }
                    left
                })
                .into_iter()
                .map(|(group, users)| (group.to_string(), users.len() as u64))
                .collect(),
        }
    }

    /// The `top_n` groups by total, highest first, ties by ascending group
    /// name. Keeps at most `top_n` candidates in a heap while scanning.
    pub fn select(&self, totals: &GroupTotals) -> Vec<RankedGroup> {
        let mut heap: BinaryHeap<Reverse<Ranked<'_>>> = BinaryHeap::with_capacity(self.top_n + 1);
        for (group, &total) in totals {
            let candidate = Ranked { total, group };
            if heap.len() < self.top_n {
                heap.push(Reverse(candidate));
            } else if heap
                .peek()
                .is_some_and(|Reverse(weakest)| candidate > *weakest)
            {
                heap.pop();
                heap.push(Reverse(candidate));
            }
        }

        heap.into_sorted_vec()
            .into_iter()
            .map(|Reverse(r)| RankedGroup {
                group: r.group.to_string(),
                total: r.total,
            })
            .collect()
    }

    pub fn rank(&self, events: &[DedupedEvent]) -> Vec<RankedGroup> {
        self.select(&self.totals(events))
    }
}

/// Ordering where "greater" means "ranks higher".
#[derive(Debug, PartialEq, Eq)]
struct Ranked<'a> {
    total: u64,
    group: &'a str,
}

impl Ord for Ranked<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.total
            .cmp(&other.total)
            .then_with(|| other.group.cmp(self.group))
    }
}

impl PartialOrd for Ranked<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use funnel_core::types::EventRecord;
    use proptest::prelude::*;

    fn event(user: &str, group: Option<&str>) -> DedupedEvent {
        EventRecord {
            user_id: user.into(),
            event_type: "page_view".into(),
            timestamp: Utc.timestamp_opt(0, 0).unwrap(),
            group: group.map(str::to_string),
            seq: 0,
        }
    }

    fn totals(pairs: &[(&str, u64)]) -> GroupTotals {
        pairs.iter().map(|(g, t)| (g.to_string(), *t)).collect()
    }

    fn names(groups: &[RankedGroup]) -> Vec<&str> {
        groups.iter().map(|g| g.group.as_str()).collect()
    }

    #[test]
    fn test_rejects_non_positive_top_n() {
        assert!(matches!(
            GroupRanker::new(0, "UNKNOWN", RankBy::Events),
            Err(ConfigurationError::InvalidTopN(0))
        ));
        assert!(matches!(
            GroupRanker::new(-1, "UNKNOWN", RankBy::Events),
            Err(ConfigurationError::InvalidTopN(-1))
        ));
        assert!(matches!(
            GroupRanker::new(3, "", RankBy::Events),
            Err(ConfigurationError::BlankUnknownLabel)
        ));
    }

    #[test]
    fn test_from_config_uses_config_top_n_rule() {
        let config = FunnelConfig {
            top_n_groups: 4,
            ..FunnelConfig::default()
        };
        let ranker = GroupRanker::from_config(&config).unwrap();
        assert_eq!(Ok(ranker.top_n()), config.top_n());

        let config = FunnelConfig {
            top_n_groups: -3,
            ..config
        };
        assert!(matches!(
            GroupRanker::from_config(&config),
            Err(ConfigurationError::InvalidTopN(-3))
        ));
    }

    #[test]
    fn test_select_orders_by_total_then_name() {
        let ranker = GroupRanker::new(3, "UNKNOWN", RankBy::Events).unwrap();
        let top = ranker.select(&totals(&[("US", 5), ("DE", 7), ("CA", 5), ("BR", 5), ("FR", 1)]));
        assert_eq!(names(&top), vec!["DE", "BR", "CA"]);
        assert_eq!(top[0].total, 7);
    }

    #[test]
    fn test_fewer_groups_than_n() {
        let ranker = GroupRanker::new(5, "UNKNOWN", RankBy::Events).unwrap();
        let top = ranker.select(&totals(&[("US", 2), ("CA", 3)]));
        assert_eq!(names(&top), vec!["CA", "US"]);
        assert!(ranker.select(&GroupTotals::new()).is_empty());
    }

    #[test]
    fn test_missing_group_counts_as_unknown() {
        let ranker = GroupRanker::new(3, "UNKNOWN", RankBy::Events).unwrap();
        let events = vec![event("u1", None), event("u2", None), event("u3", Some("US"))];
        let totals = ranker.totals(&events);
        assert_eq!(totals.get("UNKNOWN"), Some(&2));
        assert_eq!(names(&ranker.select(&totals)), vec!["UNKNOWN", "US"]);
    }

    #[test]
    fn test_unique_user_ranking() {
        let events = vec![
            event("u1", Some("US")),
            event("u1", Some("US")),
            event("u1", Some("US")),
            event("u2", Some("CA")),
            event("u3", Some("CA")),
        ];
        let by_events = GroupRanker::new(1, "UNKNOWN", RankBy::Events).unwrap();
        assert_eq!(names(&by_events.rank(&events)), vec!["US"]);

        let by_users = GroupRanker::new(1, "UNKNOWN", RankBy::UniqueUsers).unwrap();
        assert_eq!(names(&by_users.rank(&events)), vec!["CA"]);
        assert_eq!(by_users.totals(&events).get("US"), Some(&1));
    }

    #[test]
    fn test_parallel_totals_match() {
        let events: Vec<_> = (0..500)
            .map(|i| {
                let group = match i % 4 {
                    0 => None,
                    1 => Some("US"),
                    _ => Some("CA"),
                };
                event(&format!("u{}", i % 37), group)
            })
            .collect();
        for rank_by in [RankBy::Events, RankBy::UniqueUsers] {
            let ranker = GroupRanker::new(3, "UNKNOWN", rank_by).unwrap();
            assert_eq!(ranker.totals_parallel(&events), ranker.totals(&events));
        }
    }

    proptest! {
        #[test]
        fn prop_top_n_is_prefix_of_larger_selection(
            raw in prop::collection::btree_map("[a-z]{1,3}", 0..10u64, 0..30),
            n in 1..8i64,
        ) {
            let totals: GroupTotals = raw;
            let small = GroupRanker::new(n, "UNKNOWN", RankBy::Events).unwrap().select(&totals);
            let large = GroupRanker::new(n + 1, "UNKNOWN", RankBy::Events).unwrap().select(&totals);

            prop_assert_eq!(small.len(), totals.len().min(n as usize));
            prop_assert_eq!(&large[..small.len()], &small[..]);
        }

        #[test]
        fn prop_select_matches_full_sort(
            raw in prop::collection::btree_map("[a-z]{1,3}", 0..5u64, 0..40),
            n in 1..10i64,
        ) {
            let totals: GroupTotals = raw;
            let mut sorted: Vec<_> = totals.iter().collect();
            sorted.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
            sorted.truncate(n as usize);

            let top = GroupRanker::new(n, "UNKNOWN", RankBy::Events).unwrap().select(&totals);
            let expected: Vec<_> = sorted.into_iter().map(|(g, t)| (g.clone(), *t)).collect();
            let actual: Vec<_> = top.into_iter().map(|r| (r.group, r.total)).collect();
            prop_assert_eq!(actual, expected);
        }
    }
}
