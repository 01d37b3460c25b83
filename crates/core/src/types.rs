use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// A raw input row before normalization: field name to JSON value.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// A normalized event. `seq` is the row's position in the input stream and
/// breaks timestamp ties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub user_id: String,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub group: Option<String>,
    pub seq: u64,
}

impl EventRecord {
    /// True if `self` wins over `other` as the earliest occurrence.
    pub fn precedes(&self, other: &EventRecord) -> bool {
        (self.timestamp, self.seq) < (other.timestamp, other.seq)
    }
}

/// The surviving record for one (user_id, event_type) pair.
pub type DedupedEvent = EventRecord;

/// Group to activity total. Ordered by group so iteration is deterministic.
pub type GroupTotals = BTreeMap<String, u64>;

/// What the group ranker counts per group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankBy {
    /// Total deduplicated events.
    #[default]
    Events,
    /// Distinct users with at least one deduplicated event.
    UniqueUsers,
}

/// An ordered list of distinct event types. Step indices are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunnelDefinition {
    name: String,
    steps: Vec<String>,
}

impl FunnelDefinition {
    pub fn new(
        name: impl Into<String>,
        steps: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self, ConfigurationError> {
        let steps: Vec<String> = steps.into_iter().map(Into::into).collect();
        if steps.len() < 2 {
            return Err(ConfigurationError::TooFewSteps(steps.len()));
        }

        let mut seen = HashSet::with_capacity(steps.len());
        for (i, step) in steps.iter().enumerate() {
            if step.trim().is_empty() {
                return Err(ConfigurationError::BlankStep(i + 1));
            }
            if !seen.insert(step.as_str()) {
                return Err(ConfigurationError::DuplicateStep(step.clone()));
            }
        }

        Ok(Self {
            name: name.into(),
            steps,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// 1-based position of `event_type` in the funnel.
    pub fn step_index(&self, event_type: &str) -> Option<usize> {
        self.steps
            .iter()
            .position(|s| s == event_type)
            .map(|i| i + 1)
    }
}

/// A group selected for analysis and the total it was ranked by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedGroup {
    pub group: String,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunnelCount {
    pub group: String,
    pub step_index: usize,
    pub event_type: String,
    pub user_count: u64,
}

/// Rates for one (group, step). `None` marks an undefined rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionRow {
    pub group: String,
    pub step_index: usize,
    pub step_conversion_rate: Option<f64>,
    pub cumulative_conversion_rate: Option<f64>,
    pub drop_off_rate: Option<f64>,
}
