//! Distinct-user counts per (group, funnel step), dense over the selected
//! groups and every step.

use std::collections::{HashMap, HashSet};

use funnel_core::types::{DedupedEvent, FunnelCount, FunnelDefinition, RankedGroup};

pub struct FunnelAggregator<'a> {
    definition: &'a FunnelDefinition,
    unknown_label: &'a str,
}

impl<'a> FunnelAggregator<'a> {
    pub fn new(definition: &'a FunnelDefinition, unknown_label: &'a str) -> Self {
        Self {
            definition,
            unknown_label,
        }
    }

    /// One row per (group, step): groups in `top_groups` order, steps
    /// ascending. Events outside the funnel or the selected groups are
    /// ignored; cells with no events report zero.
    pub fn aggregate(&self, top_groups: &[RankedGroup], events: &[DedupedEvent]) -> Vec<FunnelCount> {
        let steps = self.definition.steps();
        let step_pos: HashMap<&str, usize> = steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.as_str(), i))
            .collect();
        let group_pos: HashMap<&str, usize> = top_groups
            .iter()
            .enumerate()
            .map(|(i, g)| (g.group.as_str(), i))
            .collect();

        let mut cells: Vec<HashSet<&str>> = vec![HashSet::new(); top_groups.len() * steps.len()];
        for event in events {
            let Some(&step) = step_pos.get(event.event_type.as_str()) else {
                continue;
            };
            let group = event.group.as_deref().unwrap_or(self.unknown_label);
            let Some(&g) = group_pos.get(group) else {
                continue;
            };
            cells[g * steps.len() + step].insert(event.user_id.as_str());
        }

        top_groups
            .iter()
            .enumerate()
            .flat_map(|(g, ranked)| {
                let cells = &cells;
                steps.iter().enumerate().map(move |(step, event_type)| FunnelCount {
                    group: ranked.group.clone(),
                    step_index: step + 1,
                    event_type: event_type.clone(),
                    user_count: cells[g * steps.len() + step].len() as u64,
                })
            })
            .collect()
    }
}
