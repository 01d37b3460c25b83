//! Funnel analysis — runs the normalize → dedup → rank → aggregate → rates
//! pipeline over one input stream.

use dashmap::DashMap;
use funnel_core::config::FunnelConfig;
use funnel_core::error::{FunnelError, FunnelResult, MalformedRecordError};
use funnel_core::types::{ConversionRow, FunnelCount, FunnelDefinition, RawRecord, RankedGroup};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::aggregator::FunnelAggregator;
use crate::conversion;
use crate::dedup::{dedup, dedup_parallel};
use crate::normalizer::Normalizer;
use crate::ranker::GroupRanker;

#[derive(Debug, Clone, Serialize)]
pub struct FunnelReport {
    pub funnel_name: String,
    pub top_groups: Vec<RankedGroup>,
    pub funnel_counts: Vec<FunnelCount>,
    pub conversion_rows: Vec<ConversionRow>,
    pub records_read: u64,
    /// Set when at least one input row was dropped. Carries the drop count.
    pub dropped: Option<MalformedRecordError>,
}

impl FunnelReport {
    pub fn records_dropped(&self) -> u64 {
        self.dropped.as_ref().map_or(0, |d| d.dropped)
    }

    pub fn drop_ratio(&self) -> f64 {
        if self.records_read == 0 {
            0.0
        } else {
            self.records_dropped() as f64 / self.records_read as f64
        }
    }

    /// Fail if more than `max_ratio` of the input rows were dropped.
    pub fn check_drop_ratio(&self, max_ratio: f64) -> Result<(), MalformedRecordError> {
        match &self.dropped {
            Some(err) if self.drop_ratio() > max_ratio => Err(err.clone()),
            _ => Ok(()),
        }
    }
}

/// Holds named funnel definitions and the run configuration shared by every
/// analysis. Each run is independent; nothing is carried between runs.
pub struct FunnelAnalyzer {
    config: FunnelConfig,
    ranker: GroupRanker,
    funnels: DashMap<String, FunnelDefinition>,
}

impl FunnelAnalyzer {
    /// Fails on an invalid `top_n_groups` or unknown-group label. Funnel
    /// steps are checked per definition.
    pub fn new(config: FunnelConfig) -> FunnelResult<Self> {
        let ranker = GroupRanker::from_config(&config)?;
        Ok(Self {
            config,
            ranker,
            funnels: DashMap::new(),
        })
    }

    pub fn config(&self) -> &FunnelConfig {
        &self.config
    }

    pub fn define_funnel(&self, funnel: FunnelDefinition) {
        self.funnels.insert(funnel.name().to_string(), funnel);
    }

    pub fn get_funnel(&self, name: &str) -> Option<FunnelDefinition> {
        self.funnels.get(name).map(|f| f.value().clone())
    }

    pub fn list_funnels(&self) -> Vec<FunnelDefinition> {
        let mut funnels: Vec<_> = self.funnels.iter().map(|f| f.value().clone()).collect();
        funnels.sort_by(|a, b| a.name().cmp(b.name()));
        funnels
    }

    /// Run a registered funnel over `rows`.
    pub fn analyze<I>(&self, name: &str, rows: I) -> FunnelResult<FunnelReport>
    where
        I: IntoIterator<Item = FunnelResult<RawRecord>>,
    {
        let definition = self
            .get_funnel(name)
            .ok_or_else(|| FunnelError::UnknownFunnel(name.to_string()))?;
        self.run(&definition, rows)
    }

    /// Run `definition` over rows that cannot fail to read.
    pub fn run_records<I>(&self, definition: &FunnelDefinition, rows: I) -> FunnelResult<FunnelReport>
    where
        I: IntoIterator<Item = RawRecord>,
    {
        self.run(definition, rows.into_iter().map(Ok))
    }

    pub fn run<I>(&self, definition: &FunnelDefinition, rows: I) -> FunnelResult<FunnelReport>
    where
        I: IntoIterator<Item = FunnelResult<RawRecord>>,
    {
        metrics::counter!("funnel.runs").increment(1);

        let mut normalizer = Normalizer::new(
            rows.into_iter(),
            self.config.fields.clone(),
            self.config.max_dropped_samples,
        );
        let deduped = if self.config.parallel {
            let records: Vec<_> = normalizer.by_ref().collect();
            dedup_parallel(records)
        } else {
            dedup(normalizer.by_ref())
        };
        let drops = normalizer.finish()?;

        metrics::counter!("funnel.records.read").increment(drops.read);
        if drops.dropped > 0 {
            metrics::counter!("funnel.records.dropped").increment(drops.dropped);
            warn!(
                funnel = %definition.name(),
                dropped = drops.dropped,
                read = drops.read,
                "Malformed records dropped during normalization"
            );
        }
        debug!(
            funnel = %definition.name(),
            accepted = drops.accepted(),
            deduped = deduped.len(),
            "Deduplicated events"
        );

        let totals = if self.config.parallel {
            self.ranker.totals_parallel(&deduped)
        } else {
            self.ranker.totals(&deduped)
        };
        let top_groups = self.ranker.select(&totals);
        debug!(
            funnel = %definition.name(),
            groups = totals.len(),
            selected = top_groups.len(),
            "Ranked groups"
        );

        let funnel_counts = FunnelAggregator::new(definition, self.ranker.unknown_label())
            .aggregate(&top_groups, &deduped);
        let conversion_rows = conversion::calculate(&funnel_counts);

        info!(
            funnel = %definition.name(),
            steps = definition.len(),
            groups = top_groups.len(),
            rows = funnel_counts.len(),
            "Funnel computed"
        );

        Ok(FunnelReport {
            funnel_name: definition.name().to_string(),
            top_groups,
            funnel_counts,
            conversion_rows,
            records_read: drops.read,
            dropped: drops.to_error(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use funnel_core::error::ConfigurationError;
    use serde_json::json;

    fn row(user: &str, event_type: &str, ts: &str, group: Option<&str>) -> RawRecord {
        let mut map = RawRecord::new();
        map.insert("user_id".into(), json!(user));
        map.insert("event_type".into(), json!(event_type));
        map.insert("timestamp".into(), json!(ts));
        map.insert("group".into(), json!(group));
        map
    }

    fn analyzer(top_n: i64) -> FunnelAnalyzer {
        FunnelAnalyzer::new(FunnelConfig {
            top_n_groups: top_n,
            ..FunnelConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_invalid_top_n_fails_before_processing() {
        let err = FunnelAnalyzer::new(FunnelConfig {
            top_n_groups: 0,
            ..FunnelConfig::default()
        })
        .err()
        .unwrap();
        assert!(matches!(
            err,
            FunnelError::Config(ConfigurationError::InvalidTopN(0))
        ));
    }

    #[test]
    fn test_registry() {
        let analyzer = analyzer(3);
        analyzer.define_funnel(FunnelDefinition::new("signup", ["visit", "signup"]).unwrap());
        analyzer.define_funnel(FunnelDefinition::new("checkout", ["cart", "purchase"]).unwrap());

        let names: Vec<_> = analyzer
            .list_funnels()
            .iter()
            .map(|f| f.name().to_string())
            .collect();
        assert_eq!(names, vec!["checkout", "signup"]);
        assert_eq!(analyzer.get_funnel("signup").unwrap().len(), 2);
        assert!(matches!(
            analyzer.analyze("missing", Vec::<FunnelResult<RawRecord>>::new()),
            Err(FunnelError::UnknownFunnel(_))
        ));
    }

    #[test]
    fn test_dropped_rows_are_reported() {
        let analyzer = analyzer(3);
        let def = FunnelDefinition::new("f", ["page_view", "purchase"]).unwrap();
        let mut bad = row("u2", "page_view", "2024-01-01T00:00:00Z", Some("US"));
        bad.remove("user_id");

        let report = analyzer
            .run_records(
                &def,
                vec![row("u1", "page_view", "2024-01-01T00:00:00Z", Some("US")), bad],
            )
            .unwrap();

        assert_eq!(report.records_read, 2);
        assert_eq!(report.records_dropped(), 1);
        assert_eq!(report.dropped.as_ref().unwrap().dropped, 1);
        assert_eq!(report.drop_ratio(), 0.5);
        assert_eq!(report.funnel_counts[0].user_count, 1);
        assert!(report.check_drop_ratio(0.25).is_err());
        assert!(report.check_drop_ratio(0.5).is_ok());
    }

    #[test]
    fn test_fatal_source_error_aborts_run() {
        let analyzer = analyzer(3);
        let def = FunnelDefinition::new("f", ["page_view", "purchase"]).unwrap();
        let rows = vec![Err(FunnelError::Io(std::io::Error::other("truncated")))];
        assert!(matches!(analyzer.run(&def, rows), Err(FunnelError::Io(_))));
    }

    #[test]
    fn test_report_serializes_null_rates() {
        let analyzer = analyzer(1);
        let def = FunnelDefinition::new("f", ["page_view", "purchase"]).unwrap();
        let report = analyzer
            .run_records(&def, vec![row("u1", "page_view", "2024-01-01T00:00:00Z", None)])
            .unwrap();

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["top_groups"][0]["group"], "UNKNOWN");
        assert_eq!(value["conversion_rows"][0]["step_conversion_rate"], json!(null));
        assert_eq!(value["conversion_rows"][1]["step_conversion_rate"], json!(0.0));
        assert_eq!(value["dropped"], json!(null));
        assert!(value.get("records_dropped").is_none());
        assert_eq!(report.records_dropped(), 0);
    }
}
