//! Research loop orchestrator.
//!
//! One iteration: pick a scenario (top-ranked proposal from the previous
//! iteration, or the baseline), run every campaign, persist the artifact and
//! index row, compare against recent prior runs, fold comparison insights
//! into memory, and emit the next batch of ranked proposals. Failures inside
//! an iteration are reported in the summary, never raised out of it.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;

use crate::config::LabConfig;
use crate::data::MarketDataSource;
use crate::evaluator::{
    analyze_parameter_sensitivity, compare_scenarios, extract_failure_modes, quality_score,
    ScenarioComparison, DEFAULT_FAILURE_RETURN,
};
use crate::logging::{json_log, obj, ts_epoch, v_int, v_num, v_str, Domain};
use crate::memory::{InsightClassifier, StrategyMemory};
use crate::proposal::{CoverageView, ExperimentProposal, ProposalAgent, ScenarioSpec};
use crate::regime::classify_scenario;
use crate::scenario::{ScenarioDefinition, ScenarioGenerator, TradingParams};
use crate::simulator::{CampaignResult, Simulator};
use crate::storage::{RunIndex, RunRecord, ScenarioResultsFile};

/// Converts a ranked proposal into a runnable scenario. Returning `None`
/// means no conversion exists for that proposal shape; the loop then falls
/// back to the baseline and says so in the log, it never masks the gap.
pub trait ProposalPlanner {
    fn to_scenario(&self, proposal: &ExperimentProposal) -> Option<ScenarioDefinition>;
}

/// Planner for the two proposal shapes that map directly onto scenario
/// definitions. Rerun-style proposals need a scenario archive lookup this
/// planner does not have.
pub struct DefaultPlanner {
    generator: ScenarioGenerator,
}

impl DefaultPlanner {
    pub fn new(generator: ScenarioGenerator) -> Self {
        Self { generator }
    }
}

impl ProposalPlanner for DefaultPlanner {
    fn to_scenario(&self, proposal: &ExperimentProposal) -> Option<ScenarioDefinition> {
        match &proposal.spec {
            ScenarioSpec::ParamSweep { parameter, values } => {
                let base = self.generator.baseline();
                let base_params = base
                    .param_sets
                    .get("balanced")
                    .copied()
                    .unwrap_or_else(TradingParams::balanced);
                // One named param set per swept value, so a single iteration
                // covers the whole grid slice.
                let mut param_sets = std::collections::BTreeMap::new();
                for &value in values {
                    let params = base_params.with_param(parameter, value).ok()?;
                    param_sets.insert(format!("{}_{}", parameter, value), params);
                }
                if param_sets.is_empty() {
                    return None;
                }
                Some(ScenarioDefinition::new(
                    &format!("sweep_{}", parameter),
                    base.start_date,
                    base.end_date,
                    base.symbols.clone(),
                    param_sets,
                    base.regime_classification,
                    Some(base.scenario_id.clone()),
                ))
            }
            ScenarioSpec::RegimeWindow { regime_id } => {
                // A regime is runnable only if some fixed historical window
                // actually classifies to it.
                ScenarioGenerator::named_windows().into_iter().find_map(|window| {
                    let regime = classify_scenario(window.name, window.start);
                    (&regime.regime_id() == regime_id)
                        .then(|| self.generator.regime_window_variant(&window, regime))
                })
            }
            ScenarioSpec::RerunScenarios { .. } => None,
        }
    }
}

/// Hook that may decorate an iteration summary with prose. It sees the
/// finished summary only, so it cannot influence simulation inputs.
pub trait NarrativeHook {
    fn note(&self, summary: &IterationSummary) -> String;
}

#[derive(Debug, Clone, Serialize)]
pub struct IterationSummary {
    pub iteration: u64,
    pub success: bool,
    pub error: Option<String>,
    pub scenario_id: String,
    pub campaigns_completed: usize,
    pub campaigns_expected: usize,
    pub comparisons: Vec<ScenarioComparison>,
    pub new_insights: Vec<String>,
    pub proposals: Vec<ExperimentProposal>,
    pub notes: Option<String>,
}

impl IterationSummary {
    fn failed(iteration: u64, scenario_id: String, error: String) -> Self {
        Self {
            iteration,
            success: false,
            error: Some(error),
            scenario_id,
            campaigns_completed: 0,
            campaigns_expected: 0,
            comparisons: vec![],
            new_insights: vec![],
            proposals: vec![],
            notes: None,
        }
    }
}

pub struct ResearchLoop {
    config: LabConfig,
    data: Box<dyn MarketDataSource>,
    simulator: Simulator,
    generator: ScenarioGenerator,
    memory: StrategyMemory,
    agent: ProposalAgent,
    index: RunIndex,
    classifier: Box<dyn InsightClassifier>,
    planner: Box<dyn ProposalPlanner>,
    narrator: Option<Box<dyn NarrativeHook>>,
    /// Ranked output of the previous iteration; the next iteration runs its
    /// head.
    pending: Vec<ExperimentProposal>,
    coverage: CoverageView,
}

impl ResearchLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: LabConfig,
        data: Box<dyn MarketDataSource>,
        simulator: Simulator,
        generator: ScenarioGenerator,
        memory: StrategyMemory,
        agent: ProposalAgent,
        index: RunIndex,
        classifier: Box<dyn InsightClassifier>,
        planner: Box<dyn ProposalPlanner>,
    ) -> Self {
        Self {
            config,
            data,
            simulator,
            generator,
            memory,
            agent,
            index,
            classifier,
            planner,
            narrator: None,
            pending: Vec::new(),
            coverage: CoverageView::default(),
        }
    }

    pub fn with_narrator(mut self, narrator: Box<dyn NarrativeHook>) -> Self {
        self.narrator = Some(narrator);
        self
    }

    pub fn memory(&self) -> &StrategyMemory {
        &self.memory
    }

    pub fn pending_proposals(&self) -> &[ExperimentProposal] {
        &self.pending
    }

    /// Run one full iteration. All failures are folded into the summary.
    pub fn run_iteration(&mut self, iteration: u64) -> IterationSummary {
        let scenario = self.select_scenario();
        json_log(
            Domain::Loop,
            "iteration.start",
            obj(&[
                ("iteration", v_int(iteration as i64)),
                ("scenario_id", v_str(&scenario.scenario_id)),
                ("scenario", v_str(&scenario.name)),
            ]),
        );
        match self.run_iteration_inner(iteration, &scenario) {
            Ok(summary) => summary,
            Err(err) => {
                json_log(
                    Domain::Loop,
                    "iteration.failed",
                    obj(&[
                        ("iteration", v_int(iteration as i64)),
                        ("error", v_str(&format!("{err:#}"))),
                    ]),
                );
                IterationSummary::failed(iteration, scenario.scenario_id, format!("{err:#}"))
            }
        }
    }

    fn run_iteration_inner(
        &mut self,
        iteration: u64,
        scenario: &ScenarioDefinition,
    ) -> Result<IterationSummary> {
        let now = ts_epoch();
        let campaigns_expected = scenario.symbols.len() * scenario.param_sets.len();
        let results = self.run_campaigns(scenario);
        let campaigns_completed = results.len();
        if campaigns_completed < campaigns_expected {
            json_log(
                Domain::Loop,
                "iteration.partial",
                obj(&[
                    ("iteration", v_int(iteration as i64)),
                    ("completed", v_int(campaigns_completed as i64)),
                    ("expected", v_int(campaigns_expected as i64)),
                    (
                        "completion_rate",
                        v_num(if campaigns_expected == 0 {
                            0.0
                        } else {
                            campaigns_completed as f64 / campaigns_expected as f64
                        }),
                    ),
                ]),
            );
        }

        // Compare against prior artifacts before this run joins the index.
        let comparisons = self.compare_recent(scenario, &results)?;

        let artifact = ScenarioResultsFile::assemble(
            now,
            vec![scenario.clone()],
            scenario.param_sets.clone(),
            results,
            campaigns_expected,
        )?;
        let artifact_path = artifact
            .write(std::path::Path::new(&self.config.out_dir), iteration)
            .context("persisting results artifact")?;
        self.index.record(&RunRecord {
            iteration,
            ts: now,
            scenario_id: scenario.scenario_id.clone(),
            artifact_path,
            campaigns: campaigns_completed,
            trades: artifact.validation.total_trades_executed,
        })?;

        self.record_coverage(scenario);

        let mut new_insights = Vec::new();
        for comparison in &comparisons {
            new_insights.extend(self.memory.ingest_comparison(
                comparison,
                self.classifier.as_ref(),
                now,
            ));
        }
        new_insights.extend(self.analyze_results(scenario, &artifact.results, now));
        self.memory.save(now).context("persisting strategy memory")?;

        self.pending =
            self.agent
                .generate_proposals(&self.memory, &self.coverage, self.config.max_proposals);

        let mut summary = IterationSummary {
            iteration,
            success: true,
            error: None,
            scenario_id: scenario.scenario_id.clone(),
            campaigns_completed,
            campaigns_expected,
            comparisons,
            new_insights,
            proposals: self.pending.clone(),
            notes: None,
        };
        if let Some(narrator) = &self.narrator {
            summary.notes = Some(narrator.note(&summary));
        }
        json_log(
            Domain::Loop,
            "iteration.done",
            obj(&[
                ("iteration", v_int(iteration as i64)),
                ("scenario_id", v_str(&summary.scenario_id)),
                ("campaigns", v_int(summary.campaigns_completed as i64)),
                ("comparisons", v_int(summary.comparisons.len() as i64)),
                ("new_insights", v_int(summary.new_insights.len() as i64)),
                ("proposals", v_int(summary.proposals.len() as i64)),
            ]),
        );
        Ok(summary)
    }

    /// Top pending proposal if the planner can convert it, baseline
    /// otherwise.
    fn select_scenario(&mut self) -> ScenarioDefinition {
        let Some(proposal) = self.pending.first().cloned() else {
            return self.generator.baseline();
        };
        self.pending.remove(0);
        match self.planner.to_scenario(&proposal) {
            Some(scenario) => {
                json_log(
                    Domain::Loop,
                    "plan.from_proposal",
                    obj(&[
                        ("proposal_id", v_str(&proposal.proposal_id)),
                        ("kind", v_str(proposal.kind.as_str())),
                        ("scenario_id", v_str(&scenario.scenario_id)),
                    ]),
                );
                scenario
            }
            None => {
                // Known gap: some proposal shapes have no scenario
                // conversion yet. Say so loudly rather than pretending the
                // baseline was chosen on merit.
                json_log(
                    Domain::Loop,
                    "plan.fallback_baseline",
                    obj(&[
                        ("proposal_id", v_str(&proposal.proposal_id)),
                        ("kind", v_str(proposal.kind.as_str())),
                    ]),
                );
                self.generator.baseline()
            }
        }
    }

    /// Run every symbol x param-set campaign. Individual failures are
    /// logged and skipped; the completion rate surfaces them.
    fn run_campaigns(&self, scenario: &ScenarioDefinition) -> Vec<CampaignResult> {
        let mut results = Vec::new();
        for symbol in &scenario.symbols {
            let bars = match self.data.bars(symbol, scenario.start_date, scenario.end_date) {
                Ok(bars) => bars,
                Err(err) => {
                    json_log(
                        Domain::Sim,
                        "campaign.data_failed",
                        obj(&[
                            ("symbol", v_str(symbol)),
                            ("error", v_str(&format!("{err:#}"))),
                        ]),
                    );
                    continue;
                }
            };
            for (set_name, params) in &scenario.param_sets {
                match self.simulator.run_campaign(symbol, set_name, params, &bars) {
                    Ok(result) => results.push(result),
                    Err(err) => {
                        json_log(
                            Domain::Sim,
                            "campaign.failed",
                            obj(&[
                                ("symbol", v_str(symbol)),
                                ("param_set", v_str(set_name)),
                                ("error", v_str(&format!("{err:#}"))),
                            ]),
                        );
                    }
                }
            }
        }
        results
    }

    /// Pairwise-compare this run against up to `compare_depth` most recent
    /// prior artifacts. Unreadable artifacts are logged and skipped.
    fn compare_recent(
        &self,
        scenario: &ScenarioDefinition,
        results: &[CampaignResult],
    ) -> Result<Vec<ScenarioComparison>> {
        if results.is_empty() {
            return Ok(vec![]);
        }
        let dominant = scenario.regime_classification.as_ref().map(|r| r.regime_id());
        let mut comparisons = Vec::new();
        for record in self.index.recent(self.config.compare_depth)? {
            let prior = match ScenarioResultsFile::read(&record.artifact_path) {
                Ok(prior) => prior,
                Err(err) => {
                    json_log(
                        Domain::Eval,
                        "compare.artifact_unreadable",
                        obj(&[
                            ("path", v_str(&record.artifact_path.to_string_lossy())),
                            ("error", v_str(&format!("{err:#}"))),
                        ]),
                    );
                    continue;
                }
            };
            if prior.results.is_empty() {
                continue;
            }
            comparisons.push(compare_scenarios(
                &record.scenario_id,
                &prior.results,
                &scenario.scenario_id,
                results,
                dominant.clone(),
            ));
        }
        Ok(comparisons)
    }

    /// Within-run analysis: parameter sensitivity for sweep scenarios,
    /// failure-mode extraction, and the best-performing campaign by quality
    /// score. Findings become memory insights.
    fn analyze_results(
        &mut self,
        scenario: &ScenarioDefinition,
        results: &[CampaignResult],
        now: u64,
    ) -> Vec<String> {
        let mut touched = Vec::new();
        if results.is_empty() {
            return touched;
        }
        let regime = scenario.regime_classification.as_ref().map(|r| r.regime_id());

        if let Some(param) = scenario.name.strip_prefix("sweep_") {
            let report = analyze_parameter_sensitivity(param, results);
            json_log(
                Domain::Eval,
                "sensitivity.analyzed",
                obj(&[
                    ("parameter", v_str(param)),
                    ("points", v_int(report.points.len() as i64)),
                    ("return_range", v_num(report.return_range)),
                    ("cliffs", v_int(report.performance_cliffs.len() as i64)),
                    ("high_sensitivity", json!(report.high_sensitivity)),
                ]),
            );
            for (safe, failing) in &report.failure_thresholds {
                let text = format!(
                    "{} fails past {:.2}, last profitable value {:.2}",
                    param, failing, safe
                );
                let mut evidence = std::collections::BTreeMap::new();
                evidence.insert("failure_value".to_string(), *failing);
                evidence.insert("safe_value".to_string(), *safe);
                touched.push(self.memory.ingest_text(
                    &text,
                    &scenario.scenario_id,
                    regime.as_deref(),
                    evidence,
                    self.classifier.as_ref(),
                    now,
                ));
            }
        }

        for failure in extract_failure_modes(results, DEFAULT_FAILURE_RETURN) {
            let text = format!(
                "{} params collapse in scenario {}",
                failure.param_set, scenario.name
            );
            let mut evidence = std::collections::BTreeMap::new();
            evidence.insert("total_return_pct".to_string(), failure.total_return_pct);
            evidence.insert("max_drawdown_pct".to_string(), failure.max_drawdown_pct);
            touched.push(self.memory.ingest_text(
                &text,
                &scenario.scenario_id,
                regime.as_deref(),
                evidence,
                self.classifier.as_ref(),
                now,
            ));
        }

        if let Some(best) = results
            .iter()
            .max_by(|a, b| quality_score(a).total_cmp(&quality_score(b)))
        {
            json_log(
                Domain::Eval,
                "campaign.best",
                obj(&[
                    ("campaign", v_str(&best.campaign_name)),
                    ("quality_score", v_num(quality_score(best))),
                    ("return_pct", v_num(best.total_return_pct)),
                ]),
            );
        }
        touched
    }

    /// Fold this scenario into the coverage view the proposal agent ranks
    /// against.
    fn record_coverage(&mut self, scenario: &ScenarioDefinition) {
        for params in scenario.param_sets.values() {
            for param in ScenarioGenerator::declared_grids().keys() {
                if let Some(value) = params.get_param(param) {
                    let tested = self
                        .coverage
                        .tested_param_values
                        .entry(param.clone())
                        .or_default();
                    if !tested.iter().any(|t| (t - value).abs() < 1e-12) {
                        tested.push(value);
                    }
                }
            }
        }
        if let Some(regime) = &scenario.regime_classification {
            *self
                .coverage
                .regime_scenarios
                .entry(regime.regime_id())
                .or_insert(0) += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{geometric_series, MemoryDataSource};
    use crate::memory::KeywordClassifier;
    use chrono::NaiveDate;

    fn loop_under_test(dir: &std::path::Path, data: MemoryDataSource) -> ResearchLoop {
        let config = LabConfig {
            data_dir: dir.join("data").to_string_lossy().into_owned(),
            out_dir: dir.join("out").to_string_lossy().into_owned(),
            run_db: dir.join("out/runs.db").to_string_lossy().into_owned(),
            memory_path: dir.join("out/memory.json").to_string_lossy().into_owned(),
            initial_capital: 100_000.0,
            max_proposals: 10,
            compare_depth: 5,
        };
        let memory = StrategyMemory::open(&config.memory_path).unwrap();
        let index = RunIndex::open(&config.run_db).unwrap();
        let generator = ScenarioGenerator::default();
        ResearchLoop::new(
            config,
            Box::new(data),
            Simulator::default(),
            generator.clone(),
            memory,
            ProposalAgent::default(),
            index,
            Box::new(KeywordClassifier),
            Box::new(DefaultPlanner::new(generator)),
        )
    }

    fn rising_market() -> MemoryDataSource {
        let start = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
        let mut data = MemoryDataSource::default();
        data.insert("BTC-USD", geometric_series(start, 365, 30_000.0, 1.004, 5_000.0));
        data.insert("ETH-USD", geometric_series(start, 365, 1_000.0, 1.004, 8_000.0));
        data
    }

    #[test]
    fn test_iteration_never_raises_on_missing_data() {
        let dir = tempfile::tempdir().unwrap();
        let mut research = loop_under_test(dir.path(), MemoryDataSource::default());
        let summary = research.run_iteration(1);
        // No bars for any symbol: campaigns fail, iteration still completes.
        assert!(summary.success);
        assert_eq!(summary.campaigns_completed, 0);
        assert_eq!(summary.campaigns_expected, 6);
        assert!(summary.comparisons.is_empty());
    }

    #[test]
    fn test_first_iteration_runs_baseline_and_indexes() {
        let dir = tempfile::tempdir().unwrap();
        let mut research = loop_under_test(dir.path(), rising_market());
        let summary = research.run_iteration(1);
        assert!(summary.success);
        assert_eq!(summary.campaigns_completed, 6);
        assert!(summary.comparisons.is_empty());
        assert!(!summary.proposals.is_empty());
        // A second iteration compares against the first run's artifact.
        let second = research.run_iteration(2);
        assert!(second.success);
        assert_eq!(second.comparisons.len(), 1);
    }

    #[test]
    fn test_identical_reruns_produce_zero_deltas() {
        let dir = tempfile::tempdir().unwrap();
        let mut research = loop_under_test(dir.path(), rising_market());
        research.run_iteration(1);
        // Force the baseline again so the comparison is self-vs-self.
        research.pending.clear();
        let summary = research.run_iteration(2);
        let comparison = &summary.comparisons[0];
        assert!(comparison.return_delta.abs() < 1e-9);
        assert!(comparison.sharpe_delta.abs() < 1e-9);
    }

    #[test]
    fn test_planner_converts_param_sweep() {
        let generator = ScenarioGenerator::default();
        let planner = DefaultPlanner::new(generator.clone());
        let proposal = ExperimentProposal {
            proposal_id: "prop-parameter_gap-001".to_string(),
            kind: crate::proposal::ProposalKind::ParameterGap,
            title: "sweep".to_string(),
            description: String::new(),
            expected_info_gain: 0.6,
            priority: 6,
            spec: ScenarioSpec::ParamSweep {
                parameter: "stop_loss".to_string(),
                values: vec![0.03, 0.08],
            },
            reasoning: String::new(),
            source_insight_ids: vec![],
        };
        let scenario = planner.to_scenario(&proposal).unwrap();
        assert_eq!(scenario.param_sets.len(), 2);
        assert_eq!(scenario.parent_scenario_id, Some(generator.baseline().scenario_id));
    }

    #[test]
    fn test_planner_converts_regime_with_known_window() {
        let planner = DefaultPlanner::new(ScenarioGenerator::default());
        let mut proposal = ExperimentProposal {
            proposal_id: "prop-regime_coverage-001".to_string(),
            kind: crate::proposal::ProposalKind::RegimeCoverage,
            title: "probe".to_string(),
            description: String::new(),
            expected_info_gain: 0.7,
            priority: 7,
            spec: ScenarioSpec::RegimeWindow {
                regime_id: "extreme_down_stressed_easing".to_string(),
            },
            reasoning: String::new(),
            source_insight_ids: vec![],
        };
        let scenario = planner.to_scenario(&proposal).unwrap();
        assert_eq!(scenario.name, "regime_probe_covid_crash");

        // A regime no fixed window classifies to is not runnable.
        proposal.spec = ScenarioSpec::RegimeWindow {
            regime_id: "low_sideways_stressed_neutral".to_string(),
        };
        assert!(planner.to_scenario(&proposal).is_none());
    }

    #[test]
    fn test_planner_declines_rerun_spec() {
        let planner = DefaultPlanner::new(ScenarioGenerator::default());
        let proposal = ExperimentProposal {
            proposal_id: "prop-failure_deep_dive-001".to_string(),
            kind: crate::proposal::ProposalKind::FailureDeepDive,
            title: "deep-dive".to_string(),
            description: String::new(),
            expected_info_gain: 0.85,
            priority: 9,
            spec: ScenarioSpec::RerunScenarios { scenario_ids: vec!["abc".to_string()] },
            reasoning: String::new(),
            source_insight_ids: vec![],
        };
        assert!(planner.to_scenario(&proposal).is_none());
    }

    #[test]
    fn test_narrator_decorates_summary() {
        struct Echo;
        impl NarrativeHook for Echo {
            fn note(&self, summary: &IterationSummary) -> String {
                format!("iteration {} ran {}", summary.iteration, summary.scenario_id)
            }
        }
        let dir = tempfile::tempdir().unwrap();
        let mut research =
            loop_under_test(dir.path(), rising_market()).with_narrator(Box::new(Echo));
        let summary = research.run_iteration(1);
        let notes = summary.notes.unwrap();
        assert!(notes.contains(&summary.scenario_id));
    }
}
