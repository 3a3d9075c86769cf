//! Experiment proposal generation and information-gain ranking.
//!
//! Proposals are ephemeral: regenerated every loop iteration from memory and
//! coverage, never persisted as identity-bearing state. Four independent
//! generators each emit candidates with `expected_info_gain` in [0, 1]; a
//! second pass applies additive bonuses, clamps, and stable-sorts descending
//! (insertion order breaks ties).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::memory::{InsightKind, StrategyMemory};
use crate::regime::all_regime_combinations;
use crate::scenario::ScenarioGenerator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalKind {
    ParameterGap,
    RegimeCoverage,
    HypothesisVerification,
    FailureDeepDive,
    UncertaintyReduction,
}

impl ProposalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalKind::ParameterGap => "parameter_gap",
            ProposalKind::RegimeCoverage => "regime_coverage",
            ProposalKind::HypothesisVerification => "hypothesis_verification",
            ProposalKind::FailureDeepDive => "failure_deep_dive",
            ProposalKind::UncertaintyReduction => "uncertainty_reduction",
        }
    }
}

/// What to actually run, as a discriminated union per proposal type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScenarioSpec {
    /// Sweep one parameter over declared values.
    ParamSweep { parameter: String, values: Vec<f64> },
    /// Probe one regime via its best-known historical window.
    RegimeWindow { regime_id: String },
    /// Re-run previously seen scenarios (verification / deep dive).
    RerunScenarios { scenario_ids: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentProposal {
    pub proposal_id: String,
    pub kind: ProposalKind,
    pub title: String,
    pub description: String,
    pub expected_info_gain: f64,
    /// round(10 * expected_info_gain), recomputed after bonuses.
    pub priority: u8,
    pub spec: ScenarioSpec,
    pub reasoning: String,
    pub source_insight_ids: Vec<String>,
}

/// What the loop has already explored, assembled by the orchestrator from
/// the run history.
#[derive(Debug, Clone, Default)]
pub struct CoverageView {
    /// Parameter values actually exercised so far, per parameter.
    pub tested_param_values: BTreeMap<String, Vec<f64>>,
    /// Scenario count per regime id.
    pub regime_scenarios: BTreeMap<String, usize>,
}

const GAIN_PARAM_GAP: f64 = 0.6;
const GAIN_REGIME_UNEXPLORED: f64 = 0.7;
const GAIN_REGIME_FAILURE: f64 = 0.8;
const GAIN_FAILURE_DEEP_DIVE: f64 = 0.85;
const WEAK_CONFIDENCE: f64 = 0.6;
const VERY_WEAK_CONFIDENCE: f64 = 0.3;

const BONUS_UNEXPLORED_REGIME: f64 = 0.10;
const BONUS_VERY_WEAK_INSIGHT: f64 = 0.15;
const BONUS_FAILURE_RELATED: f64 = 0.10;

pub struct ProposalAgent {
    grids: BTreeMap<String, Vec<f64>>,
}

impl Default for ProposalAgent {
    fn default() -> Self {
        Self { grids: ScenarioGenerator::declared_grids() }
    }
}

impl ProposalAgent {
    pub fn new(grids: BTreeMap<String, Vec<f64>>) -> Self {
        Self { grids }
    }

    /// Generate, rank, and truncate proposals.
    pub fn generate_proposals(
        &self,
        memory: &StrategyMemory,
        coverage: &CoverageView,
        limit: usize,
    ) -> Vec<ExperimentProposal> {
        let mut seq = 0usize;
        let mut next_id = |kind: ProposalKind| {
            seq += 1;
            format!("prop-{}-{:03}", kind.as_str(), seq)
        };

        let failure_regimes: BTreeSet<String> = memory
            .by_kind(InsightKind::FailureMode)
            .flat_map(|i| i.regime_coverage.iter().cloned())
            .collect();
        let unexplored: BTreeSet<String> = all_regime_combinations()
            .iter()
            .map(|r| r.regime_id())
            .filter(|id| coverage.regime_scenarios.get(id).copied().unwrap_or(0) == 0)
            .collect();

        let mut proposals = Vec::new();

        // (a) Declared parameter-space gaps.
        for (param, declared) in &self.grids {
            let tested = coverage.tested_param_values.get(param);
            let untested: Vec<f64> = declared
                .iter()
                .copied()
                .filter(|v| {
                    tested.map_or(true, |ts| !ts.iter().any(|t| (t - v).abs() < 1e-12))
                })
                .collect();
            if untested.is_empty() {
                continue;
            }
            proposals.push(ExperimentProposal {
                proposal_id: next_id(ProposalKind::ParameterGap),
                kind: ProposalKind::ParameterGap,
                title: format!("sweep untested {} values", param),
                description: format!(
                    "{} declared {} value(s) have never been simulated",
                    untested.len(),
                    param
                ),
                expected_info_gain: GAIN_PARAM_GAP,
                priority: 0,
                spec: ScenarioSpec::ParamSweep { parameter: param.clone(), values: untested },
                reasoning: "declared grid coverage is incomplete".to_string(),
                source_insight_ids: vec![],
            });
        }

        // (b) Regime-focused: zero coverage, and failure-hosting regimes.
        for regime_id in &unexplored {
            proposals.push(ExperimentProposal {
                proposal_id: next_id(ProposalKind::RegimeCoverage),
                kind: ProposalKind::RegimeCoverage,
                title: format!("probe unexplored regime {}", regime_id),
                description: format!("no scenario has run under {}", regime_id),
                expected_info_gain: GAIN_REGIME_UNEXPLORED,
                priority: 0,
                spec: ScenarioSpec::RegimeWindow { regime_id: regime_id.clone() },
                reasoning: "regime has zero coverage in the fixed 72-member universe".to_string(),
                source_insight_ids: vec![],
            });
        }
        for regime_id in &failure_regimes {
            proposals.push(ExperimentProposal {
                proposal_id: next_id(ProposalKind::RegimeCoverage),
                kind: ProposalKind::RegimeCoverage,
                title: format!("re-test failure regime {}", regime_id),
                description: format!("a recorded failure occurred under {}", regime_id),
                expected_info_gain: GAIN_REGIME_FAILURE,
                priority: 0,
                spec: ScenarioSpec::RegimeWindow { regime_id: regime_id.clone() },
                reasoning: "failure boundaries deserve focused re-testing".to_string(),
                source_insight_ids: vec![],
            });
        }

        // (c) Verification of confident winners, and failure deep dives.
        for insight in memory.by_kind(InsightKind::WinningPattern) {
            let confidence = insight.confidence_score();
            if confidence < 0.7 {
                continue;
            }
            proposals.push(ExperimentProposal {
                proposal_id: next_id(ProposalKind::HypothesisVerification),
                kind: ProposalKind::HypothesisVerification,
                title: format!("verify {}", insight.insight_id),
                description: insight.description.clone(),
                // Diminishing: the more confident we already are, the less
                // a verification run can teach.
                expected_info_gain: (1.0 - confidence).clamp(0.0, 1.0),
                priority: 0,
                spec: ScenarioSpec::RerunScenarios {
                    scenario_ids: insight.supporting_scenario_ids.clone(),
                },
                reasoning: format!("confirm winning pattern at confidence {:.2}", confidence),
                source_insight_ids: vec![insight.insight_id.clone()],
            });
        }
        for insight in memory.by_kind(InsightKind::FailureMode) {
            proposals.push(ExperimentProposal {
                proposal_id: next_id(ProposalKind::FailureDeepDive),
                kind: ProposalKind::FailureDeepDive,
                title: format!("deep-dive {}", insight.insight_id),
                description: insight.description.clone(),
                expected_info_gain: GAIN_FAILURE_DEEP_DIVE,
                priority: 0,
                spec: ScenarioSpec::RerunScenarios {
                    scenario_ids: insight.supporting_scenario_ids.clone(),
                },
                reasoning: "map the boundary of a known failure mode".to_string(),
                source_insight_ids: vec![insight.insight_id.clone()],
            });
        }

        // (d) Uncertainty reduction for weak insights.
        for insight in memory.insights() {
            let confidence = insight.confidence_score();
            if confidence >= WEAK_CONFIDENCE {
                continue;
            }
            proposals.push(ExperimentProposal {
                proposal_id: next_id(ProposalKind::UncertaintyReduction),
                kind: ProposalKind::UncertaintyReduction,
                title: format!("reduce uncertainty on {}", insight.insight_id),
                description: insight.description.clone(),
                expected_info_gain: (1.0 - confidence).clamp(0.0, 1.0),
                priority: 0,
                spec: ScenarioSpec::RerunScenarios {
                    scenario_ids: insight.supporting_scenario_ids.clone(),
                },
                reasoning: format!("confidence {:.2} is below the weak threshold", confidence),
                source_insight_ids: vec![insight.insight_id.clone()],
            });
        }

        self.rank(memory, &unexplored, &failure_regimes, proposals, limit)
    }

    /// Second pass: additive bonuses, clamp, recompute priority, stable sort
    /// descending by gain, truncate.
    fn rank(
        &self,
        memory: &StrategyMemory,
        unexplored: &BTreeSet<String>,
        failure_regimes: &BTreeSet<String>,
        mut proposals: Vec<ExperimentProposal>,
        limit: usize,
    ) -> Vec<ExperimentProposal> {
        for p in proposals.iter_mut() {
            let mut gain = p.expected_info_gain;
            if let ScenarioSpec::RegimeWindow { regime_id } = &p.spec {
                if unexplored.contains(regime_id) {
                    gain += BONUS_UNEXPLORED_REGIME;
                }
            }
            let very_weak = p.source_insight_ids.iter().any(|id| {
                memory.get(id).map_or(false, |i| i.confidence_score() < VERY_WEAK_CONFIDENCE)
            });
            if very_weak {
                gain += BONUS_VERY_WEAK_INSIGHT;
            }
            let failure_related = p.kind == ProposalKind::FailureDeepDive
                || p.source_insight_ids.iter().any(|id| {
                    memory.get(id).map_or(false, |i| i.kind == InsightKind::FailureMode)
                })
                || matches!(&p.spec, ScenarioSpec::RegimeWindow { regime_id }
                    if failure_regimes.contains(regime_id));
            if failure_related {
                gain += BONUS_FAILURE_RELATED;
            }
            p.expected_info_gain = gain.clamp(0.0, 1.0);
            p.priority = (p.expected_info_gain * 10.0).round() as u8;
        }
        // Stable sort: equal gains keep generator insertion order.
        proposals.sort_by(|a, b| b.expected_info_gain.total_cmp(&a.expected_info_gain));
        proposals.truncate(limit);
        proposals
    }
}
