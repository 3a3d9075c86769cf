//! Meta-evaluation of campaign results.
//!
//! Two independent operation groups: pairwise scenario comparison (aggregate
//! metric deltas plus generated insight strings) and parameter sensitivity /
//! failure-boundary analysis across a declared value grid. Also hosts the
//! disqualification scorer used for param-set quality gating.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::simulator::CampaignResult;

// Insight-generation thresholds. The wording of generated strings matters:
// the memory store's keyword classifier keys on "better" / "fails" /
// "collapses" to bucket them.
const RETURN_DELTA_THRESHOLD: f64 = 1.0;
const SHARPE_DELTA_THRESHOLD: f64 = 0.2;
const DRAWDOWN_DELTA_THRESHOLD: f64 = 2.0;

// Sensitivity / boundary constants.
const CLIFF_DROP: f64 = 5.0;
const HIGH_SENSITIVITY_RANGE: f64 = 10.0;
const HIGH_SENSITIVITY_STD: f64 = 5.0;
pub const DEFAULT_FAILURE_RETURN: f64 = -10.0;

/// Delta-only record between two scenarios' campaign aggregates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioComparison {
    pub baseline_scenario_id: String,
    pub variant_scenario_id: String,
    pub return_delta: f64,
    pub sharpe_delta: f64,
    pub drawdown_delta: f64,
    pub win_rate_delta: f64,
    /// param name -> (baseline value, variant value), for params that differ.
    pub parameter_differences: BTreeMap<String, (f64, f64)>,
    pub insights: Vec<String>,
    pub dominant_regime: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Aggregate {
    mean_return: f64,
    mean_sharpe: f64,
    mean_drawdown: f64,
    mean_win_rate: f64,
}

fn aggregate(results: &[CampaignResult]) -> Aggregate {
    if results.is_empty() {
        return Aggregate::default();
    }
    let n = results.len() as f64;
    Aggregate {
        mean_return: results.iter().map(|r| r.total_return_pct).sum::<f64>() / n,
        mean_sharpe: results.iter().map(|r| r.sharpe_ratio).sum::<f64>() / n,
        mean_drawdown: results.iter().map(|r| r.max_drawdown_pct).sum::<f64>() / n,
        mean_win_rate: results.iter().map(|r| r.win_rate).sum::<f64>() / n,
    }
}

fn param_differences(
    baseline: &[CampaignResult],
    variant: &[CampaignResult],
) -> BTreeMap<String, (f64, f64)> {
    let mut diffs = BTreeMap::new();
    let (Some(b), Some(v)) = (baseline.first(), variant.first()) else {
        return diffs;
    };
    for name in [
        "trust_threshold",
        "min_confidence",
        "max_position_size",
        "stop_loss",
        "take_profit",
        "cooldown_days",
    ] {
        let (Some(bv), Some(vv)) = (b.params.get_param(name), v.params.get_param(name)) else {
            continue;
        };
        if (bv - vv).abs() > 1e-12 {
            diffs.insert(name.to_string(), (bv, vv));
        }
    }
    diffs
}

/// Compare two scenarios' campaign sets: aggregate deltas plus insight
/// strings at fixed magnitude thresholds.
pub fn compare_scenarios(
    baseline_id: &str,
    baseline: &[CampaignResult],
    variant_id: &str,
    variant: &[CampaignResult],
    dominant_regime: Option<String>,
) -> ScenarioComparison {
    let b = aggregate(baseline);
    let v = aggregate(variant);
    let return_delta = v.mean_return - b.mean_return;
    let sharpe_delta = v.mean_sharpe - b.mean_sharpe;
    let drawdown_delta = v.mean_drawdown - b.mean_drawdown;
    let win_rate_delta = v.mean_win_rate - b.mean_win_rate;

    let mut insights = Vec::new();
    if return_delta.abs() > RETURN_DELTA_THRESHOLD {
        if return_delta > 0.0 {
            insights.push(format!(
                "variant returns {:.1}% better than baseline",
                return_delta
            ));
        } else {
            insights.push(format!(
                "variant fails to match baseline return, {:.1}% worse",
                -return_delta
            ));
        }
    }
    if sharpe_delta.abs() > SHARPE_DELTA_THRESHOLD {
        if sharpe_delta > 0.0 {
            insights.push(format!(
                "variant risk-adjusted performance is better (sharpe {:+.2})",
                sharpe_delta
            ));
        } else {
            insights.push(format!(
                "variant risk-adjusted performance collapses (sharpe {:+.2})",
                sharpe_delta
            ));
        }
    }
    if drawdown_delta.abs() > DRAWDOWN_DELTA_THRESHOLD {
        if drawdown_delta < 0.0 {
            insights.push(format!(
                "variant drawdown control is better ({:+.1}%)",
                drawdown_delta
            ));
        } else {
            insights.push(format!(
                "variant drawdown deepens by {:.1}%, risk profile degrades",
                drawdown_delta
            ));
        }
    }

    ScenarioComparison {
        baseline_scenario_id: baseline_id.to_string(),
        variant_scenario_id: variant_id.to_string(),
        return_delta,
        sharpe_delta,
        drawdown_delta,
        win_rate_delta,
        parameter_differences: param_differences(baseline, variant),
        insights,
        dominant_regime,
    }
}

/// Mean return at one declared parameter value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuePoint {
    pub value: f64,
    pub mean_return: f64,
    pub campaigns: usize,
}

/// Sensitivity/boundary findings for one parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensitivityReport {
    pub parameter: String,
    pub points: Vec<ValuePoint>,
    /// (from_value, to_value, drop) for adjacent drops > 5.0 points.
    pub performance_cliffs: Vec<(f64, f64, f64)>,
    /// (from_value, to_value) where mean return crosses + to -.
    pub failure_thresholds: Vec<(f64, f64)>,
    pub return_range: f64,
    pub return_std: f64,
    pub high_sensitivity: bool,
}

/// Group results by a named parameter's value and detect cliffs and failure
/// boundaries across adjacent values (ascending).
pub fn analyze_parameter_sensitivity(
    parameter: &str,
    results: &[CampaignResult],
) -> SensitivityReport {
    // f64 grid values are declared constants, so keying by their bit
    // patterns groups exactly.
    let mut groups: BTreeMap<u64, (f64, Vec<f64>)> = BTreeMap::new();
    for r in results {
        if let Some(value) = r.params.get_param(parameter) {
            groups
                .entry(value.to_bits())
                .or_insert_with(|| (value, Vec::new()))
                .1
                .push(r.total_return_pct);
        }
    }
    let mut points: Vec<ValuePoint> = groups
        .into_values()
        .map(|(value, returns)| ValuePoint {
            value,
            mean_return: returns.iter().sum::<f64>() / returns.len() as f64,
            campaigns: returns.len(),
        })
        .collect();
    points.sort_by(|a, b| a.value.total_cmp(&b.value));

    let mut performance_cliffs = Vec::new();
    let mut failure_thresholds = Vec::new();
    for pair in points.windows(2) {
        let drop = pair[0].mean_return - pair[1].mean_return;
        if drop > CLIFF_DROP {
            performance_cliffs.push((pair[0].value, pair[1].value, drop));
        }
        if pair[0].mean_return > 0.0 && pair[1].mean_return < 0.0 {
            failure_thresholds.push((pair[0].value, pair[1].value));
        }
    }

    let means: Vec<f64> = points.iter().map(|p| p.mean_return).collect();
    let (return_range, return_std) = if means.len() < 2 {
        (0.0, 0.0)
    } else {
        let max = means.iter().cloned().fold(f64::MIN, f64::max);
        let min = means.iter().cloned().fold(f64::MAX, f64::min);
        let mean = means.iter().sum::<f64>() / means.len() as f64;
        let var = means.iter().map(|m| (m - mean).powi(2)).sum::<f64>() / means.len() as f64;
        (max - min, var.sqrt())
    };
    let high_sensitivity =
        return_range > HIGH_SENSITIVITY_RANGE || return_std > HIGH_SENSITIVITY_STD;

    SensitivityReport {
        parameter: parameter.to_string(),
        points,
        performance_cliffs,
        failure_thresholds,
        return_range,
        return_std,
        high_sensitivity,
    }
}

/// Individual campaigns whose return falls below `threshold` (default -10%).
pub fn extract_failure_modes<'a>(
    results: &'a [CampaignResult],
    threshold: f64,
) -> Vec<&'a CampaignResult> {
    results.iter().filter(|r| r.total_return_pct < threshold).collect()
}

// Disqualification sentinels: comparable scores, not errors. A disqualified
// param set still sorts below every qualified one.
pub const SCORE_EXCESS_DRAWDOWN: f64 = -999.0;
pub const SCORE_ZERO_TRADES: f64 = -500.0;
pub const SCORE_NEGATIVE_RETURN: f64 = -100.0;

/// Quality score for optimizer-style ranking of campaign results.
///
/// Disqualifications, checked in order: drawdown over 25% -> -999, zero
/// trades -> -500, negative return -> -100. Qualified results score on
/// return shaded by risk.
pub fn quality_score(result: &CampaignResult) -> f64 {
    if result.max_drawdown_pct > 25.0 {
        return SCORE_EXCESS_DRAWDOWN;
    }
    if result.total_trades == 0 {
        return SCORE_ZERO_TRADES;
    }
    if result.total_return_pct < 0.0 {
        return SCORE_NEGATIVE_RETURN;
    }
    result.total_return_pct + result.sharpe_ratio * 10.0 - result.max_drawdown_pct * 0.5
}
