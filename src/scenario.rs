//! Scenario definitions and the declared-variation generator.
//!
//! A scenario is the unit of reproducibility: its id is a content hash, so
//! two definitions with identical content always share an id regardless of
//! construction order. All variation is declared as explicit finite sets;
//! nothing is ever sampled.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::regime::{classify_scenario, RegimeClassification};

/// Generator version, part of the hashed identity: bumping it deliberately
/// invalidates cross-version scenario-id comparisons.
pub const GENERATOR_VERSION: &str = "1.0";

/// Immutable strategy parameters. Created by scenario generation, never
/// mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradingParams {
    pub trust_threshold: f64,
    pub min_confidence: f64,
    pub max_position_size: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub cooldown_days: u32,
}

impl TradingParams {
    pub fn aggressive() -> Self {
        Self {
            trust_threshold: 0.50,
            min_confidence: 0.50,
            max_position_size: 25_000.0,
            stop_loss: 0.08,
            take_profit: 0.15,
            cooldown_days: 1,
        }
    }

    pub fn balanced() -> Self {
        Self {
            trust_threshold: 0.60,
            min_confidence: 0.60,
            max_position_size: 15_000.0,
            stop_loss: 0.05,
            take_profit: 0.10,
            cooldown_days: 2,
        }
    }

    pub fn conservative() -> Self {
        Self {
            trust_threshold: 0.70,
            min_confidence: 0.70,
            max_position_size: 8_000.0,
            stop_loss: 0.03,
            take_profit: 0.08,
            cooldown_days: 3,
        }
    }

    /// Copy with one named parameter replaced. Unknown names are rejected so
    /// a sweep over a typo'd parameter fails loudly.
    pub fn with_param(&self, name: &str, value: f64) -> anyhow::Result<Self> {
        let mut p = *self;
        match name {
            "trust_threshold" => p.trust_threshold = value,
            "min_confidence" => p.min_confidence = value,
            "max_position_size" => p.max_position_size = value,
            "stop_loss" => p.stop_loss = value,
            "take_profit" => p.take_profit = value,
            "cooldown_days" => p.cooldown_days = value.round() as u32,
            other => anyhow::bail!("unknown trading parameter: {}", other),
        }
        Ok(p)
    }

    pub fn get_param(&self, name: &str) -> Option<f64> {
        match name {
            "trust_threshold" => Some(self.trust_threshold),
            "min_confidence" => Some(self.min_confidence),
            "max_position_size" => Some(self.max_position_size),
            "stop_loss" => Some(self.stop_loss),
            "take_profit" => Some(self.take_profit),
            "cooldown_days" => Some(self.cooldown_days as f64),
            _ => None,
        }
    }

    fn hash_value(&self) -> serde_json::Value {
        // serde_json maps are BTreeMap-backed, so keys serialize sorted.
        json!({
            "trust_threshold": self.trust_threshold,
            "min_confidence": self.min_confidence,
            "max_position_size": self.max_position_size,
            "stop_loss": self.stop_loss,
            "take_profit": self.take_profit,
            "cooldown_days": self.cooldown_days,
        })
    }
}

/// A fully parameterized, hash-identified experiment definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioDefinition {
    pub scenario_id: String,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub symbols: Vec<String>,
    pub param_sets: BTreeMap<String, TradingParams>,
    pub regime_classification: Option<RegimeClassification>,
    pub parent_scenario_id: Option<String>,
}

impl ScenarioDefinition {
    pub fn new(
        name: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        symbols: Vec<String>,
        param_sets: BTreeMap<String, TradingParams>,
        regime_classification: Option<RegimeClassification>,
        parent_scenario_id: Option<String>,
    ) -> Self {
        let mut def = Self {
            scenario_id: String::new(),
            name: name.to_string(),
            start_date,
            end_date,
            symbols,
            param_sets,
            regime_classification,
            parent_scenario_id,
        };
        def.scenario_id = def.compute_id();
        def
    }

    /// SHA-256 over the canonical sorted-key JSON of the identity-bearing
    /// fields, truncated to 16 hex chars. Recomputed on every construction.
    pub fn compute_id(&self) -> String {
        let mut symbols = self.symbols.clone();
        symbols.sort();
        let param_sets: serde_json::Map<String, serde_json::Value> = self
            .param_sets
            .iter()
            .map(|(name, params)| (name.clone(), params.hash_value()))
            .collect();
        let canonical = json!({
            "name": self.name,
            "start_date": self.start_date.to_string(),
            "end_date": self.end_date.to_string(),
            "symbols": symbols,
            "param_sets": param_sets,
            "generator_version": GENERATOR_VERSION,
            "regime": self.regime_classification.map(|r| r.regime_id()),
        });
        let digest = Sha256::digest(canonical.to_string().as_bytes());
        hex::encode(digest)[..16].to_string()
    }
}

/// Produces the baseline scenario and its declared variant families.
#[derive(Debug, Clone)]
pub struct ScenarioGenerator {
    pub symbols: Vec<String>,
}

impl Default for ScenarioGenerator {
    fn default() -> Self {
        Self { symbols: vec!["BTC-USD".to_string(), "ETH-USD".to_string()] }
    }
}

/// A named historical window used for regime-anchored variants.
#[derive(Debug, Clone)]
pub struct NamedWindow {
    pub name: &'static str,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    // Safe: all callers pass valid calendar dates from the fixed tables below.
    NaiveDate::from_ymd_opt(y, m, day).expect("valid historical date")
}

impl ScenarioGenerator {
    pub fn new(symbols: Vec<String>) -> Self {
        Self { symbols }
    }

    /// The three standard named parameter sets.
    pub fn standard_param_sets() -> BTreeMap<String, TradingParams> {
        let mut sets = BTreeMap::new();
        sets.insert("aggressive".to_string(), TradingParams::aggressive());
        sets.insert("balanced".to_string(), TradingParams::balanced());
        sets.insert("conservative".to_string(), TradingParams::conservative());
        sets
    }

    /// Declared finite sweep grids. This table is the full parameter-space
    /// universe; coverage gaps are measured against it.
    pub fn declared_grids() -> BTreeMap<String, Vec<f64>> {
        let mut grids = BTreeMap::new();
        grids.insert("trust_threshold".to_string(), vec![0.50, 0.60, 0.70, 0.80]);
        grids.insert("min_confidence".to_string(), vec![0.50, 0.60, 0.70]);
        grids.insert("stop_loss".to_string(), vec![0.03, 0.05, 0.08]);
        grids.insert("take_profit".to_string(), vec![0.08, 0.10, 0.15]);
        grids
    }

    /// Fixed named historical windows for regime-anchored variants.
    pub fn named_windows() -> Vec<NamedWindow> {
        vec![
            NamedWindow { name: "covid_crash", start: d(2020, 2, 15), end: d(2020, 4, 15) },
            NamedWindow { name: "bull_2021", start: d(2021, 1, 1), end: d(2021, 12, 31) },
            NamedWindow { name: "bear_2022", start: d(2022, 1, 1), end: d(2022, 12, 31) },
            NamedWindow { name: "luna_collapse", start: d(2022, 5, 1), end: d(2022, 6, 15) },
            NamedWindow { name: "recovery_2023", start: d(2023, 1, 1), end: d(2023, 6, 30) },
        ]
    }

    /// Baseline: full-year window, fixed symbol list, three param sets.
    pub fn baseline(&self) -> ScenarioDefinition {
        let start = d(2021, 1, 1);
        let end = d(2021, 12, 31);
        ScenarioDefinition::new(
            "baseline",
            start,
            end,
            self.symbols.clone(),
            Self::standard_param_sets(),
            Some(classify_scenario("baseline", start)),
            None,
        )
    }

    /// Sweep one parameter over a declared value set, all else held at the
    /// base scenario's `balanced` params. One scenario per value.
    pub fn parameter_sweep(
        &self,
        base: &ScenarioDefinition,
        param: &str,
        values: &[f64],
    ) -> anyhow::Result<Vec<ScenarioDefinition>> {
        let base_params =
            base.param_sets.get("balanced").copied().unwrap_or_else(TradingParams::balanced);
        let mut out = Vec::with_capacity(values.len());
        for &value in values {
            let mut sets = BTreeMap::new();
            sets.insert("balanced".to_string(), base_params.with_param(param, value)?);
            let name = format!("sweep_{}_{}", param, value);
            out.push(ScenarioDefinition::new(
                &name,
                base.start_date,
                base.end_date,
                base.symbols.clone(),
                sets,
                base.regime_classification,
                Some(base.scenario_id.clone()),
            ));
        }
        Ok(out)
    }

    /// One scenario per fixed named historical window.
    pub fn regime_variants(&self) -> Vec<ScenarioDefinition> {
        Self::named_windows()
            .into_iter()
            .map(|w| {
                ScenarioDefinition::new(
                    w.name,
                    w.start,
                    w.end,
                    self.symbols.clone(),
                    Self::standard_param_sets(),
                    Some(classify_scenario(w.name, w.start)),
                    None,
                )
            })
            .collect()
    }

    /// Variant targeting a regime by window, used when planning proposals.
    pub fn regime_window_variant(
        &self,
        window: &NamedWindow,
        regime: RegimeClassification,
    ) -> ScenarioDefinition {
        ScenarioDefinition::new(
            &format!("regime_probe_{}", window.name),
            window.start,
            window.end,
            self.symbols.clone(),
            Self::standard_param_sets(),
            Some(regime),
            None,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_id_stable_under_insertion_order() {
        let mut a_sets = BTreeMap::new();
        a_sets.insert("balanced".to_string(), TradingParams::balanced());
        a_sets.insert("aggressive".to_string(), TradingParams::aggressive());
        let mut b_sets = BTreeMap::new();
        b_sets.insert("aggressive".to_string(), TradingParams::aggressive());
        b_sets.insert("balanced".to_string(), TradingParams::balanced());

        let a = ScenarioDefinition::new(
            "s",
            d(2021, 1, 1),
            d(2021, 6, 30),
            vec!["ETH-USD".to_string(), "BTC-USD".to_string()],
            a_sets,
            None,
            None,
        );
        let b = ScenarioDefinition::new(
            "s",
            d(2021, 1, 1),
            d(2021, 6, 30),
            vec!["BTC-USD".to_string(), "ETH-USD".to_string()],
            b_sets,
            None,
            None,
        );
        assert_eq!(a.scenario_id, b.scenario_id);
        assert_eq!(a.scenario_id.len(), 16);
    }

    #[test]
    fn test_scenario_id_changes_with_content() {
        let gen = ScenarioGenerator::default();
        let base = gen.baseline();
        let sweep = gen
            .parameter_sweep(&base, "trust_threshold", &[0.8])
            .unwrap();
        assert_ne!(base.scenario_id, sweep[0].scenario_id);
        assert_eq!(sweep[0].parent_scenario_id.as_deref(), Some(base.scenario_id.as_str()));
    }

    #[test]
    fn test_with_param_rejects_unknown() {
        assert!(TradingParams::balanced().with_param("no_such_param", 1.0).is_err());
    }

    #[test]
    fn test_sweep_covers_declared_values() {
        let gen = ScenarioGenerator::default();
        let base = gen.baseline();
        let grids = ScenarioGenerator::declared_grids();
        let values = &grids["trust_threshold"];
        let scenarios = gen.parameter_sweep(&base, "trust_threshold", values).unwrap();
        assert_eq!(scenarios.len(), values.len());
        for (s, &v) in scenarios.iter().zip(values.iter()) {
            let p = s.param_sets["balanced"];
            assert!((p.trust_threshold - v).abs() < 1e-12);
        }
    }

    #[test]
    fn test_regime_variants_are_labeled() {
        let gen = ScenarioGenerator::default();
        for s in gen.regime_variants() {
            assert!(s.regime_classification.is_some(), "{} unlabeled", s.name);
        }
    }

    #[test]
    fn test_recompute_matches_constructor() {
        let gen = ScenarioGenerator::default();
        let base = gen.baseline();
        assert_eq!(base.scenario_id, base.compute_id());
    }
}
