//! Append-only strategy memory with confidence-scored insights.
//!
//! Insights are never deleted; they are updated with new supporting
//! scenarios/regimes or contradicted. Confidence is a pure function of the
//! insight's metadata and is recomputed on every update, never stored as an
//! independent number. That recomputation is the central invariant of this
//! module.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::evaluator::ScenarioComparison;
use crate::logging::{json_log, obj, v_int, v_num, v_str, Domain};

pub const MEMORY_VERSION: &str = "1.0";

/// The three append-only insight categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    WinningPattern,
    FailureMode,
    RegimeHeuristic,
}

impl InsightKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsightKind::WinningPattern => "winning_pattern",
            InsightKind::FailureMode => "failure_mode",
            InsightKind::RegimeHeuristic => "regime_heuristic",
        }
    }
}

/// Confidence components. The score itself is always derived from these.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InsightConfidence {
    pub supporting_scenarios: u32,
    pub regime_count: u32,
    /// 0..1, how stable the effect is across parameter variations.
    pub parameter_robustness: f64,
    pub contradiction_count: u32,
    /// Epoch seconds of the most recent contradiction.
    pub last_contradicted: Option<u64>,
}

impl InsightConfidence {
    /// confidence = clamp(0, 1,
    ///     min(1, 0.3 + 0.1 * scenarios)
    ///   + min(0.2, 0.05 * regimes)
    ///   + 0.2 * robustness
    ///   - min(0.3, 0.1 * contradictions))
    pub fn score(&self) -> f64 {
        let support = (0.3 + 0.1 * self.supporting_scenarios as f64).min(1.0);
        let breadth = (0.05 * self.regime_count as f64).min(0.2);
        let robustness = 0.2 * self.parameter_robustness;
        let penalty = (0.1 * self.contradiction_count as f64).min(0.3);
        (support + breadth + robustness - penalty).clamp(0.0, 1.0)
    }
}

/// One accumulated insight. Mutable by update, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyInsight {
    pub insight_id: String,
    pub kind: InsightKind,
    pub description: String,
    pub supporting_scenario_ids: Vec<String>,
    pub regime_coverage: Vec<String>,
    /// Free-form evidence metrics (delta values etc.) attached at creation.
    pub evidence: BTreeMap<String, f64>,
    pub confidence: InsightConfidence,
    pub created_at: u64,
    pub updated_at: u64,
}

impl StrategyInsight {
    pub fn confidence_score(&self) -> f64 {
        self.confidence.score()
    }

    pub fn is_weak(&self) -> bool {
        self.confidence_score() < 0.5
    }
}

/// Classifies a free-text insight string into a kind + default confidence.
///
/// The default keyword matcher is a known soft edge; swapping in a better
/// classifier must not change the per-category default confidences.
pub trait InsightClassifier {
    fn classify(&self, text: &str) -> (InsightKind, f64);
}

/// Keyword rules: "better" -> winning@0.7, "fails"/"collapse" -> failure@0.8,
/// anything else -> regime heuristic@0.6.
#[derive(Debug, Clone, Default)]
pub struct KeywordClassifier;

impl InsightClassifier for KeywordClassifier {
    fn classify(&self, text: &str) -> (InsightKind, f64) {
        let lower = text.to_lowercase();
        if lower.contains("fails") || lower.contains("collapse") {
            (InsightKind::FailureMode, 0.8)
        } else if lower.contains("better") {
            (InsightKind::WinningPattern, 0.7)
        } else {
            (InsightKind::RegimeHeuristic, 0.6)
        }
    }
}

/// Serialized shape of the memory file (spec'd external format).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MemoryFile {
    winning_archetypes: Vec<StrategyInsight>,
    failure_modes: Vec<StrategyInsight>,
    regime_heuristics: Vec<StrategyInsight>,
    last_updated: u64,
    total_insights: usize,
    version: String,
}

/// The strategy memory store.
#[derive(Debug)]
pub struct StrategyMemory {
    path: PathBuf,
    insights: Vec<StrategyInsight>,
    next_seq: u64,
}

impl StrategyMemory {
    /// Open a memory store at `path`. A missing file yields an empty store.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let insights = match std::fs::read_to_string(&path) {
            Ok(content) => {
                let file: MemoryFile = serde_json::from_str(&content)
                    .with_context(|| format!("corrupt memory file at {}", path.display()))?;
                let mut all = file.winning_archetypes;
                all.extend(file.failure_modes);
                all.extend(file.regime_heuristics);
                all
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("reading memory file at {}", path.display()));
            }
        };
        let next_seq = insights.len() as u64;
        Ok(Self { path, insights, next_seq })
    }

    pub fn len(&self) -> usize {
        self.insights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insights.is_empty()
    }

    pub fn insights(&self) -> &[StrategyInsight] {
        &self.insights
    }

    pub fn get(&self, insight_id: &str) -> Option<&StrategyInsight> {
        self.insights.iter().find(|i| i.insight_id == insight_id)
    }

    pub fn by_kind(&self, kind: InsightKind) -> impl Iterator<Item = &StrategyInsight> {
        self.insights.iter().filter(move |i| i.kind == kind)
    }

    /// Weak insights: recomputed confidence under 0.5.
    pub fn weak_insights(&self) -> Vec<&StrategyInsight> {
        self.insights.iter().filter(|i| i.is_weak()).collect()
    }

    /// Regime ids covered by at least one insight, with insight counts.
    pub fn regime_coverage(&self) -> BTreeMap<String, usize> {
        let mut coverage = BTreeMap::new();
        for insight in &self.insights {
            for regime in &insight.regime_coverage {
                *coverage.entry(regime.clone()).or_insert(0) += 1;
            }
        }
        coverage
    }

    /// Append a new insight. Initial robustness seeds the confidence model
    /// from the classifier's default for the category.
    pub fn add_insight(
        &mut self,
        kind: InsightKind,
        description: &str,
        scenario_id: &str,
        regime_id: Option<&str>,
        evidence: BTreeMap<String, f64>,
        default_confidence: f64,
        now: u64,
    ) -> String {
        let insight_id = format!("ins-{:04}", self.next_seq);
        self.next_seq += 1;
        let confidence = InsightConfidence {
            supporting_scenarios: 1,
            regime_count: regime_id.is_some() as u32,
            // Map the classifier's default onto the robustness component so
            // a fresh failure-mode insight starts stronger than a fresh
            // regime heuristic, per-category constants preserved.
            parameter_robustness: default_confidence.clamp(0.0, 1.0),
            contradiction_count: 0,
            last_contradicted: None,
        };
        self.insights.push(StrategyInsight {
            insight_id: insight_id.clone(),
            kind,
            description: description.to_string(),
            supporting_scenario_ids: vec![scenario_id.to_string()],
            regime_coverage: regime_id.map(str::to_string).into_iter().collect(),
            evidence,
            confidence,
            created_at: now,
            updated_at: now,
        });
        json_log(
            Domain::Memory,
            "insight.added",
            obj(&[
                ("insight_id", v_str(&insight_id)),
                ("kind", v_str(kind.as_str())),
                ("scenario_id", v_str(scenario_id)),
            ]),
        );
        insight_id
    }

    /// Update an insight: either add support (new scenario and/or regime, if
    /// not already present) or record a contradiction. Support and
    /// contradiction are mutually exclusive per call.
    pub fn update_insight(
        &mut self,
        insight_id: &str,
        scenario_id: Option<&str>,
        regime_id: Option<&str>,
        contradicts: bool,
        now: u64,
    ) -> Result<f64> {
        let insight = self
            .insights
            .iter_mut()
            .find(|i| i.insight_id == insight_id)
            .with_context(|| format!("no such insight: {}", insight_id))?;

        if contradicts {
            insight.confidence.contradiction_count += 1;
            insight.confidence.last_contradicted = Some(now);
        } else {
            if let Some(sid) = scenario_id {
                if !insight.supporting_scenario_ids.iter().any(|s| s == sid) {
                    insight.supporting_scenario_ids.push(sid.to_string());
                    insight.confidence.supporting_scenarios += 1;
                }
            }
            if let Some(rid) = regime_id {
                if !insight.regime_coverage.iter().any(|r| r == rid) {
                    insight.regime_coverage.push(rid.to_string());
                    insight.confidence.regime_count += 1;
                }
            }
        }
        insight.updated_at = now;
        let score = insight.confidence.score();
        json_log(
            Domain::Memory,
            "insight.updated",
            obj(&[
                ("insight_id", v_str(insight_id)),
                ("contradicts", json!(contradicts)),
                ("confidence", v_num(score)),
                ("contradictions", v_int(insight.confidence.contradiction_count as i64)),
            ]),
        );
        Ok(score)
    }

    /// Classify one insight string and either merge it into a matching
    /// existing insight (as new support) or append it as a new one. Returns
    /// the id touched.
    pub fn ingest_text(
        &mut self,
        text: &str,
        scenario_id: &str,
        regime_id: Option<&str>,
        evidence: BTreeMap<String, f64>,
        classifier: &dyn InsightClassifier,
        now: u64,
    ) -> String {
        let (kind, default_confidence) = classifier.classify(text);
        let existing = self
            .insights
            .iter()
            .find(|i| i.kind == kind && i.description == text)
            .map(|i| i.insight_id.clone());
        match existing {
            Some(id) => {
                let _ = self.update_insight(&id, Some(scenario_id), regime_id, false, now);
                id
            }
            None => self.add_insight(
                kind,
                text,
                scenario_id,
                regime_id,
                evidence,
                default_confidence,
                now,
            ),
        }
    }

    /// Fold a scenario comparison into memory, one `ingest_text` per
    /// generated insight string. Returns ids touched.
    pub fn ingest_comparison(
        &mut self,
        comparison: &ScenarioComparison,
        classifier: &dyn InsightClassifier,
        now: u64,
    ) -> Vec<String> {
        let mut touched = Vec::new();
        for text in &comparison.insights {
            let mut evidence = BTreeMap::new();
            evidence.insert("return_delta".to_string(), comparison.return_delta);
            evidence.insert("sharpe_delta".to_string(), comparison.sharpe_delta);
            evidence.insert("drawdown_delta".to_string(), comparison.drawdown_delta);
            touched.push(self.ingest_text(
                text,
                &comparison.variant_scenario_id,
                comparison.dominant_regime.as_deref(),
                evidence,
                classifier,
                now,
            ));
        }
        touched
    }

    /// Persist the whole store atomically: write a temp file in the target
    /// directory, then rename over the destination. On failure the in-memory
    /// state stays intact and usable.
    pub fn save(&self, now: u64) -> Result<()> {
        let mut file = MemoryFile {
            last_updated: now,
            total_insights: self.insights.len(),
            version: MEMORY_VERSION.to_string(),
            ..Default::default()
        };
        for insight in &self.insights {
            match insight.kind {
                InsightKind::WinningPattern => file.winning_archetypes.push(insight.clone()),
                InsightKind::FailureMode => file.failure_modes.push(insight.clone()),
                InsightKind::RegimeHeuristic => file.regime_heuristics.push(insight.clone()),
            }
        }
        let payload = serde_json::to_string_pretty(&file)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, payload)
            .and_then(|_| std::fs::rename(&tmp, &self.path))
            .with_context(|| format!("failed to persist memory to {}", self.path.display()))?;
        json_log(
            Domain::Memory,
            "memory.saved",
            obj(&[
                ("path", v_str(&self.path.display().to_string())),
                ("total_insights", v_int(self.insights.len() as i64)),
            ]),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, StrategyMemory) {
        let dir = tempfile::tempdir().unwrap();
        let store = StrategyMemory::open(dir.path().join("memory.json")).unwrap();
        (dir, store)
    }

    fn seeded(store: &mut StrategyMemory) -> String {
        store.add_insight(
            InsightKind::WinningPattern,
            "higher trust threshold performs better in calm regimes",
            "scn-1",
            Some("low_up_normal_easing"),
            BTreeMap::new(),
            0.7,
            1_000,
        )
    }

    #[test]
    fn test_open_missing_file_is_empty() {
        let (_dir, store) = temp_store();
        assert!(store.is_empty());
    }

    #[test]
    fn test_open_unreadable_path_is_an_error_not_an_empty_store() {
        // An empty store here would let the next save() clobber real history.
        let dir = tempfile::tempdir().unwrap();
        let err = StrategyMemory::open(dir.path()).unwrap_err();
        assert!(err.to_string().contains("reading memory file"));
    }

    #[test]
    fn test_confidence_formula() {
        let c = InsightConfidence {
            supporting_scenarios: 2,
            regime_count: 1,
            parameter_robustness: 0.5,
            contradiction_count: 1,
            last_contradicted: Some(0),
        };
        // min(1, 0.3+0.2) + min(0.2, 0.05) + 0.2*0.5 - min(0.3, 0.1)
        let expected = 0.5 + 0.05 + 0.1 - 0.1;
        assert!((c.score() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_support_never_decreases_confidence() {
        let (_dir, mut store) = temp_store();
        let id = seeded(&mut store);
        let before = store.get(&id).unwrap().confidence_score();
        let after = store.update_insight(&id, Some("scn-2"), None, false, 2_000).unwrap();
        assert!(after >= before);
        let after_regime = store
            .update_insight(&id, None, Some("high_down_normal_tightening"), false, 3_000)
            .unwrap();
        assert!(after_regime >= after);
    }

    #[test]
    fn test_contradiction_never_increases_confidence() {
        let (_dir, mut store) = temp_store();
        let id = seeded(&mut store);
        let before = store.get(&id).unwrap().confidence_score();
        let after = store.update_insight(&id, None, None, true, 2_000).unwrap();
        assert!(after <= before);
    }

    #[test]
    fn test_double_contradiction() {
        let (_dir, mut store) = temp_store();
        let id = seeded(&mut store);
        let baseline = store.get(&id).unwrap().confidence_score();
        store.update_insight(&id, None, None, true, 2_000).unwrap();
        let after_two = store.update_insight(&id, None, None, true, 3_000).unwrap();
        let insight = store.get(&id).unwrap();
        assert_eq!(insight.confidence.contradiction_count, 2);
        assert_eq!(insight.confidence.last_contradicted, Some(3_000));
        assert!(after_two < baseline);
    }

    #[test]
    fn test_duplicate_support_not_recounted() {
        let (_dir, mut store) = temp_store();
        let id = seeded(&mut store);
        store.update_insight(&id, Some("scn-1"), None, false, 2_000).unwrap();
        assert_eq!(store.get(&id).unwrap().confidence.supporting_scenarios, 1);
    }

    #[test]
    fn test_is_weak_threshold() {
        let (_dir, mut store) = temp_store();
        let id = store.add_insight(
            InsightKind::RegimeHeuristic,
            "sideways markets favour shorter cooldowns",
            "scn-9",
            None,
            BTreeMap::new(),
            0.0,
            1_000,
        );
        // 0.4 support + 0 breadth + 0 robustness = 0.4 < 0.5
        assert!(store.get(&id).unwrap().is_weak());
    }

    #[test]
    fn test_keyword_classifier_constants() {
        let c = KeywordClassifier;
        assert_eq!(
            c.classify("variant returns 3.0% better than baseline"),
            (InsightKind::WinningPattern, 0.7)
        );
        assert_eq!(
            c.classify("strategy fails under tightening"),
            (InsightKind::FailureMode, 0.8)
        );
        assert_eq!(
            c.classify("sharpe collapses in stressed liquidity"),
            (InsightKind::FailureMode, 0.8)
        );
        assert_eq!(
            c.classify("neutral markets show mild drift"),
            (InsightKind::RegimeHeuristic, 0.6)
        );
    }

    #[test]
    fn test_ingest_text_merges_identical_descriptions() {
        let (_dir, mut store) = temp_store();
        let classifier = KeywordClassifier;
        let text = "variant returns 2.0% better than baseline";
        let a = store.ingest_text(text, "scn-1", None, BTreeMap::new(), &classifier, 1_000);
        let b = store.ingest_text(text, "scn-2", None, BTreeMap::new(), &classifier, 2_000);
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&a).unwrap().confidence.supporting_scenarios, 2);
    }

    #[test]
    fn test_save_and_reload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.json");
        let mut store = StrategyMemory::open(&path).unwrap();
        let id = seeded(&mut store);
        store.update_insight(&id, None, None, true, 2_000).unwrap();
        store.save(2_000).unwrap();

        let reloaded = StrategyMemory::open(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        let insight = reloaded.get(&id).unwrap();
        assert_eq!(insight.confidence.contradiction_count, 1);
        // Confidence is recomputed from metadata on the reloaded insight.
        assert!((insight.confidence_score() - store.get(&id).unwrap().confidence_score()).abs() < 1e-12);
    }
}
