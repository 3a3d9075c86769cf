//! Result artifacts and the run index.
//!
//! Each iteration writes one JSON artifact (the scenario results file) with a
//! validation block, atomically via temp + rename, then records a row in a
//! sqlite run index. The index answers the orchestrator's "most recent prior
//! artifacts" query; the JSON files remain the durable contract.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::logging::{json_log, obj, v_bool, v_int, v_num, v_str, Domain};
use crate::scenario::{ScenarioDefinition, TradingParams};
use crate::simulator::CampaignResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunValidation {
    pub hash: String,
    pub total_trades_executed: usize,
    pub total_bars_processed: usize,
    pub campaigns_completed: usize,
    pub campaigns_expected: usize,
    pub completion_rate: f64,
    pub verified: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResultsFile {
    pub run_timestamp: u64,
    pub total_campaigns: usize,
    pub scenarios: Vec<ScenarioDefinition>,
    pub param_sets: BTreeMap<String, TradingParams>,
    pub results: Vec<CampaignResult>,
    pub validation: RunValidation,
}

impl ScenarioResultsFile {
    /// Assemble the artifact and its validation block from completed
    /// campaigns. A run with zero executed trades is never marked verified,
    /// whatever its completion rate says.
    pub fn assemble(
        run_timestamp: u64,
        scenarios: Vec<ScenarioDefinition>,
        param_sets: BTreeMap<String, TradingParams>,
        results: Vec<CampaignResult>,
        campaigns_expected: usize,
    ) -> Result<Self> {
        let total_trades_executed: usize = results.iter().map(|r| r.total_trades).sum();
        let total_bars_processed: usize = results.iter().map(|r| r.bars_processed).sum();
        let campaigns_completed = results.len();
        let completion_rate = if campaigns_expected == 0 {
            0.0
        } else {
            campaigns_completed as f64 / campaigns_expected as f64
        };
        let verified = total_trades_executed > 0 && campaigns_completed == campaigns_expected;
        let validation = RunValidation {
            hash: results_hash(&results)?,
            total_trades_executed,
            total_bars_processed,
            campaigns_completed,
            campaigns_expected,
            completion_rate,
            verified,
        };
        Ok(Self {
            run_timestamp,
            total_campaigns: campaigns_completed,
            scenarios,
            param_sets,
            results,
            validation,
        })
    }

    /// Write the artifact atomically under `dir` and return its path. The
    /// iteration number keeps filenames unique when two iterations land in
    /// the same second.
    pub fn write(&self, dir: &Path, iteration: u64) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating output dir {}", dir.display()))?;
        let scenario_id = self
            .scenarios
            .first()
            .map(|s| s.scenario_id.as_str())
            .unwrap_or("none");
        let path = dir.join(format!(
            "results_{}_{:04}_{}.json",
            self.run_timestamp, iteration, scenario_id
        ));
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(self)?;
        std::fs::write(&tmp, body)
            .with_context(|| format!("writing artifact temp file {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("renaming artifact into place at {}", path.display()))?;
        json_log(
            Domain::System,
            "artifact.written",
            obj(&[
                ("path", v_str(&path.to_string_lossy())),
                ("campaigns", v_int(self.total_campaigns as i64)),
                ("trades", v_int(self.validation.total_trades_executed as i64)),
                ("completion_rate", v_num(self.validation.completion_rate)),
                ("verified", v_bool(self.validation.verified)),
            ]),
        );
        Ok(path)
    }

    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading artifact {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("parsing artifact {}", path.display()))
    }
}

/// SHA-256 over the serialized results, truncated to 16 hex chars, same
/// shape as scenario ids.
fn results_hash(results: &[CampaignResult]) -> Result<String> {
    let canonical = serde_json::to_string(results)?;
    let digest = Sha256::digest(canonical.as_bytes());
    Ok(hex::encode(digest)[..16].to_string())
}

#[derive(Debug, Clone)]
pub struct RunRecord {
    pub iteration: u64,
    pub ts: u64,
    pub scenario_id: String,
    pub artifact_path: PathBuf,
    pub campaigns: usize,
    pub trades: usize,
}

pub struct RunIndex {
    conn: Connection,
}

impl RunIndex {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS runs (
                iteration INTEGER NOT NULL,
                ts INTEGER NOT NULL,
                scenario_id TEXT NOT NULL,
                artifact_path TEXT NOT NULL,
                campaigns INTEGER NOT NULL,
                trades INTEGER NOT NULL
            );
            COMMIT;",
        )?;
        Ok(Self { conn })
    }

    pub fn record(&mut self, rec: &RunRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO runs (iteration, ts, scenario_id, artifact_path, campaigns, trades)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                rec.iteration as i64,
                rec.ts as i64,
                rec.scenario_id,
                rec.artifact_path.to_string_lossy(),
                rec.campaigns as i64,
                rec.trades as i64
            ],
        )?;
        Ok(())
    }

    /// Most recent runs first, up to `n`.
    pub fn recent(&self, n: usize) -> Result<Vec<RunRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT iteration, ts, scenario_id, artifact_path, campaigns, trades
             FROM runs ORDER BY ts DESC, iteration DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![n as i64], |row| {
            Ok(RunRecord {
                iteration: row.get::<_, i64>(0)? as u64,
                ts: row.get::<_, i64>(1)? as u64,
                scenario_id: row.get(2)?,
                artifact_path: PathBuf::from(row.get::<_, String>(3)?),
                campaigns: row.get::<_, i64>(4)? as usize,
                trades: row.get::<_, i64>(5)? as usize,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::ScenarioGenerator;
    use chrono::NaiveDate;

    fn sample_result(trades: usize) -> CampaignResult {
        CampaignResult {
            campaign_name: "BTC-USD_balanced".to_string(),
            symbol: "BTC-USD".to_string(),
            start_date: NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2021, 12, 31).unwrap(),
            param_set: "balanced".to_string(),
            params: TradingParams::balanced(),
            initial_capital: 100_000.0,
            final_equity: 103_000.0,
            total_return_pct: 3.0,
            max_drawdown_pct: 1.2,
            sharpe_ratio: 0.8,
            profit_factor: 2.1,
            win_rate: 60.0,
            avg_win_pct: 4.0,
            avg_loss_pct: -2.0,
            total_trades: trades,
            bars_processed: 365,
            trades: vec![],
        }
    }

    #[test]
    fn test_zero_trades_never_verified() {
        let file = ScenarioResultsFile::assemble(
            1_700_000_000,
            vec![],
            BTreeMap::new(),
            vec![sample_result(0)],
            1,
        )
        .unwrap();
        assert_eq!(file.validation.total_trades_executed, 0);
        assert!(!file.validation.verified);
    }

    #[test]
    fn test_incomplete_run_not_verified() {
        let file = ScenarioResultsFile::assemble(
            1_700_000_000,
            vec![],
            BTreeMap::new(),
            vec![sample_result(4)],
            2,
        )
        .unwrap();
        assert!((file.validation.completion_rate - 0.5).abs() < 1e-9);
        assert!(!file.validation.verified);
    }

    #[test]
    fn test_artifact_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let generator = ScenarioGenerator::default();
        let scenario = generator.baseline();
        let file = ScenarioResultsFile::assemble(
            1_700_000_000,
            vec![scenario],
            ScenarioGenerator::standard_param_sets(),
            vec![sample_result(4)],
            1,
        )
        .unwrap();
        assert!(file.validation.verified);
        let path = file.write(dir.path(), 1).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
        let reread = ScenarioResultsFile::read(&path).unwrap();
        assert_eq!(reread.validation.hash, file.validation.hash);
        assert_eq!(reread.total_campaigns, 1);
    }

    #[test]
    fn test_same_second_iterations_keep_separate_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let generator = ScenarioGenerator::default();
        let file = ScenarioResultsFile::assemble(
            1_700_000_000,
            vec![generator.baseline()],
            ScenarioGenerator::standard_param_sets(),
            vec![sample_result(4)],
            1,
        )
        .unwrap();
        let first = file.write(dir.path(), 1).unwrap();
        let second = file.write(dir.path(), 2).unwrap();
        assert_ne!(first, second);
        assert!(first.exists());
        assert!(second.exists());
    }

    #[test]
    fn test_run_index_recent_ordering() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = RunIndex::open(dir.path().join("runs.db")).unwrap();
        for i in 1..=7u64 {
            index
                .record(&RunRecord {
                    iteration: i,
                    ts: 1_000 + i,
                    scenario_id: format!("scn-{i}"),
                    artifact_path: dir.path().join(format!("r{i}.json")),
                    campaigns: 2,
                    trades: 3,
                })
                .unwrap();
        }
        let recent = index.recent(5).unwrap();
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0].iteration, 7);
        assert_eq!(recent[4].iteration, 3);
    }
}
