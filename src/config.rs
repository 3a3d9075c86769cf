//! Runtime configuration for the research loop.

/// Loop-wide configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct LabConfig {
    /// Directory holding `{symbol}.csv` OHLCV files.
    pub data_dir: String,
    /// Directory for persisted scenario-result artifacts.
    pub out_dir: String,
    /// SQLite run-index path.
    pub run_db: String,
    /// Strategy memory JSON path.
    pub memory_path: String,
    /// Starting cash per campaign.
    pub initial_capital: f64,
    /// Max proposals returned per iteration.
    pub max_proposals: usize,
    /// How many prior results each new result is compared against.
    pub compare_depth: usize,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            out_dir: "out/results".to_string(),
            run_db: "out/run_index.db".to_string(),
            memory_path: "out/strategy_memory.json".to_string(),
            initial_capital: 100_000.0,
            max_proposals: 10,
            compare_depth: 5,
        }
    }
}

impl LabConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            data_dir: std::env::var("DATA_DIR").unwrap_or(d.data_dir),
            out_dir: std::env::var("OUT_DIR").unwrap_or(d.out_dir),
            run_db: std::env::var("RUN_DB").unwrap_or(d.run_db),
            memory_path: std::env::var("MEMORY_PATH").unwrap_or(d.memory_path),
            initial_capital: std::env::var("INITIAL_CAPITAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(d.initial_capital),
            max_proposals: std::env::var("MAX_PROPOSALS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(d.max_proposals),
            compare_depth: std::env::var("COMPARE_DEPTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(d.compare_depth),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = LabConfig::default();
        assert_eq!(cfg.compare_depth, 5);
        assert!(cfg.initial_capital > 0.0);
    }
}
