//! Research lab CLI.
//!
//! Commands:
//!   run N                          - Run N research loop iterations
//!   simulate SYMBOL START END SET  - Run one campaign and print metrics
//!   memory                         - Show stored insights and confidence
//!   proposals                      - Show ranked experiment proposals
//!   regimes                        - List the fixed regime universe

use anyhow::{Context, Result};

use regimelab::config::LabConfig;
use regimelab::data::{CsvDataSource, MarketDataSource};
use regimelab::memory::{KeywordClassifier, StrategyMemory};
use regimelab::proposal::{CoverageView, ProposalAgent};
use regimelab::regime::all_regime_combinations;
use regimelab::research::{DefaultPlanner, ResearchLoop};
use regimelab::scenario::{ScenarioGenerator, TradingParams};
use regimelab::simulator::Simulator;
use regimelab::storage::RunIndex;

fn build_loop(config: LabConfig) -> Result<ResearchLoop> {
    let data = CsvDataSource::new(&config.data_dir);
    let memory = StrategyMemory::open(&config.memory_path)?;
    let index = RunIndex::open(&config.run_db)?;
    let generator = ScenarioGenerator::default();
    let simulator = Simulator::new(config.initial_capital);
    Ok(ResearchLoop::new(
        config,
        Box::new(data),
        simulator,
        generator.clone(),
        memory,
        ProposalAgent::default(),
        index,
        Box::new(KeywordClassifier),
        Box::new(DefaultPlanner::new(generator)),
    ))
}

fn cmd_run(iterations: u64) -> Result<()> {
    let config = LabConfig::from_env();
    let mut research = build_loop(config)?;
    for i in 1..=iterations {
        let summary = research.run_iteration(i);
        if summary.success {
            println!(
                "iteration {}: scenario {} ({}/{} campaigns, {} comparisons, {} new insights, {} proposals)",
                summary.iteration,
                summary.scenario_id,
                summary.campaigns_completed,
                summary.campaigns_expected,
                summary.comparisons.len(),
                summary.new_insights.len(),
                summary.proposals.len(),
            );
        } else {
            println!(
                "iteration {}: FAILED ({})",
                summary.iteration,
                summary.error.as_deref().unwrap_or("unknown"),
            );
        }
        if let Some(notes) = &summary.notes {
            println!("  notes: {notes}");
        }
    }
    Ok(())
}

fn cmd_simulate(symbol: &str, start: &str, end: &str, set_name: &str) -> Result<()> {
    let config = LabConfig::from_env();
    let start = chrono::NaiveDate::parse_from_str(start, "%Y-%m-%d")
        .context("start date must be YYYY-MM-DD")?;
    let end = chrono::NaiveDate::parse_from_str(end, "%Y-%m-%d")
        .context("end date must be YYYY-MM-DD")?;
    let params = match set_name {
        "aggressive" => TradingParams::aggressive(),
        "balanced" => TradingParams::balanced(),
        "conservative" => TradingParams::conservative(),
        other => anyhow::bail!("unknown param set '{other}' (aggressive|balanced|conservative)"),
    };
    let data = CsvDataSource::new(&config.data_dir);
    let bars = data.bars(symbol, start, end)?;
    let simulator = Simulator::new(config.initial_capital);
    let result = simulator.run_campaign(symbol, set_name, &params, &bars)?;
    println!("campaign {}:", result.campaign_name);
    println!("  bars:          {}", result.bars_processed);
    println!("  trades:        {}", result.total_trades);
    println!("  return:        {:+.2}%", result.total_return_pct);
    println!("  max drawdown:  {:.2}%", result.max_drawdown_pct);
    println!("  sharpe:        {:.3}", result.sharpe_ratio);
    println!("  profit factor: {:.2}", result.profit_factor);
    println!("  win rate:      {:.1}%", result.win_rate);
    for trade in &result.trades {
        println!(
            "  {} -> {}  {:+.2}% ({:?})",
            trade.entry_date, trade.exit_date, trade.pnl_pct, trade.exit_reason
        );
    }
    Ok(())
}

fn cmd_memory() -> Result<()> {
    let config = LabConfig::from_env();
    let memory = StrategyMemory::open(&config.memory_path)?;
    if memory.is_empty() {
        println!("memory is empty");
        return Ok(());
    }
    println!("{} insight(s):", memory.len());
    for insight in memory.insights() {
        println!(
            "  [{}] {} {:.2}  {}",
            insight.kind.as_str(),
            insight.insight_id,
            insight.confidence_score(),
            insight.description,
        );
        println!(
            "      scenarios={} regimes={} contradictions={}",
            insight.confidence.supporting_scenarios,
            insight.confidence.regime_count,
            insight.confidence.contradiction_count,
        );
    }
    println!(
        "{} weak (confidence < 0.5), {} regime(s) covered",
        memory.weak_insights().len(),
        memory.regime_coverage().len(),
    );
    Ok(())
}

fn cmd_proposals() -> Result<()> {
    let config = LabConfig::from_env();
    let memory = StrategyMemory::open(&config.memory_path)?;
    let agent = ProposalAgent::default();
    // Insight regime coverage stands in for run history when the CLI is
    // asked for proposals outside a loop run.
    let coverage = CoverageView {
        tested_param_values: Default::default(),
        regime_scenarios: memory.regime_coverage(),
    };
    let proposals = agent.generate_proposals(&memory, &coverage, config.max_proposals);
    for p in &proposals {
        println!(
            "  [{}] p{} gain={:.2} {}",
            p.kind.as_str(),
            p.priority,
            p.expected_info_gain,
            p.title,
        );
    }
    Ok(())
}

fn cmd_regimes() {
    let combos = all_regime_combinations();
    println!("{} regimes:", combos.len());
    for r in combos {
        println!("  {}", r.regime_id());
    }
}

fn usage() {
    println!("Research Lab - comparative strategy learning\n");
    println!("Commands:");
    println!("  run <N>                            - Run N loop iterations");
    println!("  simulate <SYMBOL> <START> <END> <SET> - One campaign, printed");
    println!("  memory                             - Show stored insights");
    println!("  proposals                          - Show ranked proposals");
    println!("  regimes                            - List the regime universe");
    println!("\nExamples:");
    println!("  lab run 5");
    println!("  lab simulate BTC-USD 2021-01-01 2021-12-31 balanced");
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        usage();
        return;
    }
    let outcome = match args[1].as_str() {
        "run" | "r" => {
            let n = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(1);
            cmd_run(n)
        }
        "simulate" | "sim" => match (args.get(2), args.get(3), args.get(4), args.get(5)) {
            (Some(symbol), Some(start), Some(end), Some(set)) => {
                cmd_simulate(symbol, start, end, set)
            }
            _ => {
                eprintln!("Usage: lab simulate <SYMBOL> <START> <END> <SET>");
                return;
            }
        },
        "memory" | "m" => cmd_memory(),
        "proposals" | "p" => cmd_proposals(),
        "regimes" => {
            cmd_regimes();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            usage();
            return;
        }
    };
    if let Err(err) = outcome {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}
