//! CLI definition and dispatch.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::adapters::csv_adapter::CsvMarketData;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::paper_broker::PaperBroker;
use crate::domain::config_validation::validate_strategy_config;
use crate::domain::engine::{DayOutcome, Engine, Gate, TargetSelection};
use crate::domain::error::RotatraderError;
use crate::domain::position::HoldingsReport;
use crate::domain::regime::{self, RegimeRanking};
use crate::domain::session::SessionState;
use crate::domain::strategy::StrategyConfig;
use crate::logging::{DEFAULT_LEVEL, LogFormat, init_logging};
use crate::ports::config_port::ConfigPort;
use crate::ports::market_data_port::MarketDataPort;

#[derive(Parser, Debug)]
#[command(name = "rotatrader", about = "Factor rotation portfolio engine")]
pub struct Cli {
    /// Override `[logging] level`
    #[arg(long, global = true)]
    pub log_level: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate a strategy configuration
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Rank the regime reference instruments on a date
    Rank {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        data: PathBuf,
        #[arg(long)]
        date: NaiveDate,
    },
    /// Print the target list for a date
    Select {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        data: PathBuf,
        #[arg(long)]
        date: NaiveDate,
    },
    /// Run the daily schedule over a date range against a paper broker
    Simulate {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        data: PathBuf,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
        /// Also run the weekly adjustment on the first day
        #[arg(long)]
        rebalance_on_start: bool,
    },
}

impl Command {
    pub fn config_path(&self) -> &PathBuf {
        match self {
            Command::Validate { config }
            | Command::Rank { config, .. }
            | Command::Select { config, .. }
            | Command::Simulate { config, .. } => config,
        }
    }
}

pub fn run(cli: Cli) -> ExitCode {
    let adapter = match load_config(cli.command.config_path()) {
        Ok(a) => a,
        Err(code) => return code,
    };
    init_logging_from(&adapter, cli.log_level.as_deref());

    let strategy = match validate_strategy_config(&adapter) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };

    let result = match &cli.command {
        Command::Validate { .. } => {
            print_strategy(&strategy);
            Ok(())
        }
        Command::Rank { data, date, .. } => load_data(data)
            .and_then(|market| rank_references(&strategy, &market, *date))
            .map(|ranking| print_ranking(&strategy, &ranking)),
        Command::Select { data, date, .. } => load_data(data)
            .and_then(|market| Engine::new(&strategy, &market).select_targets(&[], *date))
            .map(|selection| print_selection(&selection)),
        Command::Simulate {
            data,
            start,
            end,
            rebalance_on_start,
            ..
        } => load_data(data)
            .and_then(|market| {
                run_simulation(&strategy, &market, *start, *end, *rebalance_on_start)
            })
            .map(|summary| print_simulation(&summary)),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|err| {
        eprintln!("error: {err}");
        ExitCode::from(&err)
    })
}

pub fn load_data(path: &Path) -> Result<CsvMarketData, RotatraderError> {
    eprintln!("Loading market data from {}", path.display());
    CsvMarketData::open(path)
}

fn init_logging_from(config: &dyn ConfigPort, level_override: Option<&str>) {
    let level = level_override
        .map(str::to_string)
        .or_else(|| config.get_string("logging", "level"))
        .unwrap_or_else(|| DEFAULT_LEVEL.to_string());
    let format = config
        .get_string("logging", "format")
        .map(|f| LogFormat::parse(&f))
        .unwrap_or_default();
    init_logging(&level, format);
}

pub fn rank_references(
    strategy: &StrategyConfig,
    market: &dyn MarketDataPort,
    date: NaiveDate,
) -> Result<RegimeRanking, RotatraderError> {
    regime::rank(
        market,
        &strategy.regime.references,
        date,
        strategy.regime.window_days,
    )
}

/// Days simulated and the final account state.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationSummary {
    pub days: Vec<(NaiveDate, DayOutcome)>,
    pub holdings: HoldingsReport,
}

/// Run the full daily schedule for every trading day in `[start, end]`.
///
/// Each day settles the broker, refreshes quotes from the snapshot, then runs
/// the engine. The weekly adjustment runs on the configured weekday.
pub fn run_simulation(
    strategy: &StrategyConfig,
    market: &CsvMarketData,
    start: NaiveDate,
    end: NaiveDate,
    rebalance_on_start: bool,
) -> Result<SimulationSummary, RotatraderError> {
    let days = market.trading_days(start, end);
    if days.is_empty() {
        return Err(RotatraderError::data_unavailable(
            market.base_path().display().to_string(),
            format!("no trading days between {start} and {end}"),
        ));
    }

    let engine = Engine::new(strategy, market);
    let mut broker = PaperBroker::new(&strategy.paper, strategy.rebalance.lot_size);
    let mut session = SessionState::new();
    let codes = market.instrument_codes();
    let mut outcomes = Vec::with_capacity(days.len());

    for (i, day) in days.iter().enumerate() {
        broker.settle();
        broker.update_quotes(&market.snapshot(&codes, *day)?);
        let weekly = strategy.calendar.is_rebalance_day(*day) || (i == 0 && rebalance_on_start);
        let outcome = engine.run_day(&mut broker, &mut session, *day, weekly)?;
        outcomes.push((*day, outcome));
    }

    Ok(SimulationSummary {
        days: outcomes,
        holdings: engine.holdings_report(&broker),
    })
}

fn print_strategy(strategy: &StrategyConfig) {
    eprintln!("Strategy '{}' is valid", strategy.name);
    eprintln!(
        "  holdings: {} (max {:.0}% per category, lot {})",
        strategy.rebalance.stock_num,
        strategy.rebalance.max_category_share * 100.0,
        strategy.rebalance.lot_size
    );
    eprintln!("  universe: {}", strategy.rebalance.universe_index);
    let weights: Vec<String> = strategy
        .weights
        .weights
        .iter()
        .map(|w| format!("{}={:+}", w.factor, w.signed()))
        .collect();
    eprintln!("  factors:  {}", weights.join(", "));
    if strategy.regime.enabled {
        eprintln!(
            "  regime:   {} over {} days, risk-on {}",
            strategy.regime.references.join(", "),
            strategy.regime.window_days,
            strategy.regime.risk_on
        );
    }
    eprintln!(
        "  stoploss: {:?}/{:?}, loss {:.1}%, market drop {:.1}%",
        strategy.stoploss.mode,
        strategy.stoploss.order,
        strategy.stoploss.loss_limit * 100.0,
        strategy.stoploss.market_drop_limit * 100.0
    );
}

fn print_ranking(strategy: &StrategyConfig, ranking: &RegimeRanking) {
    println!(
        "{:<4} {:<14} {:>12} {:>8} {:>10}",
        "rank", "code", "annualized", "r2", "score"
    );
    for (i, s) in ranking.scores.iter().enumerate() {
        println!(
            "{:<4} {:<14} {:>11.2}% {:>8.4} {:>10.4}",
            i + 1,
            s.code,
            s.annualized_return * 100.0,
            s.r_squared,
            s.score
        );
    }
    if ranking.favours(&strategy.regime.risk_on) {
        println!("risk-on: {} leads, stock selection proceeds", strategy.regime.risk_on);
    } else {
        println!(
            "risk-off: {} leads, holdings would be liquidated",
            ranking.leader().unwrap_or("nothing")
        );
    }
}

fn print_selection(selection: &TargetSelection) {
    eprintln!(
        "Universe: {} kept, {} dropped; {} scored, {} incomplete",
        selection.filter.kept.len(),
        selection.filter.dropped.len(),
        selection.scoring.scored.len(),
        selection.scoring.incomplete.len()
    );
    if !selection.scoring.omitted_factors.is_empty() {
        eprintln!("Omitted factors: {:?}", selection.scoring.omitted_factors);
    }
    println!("{:<4} {:<14} {:>10} {}", "rank", "code", "score", "category");
    for (i, s) in selection.selection.selected.iter().enumerate() {
        println!("{:<4} {:<14} {:>10.4} {}", i + 1, s.code, s.score, s.category);
    }
    if !selection.selection.capped.is_empty() {
        eprintln!("Capped by category: {}", selection.selection.capped.join(", "));
    }
}

fn print_simulation(summary: &SimulationSummary) {
    for (day, outcome) in &summary.days {
        let gate = match outcome.weekly.as_ref().map(|w| &w.gate) {
            None => String::new(),
            Some(Gate::Proceed) => " weekly".to_string(),
            Some(other) => format!(" weekly {other:?}"),
        };
        let sold = outcome.weekly.as_ref().map_or(0, |w| w.report.sold.len())
            + outcome.stop_loss.report.sold.len()
            + outcome.afternoon.report.sold.len()
            + outcome.close.sold.len();
        let bought = outcome.weekly.as_ref().map_or(0, |w| w.report.bought.len())
            + outcome.afternoon.report.bought.len();
        eprintln!("{day}:{gate} sold {sold}, bought {bought}");
    }
    print_holdings(&summary.holdings);
}

pub fn print_holdings(report: &HoldingsReport) {
    println!(
        "{:<14} {:>10} {:>10} {:>9} {:>8} {:>12}",
        "code", "avg_cost", "price", "return", "qty", "value"
    );
    for line in &report.lines {
        println!(
            "{:<14} {:>10.3} {:>10.3} {:>8.2}% {:>8} {:>12.2}",
            line.code,
            line.avg_cost,
            line.price,
            line.return_pct * 100.0,
            line.quantity,
            line.market_value
        );
    }
    println!(
        "total {:.2} (start {:.2}, return {:.2}%)",
        report.total_value,
        report.starting_cash,
        report.account_return() * 100.0
    );
}
