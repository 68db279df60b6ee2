//! Sleeve Allocator - Main Entry Point
//!
//! Plans one cycle from a JSON input file, shows persisted sleeve state, or
//! runs the weekly simulation.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sleeve_allocator::backtest::{SimulationConfig, SleeveSimulator};
use sleeve_allocator::config::Config;
use sleeve_allocator::persistence::{open_store, SleeveStateStore};
use sleeve_allocator::planner::{CycleInput, CyclePlan, CyclePlanner};
use sleeve_allocator::strategy::options::{SleeveStatus, StaticChain};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Sleeve Allocator CLI
#[derive(Parser)]
#[command(name = "sleeve-allocator")]
#[command(version, about = "Core ETF rebalancing with insurance and growth option sleeves")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan one cycle and print the plan as JSON
    Plan {
        /// Path to the cycle input JSON
        #[arg(short, long)]
        input: String,

        /// Optional option chain snapshot (JSON array of candidates)
        #[arg(short, long)]
        chain: Option<String>,

        /// Print a short report instead of JSON
        #[arg(long)]
        brief: bool,
    },

    /// Show persisted sleeve state for the configured account
    Status,

    /// Run the weekly simulation
    Simulate {
        /// Number of weekly cycles
        #[arg(short, long, default_value = "16")]
        weeks: u32,

        /// Initial account value
        #[arg(short = 'n', long, default_value = "100000")]
        initial_nav: Decimal,

        /// Weeks spent in each market phase
        #[arg(long, default_value = "4")]
        weeks_per_phase: u32,

        /// Print per-week reports as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let config = Config::load().context("Failed to load configuration")?;
    info!(
        environment = %config.environment,
        account = %config.account_key,
        "Sleeve Allocator v{}",
        env!("CARGO_PKG_VERSION")
    );

    match cli.command {
        Commands::Plan {
            input,
            chain,
            brief,
        } => run_plan(config, &input, chain.as_deref(), brief).await,
        Commands::Status => show_status(config),
        Commands::Simulate {
            weeks,
            initial_nav,
            weeks_per_phase,
            json,
        } => {
            let sim = SimulationConfig {
                weeks,
                initial_nav,
                weeks_per_phase,
                ..Default::default()
            };
            run_simulation(config, sim, json).await
        }
    }
}

fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "sleeve-allocator.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer alive for the program duration
    Box::leak(Box::new(guard));

    // stdout carries the JSON plan, so console logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("sleeve_allocator=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stderr.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(false)
        .init();

    Ok(())
}

async fn run_plan(config: Config, input_path: &str, chain: Option<&str>, brief: bool) -> Result<()> {
    let raw = std::fs::read_to_string(input_path)
        .with_context(|| format!("Failed to read cycle input {}", input_path))?;
    let input: CycleInput = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse cycle input {}", input_path))?;

    let store: Arc<dyn SleeveStateStore> = Arc::from(open_store(&config)?);
    let mut planner = CyclePlanner::new(config, store)?;
    if let Some(path) = chain {
        let chain = StaticChain::from_file(path)?;
        planner = planner.with_chain(Arc::new(chain));
    }

    let plan = planner.run(&input).await?;
    if !plan.risk.approved {
        warn!(reasons = ?plan.risk.blocked_reasons, "Plan rejected by risk checks");
    }

    if brief {
        print_plan(&plan);
    } else {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    }
    Ok(())
}

fn print_plan(plan: &CyclePlan) {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              CYCLE PLAN {:<35}║", plan.run_id);
    println!("╚════════════════════════════════════════════════════════════╝");

    println!("\n💰 Budgets");
    println!("   ├─ NAV:              ${:.2}", plan.budgets.nav);
    println!("   ├─ Deploy Budget:    ${:.2}", plan.budgets.deploy_budget_usd);
    println!("   ├─ Reserve Budget:   ${:.2}", plan.reserve.reserve_budget);
    println!("   └─ Reserve Left:     ${:.2}", plan.reserve.remaining);

    println!("\n📈 Orders ({})", plan.orders.len());
    for order in &plan.orders {
        println!(
            "   ├─ {:?} {} {} @ ${:.2} [{}]",
            order.side,
            order.quantity().round_dp(4),
            order.symbol,
            order.reference_price,
            order.sleeve
        );
    }

    println!("\n🛡️ Sleeves");
    for sleeve in &plan.sleeves {
        println!(
            "   ├─ {}: {:?} → {:?}",
            sleeve.sleeve, sleeve.prior_status, sleeve.next_state.status
        );
    }

    let verdict = if plan.risk.approved { "APPROVED" } else { "REJECTED" };
    println!("\n⚖️ Risk: {}", verdict);
    for reason in &plan.risk.blocked_reasons {
        println!("   ├─ {}", reason);
    }
    println!();
}

fn show_status(config: Config) -> Result<()> {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              SLEEVE STATUS                                 ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    println!("\n   Environment: {}  Account: {}", config.environment, config.account_key);

    let store: Arc<dyn SleeveStateStore> = Arc::from(open_store(&config)?);
    let planner = CyclePlanner::new(config, store)?;

    for (kind, state) in planner.sleeve_states()? {
        println!("\n🛡️ {}", kind);
        println!("   ├─ Status:    {:?}", state.status);
        if state.status == SleeveStatus::Inactive {
            continue;
        }
        if let Some(symbol) = &state.contract_symbol {
            println!("   ├─ Contract:  {} x{}", symbol, state.contracts);
        }
        println!("   ├─ Premium:   ${:.2}", state.premium_usd);
        if let Some(opened) = state.opened_as_of {
            println!("   ├─ Opened:    {} ({})", fmt_time(opened), state.opened_run_id.as_deref().unwrap_or("-"));
        }
        if let Some(expiry) = state.expiry {
            println!("   ├─ Expiry:    {}", expiry);
        }
        if let Some(requested) = state.unwind_requested_as_of {
            println!("   └─ Unwind:    requested {}", fmt_time(requested));
        }
    }

    println!();
    Ok(())
}

fn fmt_time(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

async fn run_simulation(config: Config, sim: SimulationConfig, json: bool) -> Result<()> {
    let simulator = SleeveSimulator::new(config, sim)?;
    let summary = simulator.run().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", summary.summary());
        for week in &summary.weeks {
            println!(
                "   {:>3} {:<9} NAV ${:>12.2}  DD {:>5.2}%  ins {:<10} growth {:<10} {}",
                week.week,
                format!("{:?}", week.phase),
                week.nav,
                week.drawdown * dec!(100),
                format!("{:?}", week.insurance),
                format!("{:?}", week.growth),
                if week.approved { "" } else { "REJECTED" }
            );
        }
    }

    summary
        .check_invariants()
        .context("Simulation violated sleeve invariants")?;
    Ok(())
}
