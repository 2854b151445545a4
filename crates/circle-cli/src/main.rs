//! roscactl
//!
//! Drives circle flows against an in-process simulated ledger.
//! `demo` runs a full circle to completion on a manual clock; `watch` runs a
//! live circle on the wall clock with a ticking round timer.

use anyhow::{anyhow, Result};
use circle_core::{
    describe_period, CircleFilter, CreateCircleRequest, DirectoryStats, FlowError, FlowHandle,
    FlowOrchestrator, NotificationCenter, NotificationEvent, RoundTimer, SnapshotAggregator,
};
use circle_types::{Address, CircleId, CircleParams, CircleState, LedgerCall, TokenInfo};
use clap::{Parser, Subcommand};
use ledger_gateway::{LedgerGateway, SystemClock};
use ledger_sim::{BlockProducer, BlockProducerConfig, SimulatedLedger};
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;

use config::ClientConfig;

/// ROSCA circle client
#[derive(Parser, Debug)]
#[command(name = "roscactl")]
#[command(about = "Run rotating-savings circle flows against a simulated ledger", long_about = None)]
struct Args {
    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Block time in milliseconds (overrides the config file)
    #[arg(long)]
    block_time_ms: Option<u64>,

    /// Log every block, not just non-empty ones
    #[arg(short, long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one circle from creation to collateral withdrawal
    Demo {
        /// Number of members
        #[arg(long, default_value = "3")]
        members: usize,

        /// Payment token symbol
        #[arg(long, default_value = "USDC")]
        token: String,

        /// Contribution per round in whole tokens
        #[arg(long, default_value = "100")]
        contribution: String,
    },
    /// Run a live circle with a short period and watch its rounds
    Watch {
        /// Number of members
        #[arg(long, default_value = "2")]
        members: usize,

        /// Round length in seconds
        #[arg(long, default_value = "5")]
        period_secs: u64,

        /// Stop after this many seconds
        #[arg(long, default_value = "30")]
        duration_secs: u64,
    },
    /// Print the effective configuration as JSON
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };
    if let Some(block_time_ms) = args.block_time_ms {
        config.block_time_ms = block_time_ms;
    }

    match args.command {
        Command::Demo {
            members,
            ref token,
            ref contribution,
        } => run_demo(&config, args.verbose, members, token, contribution).await,
        Command::Watch {
            members,
            period_secs,
            duration_secs,
        } => run_watch(&config, args.verbose, members, period_secs, duration_secs).await,
        Command::Config => {
            println!("{}", config.to_json()?);
            Ok(())
        }
    }
}

/// Ledger, block loop, aggregator and refresh loop
struct Session {
    ledger: Arc<SimulatedLedger>,
    aggregator: Arc<SnapshotAggregator>,
    config: ClientConfig,
    stop: Arc<AtomicBool>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl Session {
    fn start(ledger: SimulatedLedger, config: &ClientConfig, verbose: bool) -> Self {
        let ledger = Arc::new(ledger);
        let producer = BlockProducer::new(
            ledger.clone(),
            BlockProducerConfig {
                block_time_ms: config.block_time_ms,
                verbose,
                ..BlockProducerConfig::default()
            },
        );
        let stop = producer.stop_handle();
        let aggregator = Arc::new(SnapshotAggregator::new(
            ledger.clone(),
            config.core.tokens.clone(),
        ));
        let tasks = vec![producer.spawn(), aggregator.clone().spawn_refresh()];

        Self {
            ledger,
            aggregator,
            config: config.clone(),
            stop,
            tasks,
        }
    }

    /// Orchestrator for a fresh member whose notifications are logged
    fn member(&self) -> (Address, FlowOrchestrator) {
        let address = Address::new_unique();
        let notifications = Arc::new(NotificationCenter::new());
        let mut events = notifications.subscribe();
        let tag = address.short();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if let NotificationEvent::Posted(n) = event {
                    tracing::info!("[{}] {:?} {}: {}", tag, n.level, n.key, n.message);
                }
            }
        });

        let orchestrator = FlowOrchestrator::new(
            self.ledger.clone(),
            address,
            self.aggregator.clone(),
            self.ledger.clock(),
            notifications,
            self.config.core.clone(),
        );
        (address, orchestrator)
    }

    fn shutdown(self) {
        self.stop.store(false, Ordering::SeqCst);
        for task in self.tasks {
            task.abort();
        }
        tracing::info!("Ledger stopped at height {}", self.ledger.height());
    }
}

/// A refused start means there is nothing to do; any other error is real
fn unless_not_permitted(started: Result<FlowHandle, FlowError>) -> Result<Option<FlowHandle>> {
    match started {
        Ok(flow) => Ok(Some(flow)),
        Err(FlowError::NotPermitted { .. }) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn find_token<'a>(config: &'a ClientConfig, symbol: &str) -> Result<&'a TokenInfo> {
    config
        .core
        .tokens
        .by_symbol(symbol)
        .ok_or_else(|| anyhow!("unknown token {}", symbol))
}

async fn run_demo(
    config: &ClientConfig,
    verbose: bool,
    member_count: usize,
    symbol: &str,
    contribution: &str,
) -> Result<()> {
    tracing::info!("Starting circle demo");
    tracing::info!("  Members: {}", member_count);
    tracing::info!("  Block time: {}ms", config.block_time_ms);

    let start = chrono::Utc::now().timestamp().max(0) as u64;
    let session = Session::start(
        SimulatedLedger::with_manual_clock(config.program_address, start),
        config,
        verbose,
    );
    let token = find_token(config, symbol)?.clone();
    let members: Vec<(Address, FlowOrchestrator)> =
        (0..member_count).map(|_| session.member()).collect();

    for (_, member) in &members {
        member.mint(token.address, "10000").await?.outcome().await?;
    }

    let (_, creator) = members
        .first()
        .ok_or_else(|| anyhow!("a circle needs at least one member"))?;
    let period = circle_types::PERIOD_WEEKLY;
    creator
        .create_circle(CreateCircleRequest {
            name: "Demo circle".to_string(),
            description: format!("{} members saving {} {}", member_count, contribution, symbol),
            token: token.address,
            contribution: contribution.to_string(),
            period_duration: period,
            max_members: member_count as u64,
            collateral_factor: 2,
            insurance_fee: "5".to_string(),
            initial_payout_order: vec![],
        })
        .await?
        .outcome()
        .await?;
    let circle_id: CircleId = session.aggregator.circle_count().await?;
    tracing::info!("Created circle {} ({})", circle_id, describe_period(period));

    for (_, member) in &members {
        member.join(circle_id).await?.outcome().await?;
    }

    loop {
        let circle = session.aggregator.circle(circle_id).await?;
        if circle.state != CircleState::Active {
            break;
        }
        tracing::info!("Round {} of {}", circle.current_round, member_count);

        for (_, member) in &members {
            member.contribute(circle_id).await?.outcome().await?;
        }

        session.ledger.advance_time(period);
        let view = session
            .aggregator
            .circle_view(circle_id, members[0].0)
            .await?;
        let recipient = view
            .current_recipient()
            .ok_or_else(|| anyhow!("no recipient for round {}", circle.current_round))?;
        creator.finalize_round(circle_id).await?.outcome().await?;

        if let Some((_, winner)) = members.iter().find(|(addr, _)| *addr == recipient) {
            winner.claim_payout(circle_id).await?.outcome().await?;
        }
    }

    for (_, member) in &members {
        member.withdraw_collateral(circle_id).await?.outcome().await?;
    }

    let entries = session.aggregator.all_circles().await?;
    let snapshots: Vec<_> = entries.iter().filter_map(|e| e.snapshot()).collect();
    let stats = DirectoryStats::collect(snapshots.iter().copied());
    tracing::info!(
        "Directory: {} circles, {} completed",
        stats.total,
        stats.completed
    );
    for (address, _) in &members {
        let balance = session.ledger.store().balance(&token.address, address);
        tracing::info!(
            "  {} ends with {} {}",
            address.short(),
            circle_types::format_units(balance, token.decimals),
            token.symbol
        );
    }

    session.shutdown();
    Ok(())
}

async fn run_watch(
    config: &ClientConfig,
    verbose: bool,
    member_count: usize,
    period_secs: u64,
    duration_secs: u64,
) -> Result<()> {
    tracing::info!("Starting live circle ({}s rounds)", period_secs);

    let session = Session::start(
        SimulatedLedger::new(config.program_address, Arc::new(SystemClock)),
        config,
        verbose,
    );
    let token = config
        .core
        .tokens
        .tokens
        .first()
        .cloned()
        .ok_or_else(|| anyhow!("no tokens configured"))?;
    let members: Vec<(Address, FlowOrchestrator)> =
        (0..member_count.max(2)).map(|_| session.member()).collect();

    // Seed a short-period circle directly; creation limits forbid such periods
    let creator = members[0].0;
    let hash = session
        .ledger
        .submit(
            creator,
            LedgerCall::CreateCircle(CircleParams {
                name: "Live circle".to_string(),
                description: "short rounds".to_string(),
                token: token.address,
                contribution_amount: circle_types::parse_units("10", token.decimals)?,
                period_duration: period_secs,
                max_members: members.len() as u64,
                collateral_factor: 1,
                insurance_fee: 0,
                initial_payout_order: vec![],
            }),
        )
        .await?;
    session.ledger.wait_for_receipt(hash).await?.into_result()?;
    let circle_id = session.aggregator.circle_count().await?;

    for (_, member) in &members {
        member.mint(token.address, "1000").await?.outcome().await?;
        member.join(circle_id).await?.outcome().await?;
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(duration_secs);
    let mut directory = session.aggregator.subscribe_directory();
    let filter = CircleFilter {
        status: Some(CircleState::Active),
        ..CircleFilter::default()
    };

    while tokio::time::Instant::now() < deadline {
        let circle = session.aggregator.circle(circle_id).await?;
        if circle.state != CircleState::Active {
            tracing::info!("Circle {} is {}", circle_id, circle.state);
            break;
        }

        for (_, member) in &members {
            // Already paid this round is fine
            if let Some(flow) = unless_not_permitted(member.contribute(circle_id).await)? {
                flow.outcome().await?;
            }
        }

        let timer = RoundTimer::start(&circle, session.ledger.clock(), config.core.timer_tick())
            .ok_or_else(|| anyhow!("circle {} is not active", circle_id))?;
        let mut ticks = timer.subscribe();
        loop {
            tokio::select! {
                changed = ticks.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let time = *ticks.borrow_and_update();
                    tracing::info!("Round {}: {} left", circle.current_round, time.countdown());
                    if time.expired {
                        break;
                    }
                }
                _ = directory.changed() => {
                    let state = directory.borrow_and_update().clone();
                    if let Some(entries) = state.data {
                        let snapshots: Vec<_> = entries.iter().filter_map(|e| e.snapshot()).collect();
                        tracing::debug!(
                            "{} active circle(s)",
                            filter.apply(snapshots.iter().copied()).len()
                        );
                    }
                }
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }

        if tokio::time::Instant::now() >= deadline {
            break;
        }
        members[0]
            .1
            .finalize_round(circle_id)
            .await?
            .outcome()
            .await?;
        let view = session.aggregator.circle_view(circle_id, creator).await?;
        tracing::info!(
            "Insurance pool {} {}",
            view.circle.display_amount(view.insurance_pool),
            view.circle.token_symbol
        );
        for (address, member) in &members {
            if let Some(flow) = unless_not_permitted(member.claim_payout(circle_id).await)? {
                flow.outcome().await?;
                tracing::info!("{} claimed the round payout", address.short());
            }
        }
    }

    session.shutdown();
    Ok(())
}
