use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use solver_config::{Config, ConfigLoader};
use solver_core::SolverBuilder;
use solver_delivery::implementations::evm::alloy::create_http_delivery;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "solver")]
#[command(about = "Cross-chain intent solver with liquidity rebalancing", long_about = None)]
struct Cli {
	#[command(subcommand)]
	command: Option<Commands>,

	#[arg(short, long, value_name = "FILE", default_value = "config/local.toml")]
	config: PathBuf,

	#[arg(long, env = "SOLVER_LOG_LEVEL", default_value = "info")]
	log_level: String,
}

#[derive(Subcommand)]
enum Commands {
	/// Start the solver
	Start,
	/// Validate the configuration file
	Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	setup_tracing(&cli.log_level)?;

	match cli.command {
		Some(Commands::Start) | None => start_solver(cli).await,
		Some(Commands::Validate) => validate_config(cli).await,
	}
}

async fn load_config(cli: &Cli) -> Result<Config> {
	ConfigLoader::new()
		.with_file(&cli.config)
		.load()
		.await
		.with_context(|| format!("Failed to load configuration from {:?}", cli.config))
}

async fn start_solver(cli: Cli) -> Result<()> {
	let config = load_config(&cli).await?;
	info!(solver = %config.solver.id, path = ?cli.config, "Configuration loaded");

	let engine = SolverBuilder::new(config)
		.with_storage_factory("file", solver_storage::implementations::file::create_storage)
		.with_storage_factory("memory", solver_storage::implementations::memory::create_storage)
		.with_account_factory("local", solver_account::implementations::local::create_account)
		.with_delivery_factory(|config, wallet| create_http_delivery(config, wallet).map(Arc::from))
		.build()
		.context("Failed to build solver engine")?;

	engine
		.run(shutdown_signal())
		.await
		.context("Solver stopped with an error")?;

	info!("Solver stopped");
	Ok(())
}

async fn validate_config(cli: Cli) -> Result<()> {
	let config = load_config(&cli).await?;

	info!(solver = %config.solver.id, "Configuration is valid");
	let mut chains: Vec<_> = config.chains.iter().collect();
	chains.sort_by_key(|(id, _)| **id);
	for (chain_id, chain) in chains {
		let mut tokens: Vec<&str> = chain.tokens.keys().map(String::as_str).collect();
		tokens.sort_unstable();
		info!(chain_id, name = %chain.name, tokens = ?tokens, "Chain");
	}
	if config.rebalance.enabled {
		for band in &config.rebalance.tokens {
			info!(
				token = %format!("{}@{}", band.symbol, band.chain_id),
				min = %band.min_balance,
				target = %band.target_balance,
				max = %band.max_balance,
				"Rebalance band"
			);
		}
	}
	info!(
		cctp = config.cctp.is_some(),
		swap = config.swap.is_some(),
		withdrawals = config.withdrawals.enabled,
		"Features"
	);
	Ok(())
}

fn setup_tracing(log_level: &str) -> Result<()> {
	let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))
		.context("Invalid log level")?;

	tracing_subscriber::registry()
		.with(env_filter)
		.with(tracing_subscriber::fmt::layer())
		.init();

	Ok(())
}

async fn shutdown_signal() {
	let ctrl_c = async {
		if let Err(e) = signal::ctrl_c().await {
			error!(error = %e, "Failed to listen for Ctrl+C");
			std::future::pending::<()>().await;
		}
	};

	#[cfg(unix)]
	let terminate = async {
		match signal::unix::signal(signal::unix::SignalKind::terminate()) {
			Ok(mut stream) => {
				stream.recv().await;
			},
			Err(e) => {
				error!(error = %e, "Failed to install SIGTERM handler");
				std::future::pending::<()>().await;
			},
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
	info!("Shutdown signal received");
}
