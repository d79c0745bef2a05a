use std::process::ExitCode;

use agora::engine::AnalysisRequest;
use agora::models::config::AgoraConfig;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "agora", about = "Multi-agent stock analysis")]
struct Cli {
    /// Path to configuration file (defaults apply when omitted)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full pipeline for one ticker and print the result as JSON
    Analyze {
        #[arg(short, long)]
        ticker: String,

        /// Trade date, e.g. 2024-01-15
        #[arg(short, long)]
        date: String,

        #[arg(long)]
        company: Option<String>,

        /// Market type (cn, hk, us); inferred from the ticker when omitted
        #[arg(long)]
        market: Option<String>,

        /// Comma-separated analyst ids, overriding the config
        #[arg(long, value_delimiter = ',')]
        analysts: Vec<String>,

        /// Force stub agents
        #[arg(long)]
        stub: bool,

        /// Print only the context summary instead of the whole result
        #[arg(long)]
        summary: bool,

        /// Pretty-print the output JSON
        #[arg(long)]
        pretty: bool,
    },
    /// Validate the built-in agent contracts and print their dependency order
    Contracts {
        #[arg(long)]
        pretty: bool,
    },
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let output = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{output}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine-readable (respects RUST_LOG)
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let mut config = match &cli.config {
        Some(path) => agora::load_config(path)?,
        None => AgoraConfig::default(),
    };

    match cli.command {
        Command::Analyze {
            ticker,
            date,
            company,
            market,
            analysts,
            stub,
            summary,
            pretty,
        } => {
            if !analysts.is_empty() {
                config.engine.selected_analysts = analysts;
            }
            if stub {
                config.engine.use_stub = true;
            }
            let engine = agora::build_engine(&config)?;

            let mut request = AnalysisRequest::new(ticker, date);
            if let Some(company) = company {
                request = request.company_name(company);
            }
            if let Some(market) = market {
                request = request.market_type(market);
            }

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, cancelling analysis");
                    on_interrupt.cancel();
                }
            });

            let result = engine.analyze_with_cancel(request, cancel).await;
            if summary {
                print_json(&result.context_summary(), pretty)?;
            } else {
                print_json(&result, pretty).context("Failed to serialize result")?;
            }

            Ok(if result.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Contracts { pretty } => {
            let engine = agora::build_engine(&config)?;
            let validation = engine.validate_contracts();
            let order = engine.contract_order();
            let all_valid = validation.values().all(|r| r.is_valid);

            let report = serde_json::json!({
                "valid": all_valid && order.is_ok(),
                "order": order.as_ref().ok(),
                "order_error": order.as_ref().err().map(|e| e.to_string()),
                "contracts": validation,
            });
            print_json(&report, pretty)?;

            Ok(if all_valid && order.is_ok() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}
