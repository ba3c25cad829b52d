//! `timetoken`: check and obtain Time Tokenizer access from the terminal.

use anyhow::{bail, Context};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use timetoken_engine::{
    init_logging, CallbackBag, EngineConfig, EngineEvent, LogFormat, MonitorExit,
    ReconciliationEngine, RequestOutcome, ShutdownController,
};
use timetoken_types::Subject;

#[derive(Parser)]
#[command(name = "timetoken", about = "Time Tokenizer access credential client")]
struct Cli {
    /// Ethereum JSON-RPC endpoint; must be able to sign for the sender.
    #[arg(long, env = "TIMETOKEN_RPC_URL")]
    rpc_url: Option<String>,

    /// Access credential contract address.
    #[arg(long, env = "TIMETOKEN_CONTRACT")]
    contract: Option<String>,

    /// Account paying for the request (defaults to the subject).
    #[arg(long, env = "TIMETOKEN_SENDER")]
    sender: Option<String>,

    /// Base URL of the KYC verification service.
    #[arg(long, env = "TIMETOKEN_VERIFICATION_URL")]
    verification_url: Option<String>,

    /// Chainlink Functions subscription id.
    #[arg(long, env = "TIMETOKEN_SUBSCRIPTION_ID")]
    subscription_id: Option<u64>,

    /// DON-hosted secrets slot.
    #[arg(long, env = "TIMETOKEN_SECRETS_SLOT")]
    secrets_slot: Option<u8>,

    /// DON-hosted secrets version.
    #[arg(long, env = "TIMETOKEN_SECRETS_VERSION")]
    secrets_version: Option<u64>,

    /// Seconds between callback polls.
    #[arg(long, env = "TIMETOKEN_POLL_INTERVAL_SECS")]
    poll_interval_secs: Option<u64>,

    /// Polls before giving up on the callback.
    #[arg(long, env = "TIMETOKEN_MAX_POLL_ATTEMPTS")]
    max_poll_attempts: Option<u32>,

    /// Log format: "human" or "json".
    #[arg(long, env = "TIMETOKEN_LOG_FORMAT")]
    log_format: Option<String>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, env = "TIMETOKEN_LOG_LEVEL")]
    log_level: Option<String>,

    /// Path to a TOML configuration file. File settings are the base;
    /// flags and env vars override them.
    #[arg(long, env = "TIMETOKEN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Show whether an address has access.
    Status { address: String },
    /// Request verification for an address.
    Submit {
        address: String,
        /// Keep polling until the oracle callback lands.
        #[arg(long)]
        watch: bool,
    },
    /// Follow an already submitted request until the callback lands.
    Watch { address: String },
    /// Print the effective configuration as TOML.
    Config,
}

impl Cli {
    /// File settings (or defaults) with flags and env vars layered on top.
    fn engine_config(&self) -> anyhow::Result<EngineConfig> {
        let base = match &self.config {
            Some(path) => {
                let path = path.to_str().context("config path is not valid UTF-8")?;
                EngineConfig::from_toml_file(path)
                    .with_context(|| format!("loading config from {path}"))?
            }
            None => EngineConfig::default(),
        };

        Ok(EngineConfig {
            rpc_url: self.rpc_url.clone().unwrap_or(base.rpc_url),
            contract_address: self.contract.clone().unwrap_or(base.contract_address),
            sender_address: self.sender.clone().or(base.sender_address),
            verification_url: self
                .verification_url
                .clone()
                .unwrap_or(base.verification_url),
            subscription_id: self.subscription_id.unwrap_or(base.subscription_id),
            secrets_slot: self.secrets_slot.unwrap_or(base.secrets_slot),
            secrets_version: self.secrets_version.unwrap_or(base.secrets_version),
            poll_interval_secs: self.poll_interval_secs.unwrap_or(base.poll_interval_secs),
            max_poll_attempts: self.max_poll_attempts.unwrap_or(base.max_poll_attempts),
            log_format: self.log_format.clone().unwrap_or(base.log_format),
            log_level: self.log_level.clone().unwrap_or(base.log_level),
            ..base
        })
    }
}

fn progress_callbacks() -> CallbackBag {
    CallbackBag::new()
        .on_start(|e| {
            if let Some(subject) = e.subject() {
                println!("checking {}", subject.short());
            }
        })
        .on_submitted(|e| {
            if let EngineEvent::Submitted { tx, pending, .. } = e {
                if *pending {
                    println!("request {tx} included, waiting for the oracle callback");
                } else {
                    println!("request {tx} included");
                }
            }
        })
        .on_completed(|e| {
            if let EngineEvent::Completed { level, proof, .. } = e {
                println!("credential minted: {level} ({proof})");
            }
        })
        .on_access_granted(|e| {
            if let EngineEvent::AccessGranted { level, .. } = e {
                println!("access granted at {level}");
            }
        })
        .on_error(|e| {
            if let EngineEvent::Error { error, .. } = e {
                eprintln!("error: {error}");
            }
        })
}

/// Follow `subject` until a terminal outcome, or until shutdown cancels it.
async fn follow(engine: &ReconciliationEngine, subject: &Subject) -> anyhow::Result<()> {
    let exit = engine.watch(subject, |_| {}).join().await;

    match exit {
        MonitorExit::Terminal(RequestOutcome::Failed { reason }) => bail!(reason),
        MonitorExit::Terminal(_) => Ok(()),
        MonitorExit::Cancelled { attempts } => {
            println!(
                "stopped after {attempts} polls; the request is still pending on-chain"
            );
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.engine_config()?;

    match config.log_format.parse::<LogFormat>() {
        Ok(format) => init_logging(format, &config.log_level)?,
        Err(e) => {
            timetoken_utils::init_tracing();
            tracing::warn!(error = %e, "using default log output");
        }
    }
    if let Some(path) = &cli.config {
        tracing::info!("loaded config from {}", path.display());
    }

    if let Command::Config = cli.command {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    let engine = ReconciliationEngine::from_config(&config, progress_callbacks())?;
    let shutdown = Arc::new(ShutdownController::new());
    shutdown.attach(engine.clone());
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { shutdown.wait_for_signal().await });
    }

    match cli.command {
        Command::Status { address } => {
            let status = engine.resolve(&address).await?;
            if status.has_access {
                println!("{address}: access at {}", status.level);
            } else if status.level.is_none() {
                println!("{address}: no access");
            } else {
                println!(
                    "{address}: no access yet (expected {}, from {:?})",
                    status.level, status.source
                );
            }
        }
        Command::Submit { address, watch } => {
            let outcome = engine.submit(&address).await?;
            match outcome {
                RequestOutcome::Submitted { pending: true, tx, .. } if watch => {
                    tracing::info!(%tx, "following oracle callback");
                    let subject = Subject::parse(&address)?;
                    follow(&engine, &subject).await?;
                }
                RequestOutcome::Submitted { pending: true, .. } => {
                    println!("run `timetoken watch {address}` to follow the callback");
                }
                RequestOutcome::Failed { reason } => bail!(reason),
                _ => {}
            }
        }
        Command::Watch { address } => {
            let subject = Subject::parse(&address)?;
            if engine.in_flight(&subject).is_none() {
                tracing::debug!(%subject, "no request tracked locally, polling anyway");
            }
            follow(&engine, &subject).await?;
        }
        // Printed before the engine was built.
        Command::Config => {}
    }

    engine.cancel_all();
    tracing::debug!("{}", engine.metrics().encode_text());
    Ok(())
}
