// src/bin/cli/main.rs - Sharekeeper CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sharekeeper::{
    BackupGroup, Config, KeyHolder, MemoryRelayNetwork, SecretSharingEngine, Share, ShareMetadata,
    VaultService,
};
use std::io::{BufRead, Read, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sharekeeper")]
#[command(about = "Split secrets into threshold shares and put them back together")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read a secret from stdin and print one share per line as JSON
    Split {
        /// Shares required to reconstruct
        #[arg(short, long)]
        threshold: usize,

        /// Shares to produce
        #[arg(short = 'n', long)]
        shares: usize,

        /// Group id stamped on every share
        #[arg(long, default_value = "local")]
        group_id: String,

        /// Group label stamped on every share
        #[arg(long, default_value = "Local backup")]
        label: String,

        /// Creator identity stamped on every share
        #[arg(long, default_value = "local")]
        creator: String,
    },
    /// Read share JSON lines from stdin and print the secret
    Combine,
    /// Print the effective configuration
    Config,
    /// Back up and recover a secret between in-process key holders
    Demo {
        /// Number of key holders
        #[arg(long, default_value = "3")]
        holders: usize,

        /// Approvals required
        #[arg(long, default_value = "2")]
        threshold: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so share output on stdout stays machine readable
    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;

    let result = match cli.command {
        Commands::Split {
            threshold,
            shares,
            group_id,
            label,
            creator,
        } => handle_split(&config, threshold, shares, group_id, label, creator),
        Commands::Combine => handle_combine(&config),
        Commands::Config => handle_config(&config),
        Commands::Demo { holders, threshold } => handle_demo(config, holders, threshold).await,
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

fn handle_split(
    config: &Config,
    threshold: usize,
    count: usize,
    group_id: String,
    group_label: String,
    creator_identity: String,
) -> Result<()> {
    let mut secret = Vec::new();
    std::io::stdin()
        .read_to_end(&mut secret)
        .context("Failed to read secret from stdin")?;
    let secret = zeroize::Zeroizing::new(secret);

    let metadata = ShareMetadata {
        creator_identity,
        group_id,
        group_label,
        peers: Vec::new(),
    };
    let engine = SecretSharingEngine::new(&config.sharing);
    let shares = engine.split(&secret, threshold, count, &metadata)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for share in &shares {
        writeln!(out, "{}", serde_json::to_string(share)?)?;
    }
    info!(threshold, shares = shares.len(), "Split secret");
    Ok(())
}

fn handle_combine(config: &Config) -> Result<()> {
    let mut shares = Vec::new();
    for (number, line) in std::io::stdin().lock().lines().enumerate() {
        let line = line.context("Failed to read shares from stdin")?;
        if line.trim().is_empty() {
            continue;
        }
        let share: Share = serde_json::from_str(&line)
            .with_context(|| format!("Line {} is not a share", number + 1))?;
        shares.push(share);
    }

    let engine = SecretSharingEngine::new(&config.sharing);
    let secret = engine.combine(&shares)?;
    std::io::stdout().write_all(&secret)?;
    Ok(())
}

fn handle_config(config: &Config) -> Result<()> {
    let validation = config.validate_detailed();
    println!("{}", serde_json::to_string_pretty(&config.summary())?);

    for warning in &validation.warnings {
        println!("warning: {}: {}", warning.field, warning.message);
    }
    for err in &validation.errors {
        println!("error: {}: {}", err.field, err.message);
    }
    if !validation.success {
        anyhow::bail!("configuration has {} error(s)", validation.errors.len());
    }
    Ok(())
}

async fn handle_demo(mut config: Config, holders: usize, threshold: usize) -> Result<()> {
    let relay = "wss://relay.local".to_string();
    config.distribution.default_relays = vec![relay.clone()];
    config.storage.backend = "memory".to_string();

    let network = MemoryRelayNetwork::new();
    let owner = VaultService::new(config.clone(), Arc::new(network.endpoint("owner"))).await?;
    owner.start_inbound().await?;

    let mut key_holders = Vec::new();
    let mut services = Vec::new();
    for i in 0..holders {
        let identity = format!("holder-{}", i + 1);
        let service = VaultService::new(config.clone(), Arc::new(network.endpoint(&identity))).await?;
        service.start_inbound().await?;
        key_holders.push(KeyHolder::new(identity.clone(), identity));
        services.push(service);
    }

    let group = BackupGroup::new("Demo", threshold, key_holders, vec![relay]);
    let receipt = owner.backup_secret(&group, b"correct horse battery staple").await?;
    println!(
        "Distributed {} shares ({} delivered)",
        receipt.records.len(),
        receipt.records.iter().filter(|r| r.is_published()).count()
    );

    for service in &services {
        let mut attempts = 0;
        while service
            .storage()
            .get_received_share(&group.group_id, service.identity())
            .await?
            .is_none()
        {
            wait_for_delivery(&mut attempts).await?;
        }
    }

    let request = owner.initiate_recovery(&group.group_id, None).await?;
    println!("Initiated recovery request {}", request.id);

    for service in services.iter().take(threshold) {
        let mut attempts = 0;
        while service.coordinator().get_request(&request.id).await?.is_none() {
            wait_for_delivery(&mut attempts).await?;
        }
        service.answer_recovery(&request.id, true).await?;
        println!("{} approved", service.identity());
    }

    let mut attempts = 0;
    while !owner.recovery_status(&group.group_id).await?.can_recover {
        wait_for_delivery(&mut attempts).await?;
    }
    let secret = owner.reconstruct(&request.id).await?;
    println!("Recovered: {}", String::from_utf8_lossy(&secret));
    Ok(())
}

/// Sleeps briefly between polls, giving up after a few seconds.
async fn wait_for_delivery(attempts: &mut u32) -> Result<()> {
    *attempts += 1;
    if *attempts > 100 {
        anyhow::bail!("timed out waiting for message delivery");
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    Ok(())
}
