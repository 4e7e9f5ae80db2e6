//! rescind CLI
//!
//! Drives the revocation guard from the command line: a scripted race
//! scenario, a retention soak, and config inspection.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rescind_cache::{Fetched, ResultCache, RevokeNotice, RevokeSubscriber};
use rescind_core::{Clock, CompletionFlag, GuardStats, ManualClock, SweepReport};
use rescind_guard::{GuardConfig, RevocationGuard};

/// rescind - revocation race guard for RPC result caches
#[derive(Parser)]
#[command(name = "rescind")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs and results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a revoke overtaking an in-flight call
    Scenario,

    /// Register revokes with no outgoing calls and watch retention stay bounded
    Soak {
        /// Number of revokes to register
        #[arg(short, long, default_value = "10000")]
        revokes: usize,
        /// Number of distinct revoke keys
        #[arg(short, long, default_value = "500")]
        keys: usize,
    },

    /// Print the effective guard configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "rescind=debug,info"
    } else {
        "rescind=info,warn"
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(cli.json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!cli.json).then(|| tracing_subscriber::fmt::layer()))
        .init();

    match cli.command {
        Commands::Scenario => cmd_scenario(cli.json).await,
        Commands::Soak { revokes, keys } => cmd_soak(revokes, keys, cli.json),
        Commands::Config => cmd_config(),
    }
}

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::UNIX_EPOCH + Duration::seconds(secs)
}

fn print_report(step: &str, report: &SweepReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::json!({ "step": step, "sweep": report }));
    } else {
        let watermark = report
            .watermark
            .map(|w| w.to_rfc3339())
            .unwrap_or_else(|| "-".into());
        println!(
            "   {} watermark {}, {} call(s) completed, {} entr(ies) reclaimed",
            "sweep:".dimmed(),
            watermark,
            report.outgoing_completed,
            report.entries_reclaimed
        );
    }
    Ok(())
}

fn print_stats(stats: &GuardStats, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(stats)?);
    } else {
        println!("\n{}", "Guard stats:".yellow().bold());
        println!("   {} {}", "Registry entries:".dimmed(), stats.registry_entries);
        println!("   {} {}", "Revoke queue:".dimmed(), stats.revoke_queue_depth);
        println!("   {} {}", "Outgoing ledger:".dimmed(), stats.outgoing_ledger_depth);
        println!(
            "   {} {} registered, {} ignored",
            "Revokes:".dimmed(),
            stats.revokes_registered,
            stats.revokes_ignored
        );
        println!(
            "   {} {} reclaimed over {} sweep(s)",
            "Entries:".dimmed(),
            stats.entries_reclaimed,
            stats.sweeps
        );
    }
    Ok(())
}

/// Replay the race: call A in flight, revoke lands, A's result is refused.
async fn cmd_scenario(json: bool) -> Result<()> {
    if !json {
        println!("{}", "Replaying revoke-overtakes-call scenario...".cyan().bold());
    }

    let clock = ManualClock::at_epoch();
    let config = GuardConfig::default();
    let guard = Arc::new(RevocationGuard::new(config.clone(), config.toggle(), clock.clone())?);

    // t=0: call A dispatched.
    let call_a = CompletionFlag::new();
    guard.register_outgoing_request(call_a.clone(), at(0))?;

    // t=1: revoke for orders/42 received.
    clock.set(at(1));
    guard.register_revoke_key("orders/42", at(1))?;
    let revoked = guard.try_get_recently_revoked_time("orders/42", at(0));
    if !json {
        match revoked {
            Some(t) => println!("   {} result of call A discarded (revoked at {})", "✓".green(), t.to_rfc3339()),
            None => println!("   {} call A result would have been cached", "✗".red()),
        }
    }

    clock.set(at(2));
    print_report("pending", &guard.sweep()?, json)?;

    // A completes; call B goes out after the revoke.
    call_a.complete();
    clock.set(at(3));
    let call_b = CompletionFlag::new();
    guard.register_outgoing_request(call_b.clone(), at(3))?;
    print_report("completed", &guard.sweep()?, json)?;
    print_report("reclaimed", &guard.sweep()?, json)?;

    let forgotten = guard.try_get_recently_revoked_time("orders/42", at(3)).is_none();
    if !json {
        println!("   {} revoke forgotten once no call can race it: {}", "✓".green(), forgotten);
    }
    call_b.complete();

    // The same race through the cache, with the revoke delivered by the subscriber.
    let cache = Arc::new(ResultCache::new(Arc::clone(&guard)));
    let subscriber = RevokeSubscriber::new(Arc::clone(&guard), Some(Arc::clone(&cache)));
    let mut attempt = 0;
    let fetched = cache
        .get_or_fetch("order:42", "orders/42", || {
            attempt += 1;
            let first = attempt == 1;
            let clock = clock.clone();
            let subscriber = &subscriber;
            async move {
                if first {
                    clock.advance(Duration::seconds(1));
                    subscriber.apply(RevokeNotice::new("orders/42", clock.now()))?;
                    clock.advance(Duration::seconds(1));
                    Ok::<_, anyhow::Error>("stale")
                } else {
                    Ok("fresh")
                }
            }
        })
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("Cached fetch failed")?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "step": "cache",
                "value": fetched.clone().into_value(),
                "attempts": attempt,
                "discarded_stale": cache.stats().discarded_stale,
            })
        );
    } else {
        match &fetched {
            Fetched::Cached(v) | Fetched::Hit(v) => println!(
                "   {} cache stored {:?} after {} attempt(s)",
                "✓".green(),
                v,
                attempt
            ),
            Fetched::Revoked { revoked_at } => println!(
                "   {} every attempt overtaken, last revoke at {}",
                "✗".red(),
                revoked_at.to_rfc3339()
            ),
        }
    }

    print_stats(&guard.stats(), json)
}

/// Register revokes with no outgoing calls, sweeping once per simulated second.
fn cmd_soak(revokes: usize, keys: usize, json: bool) -> Result<()> {
    anyhow::ensure!(keys > 0, "--keys must be at least 1");
    if !json {
        println!(
            "{} {} revokes across {} keys",
            "Soaking with".cyan().bold(),
            revokes,
            keys
        );
    }

    let clock = ManualClock::at_epoch();
    let config = GuardConfig::default();
    let guard = RevocationGuard::new(config.clone(), config.toggle(), clock.clone())?;
    let step = Duration::milliseconds(50);
    info!(revokes, keys, "Starting soak");

    let pb = ProgressBar::new(revokes as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("   [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-"),
    );
    if json {
        pb.set_draw_target(indicatif::ProgressDrawTarget::hidden());
    }

    let start = std::time::Instant::now();
    let mut peak = 0;
    for i in 0..revokes {
        clock.advance(step);
        guard.register_revoke_key(&format!("key/{}", i % keys), clock.now())?;
        if (i + 1) % 20 == 0 {
            guard.sweep()?;
            peak = peak.max(guard.stats().retained());
        }
        pb.inc(1);
    }
    guard.sweep()?;
    pb.finish();

    let stats = guard.stats();
    if json {
        println!(
            "{}",
            serde_json::json!({ "peak_retained": peak, "stats": stats })
        );
        return Ok(());
    }

    println!("\n{}", "Results:".green().bold());
    println!("   Elapsed: {:?}", start.elapsed());
    println!("   Peak retained after a sweep: {}", peak);
    print_stats(&stats, json)
}

/// Print the environment-resolved configuration.
fn cmd_config() -> Result<()> {
    let _ = dotenvy::dotenv();
    let config = GuardConfig::from_env().context("Invalid RESCIND_* configuration")?;
    info!(enabled = config.enabled, "Resolved guard configuration");
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
