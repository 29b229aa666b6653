//! Replay Example
//!
//! Feeds a recorded meter log (or stdin) through the atgm plugin host, as if
//! the lines were arriving from the serial port.
//!
//! Two demo plugins are registered in code: `console` logs selected fields of
//! each record, `gravity-stats` prints a summary when it stops. Both are
//! enabled unless a configuration file says otherwise.
//!
//! # Usage
//!
//! ```bash
//! cargo run --package atgm-replay -- data/survey.dat --rate 10
//! cat data/survey.dat | cargo run --package atgm-replay
//! ```

mod plugins;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use atgm::core::Publisher;
use atgm::prelude::*;
use clap::Parser;
use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Recorded log to replay; reads stdin when omitted.
    input: Option<PathBuf>,

    /// Configuration file (defaults to the usual search locations).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Configuration profile.
    #[arg(short, long)]
    profile: Option<String>,

    /// Lines per second; 0 replays as fast as possible.
    #[arg(short, long, default_value_t = 0.0, value_parser = parse_rate)]
    rate: f64,
}

fn parse_rate(s: &str) -> std::result::Result<f64, String> {
    let rate: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if !rate.is_finite() || rate < 0.0 {
        return Err(format!("rate must be a finite number of lines per second, got {s}"));
    }
    Ok(rate)
}

// ============================================================================
// Replay
// ============================================================================

async fn replay<R>(reader: R, mut publisher: Publisher, rate: f64) -> Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut ticker = (rate > 0.0).then(|| {
        let period = Duration::from_secs_f64(1.0 / rate).max(Duration::from_nanos(1));
        tokio::time::interval(period)
    });
    let mut lines = reader.lines();
    let mut published = 0;

    while let Some(line) = lines.next_line().await.context("reading input")? {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(ticker) = ticker.as_mut() {
            ticker.tick().await;
        }
        publisher.publish_line(line);
        published += 1;
    }

    Ok(published)
}

/// Waits until every running plugin has emptied its queue.
async fn drain(runtime: &AtgmRuntime) {
    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        while runtime
            .stats()
            .iter()
            .any(|s| s.state == PluginState::Running && s.queued > 0)
        {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;

    if drained.is_err() {
        warn!("Plugins did not drain their queues in time");
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Enabled unless a configuration file overrides the sections
    let defaults: AtgmConfig = serde_json::from_value(json!({
        "plugins": { "console": {}, "gravity-stats": {} }
    }))?;

    let mut builder = AtgmRuntime::builder()
        .merge(defaults)
        .plugin(plugins::CONSOLE)
        .plugin(plugins::GRAVITY_STATS);
    if let Some(path) = &args.config {
        builder = builder.config_file(path);
    }
    if let Some(profile) = &args.profile {
        builder = builder.profile(profile.as_str());
    }
    let runtime = builder.build()?;

    let publisher = runtime.publisher()?;
    let report = runtime.init().await?;
    for failure in &report.activation_failures {
        warn!(plugin = %failure.name, error = %failure.error, "Plugin not activated");
    }

    let (input, rate) = (args.input, args.rate);
    let replayed = async move {
        match input {
            Some(path) => {
                let file = tokio::fs::File::open(&path)
                    .await
                    .with_context(|| format!("opening {}", path.display()))?;
                replay(BufReader::new(file), publisher, rate).await
            }
            None => replay(BufReader::new(tokio::io::stdin()), publisher, rate).await,
        }
    };

    let result = tokio::select! {
        result = replayed => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    match result {
        Some(Ok(count)) => {
            info!(records = count, "Replay finished");
            drain(&runtime).await;
        }
        Some(Err(e)) => error!(error = %e, "Replay failed"),
        None => info!("Interrupted"),
    }

    for stats in runtime.stats() {
        info!(
            plugin = stats.name,
            state = %stats.state,
            delivered = stats.delivered,
            dropped = stats.dropped,
            errors = stats.errors,
            "Plugin statistics"
        );
    }

    runtime.stop().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_must_be_finite() {
        assert_eq!(parse_rate("10"), Ok(10.0));
        assert_eq!(parse_rate("0"), Ok(0.0));
        assert!(parse_rate("inf").is_err());
        assert!(parse_rate("NaN").is_err());
        assert!(parse_rate("-1").is_err());
        assert!(Args::try_parse_from(["atgm-replay", "-", "--rate", "inf"]).is_err());
    }
}
