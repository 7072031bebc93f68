use anyhow::{anyhow, bail, Context};
use chrono::Utc;
use clap::Parser;
use std::io::{self, Write};
use std::sync::Arc;
use tracing::info;
use webhook_tester::config::{Cli, Command, Config, SimulateArgs, WatchArgs};
use webhook_tester::feed::{ChangeFeedClient, HttpSnapshotSource};
use webhook_tester::templates;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    webhook_tester::init_tracing(cli.log_json);

    match cli.command {
        Command::Serve(args) => {
            let config = Config::try_from(args).context("invalid server configuration")?;
            webhook_tester::serve(config).await
        }
        Command::Watch(args) => watch(args).await,
        Command::Simulate(args) => simulate(args).await,
        Command::Templates => print_templates(),
    }
}

// ---------------------------------------------------------------------------
// Watch
// ---------------------------------------------------------------------------

async fn watch(args: WatchArgs) -> anyhow::Result<()> {
    let server = args.server_url()?;
    let feed_config = args.feed_config()?;
    let webhook_id = args.webhook_id.trim().to_string();

    let source = Arc::new(HttpSnapshotSource::new(&server)?);
    let mut feed = ChangeFeedClient::spawn(source, webhook_id.clone(), feed_config, Utc::now());
    let mut status = feed.subscribe_status();
    let mut connected = status.borrow().connected;

    let mut out = io::stdout();
    writeln!(out, "watching {server}/webhook/{webhook_id} (Ctrl-C to stop)")?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            record = feed.next_record() => {
                let Some(record) = record else { break };
                writeln!(out, "{} {} {}", record.timestamp.to_rfc3339(), record.method, record.url)?;
                if let Some(body) = &record.body {
                    writeln!(out, "{}", serde_json::to_string_pretty(body)?)?;
                }
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                if current.connected != connected {
                    connected = current.connected;
                    let liveness = if connected { "connected" } else { "disconnected, retrying" };
                    writeln!(
                        out,
                        "-- {liveness} (last poll: {}, failures: {})",
                        current.phase.as_str(),
                        current.consecutive_failures
                    )?;
                }
            }
        }
    }

    feed.shutdown().await;
    info!(webhook_id, "watch ended");
    Ok(())
}

// ---------------------------------------------------------------------------
// Simulate
// ---------------------------------------------------------------------------

async fn simulate(args: SimulateArgs) -> anyhow::Result<()> {
    let url = args.capture_url()?;
    let payload = templates::render(&args.service, &args.event).ok_or_else(|| {
        anyhow!(
            "unknown template {}/{}; run `webhook-tester templates` for the list",
            args.service,
            args.event
        )
    })?;

    let resp = reqwest::Client::new()
        .post(&url)
        .header("x-simulated-webhook", "true")
        .header("x-webhook-service", &args.service)
        .header("x-webhook-event", &args.event)
        .json(&payload)
        .send()
        .await
        .with_context(|| format!("failed to reach {url}"))?;

    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        bail!("server answered HTTP {status}: {text}");
    }

    info!(service = %args.service, event = %args.event, "simulated webhook sent");
    writeln!(io::stdout(), "sent {}/{} to {url}", args.service, args.event)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

fn print_templates() -> anyhow::Result<()> {
    let mut out = io::stdout();
    for t in templates::CATALOG {
        writeln!(out, "{:<10} {:<32} {}", t.service, t.event, t.description)?;
    }
    Ok(())
}
