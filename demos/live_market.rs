//! Live market monitor - seeds a market from the relay backend and prints
//! every update as it arrives.
//!
//! Usage: cargo run --example live_market -- <condition_id> [more ids...]
//! Endpoints and limits come from MARKET_SYNC_* environment variables.

use std::env;
use std::time::Duration;

use market_sync::{ChannelId, EventPayload, Notification, SyncClient, SyncConfig};
use tracing_subscriber::EnvFilter;

fn describe(notification: &Notification) -> String {
    match notification {
        Notification::Seeded(events) => format!("seeded with {} event(s)", events.len()),
        Notification::Closed => "closed".to_string(),
        Notification::Event(event) => match &event.payload {
            EventPayload::Book(book) => {
                format!("book: {} bids / {} asks", book.buys.len(), book.sells.len())
            }
            EventPayload::PriceChange(change) => format!(
                "price change: bid {:?} ask {:?}",
                change.best_bid(),
                change.best_ask()
            ),
            EventPayload::TickSizeChange(tick) => {
                format!("tick size {} -> {}", tick.old_tick_size, tick.new_tick_size)
            }
            EventPayload::TweetReceived(tweet) => format!("@{}: {}", tweet.username, tweet.text),
            EventPayload::TradeExecuted(trade) => format!("executed on {}", trade.market_name),
            EventPayload::TradeSkipped(trade) => format!("skipped {}", trade.market_name),
            EventPayload::Unknown { tag, .. } => format!("unrecognized {:?}", tag),
        },
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::ring::default_provider().install_default().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let markets: Vec<String> = env::args().skip(1).collect();
    if markets.is_empty() {
        eprintln!("usage: live_market <condition_id> [more ids...]");
        std::process::exit(2);
    }

    let config = SyncConfig::from_env();
    println!("=== Live Market Monitor ===");
    println!("Feed:      {}", config.endpoint);
    println!("Snapshots: {}\n", config.snapshot_base_url);

    let mut client = SyncClient::connect(config).await?;
    let mut failures = client.failures().ok_or("failure stream already taken")?;

    let mut handles = Vec::new();
    for market in &markets {
        let channel = ChannelId::market(market.as_str());
        let label = channel.clone();
        handles.push(client.subscribe(channel, move |n| println!("[{}] {}", label, describe(n)))?);
    }
    handles.push(client.subscribe(ChannelId::trades(), |n| println!("[trades] {}", describe(n)))?);

    let mut status = tokio::time::interval(Duration::from_secs(30));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
            Some(signal) = failures.recv() => {
                eprintln!("!! {} - retrying in 10s", signal);
                tokio::time::sleep(Duration::from_secs(10)).await;
                client.retry()?;
            }
            _ = status.tick() => {
                for handle in &handles {
                    if let Some(info) = client.channel_info(handle.channel()) {
                        println!(
                            "-- {} [{}]: {}/{} events, loaded={}, last={}",
                            info.channel,
                            client.session_state(),
                            info.len,
                            info.capacity,
                            info.snapshot_loaded,
                            info.last_applied_timestamp
                        );
                    }
                }
            }
        }
    }

    for handle in &handles {
        client.unsubscribe(handle);
    }
    client.close();
    Ok(())
}
