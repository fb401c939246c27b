use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use mdns_query::config::Config;
use mdns_query::Client;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing; stdout is reserved for discovered entries
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("mdns_query=info"))
        )
        .with_writer(std::io::stderr)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/mdns-query/query.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    if config.queries.is_empty() {
        anyhow::bail!("No [[query]] sections in {}", config_path);
    }

    tracing::info!("Loaded {} queries from {}", config.queries.len(), config_path);

    let client = Client::new(&config.client_config())
        .context("Failed to create mDNS client")?;

    // Entries keep filling in until the window closes, so collect the views
    // while the query runs and print them afterwards
    let (tx, mut rx) = mpsc::channel(64);
    let collector = tokio::spawn(async move {
        let mut entries = Vec::new();
        while let Some(entry) = rx.recv().await {
            entries.push(entry);
        }
        entries
    });

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            signal_cancel.cancel();
        }
    });

    let result = client
        .query_with_cancel(&config.query_params(), &tx, cancel)
        .await;

    client.shutdown().await;
    drop(tx);

    match collector.await {
        Ok(entries) => {
            for entry in entries {
                match serde_json::to_string(&*entry.borrow()) {
                    Ok(line) => println!("{}", line),
                    Err(e) => tracing::error!("Failed to serialize entry: {}", e),
                }
            }
        }
        Err(e) => tracing::warn!("Entry collector failed: {}", e),
    }

    tracing::info!("Query complete");
    result
}
