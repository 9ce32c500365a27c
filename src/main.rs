use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast::error::RecvError;

use candle_window::binance::rest::BinanceRestClient;
use candle_window::config::Config;
use candle_window::provider::{CandleWindowProvider, ProviderEvent};

#[tokio::main]
async fn main() -> Result<()> {
    // Install rustls crypto provider (required by rustls 0.23+)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {:#}", e);
            eprintln!("Set CW_CONFIG_PATH or create config/default.toml");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(&config.logging.level)
            }),
        )
        .json()
        .init();

    tracing::info!(
        symbol = %config.provider.symbol,
        interval = %config.provider.interval,
        rest_url = %config.binance.rest_base_url,
        "Starting candle-window"
    );

    let rest_client = Arc::new(BinanceRestClient::new(&config.binance.rest_base_url));
    match rest_client.ping().await {
        Ok(()) => tracing::info!("Binance ping OK"),
        Err(e) => tracing::warn!(error = %e, "Binance ping failed, continuing"),
    }
    match rest_client.server_time().await {
        Ok(server_ms) => {
            let skew_ms = chrono::Utc::now().timestamp_millis() - server_ms;
            tracing::info!(server_time_ms = server_ms, skew_ms, "Binance server time");
        }
        Err(e) => tracing::warn!(error = %e, "Binance server time unavailable"),
    }

    let provider = CandleWindowProvider::new(config.provider.clone(), Arc::clone(&rest_client))
        .context("failed to start candle window provider")?;

    let mut events = provider.subscribe();
    let report = provider
        .wait_until_ready()
        .await
        .context("provider stopped before backfill finished")?;
    tracing::info!(
        loaded = report.loaded,
        retained = report.retained,
        complete = report.is_complete(),
        "Window ready"
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received");
                break;
            }
            event = events.recv() => match event {
                Ok(ProviderEvent::Updated { appended, evicted }) => {
                    let first = provider.first().ok().map(|c| c.open_time);
                    let last = provider.last().ok().map(|c| c.open_time);
                    tracing::info!(
                        appended,
                        evicted,
                        len = provider.len(),
                        first_open_time = ?first,
                        last_open_time = ?last,
                        "Window updated"
                    );
                }
                Ok(ProviderEvent::LiveTickFailed { error }) => {
                    tracing::warn!(error = %error, "Live update failed");
                }
                Ok(other) => tracing::debug!(event = ?other, "Provider event"),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Provider events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    provider.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
