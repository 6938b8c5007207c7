//! Headless WavePortal reader. Loads the wave history over JSON-RPC, then
//! follows it by periodic refresh until interrupted.

use anyhow::Context;
use std::rc::Rc;
use std::time::Duration;
use tracing::{info, warn};
use wp_api_types::WaveRecord;
use wp_rpc_http::HttpProvider;
use wp_session::{SessionConfig, WavePortalApp};
use wp_wallet::{Eip1193Provider, WalletGateway};

const DEFAULT_REFRESH: Duration = Duration::from_secs(15);

fn refresh_interval(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Duration> {
    match lookup("WAVEPORTAL_REFRESH_SECS") {
        None => Ok(DEFAULT_REFRESH),
        Some(raw) => {
            let secs: u64 = raw
                .trim()
                .parse()
                .with_context(|| format!("WAVEPORTAL_REFRESH_SECS must be whole seconds, got {raw:?}"))?;
            anyhow::ensure!(secs > 0, "WAVEPORTAL_REFRESH_SECS must be positive");
            Ok(Duration::from_secs(secs))
        }
    }
}

fn log_waves(waves: &[WaveRecord]) {
    for wave in waves {
        info!(
            sender = %wave.sender,
            timestamp = wave.timestamp,
            "👋 {}",
            wave.message
        );
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = SessionConfig::from_env().context("loading WAVEPORTAL_* configuration")?;
    let every = refresh_interval(|name| std::env::var(name).ok())?;

    let provider = HttpProvider::new(config.rpc_url.clone());
    info!(
        endpoint = provider.endpoint(),
        contract = %config.contract_address,
        "wave-watch starting"
    );
    let provider: Rc<dyn Eip1193Provider> = Rc::new(provider);
    let app = WavePortalApp::over_rpc(config, WalletGateway::new(None), Some(provider))?;

    app.start().await.context("initial wave history read")?;
    let mut shown = app.snapshot().len();
    log_waves(&app.snapshot());
    match app.total_waves().await {
        Ok(total) => info!(waves = shown, total, refresh_secs = every.as_secs(), "history loaded"),
        Err(err) => {
            warn!("reading wave count failed: {err}");
            info!(waves = shown, refresh_secs = every.as_secs(), "history loaded");
        }
    }

    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                if let Err(err) = app.refresh().await {
                    warn!("refresh failed: {err}");
                    continue;
                }
                let snapshot = app.snapshot();
                if snapshot.len() > shown {
                    log_waves(&snapshot[shown..]);
                    shown = snapshot.len();
                }
            }
        }
    }

    app.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_interval_defaults_and_validates() -> anyhow::Result<()> {
        assert_eq!(refresh_interval(|_| None)?, DEFAULT_REFRESH);
        assert_eq!(
            refresh_interval(|_| Some("3".into()))?,
            Duration::from_secs(3)
        );
        assert!(refresh_interval(|_| Some("0".into())).is_err());
        assert!(refresh_interval(|_| Some("soon".into())).is_err());
        Ok(())
    }
}
