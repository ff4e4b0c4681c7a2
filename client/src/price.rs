use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{ClientError, Result};

pub const COINGECKO_SIMPLE_PRICE: &str =
    "https://api.coingecko.com/api/v3/simple/price?ids=solana&vs_currencies=usd";

pub trait PriceIndex: Send + Sync + 'static {
    /// USD per SOL.
    fn sol_usd(&self) -> impl Future<Output = Result<f64>> + Send;
}

#[derive(Debug, Deserialize)]
struct SimplePrice {
    solana: UsdQuote,
}

#[derive(Debug, Deserialize)]
struct UsdQuote {
    usd: f64,
}

pub struct CoinGecko {
    url: String,
    http: reqwest::Client,
}

impl CoinGecko {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            http: reqwest::Client::new(),
        }
    }
}

impl Default for CoinGecko {
    fn default() -> Self {
        Self::new(COINGECKO_SIMPLE_PRICE)
    }
}

impl PriceIndex for CoinGecko {
    async fn sol_usd(&self) -> Result<f64> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ClientError::Price(e.to_string()))?;
        let quote: SimplePrice = response
            .json()
            .await
            .map_err(|e| ClientError::Price(e.to_string()))?;
        Ok(quote.solana.usd)
    }
}

/// Refreshes the SOL/USD price on a fixed interval until dropped.
pub struct PricePoller {
    handle: JoinHandle<()>,
}

const MIN_POLL_PERIOD: Duration = Duration::from_secs(1);

impl PricePoller {
    pub fn spawn<P: PriceIndex>(
        index: Arc<P>,
        every: Duration,
        sink: Arc<watch::Sender<Option<f64>>>,
    ) -> Self {
        // interval() panics on a zero period
        let every = every.max(MIN_POLL_PERIOD);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match index.sol_usd().await {
                    Ok(price) => {
                        debug!("SOL price {price} USD");
                        sink.send_replace(Some(price));
                    }
                    Err(err) => warn!("SOL price refresh failed: {err}"),
                }
            }
        });
        Self { handle }
    }
}

impl Drop for PricePoller {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    struct Counting(AtomicU32);

    impl PriceIndex for Counting {
        async fn sol_usd(&self) -> Result<f64> {
            let n = self.0.fetch_add(1, Ordering::SeqCst);
            Ok(100.0 + n as f64)
        }
    }

    #[test]
    fn parses_simple_price() {
        let quote: SimplePrice = serde_json::from_str(r#"{"solana":{"usd":142.5}}"#).unwrap();
        assert_eq!(quote.solana.usd, 142.5);
    }

    #[tokio::test(start_paused = true)]
    async fn polls_every_interval_until_dropped() {
        let index = Arc::new(Counting(AtomicU32::new(0)));
        let (tx, rx) = watch::channel(None);
        let poller = PricePoller::spawn(index.clone(), Duration::from_secs(60), Arc::new(tx));

        // ticks at 0s, 60s, 120s
        tokio::time::sleep(Duration::from_secs(121)).await;
        assert_eq!(index.0.load(Ordering::SeqCst), 3);
        assert_eq!(*rx.borrow(), Some(102.0));

        drop(poller);
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(index.0.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_period_is_clamped() {
        let index = Arc::new(Counting(AtomicU32::new(0)));
        let (tx, _rx) = watch::channel(None);
        let poller = PricePoller::spawn(index.clone(), Duration::ZERO, Arc::new(tx));

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(index.0.load(Ordering::SeqCst), 3);
        assert!(!poller.handle.is_finished());
    }
}
