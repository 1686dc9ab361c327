//! AE/USD price lookups for history rows.

use async_trait::async_trait;
use serde::Deserialize;

use crate::cache::AddressCache;
use crate::error::IndexerError;

/// Source of historical AE/USD prices.
#[async_trait]
pub trait PriceOracle: Send + Sync + std::fmt::Debug {
    /// Price at `time_ms` (milliseconds since epoch), if known.
    async fn price_at(&self, time_ms: i64) -> Option<f64>;
}

/// Oracle that never knows a price; rows fall back to the configured default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPriceOracle;

#[async_trait]
impl PriceOracle for NoPriceOracle {
    async fn price_at(&self, _time_ms: i64) -> Option<f64> {
        None
    }
}

const HOUR_MS: i64 = 3_600_000;

#[derive(Debug, Deserialize)]
struct MarketChart {
    prices: Vec<(i64, f64)>,
}

impl MarketChart {
    /// Price sample closest to `time_ms`.
    fn closest(&self, time_ms: i64) -> Option<f64> {
        self.prices
            .iter()
            .min_by_key(|(at, _)| (at - time_ms).abs())
            .map(|(_, price)| *price)
    }
}

/// Market-chart HTTP oracle, cached per hour.
#[derive(Debug)]
pub struct HttpPriceOracle {
    http: reqwest::Client,
    base_url: String,
    hours: AddressCache<i64, f64>,
}

impl HttpPriceOracle {
    /// Creates an oracle querying `{base_url}/coins/aeternity/market_chart/range`.
    #[must_use]
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, cache_capacity: usize) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            hours: AddressCache::new(cache_capacity),
        }
    }

    async fn fetch_hour(&self, hour: i64) -> Result<f64, IndexerError> {
        let from = hour * HOUR_MS / 1000 - 3600;
        let to = (hour + 1) * HOUR_MS / 1000 + 3600;
        let url = format!(
            "{}/coins/aeternity/market_chart/range?vs_currency=usd&from={from}&to={to}",
            self.base_url
        );
        let chart: MarketChart = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        chart
            .closest(hour * HOUR_MS + HOUR_MS / 2)
            .ok_or_else(|| IndexerError::MissingData(format!("no AE/USD price around {url}")))
    }
}

#[async_trait]
impl PriceOracle for HttpPriceOracle {
    async fn price_at(&self, time_ms: i64) -> Option<f64> {
        let hour = time_ms.div_euclid(HOUR_MS);
        match self
            .hours
            .get_or_try_insert_with(hour, || self.fetch_hour(hour))
            .await
        {
            Ok(price) => Some(price),
            Err(e) => {
                tracing::warn!(hour, error = %e, "AE/USD price lookup failed");
                None
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn closest_sample_wins() {
        let Ok(chart) = serde_json::from_str::<MarketChart>(
            r#"{"prices":[[1000,0.10],[5000,0.20],[9000,0.30]],"market_caps":[]}"#,
        ) else {
            panic!("chart should decode");
        };
        assert_eq!(chart.closest(6000), Some(0.20));
        assert_eq!(chart.closest(100_000), Some(0.30));
    }

    #[test]
    fn empty_chart_has_no_price() {
        let chart = MarketChart { prices: Vec::new() };
        assert_eq!(chart.closest(0), None);
    }

    #[tokio::test]
    async fn no_oracle_knows_nothing() {
        assert_eq!(NoPriceOracle.price_at(1_700_000_000_000).await, None);
    }
}
