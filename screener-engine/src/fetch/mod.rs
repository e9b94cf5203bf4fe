//! Snapshot/backfill fetching over the bulk data endpoint.
//!
//! All issuance passes through a bounded concurrency gate and the
//! [`RateLimitGovernor`]; transient failures retry with short bounded
//! backoff, throttling suspends issuance globally, and per-symbol failures
//! never block other instruments.

pub mod governor;

pub use governor::{ApiStatus, RateLimitGovernor};

use crate::{
    error::ApiError,
    market::{Bar, InstrumentInfo, Summary24h, Timeframe},
};
use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use serde_json::Value;
use smol_str::SmolStr;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use url::Url;

/// Maximum bars a single snapshot request may ask for.
pub const MAX_BAR_LIMIT: usize = 1500;

/// The bulk data endpoint, abstracted for deterministic tests.
#[async_trait]
pub trait MarketApi: Send + Sync {
    /// Fetch the full instrument universe.
    async fn fetch_universe(&self) -> Result<Vec<InstrumentInfo>, ApiError>;

    /// Fetch 24-hour summaries for every instrument.
    async fn fetch_summaries(&self) -> Result<Vec<Summary24h>, ApiError>;

    /// Fetch up to `limit` most recent bars for one instrument/timeframe.
    async fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Bar>, ApiError>;
}

#[derive(Debug, Deserialize)]
struct ExchangeInfoResponse {
    symbols: Vec<InstrumentInfo>,
}

/// REST implementation of [`MarketApi`].
#[derive(Debug, Clone)]
pub struct HttpMarketApi {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpMarketApi {
    pub fn new(base_url: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|error| ApiError::Transport(format!("invalid endpoint {path}: {error}")))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, ApiError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|error| ApiError::Transport(error.to_string()))?;

        let status = response.status().as_u16();
        if status == 429 || status == 418 {
            return Err(ApiError::RateLimited { code: status });
        }
        if !(200..300).contains(&status) {
            return Err(ApiError::Status { code: status });
        }

        response
            .json::<T>()
            .await
            .map_err(|error| ApiError::Parse(error.to_string()))
    }
}

/// Parse one kline row: `[openTime, "open", "high", "low", "close",
/// "volume", closeTime, "quoteVolume", tradeCount, ...]`.
fn parse_kline_row(row: &Value) -> Option<Bar> {
    let fields = row.as_array()?;
    let field_f64 = |index: usize| -> Option<f64> { fields.get(index)?.as_str()?.parse().ok() };

    Some(Bar {
        open_time: DateTime::from_timestamp_millis(fields.first()?.as_i64()?)?,
        close_time: DateTime::from_timestamp_millis(fields.get(6)?.as_i64()?)?,
        open: field_f64(1)?,
        high: field_f64(2)?,
        low: field_f64(3)?,
        close: field_f64(4)?,
        base_volume: field_f64(5)?,
        quote_volume: field_f64(7)?,
        trade_count: fields.get(8).and_then(Value::as_u64),
        is_final: true,
    })
}

#[async_trait]
impl MarketApi for HttpMarketApi {
    async fn fetch_universe(&self) -> Result<Vec<InstrumentInfo>, ApiError> {
        let url = self.endpoint("/api/v3/exchangeInfo")?;
        let response: ExchangeInfoResponse = self.get_json(url).await?;
        Ok(response.symbols)
    }

    async fn fetch_summaries(&self) -> Result<Vec<Summary24h>, ApiError> {
        let url = self.endpoint("/api/v3/ticker/24hr")?;
        self.get_json(url).await
    }

    async fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Bar>, ApiError> {
        let mut url = self.endpoint("/api/v3/klines")?;
        url.query_pairs_mut()
            .append_pair("symbol", symbol)
            .append_pair("interval", timeframe.as_str())
            .append_pair("limit", &limit.min(MAX_BAR_LIMIT).to_string());

        let rows: Vec<Value> = self.get_json(url).await?;
        let mut bars = Vec::with_capacity(rows.len());
        let mut skipped = 0usize;
        for row in &rows {
            match parse_kline_row(row) {
                Some(bar) => bars.push(bar),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            warn!(symbol, %timeframe, skipped, "skipped malformed kline rows");
        }
        Ok(bars)
    }
}

/// Issuance pacing and retry policy.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Simultaneous in-flight requests admitted by the gate.
    pub concurrency: usize,
    /// Attempts per request for retryable failures.
    pub max_attempts: u32,
    /// Fixed delay between retryable attempts.
    pub retry_delay: Duration,
    /// Symbols per seeding batch.
    pub seed_batch_size: usize,
    /// Inter-batch pacing while seeding visible instruments.
    pub foreground_pacing: Duration,
    /// Inter-batch pacing while seeding the rest of the universe.
    pub background_pacing: Duration,
    /// Bars requested per seed.
    pub bar_limit: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_attempts: 3,
            retry_delay: Duration::from_millis(1500),
            seed_batch_size: 4,
            foreground_pacing: Duration::from_millis(100),
            background_pacing: Duration::from_millis(500),
            bar_limit: 500,
        }
    }
}

impl FetchConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_bar_limit(mut self, bar_limit: usize) -> Self {
        self.bar_limit = bar_limit.min(MAX_BAR_LIMIT);
        self
    }
}

/// Gated, retrying wrapper around a [`MarketApi`].
#[derive(Clone)]
pub struct SnapshotFetcher {
    api: Arc<dyn MarketApi>,
    governor: Arc<RateLimitGovernor>,
    gate: Arc<Semaphore>,
    config: FetchConfig,
}

impl SnapshotFetcher {
    pub fn new(
        api: Arc<dyn MarketApi>,
        governor: Arc<RateLimitGovernor>,
        config: FetchConfig,
    ) -> Self {
        let gate = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self {
            api,
            governor,
            gate,
            config,
        }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    pub async fn universe(&self) -> Result<Vec<InstrumentInfo>, ApiError> {
        self.request("universe", || self.api.fetch_universe()).await
    }

    pub async fn summaries(&self) -> Result<Vec<Summary24h>, ApiError> {
        self.request("summaries", || self.api.fetch_summaries())
            .await
    }

    pub async fn bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Bar>, ApiError> {
        self.request("bars", || self.api.fetch_bars(symbol, timeframe, limit))
            .await
    }

    /// Seed many symbols in one timeframe: batches of `seed_batch_size`
    /// issued concurrently, batches separated by `pacing`. Failures are
    /// isolated per symbol.
    pub async fn seed_many(
        &self,
        symbols: &[SmolStr],
        timeframe: Timeframe,
        pacing: Duration,
    ) -> Vec<(SmolStr, Result<Vec<Bar>, ApiError>)> {
        let mut results = Vec::with_capacity(symbols.len());
        for (index, batch) in symbols.chunks(self.config.seed_batch_size.max(1)).enumerate() {
            if index > 0 {
                tokio::time::sleep(pacing).await;
            }
            let fetches = batch.iter().map(|symbol| {
                let symbol = symbol.clone();
                async move {
                    let result = self
                        .bars(&symbol, timeframe, self.config.bar_limit)
                        .await;
                    if let Err(error) = &result {
                        warn!(%symbol, %timeframe, %error, "seed fetch failed");
                    }
                    (symbol, result)
                }
            });
            results.extend(futures::future::join_all(fetches).await);
        }
        results
    }

    /// One gated request with bounded retry for transient failures.
    /// Throttling responses defer to the governor and do not consume
    /// attempts.
    async fn request<T, F, Fut>(&self, label: &'static str, operation: F) -> Result<T, ApiError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| ApiError::Transport("request gate closed".to_string()))?;

        let mut attempt: u32 = 0;
        loop {
            self.governor.admit().await;

            match operation().await {
                Ok(value) => {
                    self.governor.on_success();
                    return Ok(value);
                }
                Err(error @ ApiError::RateLimited { .. }) => {
                    debug!(label, %error, "request throttled, deferring to governor");
                    self.governor.on_throttled();
                }
                Err(error) if error.is_retryable() && attempt + 1 < self.config.max_attempts => {
                    attempt += 1;
                    debug!(label, %error, attempt, "transient failure, retrying");
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(error) => {
                    self.governor.on_failure();
                    return Err(error);
                }
            }
        }
    }
}
