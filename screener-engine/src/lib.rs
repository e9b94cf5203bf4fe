//! # Screener Engine
//! Real-time market screener engine: ingests streaming bar data for
//! hundreds of instruments, maintains bounded rolling history per
//! instrument, derives volatility/liquidity/growth/extremum metrics, ranks
//! instruments, and delivers coalesced change batches at a controlled
//! cadence - while respecting upstream rate limits and recovering from
//! connection loss.
//!
//! ## Architecture
//! Data flows fetcher/stream -> [`history::HistoryStore`] ->
//! [`metrics`] -> [`rank`] -> [`batch::UpdateBatcher`] -> update
//! subscribers. The [`engine::Engine`] orchestrator supervises bootstrap
//! (universe discovery, priority seeding, stream open, background fill) and
//! serialises all state mutation onto one processing loop; the only
//! intentional parallelism is the fetcher's bounded request gate.
//!
//! ## Example
//! ```no_run
//! use screener_engine::{
//!     EngineConfig,
//!     engine::Engine,
//!     fetch::HttpMarketApi,
//!     stream::transport::WsTransport,
//! };
//! use std::sync::Arc;
//! use url::Url;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let api = Arc::new(HttpMarketApi::new(Url::parse("https://api.example.com")?));
//! let transport = Box::new(WsTransport::new(Url::parse("wss://stream.example.com/ws")?));
//! let engine = Engine::spawn(api, transport, EngineConfig::default());
//!
//! let mut updates = engine.subscribe_updates();
//! while let Ok(update) = updates.recv().await {
//!     println!("{update:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod batch;
pub mod config;
pub mod de;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod history;
pub mod market;
pub mod metrics;
pub mod rank;
pub mod stream;
pub mod subscription;

pub use config::EngineConfig;
pub use engine::{Connectivity, Engine, EngineCommand, EngineHandle, EnginePhase, EngineUpdate};
pub use error::{ApiError, EngineError, StreamError};
pub use market::{Bar, BarUpdate, InstrumentInfo, Summary24h, Timeframe};
pub use rank::{RankMode, RankedEntry};
