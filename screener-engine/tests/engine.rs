//! End-to-end engine tests with an injected api client and a scripted
//! stream transport: deterministic bootstrap, subscription reconciliation,
//! and batched delivery without any network.

use async_trait::async_trait;
use chrono::{DurationRound, TimeDelta, Utc};
use parking_lot::Mutex;
use screener_engine::{
    Bar, EngineConfig, EnginePhase, EngineUpdate, InstrumentInfo, RankMode, Summary24h, Timeframe,
    batch::DeliveryClass,
    engine::Engine,
    error::{ApiError, StreamError},
    fetch::MarketApi,
    market::InstrumentStatus,
    stream::protocol::{ControlFrame, Method},
    stream::transport::{InboundMessage, StreamSink, StreamSource, StreamTransport},
};
use smol_str::SmolStr;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// Universe of three instruments with fixed 24h summaries; bar history is
/// generated deterministically relative to the wall clock so metric windows
/// see it.
struct MockApi {
    bar_calls: Mutex<Vec<(String, Timeframe)>>,
}

impl MockApi {
    fn new() -> Self {
        Self {
            bar_calls: Mutex::new(Vec::new()),
        }
    }

    fn instrument(symbol: &str) -> InstrumentInfo {
        InstrumentInfo {
            symbol: SmolStr::new(symbol),
            base_asset: SmolStr::new(symbol.trim_end_matches("USDT")),
            quote_asset: SmolStr::new("USDT"),
            status: InstrumentStatus::Trading,
        }
    }

    fn summary(symbol: &str, quote_volume: f64) -> Summary24h {
        Summary24h {
            symbol: SmolStr::new(symbol),
            last_price: 100.0,
            high: 110.0,
            low: 90.0,
            base_volume: quote_volume / 100.0,
            quote_volume,
        }
    }
}

#[async_trait]
impl MarketApi for MockApi {
    async fn fetch_universe(&self) -> Result<Vec<InstrumentInfo>, ApiError> {
        Ok(vec![
            Self::instrument("BTCUSDT"),
            Self::instrument("ETHUSDT"),
            Self::instrument("SOLUSDT"),
            // Non-tradable and wrong-quote instruments must be filtered out.
            InstrumentInfo {
                status: InstrumentStatus::Halted,
                ..Self::instrument("DEADUSDT")
            },
            InstrumentInfo {
                quote_asset: SmolStr::new("BTC"),
                ..Self::instrument("ETHBTC")
            },
        ])
    }

    async fn fetch_summaries(&self) -> Result<Vec<Summary24h>, ApiError> {
        Ok(vec![
            Self::summary("BTCUSDT", 9000.0),
            Self::summary("ETHUSDT", 5000.0),
            Self::summary("SOLUSDT", 1000.0),
            Self::summary("DEADUSDT", 99_999.0),
        ])
    }

    async fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        _limit: usize,
    ) -> Result<Vec<Bar>, ApiError> {
        self.bar_calls
            .lock()
            .push((symbol.to_string(), timeframe));

        let step = timeframe.duration();
        let anchor = Utc::now()
            .duration_trunc(step)
            .expect("truncatable timeframe");
        let bars = (0..3)
            .rev()
            .map(|offset| {
                let open_time = anchor - step * (offset + 1);
                Bar {
                    open_time,
                    close_time: open_time + step - TimeDelta::milliseconds(1),
                    open: 100.0,
                    high: 101.0,
                    low: 99.0,
                    close: 100.5,
                    base_volume: 10.0,
                    quote_volume: 1000.0,
                    trade_count: Some(25),
                    is_final: true,
                }
            })
            .collect();
        Ok(bars)
    }
}

type ScriptedRx = mpsc::UnboundedReceiver<Result<InboundMessage, StreamError>>;
type ScriptedTx = mpsc::UnboundedSender<Result<InboundMessage, StreamError>>;

struct ScriptedTransport {
    sent: Arc<Mutex<Vec<String>>>,
    connections: Arc<Mutex<VecDeque<ScriptedRx>>>,
}

struct RecordingSink {
    sent: Arc<Mutex<Vec<String>>>,
}

struct ScriptedSource {
    rx: ScriptedRx,
}

#[async_trait]
impl StreamTransport for ScriptedTransport {
    async fn connect(
        &mut self,
    ) -> Result<(Box<dyn StreamSink>, Box<dyn StreamSource>), StreamError> {
        match self.connections.lock().pop_front() {
            Some(rx) => Ok((
                Box::new(RecordingSink {
                    sent: self.sent.clone(),
                }),
                Box::new(ScriptedSource { rx }),
            )),
            None => Err(StreamError::Connect("no scripted connection".to_string())),
        }
    }
}

#[async_trait]
impl StreamSink for RecordingSink {
    async fn send_text(&mut self, text: String) -> Result<(), StreamError> {
        self.sent.lock().push(text);
        Ok(())
    }

    async fn send_ping(&mut self) -> Result<(), StreamError> {
        Ok(())
    }
}

#[async_trait]
impl StreamSource for ScriptedSource {
    async fn next_message(&mut self) -> Option<Result<InboundMessage, StreamError>> {
        self.rx.recv().await
    }
}

struct Harness {
    engine: screener_engine::EngineHandle,
    updates: broadcast::Receiver<EngineUpdate>,
    sent: Arc<Mutex<Vec<String>>>,
    feed: ScriptedTx,
    api: Arc<MockApi>,
}

fn spawn_engine(config: EngineConfig) -> Harness {
    let api = Arc::new(MockApi::new());
    let sent = Arc::new(Mutex::new(Vec::new()));
    let (feed, rx) = mpsc::unbounded_channel();
    let transport = ScriptedTransport {
        sent: sent.clone(),
        connections: Arc::new(Mutex::new(VecDeque::from([rx]))),
    };

    let engine = Engine::spawn(api.clone(), Box::new(transport), config);
    let updates = engine.subscribe_updates();

    Harness {
        engine,
        updates,
        sent,
        feed,
        api,
    }
}

fn config() -> EngineConfig {
    EngineConfig::default().with_visible_count(2)
}

async fn wait_for_phase(updates: &mut broadcast::Receiver<EngineUpdate>, phase: EnginePhase) {
    loop {
        match updates.recv().await {
            Ok(EngineUpdate::Phase(seen)) if seen == phase => return,
            Ok(_) => continue,
            Err(error) => panic!("update stream ended before {phase:?}: {error}"),
        }
    }
}

fn control_frames(sent: &Arc<Mutex<Vec<String>>>) -> Vec<ControlFrame> {
    sent.lock()
        .iter()
        .map(|text| serde_json::from_str(text).expect("control frame"))
        .collect()
}

/// Desired-set reconstruction from the frame log: what the server would
/// consider subscribed after a forced reconciliation.
fn active_streams(frames: &[ControlFrame]) -> Vec<String> {
    let mut active = Vec::new();
    for frame in frames {
        match frame.method {
            Method::Subscribe => {
                for stream in &frame.params {
                    if !active.contains(stream) {
                        active.push(stream.clone());
                    }
                }
            }
            Method::Unsubscribe => {
                active.retain(|stream| !frame.params.contains(stream));
            }
        }
    }
    active.sort();
    active
}

#[tokio::test(start_paused = true)]
async fn test_bootstrap_reaches_ready_with_seeded_priority_history() {
    let mut harness = spawn_engine(config());
    wait_for_phase(&mut harness.updates, EnginePhase::Ready).await;

    assert_eq!(harness.engine.phase(), EnginePhase::Ready);

    // Visible set = top-2 by 24h quote volume; both seeded in the metric
    // and chart timeframes before the stream opened.
    for symbol in ["BTCUSDT", "ETHUSDT"] {
        assert!(
            !harness.engine.get_history(symbol, Timeframe::M1).is_empty(),
            "{symbol} missing metric history"
        );
        assert!(
            !harness.engine.get_history(symbol, Timeframe::M15).is_empty(),
            "{symbol} missing chart history"
        );
    }

    // Halted/wrong-quote instruments never entered the universe.
    let ranking = harness.engine.get_ranking(RankMode::QuoteVolume24h);
    assert_eq!(ranking.len(), 3);
    assert_eq!(ranking[0].instrument.symbol, "BTCUSDT");
    assert!(
        ranking
            .iter()
            .all(|entry| entry.instrument.symbol != "DEADUSDT")
    );

    // The stream got subscriptions for exactly the visible set.
    let frames = control_frames(&harness.sent);
    let active = active_streams(&frames);
    assert_eq!(
        active,
        vec![
            "btcusdt@bar_15m",
            "btcusdt@bar_1m",
            "ethusdt@bar_15m",
            "ethusdt@bar_1m",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_stream_connectivity_is_surfaced() {
    let mut harness = spawn_engine(config());
    wait_for_phase(&mut harness.updates, EnginePhase::Ready).await;

    loop {
        match harness.updates.recv().await {
            Ok(EngineUpdate::Connectivity(connectivity)) if connectivity.stream_connected => break,
            Ok(_) => continue,
            Err(error) => panic!("no connectivity update: {error}"),
        }
    }
    assert!(harness.engine.get_connectivity().stream_connected);
}

#[tokio::test(start_paused = true)]
async fn test_live_bar_flows_to_priority_batch() {
    let mut harness = spawn_engine(config());
    wait_for_phase(&mut harness.updates, EnginePhase::Ready).await;

    let open_time = Utc::now()
        .duration_trunc(TimeDelta::minutes(1))
        .expect("minute truncation");
    let event = serde_json::json!({
        "eventType": "bar",
        "eventTime": open_time.timestamp_millis() + 1_000,
        "instrument": "BTCUSDT",
        "bar": {
            "startTime": open_time.timestamp_millis(),
            "closeTime": open_time.timestamp_millis() + 59_999,
            "interval": "1m",
            "open": "100.0",
            "high": "107.0",
            "low": "99.5",
            "close": "106.5",
            "volume": "11.0",
            "quoteVolume": "1150.0",
            "tradeCount": 31,
            "isClosed": false
        }
    });
    harness
        .feed
        .send(Ok(InboundMessage::Text(event.to_string())))
        .expect("feed bar");

    // The visible instrument's update arrives on the priority cadence.
    loop {
        match harness.updates.recv().await {
            Ok(EngineUpdate::Batch(batch)) => {
                assert_eq!(batch.class, DeliveryClass::Priority);
                assert_eq!(batch.updates.len(), 1);
                assert_eq!(batch.updates[0].symbol, "BTCUSDT");
                assert_eq!(batch.updates[0].last_price, 106.5);
                break;
            }
            Ok(_) => continue,
            Err(error) => panic!("no batch delivered: {error}"),
        }
    }

    // The bar also landed in history (replacing or appending per open
    // time), so the handle snapshot sees the new close.
    let history = harness.engine.get_history("BTCUSDT", Timeframe::M1);
    assert_eq!(history.last().map(|bar| bar.close), Some(106.5));
}

#[tokio::test(start_paused = true)]
async fn test_timeframe_switch_forces_full_reconciliation() {
    let mut harness = spawn_engine(config());
    wait_for_phase(&mut harness.updates, EnginePhase::Ready).await;

    // Let bootstrap's frames settle, then switch 15m -> 1h.
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    harness.sent.lock().clear();
    harness
        .engine
        .set_timeframe(Timeframe::H1)
        .await
        .expect("set timeframe");
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;

    let frames = control_frames(&harness.sent);
    let unsubscribed: Vec<&String> = frames
        .iter()
        .filter(|frame| frame.method == Method::Unsubscribe)
        .flat_map(|frame| &frame.params)
        .collect();
    assert!(
        unsubscribed.iter().all(|stream| stream.ends_with("@bar_15m")),
        "only stale chart streams are unsubscribed: {unsubscribed:?}"
    );

    // After reconciliation the active set is exactly metric + new chart
    // streams for the visible instruments.
    let mut active = active_streams(&frames);
    active.retain(|stream| !stream.ends_with("@bar_15m"));
    assert_eq!(
        active,
        vec![
            "btcusdt@bar_1h",
            "btcusdt@bar_1m",
            "ethusdt@bar_1h",
            "ethusdt@bar_1m",
        ]
    );

    // Old chart buffers were cleared, new chart history reseeded.
    assert!(harness.engine.get_history("BTCUSDT", Timeframe::M15).is_empty());
    assert!(!harness.engine.get_history("BTCUSDT", Timeframe::H1).is_empty());
    // Metric buffers stayed resident.
    assert!(!harness.engine.get_history("BTCUSDT", Timeframe::M1).is_empty());

    // The reseed requested the new timeframe from the api.
    assert!(
        harness
            .api
            .bar_calls
            .lock()
            .iter()
            .any(|(_, timeframe)| *timeframe == Timeframe::H1)
    );
}

#[tokio::test(start_paused = true)]
async fn test_rank_mode_change_reorders_active_ranking() {
    let mut harness = spawn_engine(config());
    wait_for_phase(&mut harness.updates, EnginePhase::Ready).await;

    harness
        .engine
        .set_rank_mode(RankMode::NearExtremum)
        .await
        .expect("set rank mode");

    loop {
        match harness.updates.recv().await {
            Ok(EngineUpdate::RankingRefreshed {
                mode: RankMode::NearExtremum,
            }) => break,
            Ok(_) => continue,
            Err(error) => panic!("no ranking refresh: {error}"),
        }
    }

    let ranking = harness.engine.get_ranking(RankMode::NearExtremum);
    assert!(!ranking.is_empty());
    // Ascending mode: scores never decrease down the list.
    for pair in ranking.windows(2) {
        assert!(pair[0].score <= pair[1].score);
    }
}
