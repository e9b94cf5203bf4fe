//! WebSocket server broadcasting screener-engine output.
//!
//! Consumes the engine's narrow read/command interface and fans batched
//! updates, ranking refreshes, and connectivity changes out to connected
//! display clients as JSON. Clients steer the engine with small command
//! frames (rank mode, timeframe, visible count).

use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use screener_engine::{
    Connectivity, EngineConfig, EngineHandle, EnginePhase, EngineUpdate, RankMode, RankedEntry,
    Timeframe,
    batch::{DeliveryClass, InstrumentUpdate},
    engine::Engine,
    fetch::HttpMarketApi,
    stream::transport::WsTransport,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::broadcast,
};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

/// Outbound message to display clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    Welcome {
        message: String,
        timestamp: DateTime<Utc>,
    },
    Batch {
        class: DeliveryClass,
        updates: Vec<InstrumentUpdate>,
    },
    Ranking {
        mode: RankMode,
        entries: Vec<RankedEntry>,
    },
    Connectivity(Connectivity),
    Phase {
        phase: EnginePhase,
    },
}

/// Inbound command frame from a display client.
#[derive(Debug, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
enum ClientCommand {
    SetRankMode { mode: RankMode },
    SetTimeframe { timeframe: Timeframe },
    SetVisibleCount { count: usize },
}

#[tokio::main]
async fn main() {
    init_logging();

    info!("Starting screener WebSocket server");

    let rest_url = env_url("SCREENER_REST_URL", "https://api.binance.com");
    let ws_url = env_url("SCREENER_WS_URL", "wss://stream.binance.com:9443/ws");
    let visible_count = env_parse("SCREENER_VISIBLE_COUNT", 30usize);
    let universe_size = env_parse("SCREENER_UNIVERSE_SIZE", 250usize);

    let config = EngineConfig::default()
        .with_visible_count(visible_count)
        .with_universe_size(universe_size);
    let api = Arc::new(HttpMarketApi::new(rest_url));
    let transport = Box::new(WsTransport::new(ws_url));
    let engine = Engine::spawn(api, transport, config);

    // Broadcast channel for server messages; buffer configurable via
    // WS_BUFFER_SIZE (default 10,000).
    let buffer_size = env_parse("WS_BUFFER_SIZE", 10_000usize);
    let (tx, _rx) = broadcast::channel::<ServerMessage>(buffer_size);
    let tx = Arc::new(tx);

    let server_addr = std::env::var("WS_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:9010".to_string())
        .parse::<SocketAddr>()
        .unwrap_or_else(|_| "0.0.0.0:9010".parse().expect("default addr parses"));
    let tx_server = tx.clone();
    let engine_server = engine.clone();
    tokio::spawn(async move {
        start_websocket_server(server_addr, tx_server, engine_server).await;
    });
    info!("WebSocket server listening on ws://{}", server_addr);

    // Bridge engine updates into the client broadcast.
    let mut updates = engine.subscribe_updates();
    loop {
        match updates.recv().await {
            Ok(update) => {
                let message = match update {
                    EngineUpdate::Batch(batch) => ServerMessage::Batch {
                        class: batch.class,
                        updates: batch.updates,
                    },
                    EngineUpdate::RankingRefreshed { mode } => ServerMessage::Ranking {
                        mode,
                        entries: engine.get_ranking(mode),
                    },
                    EngineUpdate::Connectivity(connectivity) => {
                        ServerMessage::Connectivity(connectivity)
                    }
                    EngineUpdate::Phase(phase) => {
                        info!(?phase, "engine phase");
                        ServerMessage::Phase { phase }
                    }
                };
                // Ignore send errors when no clients are connected.
                let _ = tx.send(message);
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "server bridge lagged behind engine updates");
            }
            Err(broadcast::error::RecvError::Closed) => {
                error!("engine update stream closed, shutting down");
                return;
            }
        }
    }
}

/// Accept loop for display clients.
async fn start_websocket_server(
    addr: SocketAddr,
    tx: Arc<broadcast::Sender<ServerMessage>>,
    engine: EngineHandle,
) {
    let listener = TcpListener::bind(&addr)
        .await
        .expect("Failed to bind WebSocket server");

    while let Ok((stream, peer_addr)) = listener.accept().await {
        info!("New WebSocket connection from {}", peer_addr);
        let tx = tx.clone();
        let engine = engine.clone();
        tokio::spawn(handle_client(stream, peer_addr, tx, engine));
    }
}

async fn handle_client(
    stream: TcpStream,
    peer_addr: SocketAddr,
    tx: Arc<broadcast::Sender<ServerMessage>>,
    engine: EngineHandle,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(error) => {
            error!("WebSocket handshake failed for {}: {}", peer_addr, error);
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let mut rx = tx.subscribe();

    // Welcome plus a current-ranking snapshot so the client can render
    // before the first refresh.
    let welcome = ServerMessage::Welcome {
        message: "Connected to screener feed".to_string(),
        timestamp: Utc::now(),
    };
    let snapshot = ServerMessage::Ranking {
        mode: RankMode::QuoteVolume24h,
        entries: engine.get_ranking(RankMode::QuoteVolume24h),
    };
    for message in [welcome, snapshot] {
        if let Ok(json) = serde_json::to_string(&message) {
            let _ = ws_sender.send(Message::Text(json.into())).await;
        }
    }

    let mut send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(message) => {
                    if let Ok(json) = serde_json::to_string(&message) {
                        if ws_sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Client fell behind under load; drop old messages and
                    // keep the connection.
                    warn!("Client {} lagged, skipped {} messages", peer_addr, skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(message) = ws_receiver.next().await {
            match message {
                Ok(Message::Text(text)) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(command) => {
                        debug!("Command from {}: {:?}", peer_addr, command);
                        let result = match command {
                            ClientCommand::SetRankMode { mode } => {
                                engine.set_rank_mode(mode).await
                            }
                            ClientCommand::SetTimeframe { timeframe } => {
                                engine.set_timeframe(timeframe).await
                            }
                            ClientCommand::SetVisibleCount { count } => {
                                engine.set_visible_count(count).await
                            }
                        };
                        if let Err(error) = result {
                            warn!("Command from {} failed: {}", peer_addr, error);
                        }
                    }
                    Err(error) => {
                        debug!("Unparseable command from {}: {}", peer_addr, error);
                    }
                },
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Err(error) => {
                    error!("WebSocket error for {}: {}", peer_addr, error);
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {}
        _ = &mut recv_task => {}
    }

    info!("WebSocket connection closed for {}", peer_addr);
}

fn env_url(key: &str, default: &str) -> Url {
    let raw = std::env::var(key).unwrap_or_else(|_| default.to_string());
    Url::parse(&raw).unwrap_or_else(|error| {
        warn!("Invalid {} ({}), falling back to {}", key, error, default);
        Url::parse(default).expect("default url parses")
    })
}

fn env_parse<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
