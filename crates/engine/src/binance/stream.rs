use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio_tungstenite::connect_async;
use tracing::{info, warn};
use url::Url;

use common::{Error, MarketEvent, Result};

/// Binance kline/candlestick WebSocket stream for a single symbol.
///
/// Connects to Binance's 1-minute kline stream, parses events into
/// `MarketEvent`, and publishes them on a broadcast channel.
/// Reconnects automatically with exponential backoff.
pub struct BinanceStream {
    symbol: String,
    market_tx: broadcast::Sender<MarketEvent>,
}

impl BinanceStream {
    pub fn new(symbol: impl Into<String>, market_tx: broadcast::Sender<MarketEvent>) -> Self {
        Self {
            symbol: symbol.into(),
            market_tx,
        }
    }

    /// Run the stream loop forever, reconnecting on failure.
    /// Call this inside a `tokio::spawn`.
    pub async fn run(self) {
        let mut backoff = Duration::from_secs(1);
        const MAX_BACKOFF: Duration = Duration::from_secs(60);

        loop {
            info!(symbol = %self.symbol, "Connecting to Binance WebSocket stream");
            match self.connect_once().await {
                Ok(()) => {
                    info!(symbol = %self.symbol, "WebSocket stream closed cleanly");
                    // Binance ends sessions after 24h.
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    backoff = Duration::from_secs(1);
                }
                Err(e) => {
                    warn!(symbol = %self.symbol, error = %e, backoff = ?backoff, "WebSocket error, reconnecting");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    async fn connect_once(&self) -> Result<()> {
        let url_str = format!(
            "wss://stream.binance.com:9443/ws/{}@kline_1m",
            self.symbol.to_lowercase()
        );
        let url = Url::parse(&url_str).map_err(|e| Error::WebSocket(e.to_string()))?;

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))?;

        let (_, mut read) = ws_stream.split();

        while let Some(msg) = read.next().await {
            let msg = msg.map_err(|e| Error::WebSocket(e.to_string()))?;

            if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                match parse_kline_event(&self.symbol, &text) {
                    Ok(Some(event)) => {
                        // No receivers is fine.
                        let _ = self.market_tx.send(event);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(symbol = %self.symbol, error = %e, "Failed to parse kline event");
                    }
                }
            }
        }

        Ok(())
    }
}

// ─── Binance kline JSON parsing ──────────────────────────────────────────────

#[derive(Deserialize)]
struct KlineWrapper {
    k: KlineData,
}

#[derive(Deserialize)]
struct KlineData {
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "x")]
    is_closed: bool,
    #[serde(rename = "T")]
    close_time_ms: i64,
}

fn decimal(field: &str, raw: &str) -> Result<f64> {
    raw.parse()
        .map_err(|_| Error::WebSocket(format!("kline field {field} is not a number: {raw:?}")))
}

fn parse_kline_event(symbol: &str, text: &str) -> Result<Option<MarketEvent>> {
    let wrapper: serde_json::Value = serde_json::from_str(text)?;
    if wrapper.get("e").and_then(|v| v.as_str()) != Some("kline") {
        return Ok(None);
    }

    let k = serde_json::from_value::<KlineWrapper>(wrapper)?.k;

    let timestamp: DateTime<Utc> = Utc
        .timestamp_millis_opt(k.close_time_ms)
        .single()
        .unwrap_or_else(Utc::now);

    Ok(Some(MarketEvent {
        symbol: symbol.to_string(),
        price: decimal("c", &k.close)?,
        open: decimal("o", &k.open)?,
        high: decimal("h", &k.high)?,
        low: decimal("l", &k.low)?,
        volume: decimal("v", &k.volume)?,
        is_candle_closed: k.is_closed,
        timestamp,
    }))
}
