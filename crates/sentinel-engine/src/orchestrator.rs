//! Detector orchestrator: universe, subscriptions, and the receive loop.
//!
//! Owns the monitored market set and the WebSocket lifecycle. The receive
//! loop is the only writer of the trade-path stores, which keeps per-market
//! trade order identical to arrival order; periodic work (cleanup, stats,
//! universe refresh, snapshot publish) runs as timers inside the same
//! `select!` so it can never interleave with a trade mid-flight.
//!
//! On a connection drop the loop reconnects after a fixed delay and
//! re-subscribes the full current token set before consuming frames.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};

use sentinel_common::{Market, Notifier, Trade};
use sentinel_market::{MarketApiError, MarketFilter, MarketsClient};

use crate::alert_manager::{AlertManager, AlertManagerConfig};
use crate::alert_store::AlertStore;
use crate::anomaly::AnomalyEngine;
use crate::baseline::BaselineCalculator;
use crate::config::{OrchestratorConfig, SentinelConfig};
use crate::market_stats::PercentileTracker;
use crate::recorder::TradeRecorder;
use crate::state::EngineState;
use crate::trade_store::TradeStore;
use crate::ws::{parse_stream_message, SubscribeMessage};

/// Errors from the orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("market listing failed: {0}")]
    MarketApi(#[from] MarketApiError),

    #[error("WebSocket connection failed: {0}")]
    Connection(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("connection timeout")]
    Timeout,

    #[error("stream ended unexpectedly")]
    StreamEnded,

    #[error("no markets passed the universe filter")]
    EmptyUniverse,
}

/// The trade-path orchestrator.
pub struct Orchestrator {
    config: OrchestratorConfig,
    markets_client: MarketsClient,
    filter: MarketFilter,

    engine: AnomalyEngine,
    trade_store: TradeStore,
    baseline: BaselineCalculator,
    tracker: PercentileTracker,
    alert_manager: AlertManager,

    alert_store: Arc<RwLock<AlertStore>>,
    state: Arc<EngineState>,
    recorder: Option<TradeRecorder>,

    /// Monitored markets by market (condition) id.
    monitored: HashMap<String, Market>,
    /// Reverse index token id -> market id, shared read-only elsewhere.
    token_index: Arc<DashMap<String, String>>,
}

impl Orchestrator {
    pub fn new(
        config: &SentinelConfig,
        markets_client: MarketsClient,
        notifier: Arc<dyn Notifier>,
        alert_store: Arc<RwLock<AlertStore>>,
        state: Arc<EngineState>,
    ) -> Self {
        let recorder = config
            .recorder
            .enabled
            .then(|| TradeRecorder::new(config.recorder.path.clone()));

        Self {
            config: config.orchestrator.clone(),
            markets_client,
            filter: MarketFilter::new(config.filter_min_volume),
            engine: AnomalyEngine::new(config.detectors.clone()),
            trade_store: TradeStore::new(config.trade_store.clone()),
            baseline: BaselineCalculator::new(config.baseline.clone()),
            tracker: PercentileTracker::new(config.percentile.clone()),
            alert_manager: AlertManager::new(
                AlertManagerConfig {
                    cooldown_ms: config.alerts.cooldown_ms,
                    max_alerts_per_hour: config.alerts.max_alerts_per_hour,
                },
                notifier,
            ),
            alert_store,
            state,
            recorder,
            monitored: HashMap::new(),
            token_index: Arc::new(DashMap::new()),
        }
    }

    /// Shared token index, for read-only consumers.
    pub fn token_index(&self) -> Arc<DashMap<String, String>> {
        self.token_index.clone()
    }

    /// Run until shutdown: build the universe, then hold a connection with
    /// reconnect-on-error.
    pub async fn run(&mut self, mut shutdown: broadcast::Receiver<()>) -> Result<(), OrchestratorError> {
        self.build_universe().await?;

        loop {
            if shutdown.try_recv().is_ok() {
                info!("Orchestrator: shutdown signal received");
                self.flush_on_exit().await;
                return Ok(());
            }

            match self.run_connection(&mut shutdown).await {
                Ok(()) => {
                    info!("Orchestrator: clean shutdown");
                    self.flush_on_exit().await;
                    return Ok(());
                }
                Err(e) => {
                    self.state.reconnects.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Trade stream error: {}, reconnecting in {:?}",
                        e, self.config.reconnect_delay
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                        _ = shutdown.recv() => {
                            info!("Orchestrator: shutdown during reconnect delay");
                            self.flush_on_exit().await;
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Fetch, filter, and index the market universe.
    async fn build_universe(&mut self) -> Result<(), OrchestratorError> {
        let now = Utc::now();
        let markets = self.markets_client.fetch_active_markets().await?;
        let fetched = markets.len();

        for market in markets {
            if self.monitored.len() >= self.config.max_markets {
                break;
            }
            if !self.filter.accepts(&market, now) {
                continue;
            }
            self.index_market(market);
        }

        if self.monitored.is_empty() {
            return Err(OrchestratorError::EmptyUniverse);
        }

        self.state
            .markets_monitored
            .store(self.monitored.len() as u64, Ordering::Relaxed);
        info!(
            "Universe built: {} monitored of {} fetched",
            self.monitored.len(),
            fetched
        );
        Ok(())
    }

    fn index_market(&mut self, market: Market) {
        self.token_index
            .insert(market.yes_token_id.clone(), market.id.clone());
        self.token_index
            .insert(market.no_token_id.clone(), market.id.clone());
        self.monitored.insert(market.id.clone(), market);
    }

    /// One WebSocket session: connect, subscribe everything, consume.
    async fn run_connection(
        &mut self,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), OrchestratorError> {
        info!("Connecting to trade stream at {}", self.config.ws_url);

        let connect_result = timeout(
            self.config.connect_timeout,
            connect_async(self.config.ws_url.as_str()),
        )
        .await;

        let (ws_stream, _response) = match connect_result {
            Ok(Ok(ok)) => ok,
            Ok(Err(e)) => return Err(OrchestratorError::Connection(e.to_string())),
            Err(_) => return Err(OrchestratorError::Timeout),
        };

        let (mut write, mut read) = ws_stream.split();

        // Resubscription must complete before the session counts as open.
        let tokens: Vec<String> = self.token_index.iter().map(|e| e.key().clone()).collect();
        for batch in tokens.chunks(self.config.subscribe_batch_size) {
            let msg = SubscribeMessage::market(batch.to_vec());
            let text = serde_json::to_string(&msg).expect("subscribe message serializes");
            write.send(Message::Text(text.into())).await?;
        }
        info!(
            "Subscribed to {} tokens in batches of {}",
            tokens.len(),
            self.config.subscribe_batch_size
        );

        let mut cleanup_timer = interval(self.config.cleanup_interval);
        let mut stats_timer = interval(self.config.stats_interval);
        let mut refresh_timer = interval(self.config.refresh_interval);
        let mut publish_timer = interval(self.config.publish_interval);
        for timer in [
            &mut cleanup_timer,
            &mut stats_timer,
            &mut refresh_timer,
            &mut publish_timer,
        ] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Skip the immediate first tick.
            timer.tick().await;
        }

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_frame(&text).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!("Trade stream closed by server: {:?}", frame);
                            return Err(OrchestratorError::StreamEnded);
                        }
                        Some(Err(e)) => {
                            error!("Trade stream error: {}", e);
                            return Err(OrchestratorError::WebSocket(e));
                        }
                        None => {
                            warn!("Trade stream ended");
                            return Err(OrchestratorError::StreamEnded);
                        }
                        _ => {}
                    }
                }

                _ = cleanup_timer.tick() => {
                    self.trade_store.cleanup();
                    debug!(
                        "Trade store cleanup: {} markets, {} trades retained",
                        self.trade_store.market_count(),
                        self.trade_store.total_trades()
                    );
                }

                _ = stats_timer.tick() => {
                    let snap = self.state.snapshot();
                    info!(
                        markets = snap.markets_monitored,
                        trades = snap.trades_seen,
                        dropped = snap.events_dropped,
                        detected = snap.anomalies_detected,
                        alerts = snap.alerts_sent,
                        suppressed = snap.alerts_suppressed,
                        "Engine stats"
                    );
                }

                _ = refresh_timer.tick() => {
                    match self.refresh_markets().await {
                        Ok(new_tokens) if !new_tokens.is_empty() => {
                            for batch in new_tokens.chunks(self.config.subscribe_batch_size) {
                                let msg = SubscribeMessage::market(batch.to_vec());
                                let text = serde_json::to_string(&msg)
                                    .expect("subscribe message serializes");
                                write.send(Message::Text(text.into())).await?;
                            }
                            info!("Subscribed to {} new tokens after refresh", new_tokens.len());
                        }
                        Ok(_) => {}
                        Err(e) => warn!("Market refresh failed: {}", e),
                    }
                }

                _ = publish_timer.tick() => {
                    if let Err(e) = self.alert_store.read().await.save_snapshot() {
                        warn!("Alert snapshot publish failed: {}", e);
                    }
                }

                _ = shutdown.recv() => {
                    info!("Orchestrator session: shutdown signal received");
                    return Ok(());
                }
            }
        }
    }

    /// Parse a frame and feed each trade through the detector path.
    async fn handle_frame(&mut self, text: &str) {
        for event in parse_stream_message(text) {
            if !event.is_trade() {
                debug!("Ignoring event type {:?}", event.event_type);
                continue;
            }

            // Route by token: unsubscribed tokens are not ours.
            let market_id = match event
                .asset_id
                .as_deref()
                .and_then(|token| self.token_index.get(token).map(|e| e.value().clone()))
            {
                Some(id) => id,
                None => continue,
            };

            match event.to_trade(&market_id) {
                Some(trade) => self.process_trade(trade).await,
                None => {
                    self.state.events_dropped.fetch_add(1, Ordering::Relaxed);
                    debug!("Dropped malformed trade event for {}", market_id);
                }
            }
        }
    }

    /// The per-trade pipeline: store, record, detect, alert, baseline.
    async fn process_trade(&mut self, trade: Trade) {
        let Some(market) = self.monitored.get(&trade.market_id) else {
            return;
        };

        self.state.trades_seen.fetch_add(1, Ordering::Relaxed);
        self.trade_store.add(trade.clone());

        if let Some(recorder) = &self.recorder {
            if let Err(e) = recorder.record(&trade) {
                warn!("Trade tape write failed: {}", e);
            }
        }

        let assessment =
            self.engine
                .assess(&trade, market, &self.trade_store, &self.baseline, &mut self.tracker);

        self.state
            .anomalies_detected
            .fetch_add(assessment.detected as u64, Ordering::Relaxed);
        self.state
            .anomalies_emitted
            .fetch_add(assessment.anomalies.len() as u64, Ordering::Relaxed);

        for anomaly in &assessment.anomalies {
            let mut store = self.alert_store.write().await;
            match self.alert_manager.send(anomaly, market, &mut store).await {
                Ok(true) => {
                    self.state.alerts_sent.fetch_add(1, Ordering::Relaxed);
                }
                Ok(false) => {
                    self.state.alerts_suppressed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!("Alert delivery failed: {}", e);
                }
            }
            self.state
                .alerts_this_hour
                .store(self.alert_manager.alerts_this_hour() as u64, Ordering::Relaxed);
        }

        // Anomalous trades stay out of their own baseline.
        if assessment.detected == 0 {
            let trades = self.trade_store.all_trades(&trade.market_id);
            let now_ms = self.trade_store.now_ms();
            self.baseline
                .update_baseline(&trade.market_id, &trades, now_ms);
        }
    }

    /// Re-fetch the universe, diff against the monitored set, and return the
    /// token ids needing subscription.
    async fn refresh_markets(&mut self) -> Result<Vec<String>, OrchestratorError> {
        let now = Utc::now();
        let markets = self.markets_client.fetch_active_markets().await?;

        let mut new_tokens = Vec::new();
        for market in markets {
            if self.monitored.len() >= self.config.max_markets {
                break;
            }
            if self.monitored.contains_key(&market.id) {
                // Refresh mutable fields on the already-monitored market.
                self.monitored.insert(market.id.clone(), market);
                continue;
            }
            if !self.filter.accepts(&market, now) {
                continue;
            }
            new_tokens.push(market.yes_token_id.clone());
            new_tokens.push(market.no_token_id.clone());
            self.index_market(market);
        }

        self.state
            .markets_monitored
            .store(self.monitored.len() as u64, Ordering::Relaxed);
        Ok(new_tokens)
    }

    async fn flush_on_exit(&mut self) {
        if let Some(recorder) = &self.recorder {
            if let Err(e) = recorder.flush() {
                warn!("Trade tape flush failed: {}", e);
            }
        }
        if let Err(e) = self.alert_store.read().await.save_snapshot() {
            warn!("Final alert snapshot failed: {}", e);
        }
    }
}
