//! End-to-end detector scenarios: trades through the store, the detector
//! chain, and the alert manager.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use sentinel_common::{
    ImpliedDirection, Market, Notifier, NotifyError, Severity, Side, Trade,
};
use sentinel_engine::{
    AlertManager, AlertManagerConfig, AlertStore, AlertStoreConfig, Anomaly, AnomalyDetails,
    AnomalyEngine, AnomalyKind, BaselineCalculator, BaselineConfig, DetectorConfig,
    PercentileConfig, PercentileTracker, TradeStore, TradeStoreConfig,
};

const T0: i64 = 1_700_000_400_000;

struct CountingNotifier {
    sent: AtomicU32,
}

#[async_trait]
impl Notifier for CountingNotifier {
    async fn send(&self, _text: &str) -> Result<(), NotifyError> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    market: Market,
    engine: AnomalyEngine,
    store: TradeStore,
    baseline: BaselineCalculator,
    tracker: PercentileTracker,
    manager: AlertManager,
    alert_store: AlertStore,
    notifier: Arc<CountingNotifier>,
    _dir: tempfile::TempDir,
}

impl Harness {
    fn new() -> Self {
        let notifier = Arc::new(CountingNotifier {
            sent: AtomicU32::new(0),
        });
        let mut store = TradeStore::new(TradeStoreConfig::default());
        store.set_simulated_time(Some(T0));
        let dir = tempfile::tempdir().unwrap();

        Self {
            market: Market {
                id: "m1".to_string(),
                question: "Will the minister resign?".to_string(),
                slug: None,
                description: String::new(),
                end_time: None,
                yes_token_id: "m1_yes".to_string(),
                no_token_id: "m1_no".to_string(),
                yes_price: None,
                no_price: None,
                volume_24h: dec!(100000),
                closed: false,
            },
            engine: AnomalyEngine::new(DetectorConfig::default()),
            store,
            baseline: BaselineCalculator::new(BaselineConfig::default()),
            tracker: PercentileTracker::new(PercentileConfig::default()),
            manager: AlertManager::new(AlertManagerConfig::default(), notifier.clone()),
            alert_store: AlertStore::new(AlertStoreConfig {
                max_alerts: 1000,
                snapshot_path: dir.path().join("alerts.json"),
            }),
            notifier,
            _dir: dir,
        }
    }

    fn trade(&self, ts: i64, price: Decimal, size: Decimal, side: Side) -> Trade {
        Trade {
            market_id: self.market.id.clone(),
            token_id: self.market.yes_token_id.clone(),
            price,
            size,
            side,
            timestamp_ms: ts,
        }
    }

    /// The orchestrator's per-trade pipeline, minus the socket.
    async fn process(&mut self, trade: Trade) -> Vec<Anomaly> {
        self.store.set_simulated_time(Some(trade.timestamp_ms));
        self.store.add(trade.clone());

        let assessment = self.engine.assess(
            &trade,
            &self.market,
            &self.store,
            &self.baseline,
            &mut self.tracker,
        );

        for anomaly in &assessment.anomalies {
            let _ = self
                .manager
                .send(anomaly, &self.market, &mut self.alert_store)
                .await
                .unwrap();
        }

        if assessment.detected == 0 {
            let trades = self.store.all_trades(&trade.market_id);
            let now_ms = self.store.now_ms();
            self.baseline.update_baseline(&trade.market_id, &trades, now_ms);
        }

        assessment.anomalies
    }
}

// Unusual low-price buy, then cooldown suppression of the repeat.
#[tokio::test]
async fn unusual_low_price_buy_then_cooldown() {
    let mut h = Harness::new();

    // 200 synthetic low-price BUYs of $3-$5 notional, spread a minute apart
    // so steady flow never looks like a volume spike.
    for i in 0..200i64 {
        let sizes = [dec!(60), dec!(80), dec!(100)]; // x 0.05 = $3/$4/$5
        let anomalies = h
            .process(h.trade(T0 + i * 60_000, dec!(0.05), sizes[(i % 3) as usize], Side::Buy))
            .await;
        assert!(anomalies.is_empty(), "seed trade {} alerted", i);
    }

    // One $500 buy at 0.06.
    let trigger_ts = T0 + 200 * 60_000;
    let anomalies = h
        .process(h.trade(trigger_ts, dec!(0.06), dec!(8334), Side::Buy))
        .await;

    let low: Vec<&Anomaly> = anomalies
        .iter()
        .filter(|a| a.kind() == AnomalyKind::UnusualLowPriceBuy)
        .collect();
    assert_eq!(low.len(), 1);
    assert_eq!(low[0].severity, Severity::Critical);
    assert_eq!(low[0].direction, ImpliedDirection::Yes);
    match &low[0].details {
        AnomalyDetails::UnusualLowPriceBuy {
            percentile, rank, ..
        } => {
            assert!(*percentile >= 0.99);
            assert!(*rank <= 2);
        }
        other => panic!("wrong details: {:?}", other),
    }
    let delivered_after_first = h.notifier.sent.load(Ordering::SeqCst);
    assert!(delivered_after_first >= 1);
    let stored_after_first = h.alert_store.len();

    // An identical trade one minute later is detected again but suppressed
    // by the per-(market, kind) cooldown.
    let anomalies = h
        .process(h.trade(trigger_ts + 60_000, dec!(0.06), dec!(8334), Side::Buy))
        .await;
    assert!(anomalies
        .iter()
        .any(|a| a.kind() == AnomalyKind::UnusualLowPriceBuy));
    assert_eq!(h.notifier.sent.load(Ordering::SeqCst), delivered_after_first);
    assert_eq!(h.alert_store.len(), stored_after_first);
}

// Large trade severity ladder with no baseline, at the
// `--min-trade 10000` operating point.
#[tokio::test]
async fn large_trade_ladder() {
    let mut h = Harness::new();
    h.engine = AnomalyEngine::new(DetectorConfig {
        large_trade_min: dec!(10000),
        ..DetectorConfig::default()
    });

    let anomalies = h
        .process(h.trade(T0, dec!(0.5), dec!(50002), Side::Buy)) // $25,001
        .await;
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].kind(), AnomalyKind::LargeTrade);
    assert_eq!(anomalies[0].severity, Severity::Critical);

    let anomalies = h
        .process(h.trade(T0 + 600_000, dec!(0.5), dec!(19998), Side::Buy)) // $9,999
        .await;
    assert!(anomalies.iter().all(|a| a.kind() != AnomalyKind::LargeTrade));

    let anomalies = h
        .process(h.trade(T0 + 1_200_000, dec!(0.5), dec!(20000), Side::Buy)) // $10,000
        .await;
    let large: Vec<&Anomaly> = anomalies
        .iter()
        .filter(|a| a.kind() == AnomalyKind::LargeTrade)
        .collect();
    assert_eq!(large.len(), 1);
    assert_eq!(large[0].severity, Severity::High);
}

// Volume spike against a warmed baseline, with BUY-skewed flow.
#[tokio::test]
async fn volume_spike_with_buy_skew() {
    let mut h = Harness::new();
    h.baseline = BaselineCalculator::new(BaselineConfig {
        window_ms: 86_400_000,
        min_samples: 10,
    });

    // Warm the baseline: ~$200/hour for 12 hours, so the expected 5-minute
    // volume is well under the burst that follows.
    let mut history = Vec::new();
    for hour in 0..12i64 {
        for k in 0..4i64 {
            history.push(h.trade(
                T0 - (12 - hour) * 3_600_000 + k * 600_000,
                dec!(0.5),
                dec!(100),
                if k % 2 == 0 { Side::Buy } else { Side::Sell },
            ));
        }
    }
    h.store.bulk_add("m1", history.clone());
    let refs: Vec<&Trade> = history.iter().collect();
    h.baseline.update_baseline("m1", &refs, T0);

    // Burst: ten $1,100 trades across 5 minutes, 2:1 BUY skew by notional.
    for i in 0..9i64 {
        let side = if i % 3 == 2 { Side::Sell } else { Side::Buy };
        h.store
            .add(h.trade(T0 - 270_000 + i * 30_000, dec!(0.5), dec!(2200), side));
    }
    let trigger = h.trade(T0, dec!(0.5), dec!(2200), Side::Buy);
    let anomalies = h.process(trigger).await;

    let spike: Vec<&Anomaly> = anomalies
        .iter()
        .filter(|a| a.kind() == AnomalyKind::VolumeSpike)
        .collect();
    assert_eq!(spike.len(), 1);
    assert!(spike[0].severity >= Severity::High);
    assert_eq!(spike[0].direction, ImpliedDirection::Yes);
    match &spike[0].details {
        AnomalyDetails::VolumeSpike { multiple, .. } => assert!(*multiple >= 11.0),
        other => panic!("wrong details: {:?}", other),
    }
}

// A 0.40 -> 0.48 move is a 20% change: CRITICAL, direction UP.
#[tokio::test]
async fn rapid_price_move_critical() {
    let mut h = Harness::new();

    h.store.add(h.trade(T0 - 240_000, dec!(0.40), dec!(10), Side::Buy));
    h.store.add(h.trade(T0 - 180_000, dec!(0.41), dec!(10), Side::Buy));
    h.store.add(h.trade(T0 - 120_000, dec!(0.42), dec!(10), Side::Buy));

    let anomalies = h.process(h.trade(T0, dec!(0.48), dec!(10), Side::Buy)).await;

    let moves: Vec<&Anomaly> = anomalies
        .iter()
        .filter(|a| a.kind() == AnomalyKind::RapidPriceMove)
        .collect();
    assert_eq!(moves.len(), 1);
    assert_eq!(moves[0].severity, Severity::Critical);
    assert_eq!(moves[0].direction, ImpliedDirection::Yes);
    match &moves[0].details {
        AnomalyDetails::RapidPriceMove {
            price_start,
            price_end,
            change_percent,
            ..
        } => {
            assert_eq!(*price_start, dec!(0.40));
            assert_eq!(*price_end, dec!(0.48));
            assert_eq!(*change_percent, dec!(0.2));
        }
        other => panic!("wrong details: {:?}", other),
    }
}

// Detector output order is fixed regardless of which detectors fire.
#[tokio::test]
async fn detector_order_is_stable() {
    let mut h = Harness::new();

    for _ in 0..100 {
        h.tracker.add_trade("m1", dec!(5), dec!(0.05), Side::Buy);
    }
    h.store.add(h.trade(T0 - 120_000, dec!(0.10), dec!(10), Side::Buy));

    let anomalies = h
        .process(h.trade(T0, dec!(0.12), dec!(500000), Side::Buy))
        .await;

    let kinds: Vec<AnomalyKind> = anomalies.iter().map(|a| a.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            AnomalyKind::UnusualLowPriceBuy,
            AnomalyKind::LargeTrade,
            AnomalyKind::RapidPriceMove,
        ]
    );
}

// Alert stats aggregate by type and severity as alerts land.
#[tokio::test]
async fn alert_store_stats_track_delivered_alerts() {
    let mut h = Harness::new();

    h.process(h.trade(T0, dec!(0.5), dec!(60000), Side::Buy)).await;
    h.process(h.trade(T0 + 400_000, dec!(0.5), dec!(60000), Side::Sell)).await;

    // Same kind + market within cooldown for the second one? No: 400s apart
    // with a 300s cooldown, so both deliver.
    assert_eq!(h.alert_store.len(), 2);
    let stats = h.alert_store.stats();
    assert_eq!(stats.by_type.get("LARGE_TRADE"), Some(&2));
    assert_eq!(stats.by_severity.get("CRITICAL"), Some(&2));
}
