use std::collections::BTreeSet;

use chrono::Utc;
use common::{
    Decision, Direction, ExchangePositionRef, Fill, LifecycleEvent, ModeKind, OpenConfirmation,
    Position, PositionId, ProfitTarget, Signal, SignalAction, StopLevel, StopPrice, StopTrigger,
    TakeProfitLevel, TargetTrigger, TrailingPolicy,
};
use proptest::prelude::*;
use risk::{close_quantity, evaluate, PriceTick, RiskConfig, RiskManager};

fn position(direction: Direction, activation: f64, distance: f64) -> Position {
    let entry = 100.0;
    Position {
        id: PositionId::new(),
        symbol: "TESTUSDT".into(),
        direction,
        entry_price: entry,
        initial_quantity: 1.0,
        quantity: 1.0,
        mode: ModeKind::Conservative,
        confidence: 0.9,
        entry_time: Utc::now(),
        exchange_ref: ExchangePositionRef("x-1".into()),
        notional_fraction: 0.05,
        profit_targets: vec![ProfitTarget {
            price: direction.offset(entry, 0.5),
            release_pct: 0.5,
            priority: 1,
            trigger: TargetTrigger::PriceReached,
            description: String::new(),
        }],
        consumed_targets: BTreeSet::new(),
        stop_levels: vec![StopLevel {
            price: StopPrice::Price(direction.offset(entry, -0.5)),
            name: "initial".into(),
            triggers: vec![StopTrigger::PriceCross],
            priority: 1,
            description: String::new(),
        }],
        trailing_policy: TrailingPolicy { activation_pct: activation, distance_pct: distance },
        trailing_stop: None,
        max_profit_seen: 0.0,
        last_price: entry,
        realized_pnl: 0.0,
    }
}

fn signal(symbol: &str, confidence: f64, stop_pct: f64, multiplier: f64) -> Signal {
    let entry = 100.0;
    Signal {
        symbol: symbol.into(),
        action: SignalAction::Buy,
        confidence,
        entry_price: entry,
        stop_loss: entry * (1.0 - stop_pct),
        take_profit_levels: vec![TakeProfitLevel { price: entry * (1.0 + stop_pct), release_pct: 1.0 }],
        risk_reward_ratio: 1.0,
        position_size_multiplier: multiplier,
        invalidation_price: entry * (1.0 - stop_pct),
        rationale: Vec::new(),
        timestamp: Utc::now(),
    }
}

fn permissive_config() -> RiskConfig {
    let mut cfg = RiskConfig::default();
    for mode in [&mut cfg.conservative, &mut cfg.scalping] {
        mode.enabled = true;
        mode.confidence_threshold = 0.0;
        mode.min_entry_interval_secs = 0;
        mode.max_concurrent_positions = 50;
        mode.max_daily_trades = 1_000;
        mode.position_size_pct = 0.5;
        mode.stops.max_loss_pct = 0.9;
    }
    cfg.max_open_positions = 50;
    cfg
}

proptest! {
    /// An armed trailing stop never moves against the position, and the
    /// profit high-water mark never decreases, over any price path.
    #[test]
    fn trailing_stop_only_ratchets_favorably(
        long in any::<bool>(),
        activation in 0.001f64..0.05,
        distance in 0.0005f64..0.03,
        moves in proptest::collection::vec(-0.02f64..0.02, 1..200),
    ) {
        let direction = if long { Direction::Long } else { Direction::Short };
        let mut pos = position(direction, activation, distance);
        let mut price = pos.entry_price;

        for step in moves {
            price = (price * (1.0 + step)).max(1.0);
            let out = evaluate(&pos, &PriceTick::new(price, Utc::now()));

            prop_assert!(out.max_profit_seen >= pos.max_profit_seen);
            if let (Some(before), Some(after)) = (pos.trailing_stop, out.trailing_stop) {
                prop_assert!(after.active);
                prop_assert!(!direction.improves(after.stop_price, before.stop_price),
                    "stop retreated from {} to {}", before.stop_price, after.stop_price);
            }
            if pos.trailing_stop.is_some() {
                prop_assert!(out.trailing_stop.is_some());
            }
            pos.max_profit_seen = out.max_profit_seen;
            pos.trailing_stop = out.trailing_stop;
            if out.full_close().is_some() {
                break;
            }
        }
    }

    /// A partial close reduces quantity by exactly the released share of the
    /// original quantity and leaves both ladders intact.
    #[test]
    fn partial_close_reduces_by_release(release in 0.05f64..1.0, qty in 0.001f64..1_000.0) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let rm = RiskManager::new(permissive_config()).unwrap();
            let Decision::Admitted(a) = rm.try_admit(&signal("TESTUSDT", 0.9, 0.02, 1.0), ModeKind::Conservative).await.unwrap() else {
                panic!("expected admission");
            };
            let pos = rm.confirm_open(&a, &OpenConfirmation {
                position_ref: ExchangePositionRef("x-1".into()),
                fill_price: 100.0,
                quantity: qty,
                timestamp: Utc::now(),
            }).await.unwrap().position;

            let event = LifecycleEvent::PartialClose { target_index: 0, release_pct: release, trigger_price: 102.0 };
            let close = close_quantity(&pos, &event).unwrap();
            let fill = Fill {
                position_ref: pos.exchange_ref.clone(),
                fill_price: 102.0,
                quantity: close,
                timestamp: Utc::now(),
            };
            let out = rm.apply_close_fill(&pos.id, &fill, Some(0)).await.unwrap();

            if out.closed.is_none() {
                let after = rm.position(&pos.id).await.unwrap();
                assert!((after.quantity - qty * (1.0 - release)).abs() <= qty * 1e-9);
                assert_eq!(after.profit_targets, pos.profit_targets);
                assert_eq!(after.stop_levels, pos.stop_levels);
                assert!(after.consumed_targets.contains(&0));
            } else {
                assert!(release > 1.0 - 1e-6, "closed early at release {release}");
            }
        });
    }

    /// However many signals race for a mode, admissions stop at the daily cap.
    #[test]
    fn concurrent_admissions_respect_daily_cap(cap in 1u32..15, signals in 1usize..40) {
        let rt = tokio::runtime::Builder::new_multi_thread().worker_threads(4).enable_all().build().unwrap();
        let admitted = rt.block_on(async {
            let mut cfg = permissive_config();
            cfg.scalping.max_daily_trades = cap;
            cfg.scalping.position_size_pct = 0.01;
            let rm = RiskManager::new(cfg).unwrap();

            let handles: Vec<_> = (0..signals)
                .map(|i| {
                    let rm = rm.clone();
                    tokio::spawn(async move {
                        rm.try_admit(&signal(&format!("S{i}"), 0.9, 0.01, 1.0), ModeKind::Scalping).await
                    })
                })
                .collect();
            let mut n = 0usize;
            for h in handles {
                if h.await.unwrap().unwrap().is_admitted() {
                    n += 1;
                }
            }
            n
        });
        prop_assert_eq!(admitted, signals.min(cap as usize));
    }

    /// Risk utilization recomputed from the live set never exceeds 100% after
    /// any sequence of admissions and confirmed opens, including fills that
    /// slip away from the signal's entry and get trimmed back under the ceiling.
    #[test]
    fn utilization_never_exceeds_ceiling(
        entries in proptest::collection::vec(
            (0.005f64..0.2, 0.25f64..1.0, any::<bool>(), 0.0f64..0.01),
            1..40,
        ),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let rm = RiskManager::new(permissive_config()).unwrap();
            for (i, (stop_pct, multiplier, scalping, slip)) in entries.into_iter().enumerate() {
                let mode = if scalping { ModeKind::Scalping } else { ModeKind::Conservative };
                let s = signal(&format!("S{i}"), 0.9, stop_pct, multiplier);
                if let Decision::Admitted(a) = rm.try_admit(&s, mode).await.unwrap() {
                    let fill_price = 100.0 * (1.0 + slip);
                    let position_ref = ExchangePositionRef(format!("x-{i}"));
                    let out = rm.confirm_open(&a, &OpenConfirmation {
                        position_ref: position_ref.clone(),
                        fill_price,
                        quantity: a.quantity,
                        timestamp: Utc::now(),
                    }).await.unwrap();
                    if out.excess_quantity > 0.0 {
                        rm.apply_close_fill(&out.position.id, &Fill {
                            position_ref,
                            fill_price,
                            quantity: out.excess_quantity,
                            timestamp: Utc::now(),
                        }, None).await.unwrap();
                    }
                }
                let snap = rm.snapshot().await;
                assert!(snap.risk_utilization_pct <= 100.0 + 1e-6, "utilization {}", snap.risk_utilization_pct);
            }
        });
    }
}
