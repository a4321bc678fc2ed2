use chrono::Utc;
use common::{Bias, MarketRegime, MarketSnapshot, ScoringResult, SignalAction, SubScore};
use proptest::prelude::*;
use strategy::{GeneratorConfig, SignalGenerator};

fn bias() -> impl Strategy<Value = Bias> {
    prop_oneof![Just(Bias::Bullish), Just(Bias::Bearish), Just(Bias::Neutral)]
}

fn regime() -> impl Strategy<Value = MarketRegime> {
    prop_oneof![
        Just(MarketRegime::StrongTrend),
        Just(MarketRegime::Range),
        Just(MarketRegime::Breakout),
        Just(MarketRegime::Volatile),
        Just(MarketRegime::Quiet),
    ]
}

fn scoring() -> impl Strategy<Value = ScoringResult> {
    (
        regime(),
        prop_oneof![-1.0f64..2.0, Just(f64::NAN), Just(f64::INFINITY)],
        bias(),
        proptest::collection::vec((bias(), 0.0f64..1.0), 0..6),
    )
        .prop_map(|(regime, confidence, bias, votes)| ScoringResult {
            regime,
            confidence,
            bias,
            factors: votes
                .into_iter()
                .enumerate()
                .map(|(i, (bias, score))| SubScore {
                    factor: format!("f{i}"),
                    score,
                    bias,
                    description: String::new(),
                })
                .collect(),
        })
}

proptest! {
    /// Whatever the scorer says, the generator emits either a wait or a
    /// signal that passes validation.
    #[test]
    fn generated_signals_are_wait_or_valid(
        s in scoring(),
        price in 0.0001f64..100_000.0,
        atr_frac in 0.0f64..0.2,
    ) {
        let g = SignalGenerator::new(GeneratorConfig::default());
        let snapshot = MarketSnapshot {
            symbol: "TESTUSDT".into(),
            price,
            atr: price * atr_frac,
            timestamp: Utc::now(),
        };
        let signal = g.generate("TESTUSDT", &snapshot, &s);

        prop_assert!((0.0..=1.0).contains(&signal.confidence));
        if signal.action != SignalAction::Wait {
            prop_assert!(signal.validate().is_ok(), "invalid signal: {:?}", signal);
            prop_assert!(signal.risk_reward_ratio > 0.0);
            prop_assert!(signal.position_size_multiplier > 0.0 && signal.position_size_multiplier <= 1.0);
        }
    }

    /// Same inputs, same signal.
    #[test]
    fn generation_is_deterministic(s in scoring(), price in 1.0f64..1_000.0) {
        let g = SignalGenerator::new(GeneratorConfig::default());
        let snapshot = MarketSnapshot { symbol: "X".into(), price, atr: price * 0.01, timestamp: Utc::now() };
        let a = g.generate("X", &snapshot, &s);
        let b = g.generate("X", &snapshot, &s);
        prop_assert_eq!(a.action, b.action);
        prop_assert_eq!(a.stop_loss.to_bits(), b.stop_loss.to_bits());
        prop_assert_eq!(a.take_profit_levels, b.take_profit_levels);
    }
}
