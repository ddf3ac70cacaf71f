//! Property tests for engine invariants.
//!
//! Uses proptest to verify:
//! 1. Budget conservation: both overlays keep Σ|w| at the baseline's gross and honour the cap
//! 2. Cost sanity: never negative, non-decreasing in trade size and volatility
//! 3. Leverage bounds: every leverage the scaler emits lies in its bounds
//! 4. PIT monotonicity: a later query never resolves an older fact row
//! 5. Position exclusivity: one open position per instrument, one exit per close

use chrono::{Days, NaiveDate};
use pitlab_core::cost::{CostCoefficients, CostModel, LiquidityInputs, LiquiditySnapshot};
use pitlab_core::domain::{FactRow, PriceRow, PriceTable, WeightVector};
use pitlab_core::engine::{run_backtest, BaselineConfig, EngineConfig, MarketData, Rebalance};
use pitlab_core::ledger::{ExitRules, LedgerConfig};
use pitlab_core::overlay::{
    apply_budget_overlay, apply_overlay, BudgetWeighting, FundingMode, OverlayParams,
};
use pitlab_core::pit::FactStore;
use pitlab_core::risk::{RiskConfig, RiskScaler};
use pitlab_core::scoring::ScoreTable;
use proptest::prelude::*;
use std::collections::BTreeMap;

fn day(i: usize) -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 1, 2).unwrap() + Days::new(i as u64)
}

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_baseline() -> impl Strategy<Value = WeightVector> {
    prop::collection::vec(0.001..1.0_f64, 2..30).prop_map(|raw| {
        let total: f64 = raw.iter().sum();
        raw.iter()
            .enumerate()
            .map(|(i, w)| (format!("S{i:02}"), w / total))
            .collect()
    })
}

fn arb_tilts() -> impl Strategy<Value = BTreeMap<String, f64>> {
    prop::collection::btree_map((0usize..40).prop_map(|i| format!("S{i:02}")), 0.001..0.05_f64, 0..6)
}

fn arb_funding() -> impl Strategy<Value = FundingMode> {
    prop_oneof![Just(FundingMode::Proportional), Just(FundingMode::Equal)]
}

fn arb_liquidity() -> impl Strategy<Value = LiquidityInputs> {
    (prop::option::of(1e4..1e9_f64), prop::option::of(0.0..1.5_f64))
        .prop_map(|(adv, volatility)| LiquidityInputs { adv, volatility })
}

fn arb_returns() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(-0.06..0.06_f64, 1..200)
}

fn arb_fact_rows() -> impl Strategy<Value = Vec<(u64, f64)>> {
    prop::collection::vec((0u64..400, -10.0..10.0_f64), 1..25)
}

/// Per-symbol daily multipliers and per-date scores.
fn arb_market() -> impl Strategy<Value = (Vec<Vec<f64>>, Vec<Vec<f64>>)> {
    (2usize..6, 10usize..50).prop_flat_map(|(n_sym, n_days)| {
        (
            prop::collection::vec(prop::collection::vec(0.9..1.1_f64, n_days), n_sym),
            prop::collection::vec(prop::collection::vec(-1.0..1.0_f64, n_sym), n_days),
        )
    })
}

// ── 1. Budget Conservation ───────────────────────────────────────────

proptest! {
    /// Positive tilts never change the total allocation, with or without a cap.
    #[test]
    fn overlay_conserves_gross(
        baseline in arb_baseline(),
        tilts in arb_tilts(),
        funding in arb_funding(),
        cap in prop::option::of(0.05..0.5_f64),
    ) {
        let params = OverlayParams { funding, max_weight: cap, gross_target: None };
        let outcome = apply_overlay(&baseline, &tilts, &params);
        prop_assert!((outcome.weights.gross() - baseline.gross()).abs() < 1e-9,
            "gross {} vs {}", outcome.weights.gross(), baseline.gross());
        prop_assert!(outcome.weights.is_long_only());
        prop_assert!(outcome.shortfall >= 0.0);
        // The cap binds whenever the book has room to honour it.
        if let Some(cap) = cap {
            if cap * outcome.weights.len() as f64 >= baseline.gross() + 1e-6 {
                for (s, w) in outcome.weights.iter() {
                    prop_assert!(w <= cap + 1e-9, "{} at {} above cap {}", s, w, cap);
                }
            }
        }
    }

    /// The budget overlay conserves gross and respects the cap the same way.
    #[test]
    fn budget_overlay_conserves_gross(
        baseline in arb_baseline(),
        signals in arb_tilts(),
        budget in 0.0..0.3_f64,
        equal in any::<bool>(),
        cap in prop::option::of(0.05..0.5_f64),
    ) {
        let weighting = if equal { BudgetWeighting::Equal } else { BudgetWeighting::Strength };
        let params = OverlayParams { max_weight: cap, ..OverlayParams::default() };
        let outcome = apply_budget_overlay(&baseline, &signals, budget, weighting, &params);
        prop_assert!((outcome.weights.gross() - baseline.gross()).abs() < 1e-9);
        prop_assert!(outcome.weights.is_long_only());
        prop_assert_eq!(outcome.shortfall, 0.0);
        if let Some(cap) = cap {
            if cap * outcome.weights.len() as f64 >= baseline.gross() + 1e-6 {
                for (s, w) in outcome.weights.iter() {
                    prop_assert!(w <= cap + 1e-9, "{} at {} above cap {}", s, w, cap);
                }
            }
        }
    }

    /// A fully funded tilt raises its instrument by exactly the tilt when no cap binds.
    #[test]
    fn funded_tilt_is_applied_exactly(baseline in arb_baseline(), tilt in 0.001..0.02_f64) {
        let target = "S00".to_string();
        let before = baseline.get(&target);
        let capacity = baseline.gross() - before;
        prop_assume!(capacity > tilt);
        let tilts = BTreeMap::from([(target.clone(), tilt)]);
        let outcome = apply_overlay(&baseline, &tilts, &OverlayParams::default());
        prop_assert!((outcome.weights.get(&target) - (before + tilt)).abs() < 1e-9);
        prop_assert_eq!(outcome.shortfall, 0.0);
    }
}

// ── 2. Cost Sanity ───────────────────────────────────────────────────

proptest! {
    /// Currency cost is non-negative and grows with trade size.
    #[test]
    fn cost_non_negative_and_monotone_in_size(
        inputs in arb_liquidity(),
        a in 0.0..1e7_f64,
        extra in 0.0..1e7_f64,
    ) {
        let model = CostModel::Liquidity(CostCoefficients::default());
        let mut snapshot = LiquiditySnapshot::empty();
        snapshot.insert("X", inputs);
        let small = model.trade_cost("X", a, &snapshot);
        let large = model.trade_cost("X", a + extra, &snapshot);
        prop_assert!(small >= 0.0);
        prop_assert!(large + 1e-9 >= small, "{large} < {small}");
    }

    /// The cost rate grows with volatility.
    #[test]
    fn cost_monotone_in_volatility(
        adv in prop::option::of(1e4..1e9_f64),
        notional in 0.0..1e7_f64,
        v1 in 0.0..1.5_f64,
        dv in 0.0..1.5_f64,
    ) {
        let c = CostCoefficients::default();
        let low = c.trade_cost_bps(notional, LiquidityInputs { adv, volatility: Some(v1) });
        let high = c.trade_cost_bps(notional, LiquidityInputs { adv, volatility: Some(v1 + dv) });
        prop_assert!(low >= c.min_cost_bps && high <= c.max_cost_bps);
        prop_assert!(high + 1e-12 >= low);
    }

    /// Portfolio cost of a scaled delta never shrinks as the scale grows.
    #[test]
    fn portfolio_cost_monotone_in_leverage(
        baseline in arb_baseline(),
        l1 in 0.0..2.0_f64,
        dl in 0.0..2.0_f64,
    ) {
        let model = CostModel::default();
        let snapshot = LiquiditySnapshot::empty();
        let lo = model.cost(&baseline.scaled(l1), &snapshot, 1e6);
        let hi = model.cost(&baseline.scaled(l1 + dl), &snapshot, 1e6);
        prop_assert!(lo >= 0.0);
        prop_assert!(hi + 1e-12 >= lo);
    }
}

// ── 3. Leverage Bounds ───────────────────────────────────────────────

proptest! {
    /// Whatever the return path, leverage stays within [min, max].
    #[test]
    fn leverage_within_bounds(
        returns in arb_returns(),
        min_leverage in 0.1..1.0_f64,
        max_leverage in 1.0..3.0_f64,
        lookback in 2usize..40,
        kelly in prop::option::of(0.1..1.0_f64),
    ) {
        let config = RiskConfig {
            min_leverage,
            max_leverage,
            lookback,
            kelly_fraction: kelly,
            ..RiskConfig::default()
        };
        let mut scaler = RiskScaler::new(config);
        prop_assert!(scaler.leverage() >= min_leverage && scaler.leverage() <= max_leverage);
        for r in returns {
            let applied = scaler.leverage();
            let next = scaler.observe(r, applied * r);
            prop_assert!(next.is_finite());
            prop_assert!(next >= min_leverage - 1e-12 && next <= max_leverage + 1e-12,
                "leverage {next} outside [{min_leverage}, {max_leverage}]");
        }
    }
}

// ── 4. PIT Monotonicity ──────────────────────────────────────────────

proptest! {
    /// Resolved effective dates never move backwards as the query date advances,
    /// and never exceed the query date.
    #[test]
    fn pit_resolution_is_monotone(rows in arb_fact_rows(), lag in 0u32..30) {
        let store = FactStore::new(
            rows.iter()
                .map(|(offset, v)| FactRow::new("X", day(*offset as usize)).with_field("eps", *v)),
        );
        let mut last: Option<NaiveDate> = None;
        for i in 0..450 {
            let query = day(i);
            let resolved = store.resolve("X", query, lag).map(|r| r.effective_date);
            if let Some(eff) = resolved {
                prop_assert!(eff + Days::new(lag as u64) <= query);
            }
            match (last, resolved) {
                (Some(prev), Some(now)) => prop_assert!(now >= prev),
                (Some(_), None) => prop_assert!(false, "resolution vanished on {}", query),
                _ => {}
            }
            last = resolved.or(last);
        }
    }
}

// ── 5. Position Exclusivity ──────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Trades of one instrument never overlap, and each exits after it entered.
    #[test]
    fn positions_are_exclusive((paths, scores) in arb_market()) {
        let n_days = scores.len();
        let mut rows = Vec::new();
        for (s, path) in paths.iter().enumerate() {
            let mut price = 100.0;
            for (t, m) in path.iter().enumerate() {
                price *= m;
                rows.push(PriceRow::new(day(t), format!("S{s}"), price).with_volume(1e6));
            }
        }
        let table: ScoreTable = scores
            .iter()
            .enumerate()
            .flat_map(|(t, row)| {
                row.iter().enumerate().map(move |(s, v)| (day(t), format!("S{s}"), *v))
            })
            .collect();
        let config = EngineConfig {
            baseline: BaselineConfig::None,
            rebalance: Rebalance::EveryN { n: 1 },
            risk: RiskConfig::neutral(),
            ledger: Some(LedgerConfig {
                max_positions: 3,
                position_size: 0.2,
                allow_short: true,
                exits: ExitRules {
                    stop_loss: Some(0.05),
                    trailing_stop: Some(0.05),
                    profit_target: Some(0.05),
                    max_hold: Some(4),
                    min_hold: 1,
                },
                ..LedgerConfig::default()
            }),
            ..EngineConfig::default()
        };
        let out = run_backtest(&MarketData::new(PriceTable::from_rows(rows).unwrap()), &table, &config)
            .unwrap();
        prop_assert_eq!(out.daily.len(), n_days);

        let mut by_symbol: BTreeMap<&str, Vec<(NaiveDate, NaiveDate)>> = BTreeMap::new();
        for trade in &out.trades {
            prop_assert!(trade.exit_date > trade.entry_date);
            by_symbol.entry(&trade.symbol).or_default().push((trade.entry_date, trade.exit_date));
        }
        for spans in by_symbol.values_mut() {
            spans.sort();
            for pair in spans.windows(2) {
                prop_assert!(pair[1].0 >= pair[0].1, "overlapping trades {:?}", pair);
            }
        }
        for pos in &out.open_positions {
            if let Some(spans) = by_symbol.get(pos.symbol.as_str()) {
                prop_assert!(spans.iter().all(|(_, exit)| pos.entry_date >= *exit));
            }
        }
        for record in &out.daily {
            prop_assert!(record.weights.len() <= 3);
        }
    }
}
