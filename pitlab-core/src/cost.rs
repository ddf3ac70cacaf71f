//! Transaction cost model: turnover to cost, as a fraction of portfolio value.
//!
//! Per instrument the cost rate in basis points is
//! `base + adv_coeff × (notional / adv) × 1e4 + vol_coeff_bps × annual_vol`,
//! clipped to `[min_cost_bps, max_cost_bps]`. Unknown or non-positive ADV
//! replaces the impact term with a fixed illiquidity penalty.
//!
//! The model is pure: never negative, non-decreasing in trade size and in
//! volatility.

use crate::domain::{PriceHistory, WeightVector};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Trading days per year used to annualise volatility.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostCoefficients {
    /// Commission plus half-spread.
    pub base_bps: f64,
    /// Linear impact per unit of `notional / adv`, scaled by 1e4.
    pub adv_coeff: f64,
    /// Bps per unit of annualised volatility.
    pub vol_coeff_bps: f64,
    pub min_cost_bps: f64,
    pub max_cost_bps: f64,
    /// Impact term used when ADV is unknown or ≤ 0.
    pub illiquid_penalty_bps: f64,
}

impl Default for CostCoefficients {
    fn default() -> Self {
        Self {
            base_bps: 2.0,
            adv_coeff: 0.5,
            vol_coeff_bps: 10.0,
            min_cost_bps: 1.0,
            max_cost_bps: 50.0,
            illiquid_penalty_bps: 10.0,
        }
    }
}

impl CostCoefficients {
    /// Cost rate for one trade, in basis points.
    pub fn trade_cost_bps(&self, notional: f64, inputs: LiquidityInputs) -> f64 {
        let notional = notional.abs();
        let impact = match inputs.adv {
            Some(adv) if adv > 0.0 && adv.is_finite() => self.adv_coeff * (notional / adv) * 1e4,
            _ => self.illiquid_penalty_bps,
        };
        let vol = inputs
            .volatility
            .filter(|v| v.is_finite() && *v > 0.0)
            .unwrap_or(0.0);
        let bps = self.base_bps + impact + self.vol_coeff_bps * vol;
        bps.clamp(self.min_cost_bps, self.max_cost_bps.max(self.min_cost_bps))
    }
}

/// How turnover is converted into cost.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum CostModel {
    Frictionless,
    /// Fixed fee on every unit of turnover.
    Flat { fee_bps: f64 },
    /// ADV- and volatility-dependent rate.
    Liquidity(CostCoefficients),
}

impl Default for CostModel {
    fn default() -> Self {
        CostModel::Liquidity(CostCoefficients::default())
    }
}

impl CostModel {
    /// Cost rate in bps for a trade of `notional` currency.
    pub fn trade_cost_bps(&self, notional: f64, inputs: LiquidityInputs) -> f64 {
        match self {
            CostModel::Frictionless => 0.0,
            CostModel::Flat { fee_bps } => fee_bps.max(0.0),
            CostModel::Liquidity(c) => c.trade_cost_bps(notional, inputs).max(0.0),
        }
    }

    /// Currency cost of trading `notional` in `symbol`.
    pub fn trade_cost(&self, symbol: &str, notional: f64, liquidity: &LiquiditySnapshot) -> f64 {
        let notional = notional.abs();
        notional * self.trade_cost_bps(notional, liquidity.inputs(symbol)) / 1e4
    }

    /// Cost of moving the book by `delta`, as a fraction of `portfolio_value`.
    ///
    /// `Σ |Δw_i| × bps_i / 1e4` where each trade's notional is
    /// `|Δw_i| × portfolio_value`.
    pub fn cost(
        &self,
        delta: &WeightVector,
        liquidity: &LiquiditySnapshot,
        portfolio_value: f64,
    ) -> f64 {
        if matches!(self, CostModel::Frictionless) {
            return 0.0;
        }
        let pv = if portfolio_value.is_finite() {
            portfolio_value.max(0.0)
        } else {
            0.0
        };
        delta
            .iter()
            .map(|(symbol, dw)| {
                let dw = dw.abs();
                dw * self.trade_cost_bps(dw * pv, liquidity.inputs(symbol)) / 1e4
            })
            .sum()
    }
}

/// Liquidity inputs for one instrument.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LiquidityInputs {
    /// Average daily dollar volume.
    pub adv: Option<f64>,
    /// Annualised volatility of daily returns.
    pub volatility: Option<f64>,
}

/// Trailing liquidity statistics for a set of instruments on one date.
#[derive(Debug, Clone, Default)]
pub struct LiquiditySnapshot {
    inputs: HashMap<String, LiquidityInputs>,
}

impl LiquiditySnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symbol: impl Into<String>, inputs: LiquidityInputs) {
        self.inputs.insert(symbol.into(), inputs);
    }

    pub fn inputs(&self, symbol: &str) -> LiquidityInputs {
        self.inputs.get(symbol).copied().unwrap_or_default()
    }

    /// Compute ADV and volatility from dates strictly before the history's cut-off.
    ///
    /// ADV is the mean of `close × volume` over the last `adv_window` dates
    /// (one valid observation suffices). Volatility is the sample std of
    /// daily returns over the last `vol_window` dates, annualised by √252,
    /// and needs at least two returns.
    pub fn trailing<'a, I>(
        history: &PriceHistory<'_>,
        symbols: I,
        adv_window: usize,
        vol_window: usize,
    ) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut snapshot = Self::empty();
        for symbol in symbols {
            let (Some(closes), Some(volumes)) = (history.closes(symbol), history.volumes(symbol))
            else {
                continue;
            };
            snapshot.insert(
                symbol,
                LiquidityInputs {
                    adv: trailing_adv(closes, volumes, adv_window),
                    volatility: trailing_volatility(closes, vol_window),
                },
            );
        }
        snapshot
    }
}

fn trailing_adv(closes: &[f64], volumes: &[f64], window: usize) -> Option<f64> {
    let start = closes.len().saturating_sub(window.max(1));
    let dollar: Vec<f64> = closes[start..]
        .iter()
        .zip(&volumes[start..])
        .map(|(c, v)| c * v)
        .filter(|x| x.is_finite())
        .collect();
    if dollar.is_empty() {
        return None;
    }
    Some(dollar.iter().sum::<f64>() / dollar.len() as f64)
}

fn trailing_volatility(closes: &[f64], window: usize) -> Option<f64> {
    let start = closes.len().saturating_sub(window.max(2));
    let returns: Vec<f64> = closes[start..]
        .windows(2)
        .map(|w| w[1] / w[0] - 1.0)
        .filter(|r| r.is_finite())
        .collect();
    if returns.len() < 2 {
        return None;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(var.sqrt() * TRADING_DAYS_PER_YEAR.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PriceRow, PriceTable};
    use chrono::NaiveDate;

    fn liquid(adv: f64, vol: f64) -> LiquidityInputs {
        LiquidityInputs {
            adv: Some(adv),
            volatility: Some(vol),
        }
    }

    #[test]
    fn bps_formula_and_clipping() {
        let c = CostCoefficients::default();
        // 2 + 0.5 × (1e5 / 5e7) × 1e4 + 10 × 0.2 = 2 + 10 + 2
        let bps = c.trade_cost_bps(100_000.0, liquid(50_000_000.0, 0.2));
        assert!((bps - 14.0).abs() < 1e-9);

        // Huge trade clips at the cap.
        assert_eq!(c.trade_cost_bps(1e9, liquid(1e6, 0.2)), 50.0);

        // Zero notional, no vol: base only, floored at min.
        let floor = CostCoefficients {
            base_bps: 0.0,
            ..c
        };
        assert_eq!(floor.trade_cost_bps(0.0, liquid(1e6, 0.0)), 1.0);
    }

    #[test]
    fn unknown_adv_uses_penalty() {
        let c = CostCoefficients::default();
        let none = c.trade_cost_bps(1_000.0, LiquidityInputs::default());
        let zero = c.trade_cost_bps(1_000.0, liquid(0.0, 0.0));
        assert!((none - 12.0).abs() < 1e-9);
        assert!((zero - 12.0).abs() < 1e-9);
    }

    #[test]
    fn aggregate_cost_over_delta() {
        let model = CostModel::Flat { fee_bps: 10.0 };
        let delta = WeightVector::from_pairs([("A", 0.2), ("B", -0.3)]);
        let cost = model.cost(&delta, &LiquiditySnapshot::empty(), 1e6);
        assert!((cost - 0.5 * 10.0 / 1e4).abs() < 1e-15);

        assert_eq!(CostModel::Frictionless.cost(&delta, &LiquiditySnapshot::empty(), 1e6), 0.0);
        assert_eq!(model.cost(&WeightVector::new(), &LiquiditySnapshot::empty(), 1e6), 0.0);
    }

    #[test]
    fn cost_is_monotone_in_trade_size_and_volatility() {
        let model = CostModel::default();
        let mut snap = LiquiditySnapshot::empty();
        snap.insert("A", liquid(5_000_000.0, 0.3));
        let small = model.cost(&WeightVector::from_pairs([("A", 0.01)]), &snap, 1e6);
        let large = model.cost(&WeightVector::from_pairs([("A", 0.10)]), &snap, 1e6);
        assert!(large >= small);

        let c = CostCoefficients::default();
        let calm = c.trade_cost_bps(10_000.0, liquid(1e7, 0.1));
        let wild = c.trade_cost_bps(10_000.0, liquid(1e7, 0.6));
        assert!(wild >= calm);
    }

    #[test]
    fn trailing_snapshot_ignores_current_date() {
        let d = |day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
        let rows = vec![
            PriceRow::new(d(2), "A", 100.0).with_volume(1_000.0),
            PriceRow::new(d(3), "A", 101.0).with_volume(1_000.0),
            PriceRow::new(d(4), "A", 99.0).with_volume(1_000.0),
            PriceRow::new(d(5), "A", 500.0).with_volume(1e9),
        ];
        let table = PriceTable::from_rows(rows).unwrap();
        let snap = LiquiditySnapshot::trailing(&table.history(3), ["A"], 20, 30);
        let inputs = snap.inputs("A");
        assert!((inputs.adv.unwrap() - 100_000.0).abs() < 1e-6);
        assert!(inputs.volatility.unwrap() > 0.0);
        assert_eq!(snap.inputs("ZZZ"), LiquidityInputs::default());
    }
}
