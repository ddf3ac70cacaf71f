//! Risk scaler: volatility targeting with drawdown-triggered de-risking.
//!
//! The leverage applied to date t is decided from returns through t−1:
//! the driver reads [`RiskScaler::leverage`] before observing date t and
//! calls [`RiskScaler::observe`] afterwards, which yields the leverage for
//! t+1. Volatility is measured on the unlevered portfolio return; drawdown on
//! the realized (levered, net of cost) return.

use crate::cost::TRADING_DAYS_PER_YEAR;
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrawdownRegimeConfig {
    /// Drawdown at or below which the book enters `Reduced`.
    pub reduced_threshold: f64,
    /// Drawdown at or below which the book enters `Defensive`.
    pub defensive_threshold: f64,
    pub reduced_factor: f64,
    pub defensive_factor: f64,
    /// When set, a regime only relaxes once drawdown recovers above this level.
    pub recovery_threshold: Option<f64>,
}

impl Default for DrawdownRegimeConfig {
    fn default() -> Self {
        Self {
            reduced_threshold: -0.10,
            defensive_threshold: -0.15,
            reduced_factor: 0.75,
            defensive_factor: 0.50,
            recovery_threshold: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Annualised volatility target.
    pub target_vol: f64,
    /// Trailing window of unlevered returns.
    pub lookback: usize,
    /// Observations required before targeting kicks in; `lookback / 2` when unset.
    pub min_periods: Option<usize>,
    pub min_leverage: f64,
    pub max_leverage: f64,
    pub drawdown: Option<DrawdownRegimeConfig>,
    /// Fractional Kelly cap on leverage (`fraction × mean / variance`).
    pub kelly_fraction: Option<f64>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            target_vol: 0.10,
            lookback: 63,
            min_periods: None,
            min_leverage: 0.5,
            max_leverage: 2.0,
            drawdown: Some(DrawdownRegimeConfig::default()),
            kelly_fraction: None,
        }
    }
}

impl RiskConfig {
    /// Leverage pinned at 1.0: no targeting, no drawdown response.
    pub fn neutral() -> Self {
        Self {
            min_leverage: 1.0,
            max_leverage: 1.0,
            drawdown: None,
            kelly_fraction: None,
            ..Self::default()
        }
    }

    pub fn effective_min_periods(&self) -> usize {
        self.min_periods
            .unwrap_or(self.lookback / 2)
            .clamp(2, self.lookback.max(2))
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !(self.target_vol > 0.0 && self.target_vol.is_finite()) {
            return Err(EngineError::invalid("risk.target_vol must be positive"));
        }
        if self.lookback < 2 {
            return Err(EngineError::invalid("risk.lookback must be at least 2"));
        }
        if !(self.min_leverage > 0.0 && self.min_leverage <= self.max_leverage) {
            return Err(EngineError::invalid(format!(
                "risk leverage bounds invalid: min {} max {}",
                self.min_leverage, self.max_leverage
            )));
        }
        if let Some(dd) = &self.drawdown {
            if !(dd.defensive_threshold <= dd.reduced_threshold && dd.reduced_threshold <= 0.0) {
                return Err(EngineError::invalid(
                    "risk.drawdown thresholds must satisfy defensive ≤ reduced ≤ 0",
                ));
            }
            if !(0.0..=1.0).contains(&dd.reduced_factor)
                || !(0.0..=1.0).contains(&dd.defensive_factor)
            {
                return Err(EngineError::invalid(
                    "risk.drawdown factors must be within [0, 1]",
                ));
            }
            if let Some(rec) = dd.recovery_threshold {
                if rec < dd.reduced_threshold || rec > 0.0 {
                    return Err(EngineError::invalid(
                        "risk.drawdown.recovery_threshold must lie between reduced_threshold and 0",
                    ));
                }
            }
        }
        if let Some(k) = self.kelly_fraction {
            if !(k > 0.0 && k.is_finite()) {
                return Err(EngineError::invalid("risk.kelly_fraction must be positive"));
            }
        }
        Ok(())
    }

    fn clip(&self, leverage: f64) -> f64 {
        if leverage.is_nan() {
            return 1.0_f64.clamp(self.min_leverage, self.max_leverage);
        }
        leverage.clamp(self.min_leverage, self.max_leverage)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskRegime {
    Normal,
    Reduced,
    Defensive,
}

impl RiskRegime {
    /// Regime implied by the current drawdown alone.
    pub fn from_drawdown(drawdown: f64, cfg: &DrawdownRegimeConfig) -> Self {
        if drawdown <= cfg.defensive_threshold {
            RiskRegime::Defensive
        } else if drawdown <= cfg.reduced_threshold {
            RiskRegime::Reduced
        } else {
            RiskRegime::Normal
        }
    }

    pub fn factor(self, cfg: &DrawdownRegimeConfig) -> f64 {
        match self {
            RiskRegime::Normal => 1.0,
            RiskRegime::Reduced => cfg.reduced_factor,
            RiskRegime::Defensive => cfg.defensive_factor,
        }
    }
}

/// Running peak and drawdown of cumulative realized return.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrawdownState {
    pub equity: f64,
    pub peak: f64,
    /// `equity / peak − 1`, ≤ 0.
    pub drawdown: f64,
}

impl Default for DrawdownState {
    fn default() -> Self {
        Self {
            equity: 1.0,
            peak: 1.0,
            drawdown: 0.0,
        }
    }
}

impl DrawdownState {
    pub fn update(&mut self, ret: f64) {
        if !ret.is_finite() {
            return;
        }
        self.equity *= 1.0 + ret;
        self.peak = self.peak.max(self.equity);
        self.drawdown = if self.peak > 0.0 {
            self.equity / self.peak - 1.0
        } else {
            -1.0
        };
    }
}

/// Summary of the leverage path of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskDiagnostics {
    pub days: usize,
    pub mean_leverage: f64,
    pub min_leverage: f64,
    pub max_leverage: f64,
    pub days_normal: usize,
    pub days_reduced: usize,
    pub days_defensive: usize,
    pub max_drawdown: f64,
}

#[derive(Debug, Clone)]
pub struct RiskScaler {
    config: RiskConfig,
    window: VecDeque<f64>,
    drawdown: DrawdownState,
    regime: RiskRegime,
    leverage: f64,
    diagnostics: RiskDiagnostics,
    leverage_sum: f64,
}

impl RiskScaler {
    pub fn new(config: RiskConfig) -> Self {
        let leverage = config.clip(1.0);
        Self {
            window: VecDeque::with_capacity(config.lookback),
            config,
            drawdown: DrawdownState::default(),
            regime: RiskRegime::Normal,
            leverage,
            diagnostics: RiskDiagnostics {
                min_leverage: f64::INFINITY,
                max_leverage: f64::NEG_INFINITY,
                ..RiskDiagnostics::default()
            },
            leverage_sum: 0.0,
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Leverage for the date about to be realized.
    pub fn leverage(&self) -> f64 {
        self.leverage
    }

    pub fn regime(&self) -> RiskRegime {
        self.regime
    }

    pub fn drawdown(&self) -> DrawdownState {
        self.drawdown
    }

    /// Record date t and decide the leverage for t+1.
    ///
    /// `unlevered` is the portfolio return before leverage, `realized` the
    /// net return actually booked.
    pub fn observe(&mut self, unlevered: f64, realized: f64) -> f64 {
        self.record_applied();

        if unlevered.is_finite() {
            if self.window.len() == self.config.lookback {
                self.window.pop_front();
            }
            self.window.push_back(unlevered);
        }
        self.drawdown.update(realized);
        self.diagnostics.max_drawdown = self.diagnostics.max_drawdown.min(self.drawdown.drawdown);
        self.regime = self.next_regime();

        let mut leverage = self.vol_target_leverage();
        if let Some(dd) = &self.config.drawdown {
            leverage = self.config.clip(leverage * self.regime.factor(dd));
        }
        if let Some(k) = self.config.kelly_fraction {
            leverage = self.config.clip(leverage.min(self.kelly_leverage(k)));
        }
        self.leverage = leverage;
        leverage
    }

    pub fn diagnostics(&self) -> RiskDiagnostics {
        let mut d = self.diagnostics.clone();
        if d.days == 0 {
            d.min_leverage = 0.0;
            d.max_leverage = 0.0;
        } else {
            d.mean_leverage = self.leverage_sum / d.days as f64;
        }
        d
    }

    fn record_applied(&mut self) {
        let d = &mut self.diagnostics;
        d.days += 1;
        d.min_leverage = d.min_leverage.min(self.leverage);
        d.max_leverage = d.max_leverage.max(self.leverage);
        match self.regime {
            RiskRegime::Normal => d.days_normal += 1,
            RiskRegime::Reduced => d.days_reduced += 1,
            RiskRegime::Defensive => d.days_defensive += 1,
        }
        self.leverage_sum += self.leverage;
    }

    fn next_regime(&self) -> RiskRegime {
        let Some(cfg) = &self.config.drawdown else {
            return RiskRegime::Normal;
        };
        let dd = self.drawdown.drawdown;
        let implied = RiskRegime::from_drawdown(dd, cfg);
        match cfg.recovery_threshold {
            None => implied,
            Some(recovery) => {
                if implied >= self.regime || dd > recovery {
                    implied
                } else {
                    self.regime
                }
            }
        }
    }

    fn window_stats(&self) -> Option<(f64, f64)> {
        let n = self.window.len();
        if n < self.config.effective_min_periods() {
            return None;
        }
        let nf = n as f64;
        let mean = self.window.iter().sum::<f64>() / nf;
        let var = self.window.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (nf - 1.0);
        Some((mean, var))
    }

    fn vol_target_leverage(&self) -> f64 {
        let Some((_, var)) = self.window_stats() else {
            return self.config.clip(1.0);
        };
        let vol = var.sqrt() * TRADING_DAYS_PER_YEAR.sqrt();
        if !(vol > 1e-15) || !vol.is_finite() {
            return self.config.clip(1.0);
        }
        self.config.clip(self.config.target_vol / vol)
    }

    fn kelly_leverage(&self, fraction: f64) -> f64 {
        match self.window_stats() {
            Some((mean, var)) if var > 1e-15 => self.config.clip(fraction * mean / var),
            _ => self.config.clip(1.0),
        }
    }
}
