//! EngineConfig: the immutable run configuration handed to the driver.

use super::baseline::BaselineConfig;
use super::rebalance::Rebalance;
use crate::cost::CostModel;
use crate::error::EngineError;
use crate::ledger::LedgerConfig;
use crate::risk::RiskConfig;
use crate::tilt::TiltConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub initial_capital: f64,
    pub rebalance: Rebalance,
    pub baseline: BaselineConfig,
    /// Σ|w| of the unlevered book (baseline plus ledger sleeve).
    pub gross_target: f64,
    pub costs: CostModel,
    /// Trailing window for dollar ADV.
    pub adv_window: usize,
    /// Trailing window for cost-model volatility.
    pub vol_window: usize,
    pub risk: RiskConfig,
    pub ledger: Option<LedgerConfig>,
    pub tilt: Option<TiltConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_capital: 1_000_000.0,
            rebalance: Rebalance::default(),
            baseline: BaselineConfig::default(),
            gross_target: 1.0,
            costs: CostModel::default(),
            adv_window: 20,
            vol_window: 30,
            risk: RiskConfig::default(),
            ledger: None,
            tilt: None,
        }
    }
}

impl EngineConfig {
    /// Gross weight left for the baseline once the ledger sleeve is reserved.
    pub fn baseline_gross(&self) -> f64 {
        let sleeve = self.ledger.as_ref().map_or(0.0, LedgerConfig::sleeve);
        (self.gross_target - sleeve).max(0.0)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !(self.initial_capital > 0.0 && self.initial_capital.is_finite()) {
            return Err(EngineError::invalid("initial_capital must be positive"));
        }
        if !(self.gross_target > 0.0 && self.gross_target.is_finite()) {
            return Err(EngineError::invalid("gross_target must be positive"));
        }
        if let Rebalance::EveryN { n: 0 } = self.rebalance {
            return Err(EngineError::invalid("rebalance.n must be at least 1"));
        }
        if self.adv_window == 0 || self.vol_window < 2 {
            return Err(EngineError::invalid(
                "adv_window must be ≥ 1 and vol_window ≥ 2",
            ));
        }
        match self.costs {
            CostModel::Flat { fee_bps } if !(fee_bps >= 0.0) => {
                return Err(EngineError::invalid("costs.fee_bps must be non-negative"));
            }
            CostModel::Liquidity(c)
                if !(c.min_cost_bps >= 0.0 && c.min_cost_bps <= c.max_cost_bps) =>
            {
                return Err(EngineError::invalid(
                    "costs require 0 ≤ min_cost_bps ≤ max_cost_bps",
                ));
            }
            _ => {}
        }
        self.baseline.validate()?;
        self.risk.validate()?;
        if let Some(ledger) = &self.ledger {
            ledger.validate()?;
            if ledger.sleeve() > self.gross_target + 1e-12 {
                return Err(EngineError::invalid(format!(
                    "ledger sleeve {} exceeds gross_target {}",
                    ledger.sleeve(),
                    self.gross_target
                )));
            }
        }
        if let Some(tilt) = &self.tilt {
            tilt.validate()?;
        }
        Ok(())
    }
}
