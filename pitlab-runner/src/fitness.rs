//! Fitness function: configurable metric selector for ranking sweep runs.

use crate::metrics::PerformanceMetrics;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which metric to optimize/sort by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitnessMetric {
    #[default]
    Sharpe,
    Sortino,
    Calmar,
    Cagr,
    TotalReturn,
    MaxDrawdown,
    /// Lower total cost ranks higher.
    TotalCost,
}

impl FitnessMetric {
    pub const ALL: [FitnessMetric; 7] = [
        Self::Sharpe,
        Self::Sortino,
        Self::Calmar,
        Self::Cagr,
        Self::TotalReturn,
        Self::MaxDrawdown,
        Self::TotalCost,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sharpe => "sharpe",
            Self::Sortino => "sortino",
            Self::Calmar => "calmar",
            Self::Cagr => "cagr",
            Self::TotalReturn => "total_return",
            Self::MaxDrawdown => "max_drawdown",
            Self::TotalCost => "total_cost",
        }
    }

    /// Extract the relevant metric value from a PerformanceMetrics struct.
    pub fn extract(&self, metrics: &PerformanceMetrics) -> f64 {
        match self {
            Self::Sharpe => metrics.sharpe,
            Self::Sortino => metrics.sortino,
            Self::Calmar => metrics.calmar,
            Self::Cagr => metrics.cagr,
            Self::TotalReturn => metrics.total_return,
            Self::MaxDrawdown => metrics.max_drawdown,
            Self::TotalCost => metrics.total_cost,
        }
    }

    /// MaxDrawdown is negative, so higher (closer to 0) is still better.
    /// Only cost is minimized.
    pub fn is_higher_better(&self) -> bool {
        !matches!(self, Self::TotalCost)
    }

    /// Returns true if `a` is strictly better than `b`.
    pub fn is_better(&self, a: f64, b: f64) -> bool {
        if self.is_higher_better() {
            a > b
        } else {
            a < b
        }
    }

    /// Ordering where better values sort first. NaN sorts last.
    pub fn compare(&self, a: f64, b: f64) -> std::cmp::Ordering {
        match (a.is_nan(), b.is_nan()) {
            (true, true) => std::cmp::Ordering::Equal,
            (true, false) => std::cmp::Ordering::Greater,
            (false, true) => std::cmp::Ordering::Less,
            (false, false) => {
                let ord = a.total_cmp(&b);
                if self.is_higher_better() {
                    ord.reverse()
                } else {
                    ord
                }
            }
        }
    }
}

impl fmt::Display for FitnessMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FitnessMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(|m| m.as_str()).collect();
                format!("unknown metric '{s}' (expected one of: {})", names.join(", "))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    fn sample_metrics() -> PerformanceMetrics {
        PerformanceMetrics {
            total_return: 0.15,
            cagr: 0.12,
            sharpe: 1.5,
            sortino: 2.0,
            calmar: 1.2,
            max_drawdown: -0.10,
            total_cost: 0.004,
            ..PerformanceMetrics::default()
        }
    }

    #[test]
    fn extract_values() {
        let m = sample_metrics();
        assert!((FitnessMetric::Sharpe.extract(&m) - 1.5).abs() < 1e-10);
        assert!((FitnessMetric::MaxDrawdown.extract(&m) - (-0.10)).abs() < 1e-10);
        assert!((FitnessMetric::TotalCost.extract(&m) - 0.004).abs() < 1e-10);
    }

    #[test]
    fn default_is_sharpe() {
        assert_eq!(FitnessMetric::default(), FitnessMetric::Sharpe);
    }

    #[test]
    fn is_better_max_drawdown() {
        // -0.05 is better than -0.20 (less negative)
        assert!(FitnessMetric::MaxDrawdown.is_better(-0.05, -0.20));
        assert!(!FitnessMetric::MaxDrawdown.is_better(-0.20, -0.05));
    }

    #[test]
    fn lower_cost_is_better() {
        assert!(FitnessMetric::TotalCost.is_better(0.001, 0.002));
        assert_eq!(FitnessMetric::TotalCost.compare(0.001, 0.002), Ordering::Less);
    }

    #[test]
    fn compare_puts_best_first_and_nan_last() {
        let mut values = vec![0.5, f64::NAN, 2.0, -1.0];
        values.sort_by(|a, b| FitnessMetric::Sharpe.compare(*a, *b));
        assert_eq!(values[..3], [2.0, 0.5, -1.0]);
        assert!(values[3].is_nan());
    }

    #[test]
    fn parse_names() {
        assert_eq!("sharpe".parse::<FitnessMetric>(), Ok(FitnessMetric::Sharpe));
        assert_eq!("MAX_DRAWDOWN".parse::<FitnessMetric>(), Ok(FitnessMetric::MaxDrawdown));
        for m in FitnessMetric::ALL {
            assert_eq!(m.to_string().parse::<FitnessMetric>(), Ok(m));
        }
        assert!("alpha".parse::<FitnessMetric>().unwrap_err().contains("sharpe"));
    }
}
