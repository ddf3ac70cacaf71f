//! WeightVector: instrument → fraction of portfolio value for one date.
//!
//! Long-only books keep every value ≥ 0 with Σw ≤ 1; long/short books keep
//! Σ|w| equal to a declared gross exposure. Ordered by symbol so iteration,
//! serialization, and floating-point sums are deterministic.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Weights smaller than this in magnitude are treated as zero.
pub const WEIGHT_EPSILON: f64 = 1e-15;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeightVector {
    weights: BTreeMap<String, f64>,
}

impl WeightVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut wv = Self::new();
        for (s, w) in pairs {
            wv.add(s, w);
        }
        wv
    }

    /// Weight of `symbol`, zero when absent.
    pub fn get(&self, symbol: &str) -> f64 {
        self.weights.get(symbol).copied().unwrap_or(0.0)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.weights.contains_key(symbol)
    }

    pub fn set(&mut self, symbol: impl Into<String>, weight: f64) {
        let symbol = symbol.into();
        if weight.abs() < WEIGHT_EPSILON {
            self.weights.remove(&symbol);
        } else {
            self.weights.insert(symbol, weight);
        }
    }

    /// Add `delta` to the weight of `symbol`.
    pub fn add(&mut self, symbol: impl Into<String>, delta: f64) {
        let symbol = symbol.into();
        let w = self.get(&symbol) + delta;
        self.set(symbol, w);
    }

    pub fn remove(&mut self, symbol: &str) -> Option<f64> {
        self.weights.remove(symbol)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.weights.iter().map(|(s, w)| (s.as_str(), *w))
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> + '_ {
        self.weights.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Gross exposure: Σ|w|.
    pub fn gross(&self) -> f64 {
        self.weights.values().map(|w| w.abs()).sum()
    }

    /// Net exposure: Σw.
    pub fn net(&self) -> f64 {
        self.weights.values().sum()
    }

    pub fn is_long_only(&self) -> bool {
        self.weights.values().all(|w| *w >= 0.0)
    }

    pub fn scaled(&self, factor: f64) -> WeightVector {
        let mut out = WeightVector::new();
        for (s, w) in self.iter() {
            out.set(s, w * factor);
        }
        out
    }

    /// Rescale so that Σ|w| equals `gross_target`. A zero vector stays zero.
    pub fn normalized_to(&self, gross_target: f64) -> WeightVector {
        let gross = self.gross();
        if gross < WEIGHT_EPSILON {
            return self.clone();
        }
        self.scaled(gross_target / gross)
    }

    /// `self - other` over the union of both supports.
    pub fn delta(&self, other: &WeightVector) -> WeightVector {
        let mut out = self.clone();
        for (s, w) in other.iter() {
            out.add(s, -w);
        }
        out
    }

    /// Turnover between two vectors: Σ|self_i - other_i|.
    pub fn turnover(&self, other: &WeightVector) -> f64 {
        self.delta(other).gross()
    }

    /// Sum of two sleeves.
    pub fn merged(&self, other: &WeightVector) -> WeightVector {
        let mut out = self.clone();
        for (s, w) in other.iter() {
            out.add(s, w);
        }
        out
    }

    /// Split into (kept, rest) by a predicate on the symbol.
    pub fn partition<F>(&self, mut keep: F) -> (WeightVector, WeightVector)
    where
        F: FnMut(&str) -> bool,
    {
        let mut kept = WeightVector::new();
        let mut rest = WeightVector::new();
        for (s, w) in self.iter() {
            if keep(s) {
                kept.set(s, w);
            } else {
                rest.set(s, w);
            }
        }
        (kept, rest)
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for WeightVector {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gross_and_net() {
        let wv = WeightVector::from_pairs([("A", 0.6), ("B", -0.4)]);
        assert!((wv.gross() - 1.0).abs() < 1e-12);
        assert!((wv.net() - 0.2).abs() < 1e-12);
        assert!(!wv.is_long_only());
    }

    #[test]
    fn zero_weights_are_dropped() {
        let mut wv = WeightVector::from_pairs([("A", 0.5)]);
        wv.add("A", -0.5);
        assert!(wv.is_empty());
        assert_eq!(wv.get("A"), 0.0);
    }

    #[test]
    fn turnover_covers_union() {
        let a = WeightVector::from_pairs([("A", 0.5), ("B", 0.5)]);
        let b = WeightVector::from_pairs([("B", 0.25), ("C", 0.75)]);
        // |0.5| + |0.25| + |0.75|
        assert!((b.turnover(&a) - 1.5).abs() < 1e-12);
        assert!((a.turnover(&a)).abs() < 1e-12);
    }

    #[test]
    fn normalize_to_gross_target() {
        let wv = WeightVector::from_pairs([("A", 0.2), ("B", -0.2)]);
        let n = wv.normalized_to(2.0);
        assert!((n.get("A") - 1.0).abs() < 1e-12);
        assert!((n.get("B") + 1.0).abs() < 1e-12);
        assert!(WeightVector::new().normalized_to(1.0).is_empty());
    }

    #[test]
    fn partition_by_symbol() {
        let wv = WeightVector::from_pairs([("A", 0.3), ("B", 0.7)]);
        let (kept, rest) = wv.partition(|s| s == "A");
        assert_eq!(kept.get("A"), 0.3);
        assert_eq!(rest.get("B"), 0.7);
        assert_eq!(kept.merged(&rest), wv);
    }
}
