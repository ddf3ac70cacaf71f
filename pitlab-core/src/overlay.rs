//! Budget-constrained tilt overlay.
//!
//! [`apply_overlay`] is a pure function that moves a baseline allocation
//! toward a set of tilted instruments as one reallocation:
//!
//! 1. add each tilt to the instrument's baseline magnitude (floored at zero);
//! 2. fund the net added weight from the non-tilted instruments;
//! 3. clip anything above `max_weight` and hand the excess to under-cap
//!    instruments in proportion to their weight, until stable;
//! 4. rescale so Σ|w| equals the gross target.
//!
//! Long/short baselines are handled on magnitudes; signs are preserved.
//!
//! [`apply_budget_overlay`] is the fixed-budget variant: the baseline is
//! shrunk by the budget and the freed weight is split across event names.

use crate::domain::{WeightVector, WEIGHT_EPSILON};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const EPS: f64 = 1e-12;

/// How the weight added by tilts is drawn from the rest of the book.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundingMode {
    /// In proportion to each donor's baseline weight.
    #[default]
    Proportional,
    /// Equal amounts per donor; a donor that hits zero passes the rest on.
    Equal,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OverlayParams {
    pub funding: FundingMode,
    /// Per-instrument magnitude cap.
    pub max_weight: Option<f64>,
    /// Σ|w| after the overlay; the baseline's gross when unset.
    pub gross_target: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlayOutcome {
    pub weights: WeightVector,
    /// Tilt requested per instrument.
    pub requested_tilt: BTreeMap<String, f64>,
    /// Change in magnitude actually applied per tilted instrument (before capping).
    pub applied_tilt: BTreeMap<String, f64>,
    /// Weight drawn from (positive) or given to (negative) donors.
    pub funded: f64,
    /// Net tilt the donors could not fund.
    pub shortfall: f64,
    /// Weight clipped at the cap.
    pub capped_excess: f64,
    /// Clipped weight that found no under-cap instrument.
    pub unplaced_excess: f64,
}

impl OverlayOutcome {
    /// Fraction of the tilt requested on `symbol` that was applied.
    pub fn fill_ratio(&self, symbol: &str) -> f64 {
        match (self.requested_tilt.get(symbol), self.applied_tilt.get(symbol)) {
            (Some(req), Some(app)) if req.abs() > EPS => (app / req).clamp(0.0, 1.0),
            _ => 0.0,
        }
    }
}

/// Apply `tilts` to `baseline` under `params`. See the module docs.
pub fn apply_overlay(
    baseline: &WeightVector,
    tilts: &BTreeMap<String, f64>,
    params: &OverlayParams,
) -> OverlayOutcome {
    let gross_target = params.gross_target.unwrap_or_else(|| baseline.gross());

    // Magnitudes and signs over the union of baseline and tilted instruments.
    let mut mag: BTreeMap<String, f64> = BTreeMap::new();
    let mut sign: BTreeMap<String, f64> = BTreeMap::new();
    for (s, w) in baseline.iter() {
        mag.insert(s.to_string(), w.abs());
        sign.insert(s.to_string(), if w < 0.0 { -1.0 } else { 1.0 });
    }
    let requested_tilt: BTreeMap<String, f64> = tilts
        .iter()
        .filter(|(_, t)| t.is_finite() && t.abs() > EPS)
        .map(|(s, t)| (s.clone(), *t))
        .collect();

    // ── Step 1: add tilts ──
    let mut applied: BTreeMap<String, f64> = BTreeMap::new();
    for (s, t) in &requested_tilt {
        let old = mag.get(s).copied().unwrap_or(0.0);
        let new = (old + t).max(0.0);
        applied.insert(s.clone(), new - old);
    }
    let net_added: f64 = applied.values().sum();

    let donors: Vec<String> = mag
        .iter()
        .filter(|(s, m)| **m > EPS && !requested_tilt.contains_key(*s))
        .map(|(s, _)| s.clone())
        .collect();
    let capacity: f64 = donors.iter().map(|s| mag[s]).sum();

    // ── Step 2: fund from donors ──
    let mut shortfall = 0.0;
    let mut funded = 0.0;
    if net_added > EPS {
        let mut draw = net_added;
        if net_added > capacity + EPS {
            shortfall = net_added - capacity;
            let positive: f64 = applied.values().filter(|a| **a > 0.0).sum();
            let negative: f64 = applied.values().filter(|a| **a < 0.0).sum();
            let scale = ((capacity - negative) / positive).clamp(0.0, 1.0);
            for a in applied.values_mut() {
                if *a > 0.0 {
                    *a *= scale;
                }
            }
            draw = capacity;
        }
        take_from_donors(&mut mag, &donors, draw, params.funding);
        funded = draw;
    } else if net_added < -EPS && !donors.is_empty() {
        give_to_donors(&mut mag, &donors, -net_added, params.funding);
        funded = net_added;
    }
    for (s, a) in &applied {
        let old = mag.get(s).copied().unwrap_or(0.0);
        mag.insert(s.clone(), (old + a).max(0.0));
        sign.entry(s.clone()).or_insert(1.0);
    }

    // ── Steps 3 and 4: cap, then renormalise ──
    let (weights, capped_excess, unplaced_excess) =
        cap_and_scale(mag, &sign, params.max_weight, gross_target);

    OverlayOutcome {
        weights,
        requested_tilt,
        applied_tilt: applied,
        funded,
        shortfall,
        capped_excess,
        unplaced_excess,
    }
}

/// Clip magnitudes above `cap`, hand the excess to under-cap instruments in
/// proportion to their weight until stable, then rescale to `gross_target`.
///
/// Returns the weights, the total clipped, and the part that found no room.
fn cap_and_scale(
    mut mag: BTreeMap<String, f64>,
    sign: &BTreeMap<String, f64>,
    cap: Option<f64>,
    gross_target: f64,
) -> (WeightVector, f64, f64) {
    let mut capped_excess = 0.0;
    let mut unplaced_excess = 0.0;
    if let Some(cap) = cap.filter(|c| *c > 0.0) {
        for _ in 0..=mag.len() {
            let mut excess = 0.0;
            for m in mag.values_mut() {
                if *m > cap + EPS {
                    excess += *m - cap;
                    *m = cap;
                }
            }
            if excess <= EPS {
                break;
            }
            capped_excess += excess;
            let room: f64 = mag
                .values()
                .filter(|m| **m > EPS && **m < cap - EPS)
                .sum();
            if room <= EPS {
                unplaced_excess += excess;
                break;
            }
            for m in mag.values_mut() {
                if *m > EPS && *m < cap - EPS {
                    *m += excess * *m / room;
                }
            }
        }
    }

    let total: f64 = mag.values().sum();
    let scale = if total > EPS { gross_target / total } else { 0.0 };

    let mut weights = WeightVector::new();
    for (s, m) in &mag {
        let w = sign.get(s).copied().unwrap_or(1.0) * m * scale;
        if w.abs() >= WEIGHT_EPSILON {
            weights.set(s.clone(), w);
        }
    }
    (weights, capped_excess, unplaced_excess)
}

// ─── Budget overlay ──────────────────────────────────────────────────

/// How a fixed tilt budget is split across instruments with active events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetWeighting {
    /// In proportion to each instrument's summed event strength.
    #[default]
    Strength,
    /// The same share for every active instrument.
    Equal,
}

/// Carve a fixed `budget` (fraction of gross) out of the baseline and hand it
/// to the instruments in `signals` with a positive value.
///
/// Every baseline weight shrinks by `1 − budget`; `budget × gross` is split
/// across active instruments by `weighting`; the cap and renormalisation then
/// run as in [`apply_overlay`]. With no active instrument the baseline is
/// returned unchanged. A budget is always fully funded, so `shortfall` is 0.
pub fn apply_budget_overlay(
    baseline: &WeightVector,
    signals: &BTreeMap<String, f64>,
    budget: f64,
    weighting: BudgetWeighting,
    params: &OverlayParams,
) -> OverlayOutcome {
    let gross_target = params.gross_target.unwrap_or_else(|| baseline.gross());
    let budget = if budget.is_finite() {
        budget.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let active: BTreeMap<String, f64> = signals
        .iter()
        .filter(|(_, v)| v.is_finite() && **v > EPS)
        .map(|(s, v)| (s.clone(), *v))
        .collect();

    let allotment = budget * gross_target;
    let mut requested_tilt = BTreeMap::new();
    if allotment > EPS && !active.is_empty() {
        let total: f64 = active.values().sum();
        let n = active.len() as f64;
        for (s, v) in &active {
            let share = match weighting {
                BudgetWeighting::Strength => v / total,
                BudgetWeighting::Equal => 1.0 / n,
            };
            requested_tilt.insert(s.clone(), allotment * share);
        }
    }

    // Signed weights after shrinking and adding the allotments.
    let mut signed: BTreeMap<String, f64> = BTreeMap::new();
    let shrink = if requested_tilt.is_empty() { 1.0 } else { 1.0 - budget };
    for (s, w) in baseline.iter() {
        signed.insert(s.to_string(), w * shrink);
    }
    for (s, add) in &requested_tilt {
        *signed.entry(s.clone()).or_insert(0.0) += add;
    }

    let mag: BTreeMap<String, f64> = signed.iter().map(|(s, w)| (s.clone(), w.abs())).collect();
    let sign: BTreeMap<String, f64> = signed
        .iter()
        .map(|(s, w)| (s.clone(), if *w < 0.0 { -1.0 } else { 1.0 }))
        .collect();
    let (weights, capped_excess, unplaced_excess) =
        cap_and_scale(mag, &sign, params.max_weight, gross_target);

    let funded = requested_tilt.values().sum();
    OverlayOutcome {
        weights,
        applied_tilt: requested_tilt.clone(),
        requested_tilt,
        funded,
        shortfall: 0.0,
        capped_excess,
        unplaced_excess,
    }
}

fn take_from_donors(
    mag: &mut BTreeMap<String, f64>,
    donors: &[String],
    amount: f64,
    mode: FundingMode,
) {
    match mode {
        FundingMode::Proportional => {
            let capacity: f64 = donors.iter().map(|s| mag[s]).sum();
            if capacity <= EPS {
                return;
            }
            let frac = (amount / capacity).min(1.0);
            for s in donors {
                if let Some(m) = mag.get_mut(s) {
                    *m = (*m - *m * frac).max(0.0);
                }
            }
        }
        FundingMode::Equal => {
            // Water-filling: smallest donors are exhausted first.
            let mut order: Vec<&String> = donors.iter().collect();
            order.sort_by(|a, b| mag[*a].total_cmp(&mag[*b]).then_with(|| a.cmp(b)));
            let mut remaining = amount;
            let n = order.len();
            for (k, s) in order.into_iter().enumerate() {
                let share = remaining / (n - k) as f64;
                if let Some(m) = mag.get_mut(s) {
                    let take = share.min(*m);
                    *m -= take;
                    remaining -= take;
                }
            }
        }
    }
}

fn give_to_donors(
    mag: &mut BTreeMap<String, f64>,
    donors: &[String],
    amount: f64,
    mode: FundingMode,
) {
    match mode {
        FundingMode::Proportional => {
            let capacity: f64 = donors.iter().map(|s| mag[s]).sum();
            if capacity <= EPS {
                return;
            }
            for s in donors {
                if let Some(m) = mag.get_mut(s) {
                    *m += amount * *m / capacity;
                }
            }
        }
        FundingMode::Equal => {
            let share = amount / donors.len() as f64;
            for s in donors {
                if let Some(m) = mag.get_mut(s) {
                    *m += share;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn equal_weight(n: usize) -> WeightVector {
        (0..n).map(|i| (format!("S{i:02}"), 1.0 / n as f64)).collect()
    }

    fn tilts(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(s, t)| (s.to_string(), *t)).collect()
    }

    #[test]
    fn single_tilt_funded_proportionally() {
        let base = equal_weight(50);
        let out = apply_overlay(&base, &tilts(&[("S00", 0.02)]), &OverlayParams::default());
        assert!((out.weights.get("S00") - 0.04).abs() < 1e-12);
        let donor = 0.02 - 0.02 / 49.0;
        assert!((out.weights.get("S01") - donor).abs() < 1e-12);
        assert!((out.weights.gross() - 1.0).abs() < 1e-9);
        assert!((out.funded - 0.02).abs() < 1e-12);
        assert_eq!(out.shortfall, 0.0);
        assert!((out.fill_ratio("S00") - 1.0).abs() < 1e-12);
    }

    #[test]
    fn no_tilts_is_identity() {
        let base = equal_weight(4);
        let out = apply_overlay(&base, &BTreeMap::new(), &OverlayParams::default());
        assert_eq!(out.weights, base);
    }

    #[test]
    fn equal_funding_water_fills() {
        let base = WeightVector::from_pairs([("A", 0.5), ("B", 0.45), ("C", 0.05)]);
        let params = OverlayParams {
            funding: FundingMode::Equal,
            ..OverlayParams::default()
        };
        let out = apply_overlay(&base, &tilts(&[("A", 0.2)]), &params);
        // C gives 0.05, B covers the remaining 0.15.
        assert!(out.weights.get("C").abs() < 1e-12);
        assert!((out.weights.get("B") - 0.30).abs() < 1e-12);
        assert!((out.weights.get("A") - 0.70).abs() < 1e-12);
    }

    #[test]
    fn shortfall_scales_tilts_down() {
        let base = WeightVector::from_pairs([("A", 0.9), ("B", 0.1)]);
        let out = apply_overlay(&base, &tilts(&[("A", 0.3)]), &OverlayParams::default());
        assert!((out.shortfall - 0.2).abs() < 1e-12);
        assert!((out.weights.get("A") - 1.0).abs() < 1e-12);
        assert!(out.weights.get("B").abs() < 1e-12);
        assert!((out.fill_ratio("A") - (0.1 / 0.3)).abs() < 1e-12);
    }

    #[test]
    fn cap_redistributes_excess() {
        let base = equal_weight(10);
        let params = OverlayParams {
            max_weight: Some(0.12),
            ..OverlayParams::default()
        };
        let out = apply_overlay(&base, &tilts(&[("S00", 0.05)]), &params);
        for (_, w) in out.weights.iter() {
            assert!(w <= 0.12 + 1e-9);
        }
        assert!((out.weights.get("S00") - 0.12).abs() < 1e-9);
        assert!((out.capped_excess - 0.03).abs() < 1e-9);
        assert!((out.weights.gross() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn long_short_signs_preserved() {
        let base = WeightVector::from_pairs([("A", 0.5), ("B", 0.5), ("C", -0.5), ("D", -0.5)]);
        let out = apply_overlay(&base, &tilts(&[("C", 0.1)]), &OverlayParams::default());
        assert!((out.weights.get("C") + 0.6).abs() < 1e-12);
        assert!(out.weights.get("D") < 0.0);
        assert!(out.weights.get("A") > 0.0);
        assert!((out.weights.gross() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn negative_tilt_returns_weight_to_donors() {
        let base = WeightVector::from_pairs([("A", 0.5), ("B", 0.5)]);
        let out = apply_overlay(&base, &tilts(&[("A", -0.7)]), &OverlayParams::default());
        // Floored at zero: only 0.5 can be removed.
        assert!(out.weights.get("A").abs() < 1e-12);
        assert!((out.weights.get("B") - 1.0).abs() < 1e-12);
        assert!((out.applied_tilt["A"] + 0.5).abs() < 1e-12);
    }

    // ─── Budget overlay ──────────────────────────────────────────────

    fn four_names() -> WeightVector {
        WeightVector::from_pairs([("A", 0.25), ("B", 0.25), ("C", 0.25), ("D", 0.25)])
    }

    #[test]
    fn budget_split_equally_then_capped() {
        let signals = tilts(&[("A", 0.005), ("B", 0.02)]);
        let out = apply_budget_overlay(
            &four_names(),
            &signals,
            0.2,
            BudgetWeighting::Equal,
            &OverlayParams::default(),
        );
        assert!((out.weights.get("A") - 0.3).abs() < 1e-12);
        assert!((out.weights.get("B") - 0.3).abs() < 1e-12);
        assert!((out.weights.get("C") - 0.2).abs() < 1e-12);
        assert!((out.funded - 0.2).abs() < 1e-12);
        assert_eq!(out.shortfall, 0.0);

        let capped = OverlayParams {
            max_weight: Some(0.28),
            ..OverlayParams::default()
        };
        let out = apply_budget_overlay(&four_names(), &signals, 0.2, BudgetWeighting::Equal, &capped);
        assert!((out.weights.get("A") - 0.28).abs() < 1e-12);
        assert!((out.weights.get("C") - 0.22).abs() < 1e-12);
        assert!((out.capped_excess - 0.04).abs() < 1e-12);
        assert!((out.weights.gross() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn budget_without_positive_signal_is_identity() {
        let base = four_names();
        let out = apply_budget_overlay(
            &base,
            &tilts(&[("A", -0.01)]),
            0.2,
            BudgetWeighting::Strength,
            &OverlayParams::default(),
        );
        assert_eq!(out.weights, base);
        assert_eq!(out.funded, 0.0);
    }

    #[test]
    fn budget_can_name_an_unheld_instrument() {
        let base = WeightVector::from_pairs([("A", 0.5), ("B", 0.5)]);
        let out = apply_budget_overlay(
            &base,
            &tilts(&[("X", 1.0)]),
            0.1,
            BudgetWeighting::Strength,
            &OverlayParams::default(),
        );
        assert!((out.weights.get("X") - 0.1).abs() < 1e-12);
        assert!((out.weights.get("A") - 0.45).abs() < 1e-12);
    }
}
