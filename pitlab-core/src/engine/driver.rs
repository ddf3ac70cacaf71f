//! Backtest driver: one sequential pass over the trading calendar.
//!
//! Per date t:
//! 1. realize the return of t from the weights decided at t−1, scaled by the
//!    leverage decided from data through t−1;
//! 2. expire finished events, open events triggered on t, and close ledger
//!    positions whose exit rules fire on the close of t;
//! 3. on rebalance dates, score with inputs strictly before t, rebuild the
//!    baseline and submit ledger entries;
//! 4. assemble the target: baseline with the tilt overlay, plus the ledger sleeve;
//! 5. charge cost once on `L_t × |w_t − w_{t−1}|`;
//! 6. feed the risk scaler, which yields `L_{t+1}`.

use super::config::EngineConfig;
use super::inputs::MarketData;
use super::state::{DailyRecord, RunDiagnostics, RunOutput};
use crate::cost::{CostModel, LiquiditySnapshot};
use crate::domain::{EventTrigger, PriceTable, WeightVector};
use crate::error::EngineError;
use crate::ledger::{rank_candidates, PositionLedger};
use crate::risk::RiskScaler;
use crate::scoring::{ScoreContext, ScoreError, ScoreMap, Scorer};
use crate::tilt::EventTiltBook;
use chrono::NaiveDate;
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// External stop conditions checked once per date.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    pub deadline: Option<Instant>,
    pub cancel: Option<Arc<AtomicBool>>,
}

impl RunControl {
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn should_stop(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|c| c.load(Ordering::Relaxed))
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Run one backtest to completion.
pub fn run_backtest(
    data: &MarketData,
    scorer: &dyn Scorer,
    config: &EngineConfig,
) -> Result<RunOutput, EngineError> {
    run_backtest_with_control(data, scorer, config, &RunControl::default())
}

/// Run one backtest, stopping with [`EngineError::Cancelled`] when `control` says so.
pub fn run_backtest_with_control(
    data: &MarketData,
    scorer: &dyn Scorer,
    config: &EngineConfig,
    control: &RunControl,
) -> Result<RunOutput, EngineError> {
    config.validate()?;
    let prices = &data.prices;
    let n = prices.len();
    if n == 0 {
        return Err(EngineError::EmptyCalendar);
    }
    let dates = prices.dates();
    let symbols = prices.symbols();

    let mut diagnostics = RunDiagnostics::default();
    let triggers_by_index = bucket_triggers(prices, &data.triggers, &mut diagnostics);

    let mut risk = RiskScaler::new(config.risk.clone());
    let mut ledger = config.ledger.clone().map(PositionLedger::new);
    let mut book = config.tilt.clone().map(EventTiltBook::new);
    let needs_scores = config.baseline.needs_scores() || ledger.is_some();
    let baseline_gross = config.baseline_gross();

    let mut equity = config.initial_capital;
    let mut prev_weights = WeightVector::new();
    let mut baseline_target = WeightVector::new();
    let mut last_close = vec![f64::NAN; symbols.len()];
    let mut daily = Vec::with_capacity(n);

    info!(
        "backtest: {} dates x {} instruments, scorer '{}', {} .. {}",
        n,
        symbols.len(),
        scorer.name(),
        dates[0],
        dates[n - 1]
    );

    for t in 0..n {
        let date = dates[t];
        if control.should_stop() {
            warn!("backtest cancelled at {date}");
            return Err(EngineError::Cancelled { date, index: t });
        }
        let quotes = prices.quotes(t);

        // ── 1. Realize today's return from yesterday's weights ──
        let unlevered = realized_return(&prev_weights, prices, t, &last_close);
        for (s, lc) in last_close.iter_mut().enumerate() {
            if let Some(c) = prices.close_at(s, t) {
                *lc = c;
            }
        }
        let leverage = risk.leverage();
        let regime = risk.regime();
        let gross = leverage * unlevered;
        let equity_mark = equity * (1.0 + gross);

        let universe: Vec<String> = symbols
            .iter()
            .enumerate()
            .filter(|(s, _)| prices.close_at(*s, t).is_some())
            .map(|(_, sym)| sym.clone())
            .collect();
        let liquidity = match config.costs {
            CostModel::Liquidity(_) => LiquiditySnapshot::trailing(
                &prices.history(t),
                symbols.iter().map(String::as_str),
                config.adv_window,
                config.vol_window,
            ),
            _ => LiquiditySnapshot::empty(),
        };

        // ── 2. Event lifecycle and ledger exits ──
        if let Some(book) = book.as_mut() {
            book.expire(t);
            for trigger in &triggers_by_index[t] {
                book.schedule(trigger, t, dates);
            }
            book.activate(t);
        }
        if let Some(ledger) = ledger.as_mut() {
            ledger.evaluate_exits(&quotes, &config.costs, &liquidity);
        }

        // ── 3. Rebalance ──
        let mut rebalanced = false;
        if config.rebalance.is_rebalance_date(dates, t) {
            let scores = if needs_scores {
                let ctx = ScoreContext {
                    date,
                    index: t,
                    universe: &universe,
                    prices: prices.history(t),
                    facts: data.facts.as_of(date.pred_opt().unwrap_or(NaiveDate::MIN)),
                };
                match scorer.score(&ctx) {
                    Ok(scores) => Some(scores),
                    Err(ScoreError::Unavailable(msg)) => {
                        debug!("skip rebalance on {date}: {msg}");
                        diagnostics.skipped_rebalances += 1;
                        None
                    }
                    Err(ScoreError::Fatal(message)) => {
                        return Err(EngineError::Scorer { date, message });
                    }
                }
            } else {
                Some(ScoreMap::new())
            };

            if let Some(scores) = scores {
                baseline_target = config
                    .baseline
                    .build(&universe, Some(&scores), baseline_gross);
                if let Some(ledger) = ledger.as_mut() {
                    let candidates = rank_candidates(&scores, ledger.config());
                    ledger.submit_entries(
                        &candidates,
                        &quotes,
                        equity_mark,
                        &config.costs,
                        &liquidity,
                    );
                }
                diagnostics.rebalance_count += 1;
                rebalanced = true;
            }
        }

        // ── 4. Assemble target weights ──
        // Baseline names without a price today cannot trade and keep their weight.
        let (tradable, frozen) = baseline_target.partition(|s| quotes.has_price(s));
        let mut shortfall = 0.0;
        let sleeve = match book.as_mut() {
            Some(book) => {
                let tilts: BTreeMap<String, f64> = book
                    .active_tilts(t)
                    .into_iter()
                    .filter(|(s, _)| quotes.has_price(s))
                    .collect();
                let outcome = book.config().apply(&tradable, &tilts, tradable.gross());
                book.record_funding(t, &outcome);
                shortfall = outcome.shortfall;
                diagnostics.capped_excess += outcome.capped_excess;
                if shortfall > 0.0 {
                    diagnostics.total_shortfall += shortfall;
                    diagnostics.shortfall_days += 1;
                }
                outcome.weights
            }
            None => tradable,
        };
        let mut target = sleeve.merged(&frozen);
        if let Some(ledger) = &ledger {
            target = target.merged(&ledger.weights());
        }

        // ── 5. Transaction cost on the levered change ──
        let delta = target.delta(&prev_weights);
        let turnover = delta.gross();
        let cost = config
            .costs
            .cost(&delta.scaled(leverage), &liquidity, equity_mark);
        let net = gross - cost;
        equity *= 1.0 + net;

        // ── 6. Risk update → leverage for t+1 ──
        risk.observe(unlevered, net);

        daily.push(DailyRecord {
            date,
            unlevered_return: unlevered,
            leverage,
            gross_return: gross,
            cost,
            turnover,
            net_return: net,
            equity,
            drawdown: risk.drawdown().drawdown,
            regime,
            rebalanced,
            active_events: book.as_ref().map_or(0, |b| b.active_count(t)),
            shortfall,
            weights: target.clone(),
        });
        prev_weights = target;
    }

    diagnostics.risk = risk.diagnostics();
    let (open_positions, trades, rejections) = ledger
        .map(PositionLedger::into_parts)
        .unwrap_or_default();
    diagnostics.rejections = rejections;
    let events = book.map(|b| b.records()).unwrap_or_default();

    info!(
        "backtest done: final equity {:.2}, {} rebalances ({} skipped), {} trades, {} events",
        equity,
        diagnostics.rebalance_count,
        diagnostics.skipped_rebalances,
        trades.len(),
        events.len()
    );

    Ok(RunOutput {
        daily,
        trades,
        events,
        open_positions,
        final_equity: equity,
        diagnostics,
    })
}

/// Σ w_i × (close_t / last valid close − 1); names without a price at t add nothing.
fn realized_return(
    weights: &WeightVector,
    prices: &PriceTable,
    t: usize,
    last_close: &[f64],
) -> f64 {
    weights
        .iter()
        .filter_map(|(sym, w)| {
            let s = prices.symbol_index(sym)?;
            let close = prices.close_at(s, t)?;
            let prev = last_close[s];
            (prev.is_finite() && prev > 0.0).then(|| w * (close / prev - 1.0))
        })
        .sum()
}

/// Map each trigger to the first trading date on or after its date.
///
/// Triggers dated before the first or after the last calendar date are
/// counted and dropped.
fn bucket_triggers(
    prices: &PriceTable,
    triggers: &[EventTrigger],
    diagnostics: &mut RunDiagnostics,
) -> Vec<Vec<EventTrigger>> {
    let mut buckets = vec![Vec::new(); prices.len()];
    let mut unknown = BTreeSet::new();
    let first = prices.dates().first().copied();
    for trigger in triggers {
        if prices.symbol_index(&trigger.symbol).is_none() {
            unknown.insert(trigger.symbol.clone());
            continue;
        }
        if first.map_or(true, |f| trigger.trigger_date < f) {
            diagnostics.triggers_out_of_range += 1;
            continue;
        }
        let t = prices.first_index_on_or_after(trigger.trigger_date);
        match buckets.get_mut(t) {
            Some(bucket) => bucket.push(trigger.clone()),
            None => diagnostics.triggers_out_of_range += 1,
        }
    }
    if !unknown.is_empty() {
        warn!(
            "{} trigger symbols have no prices and were ignored",
            unknown.len()
        );
    }
    diagnostics.unknown_trigger_symbols = unknown.into_iter().collect();
    buckets
}
