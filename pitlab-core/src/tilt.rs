//! Event tilt book: owns every event and its lifecycle.
//!
//! An event opens on the trading date its trigger maps to and stays active
//! for `horizon` trading dates: active while `open ≤ date < close`, expired
//! from `close` on. Tilts on the same instrument stack additively.
//!
//! With `budget` set, active tilts act as signal strengths and a fixed share
//! of gross is split across their instruments instead.

use crate::domain::{Event, EventId, EventStatus, EventTrigger, WeightVector};
use crate::error::EngineError;
use crate::overlay::{
    apply_budget_overlay, apply_overlay, BudgetWeighting, FundingMode, OverlayOutcome,
    OverlayParams,
};
use chrono::NaiveDate;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TiltConfig {
    /// Magnitude of a strength-1 event.
    pub tilt_per_event: f64,
    /// Active span in trading dates.
    pub horizon: usize,
    /// Per-event magnitude bound.
    pub max_tilt: f64,
    pub funding: FundingMode,
    /// Per-instrument weight cap applied by the overlay.
    pub max_weight: Option<f64>,
    /// Fixed fraction of gross handed to event instruments; per-event tilts when unset.
    pub budget: Option<f64>,
    pub budget_weighting: BudgetWeighting,
}

impl Default for TiltConfig {
    fn default() -> Self {
        Self {
            tilt_per_event: 0.005,
            horizon: 10,
            max_tilt: 0.02,
            funding: FundingMode::Proportional,
            max_weight: None,
            budget: None,
            budget_weighting: BudgetWeighting::Strength,
        }
    }
}

impl TiltConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.horizon == 0 {
            return Err(EngineError::invalid("tilt.horizon must be at least 1"));
        }
        if !self.tilt_per_event.is_finite() {
            return Err(EngineError::invalid("tilt.tilt_per_event must be finite"));
        }
        if !(self.max_tilt >= 0.0 && self.max_tilt.is_finite()) {
            return Err(EngineError::invalid("tilt.max_tilt must be non-negative"));
        }
        if let Some(b) = self.budget {
            if !(0.0..=1.0).contains(&b) {
                return Err(EngineError::invalid("tilt.budget must be in [0, 1]"));
            }
        }
        if let Some(cap) = self.max_weight {
            if !(cap > 0.0) {
                return Err(EngineError::invalid("tilt.max_weight must be positive"));
            }
        }
        Ok(())
    }

    /// Signed magnitude of an event with the given trigger strength.
    pub fn magnitude(&self, strength: f64) -> f64 {
        let strength = if strength.is_finite() { strength } else { 1.0 };
        (self.tilt_per_event * strength).clamp(-self.max_tilt, self.max_tilt)
    }

    pub fn overlay_params(&self, gross_target: f64) -> OverlayParams {
        OverlayParams {
            funding: self.funding,
            max_weight: self.max_weight,
            gross_target: Some(gross_target),
        }
    }

    /// Overlay `tilts` on `baseline` in the configured mode.
    pub fn apply(
        &self,
        baseline: &WeightVector,
        tilts: &BTreeMap<String, f64>,
        gross_target: f64,
    ) -> OverlayOutcome {
        let params = self.overlay_params(gross_target);
        match self.budget {
            Some(budget) => {
                apply_budget_overlay(baseline, tilts, budget, self.budget_weighting, &params)
            }
            None => apply_overlay(baseline, tilts, &params),
        }
    }
}

/// Snapshot of one event for the event ledger output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: EventId,
    pub symbol: String,
    pub open_date: NaiveDate,
    pub close_date: Option<NaiveDate>,
    pub tilt: f64,
    pub status: EventStatus,
    /// Part of the tilt funded on the opening date.
    pub funded_amount: f64,
    /// Part of the tilt that could not be funded on the opening date.
    pub shortfall: f64,
}

#[derive(Debug, Clone)]
pub struct EventTiltBook {
    config: TiltConfig,
    events: Vec<Event>,
    /// Positions in `events` that have not expired.
    live: Vec<usize>,
    funding: HashMap<EventId, (f64, f64)>,
    next_id: u64,
}

impl EventTiltBook {
    pub fn new(config: TiltConfig) -> Self {
        Self {
            config,
            events: Vec::new(),
            live: Vec::new(),
            funding: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn config(&self) -> &TiltConfig {
        &self.config
    }

    /// Create an event opening at calendar index `open_index`.
    pub fn schedule(
        &mut self,
        trigger: &EventTrigger,
        open_index: usize,
        calendar: &[NaiveDate],
    ) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        let close_index = open_index + self.config.horizon;
        let event = Event {
            id,
            symbol: trigger.symbol.clone(),
            open_date: calendar
                .get(open_index)
                .copied()
                .unwrap_or(trigger.trigger_date),
            open_index,
            close_index,
            close_date: calendar.get(close_index).copied(),
            tilt: self.config.magnitude(trigger.strength),
            status: EventStatus::Scheduled,
        };
        debug!(
            "schedule event {:?} {} tilt {:.4} [{}..{})",
            id, event.symbol, event.tilt, open_index, close_index
        );
        self.live.push(self.events.len());
        self.events.push(event);
        id
    }

    /// Expire events whose close index has been reached. Returns how many expired.
    pub fn expire(&mut self, index: usize) -> usize {
        let events = &mut self.events;
        let before = self.live.len();
        self.live.retain(|&i| {
            let ev = &mut events[i];
            if index >= ev.close_index {
                ev.status = EventStatus::Expired;
                false
            } else {
                true
            }
        });
        before - self.live.len()
    }

    /// Promote scheduled events whose window contains `index`.
    pub fn activate(&mut self, index: usize) {
        for &i in &self.live {
            let ev = &mut self.events[i];
            if ev.status == EventStatus::Scheduled && ev.is_active_at(index) {
                ev.status = EventStatus::Active;
            }
        }
    }

    /// Summed tilt per instrument over events active at `index`.
    pub fn active_tilts(&self, index: usize) -> BTreeMap<String, f64> {
        let mut tilts = BTreeMap::new();
        for &i in &self.live {
            let ev = &self.events[i];
            if ev.is_active_at(index) {
                *tilts.entry(ev.symbol.clone()).or_insert(0.0) += ev.tilt;
            }
        }
        tilts
    }

    pub fn active_count(&self, index: usize) -> usize {
        self.live
            .iter()
            .filter(|&&i| self.events[i].is_active_at(index))
            .count()
    }

    /// Attribute the overlay's funding to events that opened at `index`.
    pub fn record_funding(&mut self, index: usize, outcome: &OverlayOutcome) {
        for &i in &self.live {
            let ev = &self.events[i];
            if ev.open_index != index || self.funding.contains_key(&ev.id) {
                continue;
            }
            let funded = ev.tilt * outcome.fill_ratio(&ev.symbol);
            self.funding
                .insert(ev.id, (funded, ev.tilt.abs() - funded.abs()));
        }
    }

    /// Every event seen so far, in creation order.
    pub fn records(&self) -> Vec<EventRecord> {
        self.events
            .iter()
            .map(|ev| {
                let (funded_amount, shortfall) =
                    self.funding.get(&ev.id).copied().unwrap_or((0.0, 0.0));
                EventRecord {
                    id: ev.id,
                    symbol: ev.symbol.clone(),
                    open_date: ev.open_date,
                    close_date: ev.close_date,
                    tilt: ev.tilt,
                    status: ev.status,
                    funded_amount,
                    shortfall,
                }
            })
            .collect()
    }
}
