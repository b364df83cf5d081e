// src/waste.rs
//
// =============================================================================
// PREPFLOW: WASTE ROUTER (v 0.1 )
// =============================================================================
//
// Liquid waste goes to reservoir wells, filled one after another.
// The ledger only ever grows, so the active well only ever moves forward.

use crate::config::RunConfig;
use crate::core::{LabwareId, Microliters, WellRef};
use crate::error::{ProtocolError, ProtocolResult};

use serde::Serialize;

/// Reservoir wells used for waste, in fill order.
pub const WASTE_WELLS: [&str; 3] = ["A12", "A11", "A10"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisposalSite {
    /// 1-based position in the fill order.
    pub number: usize,
    pub well: WellRef,
    /// Cumulative volume (uL) at which the next site takes over. `None` = last.
    pub upper_threshold: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WasteLedger {
    sites: Vec<DisposalSite>,
    cumulative: f64,
    active: usize,
    switches: u32,
}

impl WasteLedger {
    pub fn new(wells: &[&str], thresholds: &[f64]) -> ProtocolResult<Self> {
        if wells.is_empty() {
            return Err(ProtocolError::config("no waste wells"));
        }
        if thresholds.len() >= wells.len() {
            return Err(ProtocolError::config(format!(
                "{} thresholds for {} waste wells",
                thresholds.len(),
                wells.len()
            )));
        }
        let mut last = 0.0;
        for &t in thresholds {
            if !t.is_finite() || t <= last {
                return Err(ProtocolError::config(format!(
                    "waste thresholds must be positive and strictly ascending, got {thresholds:?}"
                )));
            }
            last = t;
        }

        // Wells past the last threshold are never reached
        let sites = wells
            .iter()
            .take(thresholds.len() + 1)
            .enumerate()
            .map(|(i, well)| DisposalSite {
                number: i + 1,
                well: WellRef::new(LabwareId::Reservoir, *well),
                upper_threshold: thresholds.get(i).copied(),
            })
            .collect();

        Ok(Self {
            sites,
            cumulative: 0.0,
            active: 0,
            switches: 0,
        })
    }

    pub fn from_config(cfg: &RunConfig) -> ProtocolResult<Self> {
        Self::new(&WASTE_WELLS, &cfg.waste_thresholds)
    }

    /// Adds waste and returns the site it must go to.
    pub fn record_waste(&mut self, volume: Microliters) -> ProtocolResult<&DisposalSite> {
        if !volume.0.is_finite() || volume.0 < 0.0 {
            return Err(ProtocolError::InvalidVolume(volume.0));
        }
        self.cumulative += volume.0;

        let next = self
            .sites
            .iter()
            .position(|s| s.upper_threshold.map_or(true, |t| t > self.cumulative))
            .unwrap_or(self.sites.len() - 1);

        if next != self.active {
            log::info!(
                "🗑️  waste at {}, switching to {}",
                self.cumulative,
                self.sites[next].well
            );
            self.switches += (next - self.active) as u32;
            self.active = next;
        }
        Ok(&self.sites[self.active])
    }

    pub fn active_site(&self) -> &DisposalSite {
        &self.sites[self.active]
    }

    pub fn cumulative(&self) -> Microliters {
        Microliters(self.cumulative)
    }

    pub fn switches(&self) -> u32 {
        self.switches
    }
}
