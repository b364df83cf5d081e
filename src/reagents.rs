// src/reagents.rs
//
// =============================================================================
// PREPFLOW: REAGENT ESTIMATE (v 0.1 )
// =============================================================================
//
// How much of each liquid to load before a run, and where.
// Reservoir troughs carry 10% overage; reagent plate wells carry it per column.

use crate::config::RunConfig;
use crate::core::{LabwareId, Microliters, ReservoirFormat, WellRef};
use crate::pipeline::stages::wells;

use serde::Serialize;

const OVERAGE: f64 = 1.1;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReagentLoad {
    pub name: &'static str,
    pub location: WellRef,
    /// Per well (per row, on a 96-well reservoir).
    pub volume: Microliters,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReagentEstimate {
    pub columns: u8,
    pub reservoir: &'static str,
    /// Wells filled per reservoir trough (one per row on a 96-well plate).
    pub rows_per_trough: usize,
    pub loads: Vec<ReagentLoad>,
}

impl ReagentEstimate {
    pub fn for_config(cfg: &RunConfig) -> Self {
        let cols = f64::from(cfg.column_count);
        let format = cfg.reservoir_format;
        let ul = |total: f64| Microliters(round1(total));
        let res = |w: &str| WellRef::new(LabwareId::Reservoir, w);
        let plate = |w: &str| WellRef::new(LabwareId::ReagentPlate, w);

        let mut loads = vec![
            ReagentLoad {
                name: "AMPure",
                location: res(wells::AMPURE),
                volume: ul(cols * 180.0 * OVERAGE),
            },
            ReagentLoad {
                name: "RSB",
                location: res(wells::RSB),
                volume: ul(cols * 95.0 * OVERAGE),
            },
        ];
        for (i, w) in wells::ETHANOL.iter().enumerate() {
            loads.push(ReagentLoad {
                name: ETHANOL_NAMES[i],
                location: res(*w),
                volume: ul(cols * 900.0 * OVERAGE),
            });
        }
        for (name, well, per_col) in [
            ("FX enzyme", wells::FX_ENZYME, 10.0),
            ("ligation mix", wells::LIGATION_MIX, 45.0),
            ("primer", wells::PRIMER, 5.0),
            ("PCR mix", wells::PCR_MIX, 25.0),
        ] {
            loads.push(ReagentLoad {
                name,
                location: plate(well),
                volume: ul(cols * per_col * OVERAGE),
            });
        }
        loads.push(ReagentLoad {
            name: "sample",
            location: WellRef::new(LabwareId::SamplePlate, "A1"),
            volume: Microliters(40.0),
        });

        Self {
            columns: cfg.column_count,
            reservoir: reservoir_label(format),
            rows_per_trough: format.rows().len(),
            loads,
        }
    }

    pub fn log(&self) {
        log::info!(
            "🧪 reagents for {} column(s) on a {} reservoir:",
            self.columns,
            self.reservoir
        );
        for load in &self.loads {
            log::info!("   {:<14} {:>8}  at {}", load.name, load.volume, load.location);
        }
    }
}

const ETHANOL_NAMES: [&str; 3] = ["ethanol 1", "ethanol 2", "ethanol 3"];

fn reservoir_label(format: ReservoirFormat) -> &'static str {
    match format {
        ReservoirFormat::TwelveWell => "12-well",
        ReservoirFormat::NinetySixWell => "96-well",
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}
