// src/session.rs
//
// =============================================================================
// PREPFLOW: RUN SESSION (v 0.1 )
// =============================================================================
//
// Everything one invocation owns and mutates.
//
// Responsibilities:
// 1. Hold the tip tracker, waste ledger and recorded deck state.
// 2. Persist counters and ledger across repeat cycles.
// 3. Collect run statistics and the transcript.
// 4. Produce the serialisable `RunReport`.
//
// A session is passed `&mut` down the call chain. Nothing in it is shared.

use crate::config::RunConfig;
use crate::consumables::TipTracker;
use crate::core::{LabwareId, ModuleKind, PipetteClass, Route};
use crate::error::ProtocolResult;
use crate::modules::{DeckState, RelocationCause};
use crate::pipeline::stages::StageId;
use crate::policy::RunPolicy;
use crate::transcript::Transcript;
use crate::waste::WasteLedger;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// 1. STATISTICS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelocationRecord {
    pub cycle: u32,
    pub cause: RelocationCause,
    pub route: Route,
    /// Stage the move belongs to (or was inserted before).
    pub stage: Option<StageId>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    pub cycles_completed: u32,
    pub relocations: Vec<RelocationRecord>,
    pub stages_run: Vec<StageId>,
    pub stages_skipped: Vec<StageId>,
    pub transfers: u32,
    #[serde(skip)]
    pub waited: Duration,
}

impl RunStats {
    pub fn relocations_by(&self, cause: RelocationCause) -> usize {
        self.relocations.iter().filter(|r| r.cause == cause).count()
    }

    pub fn compensations(&self) -> Vec<&RelocationRecord> {
        self.relocations
            .iter()
            .filter(|r| r.cause == RelocationCause::Compensating)
            .collect()
    }
}

// ============================================================================
// 2. THE SESSION
// ============================================================================

pub struct Session {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub tips: TipTracker,
    pub waste: WasteLedger,
    pub deck: DeckState,
    pub stats: RunStats,
    pub transcript: Transcript,
    /// Cycle being executed, 1-based. 0 before the first.
    pub cycle: u32,
}

impl Session {
    pub fn new(cfg: &RunConfig, policy: &RunPolicy) -> ProtocolResult<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            tips: TipTracker::from_config(cfg, policy),
            waste: WasteLedger::from_config(cfg)?,
            deck: DeckState::home(),
            stats: RunStats::default(),
            transcript: Transcript::default(),
            cycle: 0,
        })
    }

    pub fn record_relocation(&mut self, cause: RelocationCause, route: Route, stage: Option<StageId>) {
        self.stats.relocations.push(RelocationRecord {
            cycle: self.cycle,
            cause,
            route,
            stage,
        });
    }

    pub fn report(&self) -> RunReport {
        let tips = [PipetteClass::Tip50, PipetteClass::Tip200]
            .into_iter()
            .map(|class| {
                let pool = self.tips.pool(class);
                TipUsage {
                    class,
                    consumed: pool.total_consumed(),
                    racks_exhausted: pool.racks_exhausted(),
                    in_current_racks: pool.used(),
                }
            })
            .collect();

        RunReport {
            session_id: self.id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            cycles_completed: self.stats.cycles_completed,
            rack_resets: self.tips.resets(),
            tips,
            waste_total_ul: self.waste.cumulative().0,
            waste_site: self.waste.active_site().well.well.clone(),
            waste_switches: self.waste.switches(),
            relocations: RelocationCounts {
                stage: self.stats.relocations_by(RelocationCause::Stage),
                compensating: self.stats.relocations_by(RelocationCause::Compensating),
                resync: self.stats.relocations_by(RelocationCause::Resync),
            },
            stages_run: self.stats.stages_run.len(),
            stages_skipped: self.stats.stages_skipped.clone(),
            transfers: self.stats.transfers,
            waited_secs: self.stats.waited.as_secs_f64(),
            sample_plate_on: self.deck.location(LabwareId::SamplePlate),
            transcript: self.transcript.lines(),
        }
    }
}

// ============================================================================
// 3. THE REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct TipUsage {
    pub class: PipetteClass,
    pub consumed: u32,
    pub racks_exhausted: u32,
    pub in_current_racks: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RelocationCounts {
    pub stage: usize,
    pub compensating: usize,
    pub resync: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cycles_completed: u32,
    pub rack_resets: u32,
    pub tips: Vec<TipUsage>,
    pub waste_total_ul: f64,
    /// Reservoir well currently receiving waste.
    pub waste_site: String,
    pub waste_switches: u32,
    pub relocations: RelocationCounts,
    /// Stage executions over all cycles.
    pub stages_run: usize,
    pub stages_skipped: Vec<StageId>,
    pub transfers: u32,
    pub waited_secs: f64,
    pub sample_plate_on: Option<ModuleKind>,
    pub transcript: Vec<String>,
}

impl RunReport {
    pub fn tip_usage(&self, class: PipetteClass) -> Option<&TipUsage> {
        self.tips.iter().find(|t| t.class == class)
    }
}
