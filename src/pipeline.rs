// src/pipeline.rs
//
// =============================================================================
// PREPFLOW: STAGE PIPELINE CONTROLLER (v 0.1 )
// =============================================================================
//
// The Conductor.
//
// Responsibilities:
// 1. Plan: walk the enabled stages, predict where the plate will be, and
//    insert a compensating relocation wherever a skipped stage would have
//    moved it. Reject plans that would strand the plate.
// 2. Execute: repeat cycles, cycle-top resync, stage bodies, shutdown.
// 3. Route every operation through the shared helpers (tip `acquire`,
//    `record_waste`, `relocate`) so run-mode flags never fork stage bodies.
//
// Execution is strictly sequential. Any fatal error halts the run where it
// happens; nothing is rolled back.

use crate::config::{OffsetTable, RunConfig};
use crate::consumables::{FixedTip, RackHooks, TipLease};
use crate::core::{LabwareId, LatchState, ModuleKind, Route, TipRelease};
use crate::drivers::{DeckDrivers, TransferRequest};
use crate::error::{ProtocolError, ProtocolResult};
use crate::modules::{ModuleCoordinator, RelocationCause, ThermalCommand};
use crate::policy::RunPolicy;
use crate::reagents::ReagentEstimate;
use crate::session::{RunReport, Session};

use serde::Serialize;

pub mod stages;

use stages::{Operation, Stage, StageId, Target, TipSharing, TransferStep};

// ============================================================================
// 1. THE PLAN
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedStage {
    pub id: StageId,
    pub enabled: bool,
    pub requires: ModuleKind,
    /// Move inserted before the stage because of skipped predecessors.
    pub compensation: Option<Route>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunPlan {
    pub stages: Vec<PlannedStage>,
    /// Where the last enabled stage leaves the plate.
    pub ends_on: ModuleKind,
    /// Move back to the cycler at the top of every later cycle.
    pub resync: Option<Route>,
}

impl RunPlan {
    pub fn compensations(&self) -> Vec<(StageId, Route)> {
        self.stages
            .iter()
            .filter_map(|s| s.compensation.map(|r| (s.id, r)))
            .collect()
    }
}

fn ensure_route(cfg: &RunConfig, from: ModuleKind, to: ModuleKind, why: &str) -> ProtocolResult<()> {
    if cfg.route_permitted(from, to) {
        Ok(())
    } else {
        Err(ProtocolError::config(format!(
            "{why} needs the route {} but the gripper has no such route; the plate would be stranded",
            Route::new(from, to)
        )))
    }
}

/// Pure walk over the stage list. No drivers involved.
pub fn plan_stages(stages: &[Stage], cfg: &RunConfig) -> ProtocolResult<RunPlan> {
    let home = ModuleKind::ThermalCycler;
    let mut at = home;
    let mut planned = Vec::with_capacity(stages.len());

    for stage in stages {
        if !stage.enabled {
            planned.push(PlannedStage {
                id: stage.id,
                enabled: false,
                requires: stage.requires,
                compensation: None,
            });
            continue;
        }

        let compensation = (at != stage.requires).then(|| Route::new(at, stage.requires));
        if let Some(route) = compensation {
            ensure_route(cfg, route.from, route.to, &format!("resuming at {}", stage.id))?;
        }
        for (from, to) in stage.routes() {
            ensure_route(cfg, from, to, stage.id.name())?;
        }

        planned.push(PlannedStage {
            id: stage.id,
            enabled: true,
            requires: stage.requires,
            compensation,
        });
        at = stage.final_location();
    }

    let resync = (at != home).then(|| Route::new(at, home));
    if let (Some(route), true) = (resync, cfg.repeat_cycles > 1) {
        ensure_route(cfg, route.from, route.to, "returning to the home layout")?;
    }

    Ok(RunPlan {
        stages: planned,
        ends_on: at,
        resync,
    })
}

// ============================================================================
// 2. THE CONTROLLER
// ============================================================================

pub struct PipelineController {
    config: RunConfig,
    policy: RunPolicy,
    offsets: OffsetTable,
    stages: Vec<Stage>,
    plan: RunPlan,
}

impl PipelineController {
    /// Validates and plans. Every configuration error surfaces here.
    pub fn new(config: RunConfig) -> ProtocolResult<Self> {
        config.validate()?;
        let stages = stages::build(&config);
        let plan = plan_stages(&stages, &config)?;
        Ok(Self {
            policy: RunPolicy::from_config(&config),
            offsets: config.offsets_in_effect(),
            config,
            stages,
            plan,
        })
    }

    pub fn plan(&self) -> &RunPlan {
        &self.plan
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn policy(&self) -> &RunPolicy {
        &self.policy
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn new_session(&self) -> ProtocolResult<Session> {
        Session::new(&self.config, &self.policy)
    }

    pub async fn run(&self, session: &mut Session, drivers: &DeckDrivers) -> ProtocolResult<()> {
        let coord = ModuleCoordinator::new(drivers, &self.policy, &self.offsets);

        session.transcript.comment(if self.policy.simulate {
            "THIS IS A DRY RUN"
        } else {
            "THIS IS A REACTION RUN"
        });
        session.transcript.comment(match self.policy.tip_release {
            TipRelease::Trash => "USED TIPS WILL GO IN TRASH",
            TipRelease::ReturnToRack => "USED TIPS WILL BE RE-RACKED",
        });
        ReagentEstimate::for_config(&self.config).log();

        for cycle in 1..=self.config.repeat_cycles {
            session.cycle = cycle;
            log::info!("🔁 cycle {}/{}", cycle, self.config.repeat_cycles);

            self.cycle_top(&coord, session, drivers).await?;
            for stage in &self.stages {
                self.run_stage(stage, &coord, session, drivers).await?;
            }
            self.cycle_end(&coord, session).await?;

            session.stats.cycles_completed += 1;
        }

        log::info!(
            "✅ run complete: {} cycle(s), {} rack reset(s), {} waste",
            session.stats.cycles_completed,
            session.tips.resets(),
            session.waste.cumulative()
        );
        Ok(())
    }

    // --- Cycle boundaries ---

    async fn cycle_top(
        &self,
        coord: &ModuleCoordinator<'_>,
        session: &mut Session,
        drivers: &DeckDrivers,
    ) -> ProtocolResult<()> {
        if let Some(route) = coord.resync_cycle(&mut session.deck).await? {
            session.record_relocation(RelocationCause::Resync, route, None);
        }

        let prompt = "Ready";
        drivers
            .operator
            .confirm(prompt)
            .await
            .map_err(|e| ProtocolError::Operator {
                prompt: prompt.into(),
                reason: format!("{e:#}"),
            })?;

        coord
            .set_latch(&mut session.deck, ModuleKind::HeaterShaker, LatchState::Closed)
            .await
    }

    async fn cycle_end(&self, coord: &ModuleCoordinator<'_>, session: &mut Session) -> ProtocolResult<()> {
        if session.deck.module(ModuleKind::HeaterShaker).shaking.is_some() {
            coord.stop_shake(&mut session.deck).await?;
        }
        coord
            .set_latch(&mut session.deck, ModuleKind::HeaterShaker, LatchState::Open)
            .await?;
        if self.config.deactivate_modules_on_finish {
            coord.deactivate_all(&mut session.deck).await?;
        }
        Ok(())
    }

    // --- Stages ---

    async fn run_stage(
        &self,
        stage: &Stage,
        coord: &ModuleCoordinator<'_>,
        session: &mut Session,
        drivers: &DeckDrivers,
    ) -> ProtocolResult<()> {
        if !stage.enabled {
            log::info!("⏭️  {} skipped", stage.id);
            session.stats.stages_skipped.push(stage.id);
            return Ok(());
        }

        let plate = LabwareId::SamplePlate;
        match session.deck.location(plate) {
            Some(at) if at == stage.requires => {}
            Some(at) => {
                log::info!("↪️  {} resumes on {}: compensating move", stage.id, stage.requires);
                self.relocate(coord, session, at, stage.requires, RelocationCause::Compensating, stage.id)
                    .await?;
            }
            None => return Err(ProtocolError::consistency(plate, stage.requires, None)),
        }

        session.transcript.comment("==============================================");
        session.transcript.comment(format!("--> {}", stage.id));
        session.transcript.comment("==============================================");

        for op in &stage.operations {
            self.execute(op, stage.id, coord, session, drivers).await?;
        }
        session.stats.stages_run.push(stage.id);
        Ok(())
    }

    async fn execute(
        &self,
        op: &Operation,
        stage: StageId,
        coord: &ModuleCoordinator<'_>,
        session: &mut Session,
        drivers: &DeckDrivers,
    ) -> ProtocolResult<()> {
        let tc = ModuleKind::ThermalCycler;
        match op {
            Operation::Comment(text) => session.transcript.comment(text),
            Operation::Transfer(step) => self.transfer(step, session, drivers).await?,
            Operation::Relocate { to } => {
                let plate = LabwareId::SamplePlate;
                let from = session
                    .deck
                    .location(plate)
                    .ok_or_else(|| ProtocolError::consistency(plate, *to, None))?;
                self.relocate(coord, session, from, *to, RelocationCause::Stage, stage)
                    .await?;
            }
            Operation::Shake { rpm, duration } => {
                let waited = coord.shake(&mut session.deck, *rpm, *duration).await?;
                session.stats.waited += waited;
            }
            Operation::Settle { duration } => {
                session.stats.waited += coord.settle(*duration).await;
            }
            Operation::Delay { duration } => {
                session.stats.waited += coord.wait(*duration).await;
            }
            Operation::Lid(state) => coord.set_latch(&mut session.deck, tc, *state).await?,
            Operation::Profile(profile) => {
                coord
                    .set_thermal_state(&mut session.deck, tc, ThermalCommand::Profile(profile.clone()))
                    .await?
            }
            Operation::Hold { zone, target } => {
                coord
                    .set_thermal_state(
                        &mut session.deck,
                        tc,
                        ThermalCommand::Hold {
                            zone: *zone,
                            target: *target,
                        },
                    )
                    .await?
            }
        }
        Ok(())
    }

    async fn relocate(
        &self,
        coord: &ModuleCoordinator<'_>,
        session: &mut Session,
        from: ModuleKind,
        to: ModuleKind,
        cause: RelocationCause,
        stage: StageId,
    ) -> ProtocolResult<()> {
        let plate = LabwareId::SamplePlate;
        let offsets = coord.route_offsets(plate, from, to);
        coord
            .relocate(&mut session.deck, plate, from, to, offsets)
            .await?;
        session.record_relocation(cause, Route::new(from, to), Some(stage));
        Ok(())
    }

    // --- Liquid handling ---

    async fn transfer(
        &self,
        step: &TransferStep,
        session: &mut Session,
        drivers: &DeckDrivers,
    ) -> ProtocolResult<()> {
        let columns = usize::from(self.config.column_count);
        let fixed = step
            .tips
            .fixed
            .filter(|f| self.policy.reuse_fixed_tips && f.class() == step.pipette);

        match step.tips.sharing {
            TipSharing::Shared => {
                let lease = self.mount(step, fixed, session, drivers).await?;
                for col in 0..columns {
                    self.dispense(step, col, session, drivers).await?;
                }
                self.unmount(lease, session, drivers).await?;
            }
            TipSharing::PerColumn => {
                for col in 0..columns {
                    let lease = self
                        .mount(step, fixed.map(|f| f.for_column(col)), session, drivers)
                        .await?;
                    self.dispense(step, col, session, drivers).await?;
                    self.unmount(lease, session, drivers).await?;
                }
            }
        }
        Ok(())
    }

    async fn mount(
        &self,
        step: &TransferStep,
        fixed: Option<FixedTip>,
        session: &mut Session,
        drivers: &DeckDrivers,
    ) -> ProtocolResult<TipLease> {
        if let Some(tip) = fixed {
            session.tips.engage_fixed(tip);
        }
        let hooks = RackHooks {
            operator: drivers.operator.as_ref(),
            liquid: drivers.liquid.as_ref(),
        };
        let lease = session.tips.acquire(step.pipette, &hooks).await?;
        drivers
            .liquid
            .pick_up_tip(lease.class, lease.slot)
            .await
            .map_err(|e| transfer_error(step, e))?;
        Ok(lease)
    }

    async fn unmount(
        &self,
        lease: TipLease,
        session: &mut Session,
        drivers: &DeckDrivers,
    ) -> ProtocolResult<()> {
        // Fixed tips always go back to their slot
        let release = if lease.fixed {
            TipRelease::ReturnToRack
        } else {
            self.policy.tip_release
        };
        drivers
            .liquid
            .release_tip(lease.class, release)
            .await
            .map_err(|e| ProtocolError::Transfer {
                step: format!("releasing {} tip", lease.class),
                reason: format!("{e:#}"),
            })?;
        if lease.fixed {
            session.tips.release_fixed(lease.class);
        }
        Ok(())
    }

    async fn dispense(
        &self,
        step: &TransferStep,
        col: usize,
        session: &mut Session,
        drivers: &DeckDrivers,
    ) -> ProtocolResult<()> {
        let missing = || ProtocolError::Transfer {
            step: step.label.clone(),
            reason: format!("no well for sample column {}", col + 1),
        };
        let source = step.source.well(col).ok_or_else(missing)?.clone();
        let dest = match &step.target {
            Target::Wells(set) => Some(set.well(col).ok_or_else(missing)?.clone()),
            Target::Waste => Some(session.waste.record_waste(step.volume)?.well.clone()),
            Target::Discard => None,
        };

        let request = TransferRequest {
            step: step.label.clone(),
            pipette: step.pipette,
            source,
            dest,
            volume: step.volume,
            premix: step.premix.map(|m| self.policy.mix(m.spec, m.shortenable)),
            mix: step.mix.map(|m| self.policy.mix(m.spec, m.shortenable)),
            touch_tip: step.touch_tip,
        };
        drivers
            .liquid
            .transfer(&request)
            .await
            .map_err(|e| transfer_error(step, e))?;
        session.stats.transfers += 1;
        Ok(())
    }
}

fn transfer_error(step: &TransferStep, e: anyhow::Error) -> ProtocolError {
    ProtocolError::Transfer {
        step: step.label.clone(),
        reason: format!("{e:#}"),
    }
}

// ============================================================================
// 3. ENTRY POINT
// ============================================================================

/// Validates, plans and executes a whole run against one set of drivers.
pub async fn run(config: RunConfig, drivers: DeckDrivers) -> ProtocolResult<RunReport> {
    let controller = PipelineController::new(config)?;
    let mut session = controller.new_session()?;
    controller.run(&mut session, &drivers).await?;
    Ok(session.report())
}
