// src/modules.rs
//
// =============================================================================
// PREPFLOW: MODULE STATE COORDINATOR (v 0.1 )
// =============================================================================
//
// The Deck State Machine.
//
// Responsibilities:
// 1. Track each module's thermal zones, latch/lid and shaker as acknowledged.
// 2. Track which module holds each labware item (exactly one holder).
// 3. Gate every relocation on the latch and lid of both ends.
// 4. Pair every shake with a stop, whatever happens in between.
// 5. Apply the run policy to holds, profiles and waits.
//
// Recorded state is only written after the driver returned `Ok`.

use crate::config::OffsetTable;
use crate::core::{
    Celsius, LabwareId, LatchState, ModuleKind, OffsetPair, Route, Rpm, ThermalProfile,
    ThermalZone,
};
use crate::drivers::{DeckDrivers, ModuleCommand};
use crate::error::{ProtocolError, ProtocolResult};
use crate::policy::RunPolicy;

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

// ============================================================================
// 1. RECORDED STATE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum ThermalState {
    Idle,
    AtSetpoint(Celsius),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleState {
    pub block: ThermalState,
    /// Heated lid of the thermal cycler.
    pub lid_zone: ThermalState,
    /// Labware latch (heater-shaker) or motorized lid (thermal cycler).
    pub latch: Option<LatchState>,
    pub shaking: Option<Rpm>,
}

impl ModuleState {
    fn new(kind: ModuleKind) -> Self {
        Self {
            block: ThermalState::Idle,
            lid_zone: ThermalState::Idle,
            latch: (kind.has_latch() || kind.has_lid()).then_some(LatchState::Closed),
            shaking: None,
        }
    }

    fn zone_mut(&mut self, zone: ThermalZone) -> &mut ThermalState {
        match zone {
            ThermalZone::Block => &mut self.block,
            ThermalZone::Lid => &mut self.lid_zone,
        }
    }
}

/// What the run believes the deck looks like.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeckState {
    modules: BTreeMap<ModuleKind, ModuleState>,
    locations: BTreeMap<LabwareId, ModuleKind>,
}

impl Default for DeckState {
    fn default() -> Self {
        Self::home()
    }
}

impl DeckState {
    /// Power-on layout: sample plate in the cycler, reagents on the cold block.
    pub fn home() -> Self {
        let modules = ModuleKind::ALL
            .iter()
            .map(|k| (*k, ModuleState::new(*k)))
            .collect();
        let mut locations = BTreeMap::new();
        locations.insert(LabwareId::SamplePlate, ModuleKind::ThermalCycler);
        locations.insert(LabwareId::ReagentPlate, ModuleKind::TemperatureBlock);
        Self { modules, locations }
    }

    pub fn location(&self, labware: LabwareId) -> Option<ModuleKind> {
        self.locations.get(&labware).copied()
    }

    pub fn module(&self, kind: ModuleKind) -> &ModuleState {
        // Every kind is inserted by `home`
        &self.modules[&kind]
    }

    fn module_mut(&mut self, kind: ModuleKind) -> &mut ModuleState {
        self.modules
            .entry(kind)
            .or_insert_with(|| ModuleState::new(kind))
    }
}

// ============================================================================
// 2. COMMANDS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ThermalCommand {
    Hold { zone: ThermalZone, target: Celsius },
    Profile(ThermalProfile),
    Deactivate { zone: ThermalZone },
}

/// Why a relocation happened. Reported per cause at the end of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelocationCause {
    /// Part of an enabled stage's own body.
    Stage,
    /// Inserted because a skipped stage would have moved the labware.
    Compensating,
    /// Return to the home layout at the top of a cycle.
    Resync,
}

// ============================================================================
// 3. THE COORDINATOR
// ============================================================================

pub struct ModuleCoordinator<'a> {
    drivers: &'a DeckDrivers,
    policy: &'a RunPolicy,
    offsets: &'a OffsetTable,
}

fn hardware(module: ModuleKind) -> impl FnOnce(anyhow::Error) -> ProtocolError {
    move |e| ProtocolError::Hardware {
        module,
        reason: format!("{e:#}"),
    }
}

impl<'a> ModuleCoordinator<'a> {
    pub fn new(drivers: &'a DeckDrivers, policy: &'a RunPolicy, offsets: &'a OffsetTable) -> Self {
        Self {
            drivers,
            policy,
            offsets,
        }
    }

    pub fn policy(&self) -> &RunPolicy {
        self.policy
    }

    async fn apply(&self, command: ModuleCommand) -> ProtocolResult<()> {
        log::debug!("module command: {:?}", command);
        let module = command.module();
        self.drivers
            .modules
            .apply(&command)
            .await
            .map_err(hardware(module))
    }

    // --- Thermal ---

    pub async fn set_thermal_state(
        &self,
        deck: &mut DeckState,
        module: ModuleKind,
        command: ThermalCommand,
    ) -> ProtocolResult<()> {
        if !module.is_thermal() {
            return Err(ProtocolError::Thermal {
                module,
                reason: "module has no temperature control".into(),
            });
        }
        let zone_ok = |zone: ThermalZone| zone == ThermalZone::Block || module.has_lid();

        match command {
            ThermalCommand::Hold { zone, target } => {
                if !zone_ok(zone) {
                    return Err(ProtocolError::Thermal {
                        module,
                        reason: "no heated lid".into(),
                    });
                }
                if !self.policy.drives_temperature() {
                    log::debug!("dry run: {} {:?} hold at {} skipped", module, zone, target);
                    return Ok(());
                }
                self.apply(ModuleCommand::SetTemperature {
                    module,
                    zone,
                    target,
                })
                .await?;
                *deck.module_mut(module).zone_mut(zone) = ThermalState::AtSetpoint(target);
            }
            ThermalCommand::Profile(profile) => {
                if !self.policy.drives_temperature() {
                    log::info!("🌡️  dry run: skipping profile '{}'", profile.name);
                    return Ok(());
                }
                log::info!(
                    "🌡️  running profile '{}' on {} (~{}s)",
                    profile.name,
                    module,
                    profile.nominal_duration().as_secs()
                );
                self.drivers
                    .thermal
                    .run_profile(module, &profile)
                    .await
                    .map_err(|e| ProtocolError::Thermal {
                        module,
                        reason: format!("{e:#}"),
                    })?;
                if let Some(last) = profile.steps.last() {
                    deck.module_mut(module).block = ThermalState::AtSetpoint(last.temperature);
                }
            }
            ThermalCommand::Deactivate { zone } => {
                if !zone_ok(zone) {
                    return Ok(());
                }
                self.apply(ModuleCommand::Deactivate { module, zone }).await?;
                *deck.module_mut(module).zone_mut(zone) = ThermalState::Idle;
            }
        }
        Ok(())
    }

    // --- Latches & lids ---

    pub async fn set_latch(
        &self,
        deck: &mut DeckState,
        module: ModuleKind,
        state: LatchState,
    ) -> ProtocolResult<()> {
        if deck.module(module).latch.is_none() {
            return Err(ProtocolError::Hardware {
                module,
                reason: "module has no latch or lid".into(),
            });
        }
        self.apply(ModuleCommand::SetLatch { module, state }).await?;
        deck.module_mut(module).latch = Some(state);
        Ok(())
    }

    // --- Relocation ---

    /// Offset pair configured for a route.
    pub fn route_offsets(&self, labware: LabwareId, from: ModuleKind, to: ModuleKind) -> OffsetPair {
        self.offsets.for_route(labware, from, to)
    }

    pub async fn relocate(
        &self,
        deck: &mut DeckState,
        labware: LabwareId,
        from: ModuleKind,
        to: ModuleKind,
        offsets: OffsetPair,
    ) -> ProtocolResult<()> {
        let recorded = deck.location(labware);
        if recorded != Some(from) {
            return Err(ProtocolError::consistency(labware, from, recorded));
        }
        if from == to {
            return Ok(());
        }

        // The cycler lid only has to end up open
        for end in [from, to] {
            if end.has_lid() && deck.module(end).latch != Some(LatchState::Open) {
                self.set_latch(deck, end, LatchState::Open).await?;
            }
        }
        // The heater-shaker latch is cycled around every move
        let latched = [from, to].into_iter().find(ModuleKind::has_latch);
        if let Some(hs) = latched {
            if deck.module(hs).shaking.is_some() {
                self.stop_shake(deck).await?;
            }
            self.set_latch(deck, hs, LatchState::Open).await?;
        }

        if !self.policy.use_gripper {
            let prompt = format!("MOVE {} FROM {} TO {}", labware, from, to);
            self.drivers
                .operator
                .confirm(&prompt)
                .await
                .map_err(|e| ProtocolError::Operator {
                    prompt,
                    reason: format!("{e:#}"),
                })?;
        }

        self.apply(ModuleCommand::MoveLabware {
            labware,
            from,
            to,
            use_gripper: self.policy.use_gripper,
            offsets,
        })
        .await?;
        deck.locations.insert(labware, to);
        log::info!("🦾 {}: {}", labware, Route::new(from, to));

        if let Some(hs) = latched {
            self.set_latch(deck, hs, LatchState::Closed).await?;
        }
        Ok(())
    }

    // --- Shaking ---

    /// Shakes for the policy-adjusted duration. Returns the time waited.
    pub async fn shake(
        &self,
        deck: &mut DeckState,
        rpm: Rpm,
        duration: Duration,
    ) -> ProtocolResult<Duration> {
        let hs = ModuleKind::HeaterShaker;
        if deck.module(hs).latch != Some(LatchState::Closed) {
            self.set_latch(deck, hs, LatchState::Closed).await?;
        }

        let wait = self.policy.shake_duration(duration);
        let shaken = self.start_and_wait(deck, rpm, wait).await;
        let stopped = self.stop_shake(deck).await;

        shaken?;
        stopped?;
        Ok(wait)
    }

    async fn start_and_wait(
        &self,
        deck: &mut DeckState,
        rpm: Rpm,
        wait: Duration,
    ) -> ProtocolResult<()> {
        self.apply(ModuleCommand::StartShake { rpm }).await?;
        deck.module_mut(ModuleKind::HeaterShaker).shaking = Some(rpm);
        log::debug!("shaking at {} for {:?}", rpm, wait);
        self.drivers.clock.sleep(wait).await;
        Ok(())
    }

    pub async fn stop_shake(&self, deck: &mut DeckState) -> ProtocolResult<()> {
        self.apply(ModuleCommand::StopShake).await?;
        deck.module_mut(ModuleKind::HeaterShaker).shaking = None;
        Ok(())
    }

    // --- Waits ---

    /// Unconditional wait.
    pub async fn wait(&self, duration: Duration) -> Duration {
        self.drivers.clock.sleep(duration).await;
        duration
    }

    /// Magnet/bench settling. Elided entirely in dry runs.
    pub async fn settle(&self, nominal: Duration) -> Duration {
        match self.policy.settle(nominal) {
            Some(d) => self.wait(d).await,
            None => {
                log::debug!("dry run: settle of {:?} skipped", nominal);
                Duration::ZERO
            }
        }
    }

    // --- Cycle boundaries ---

    /// Back to the home layout: shaker off, plate in the cycler, lid and
    /// latch open, cold holds applied. Returns the route if the plate moved.
    pub async fn resync_cycle(&self, deck: &mut DeckState) -> ProtocolResult<Option<Route>> {
        let tc = ModuleKind::ThermalCycler;
        let hs = ModuleKind::HeaterShaker;
        let plate = LabwareId::SamplePlate;

        if deck.module(hs).shaking.is_some() {
            self.stop_shake(deck).await?;
        }

        let moved = match deck.location(plate) {
            Some(at) if at == tc => None,
            Some(at) => {
                let offsets = self.route_offsets(plate, at, tc);
                self.relocate(deck, plate, at, tc, offsets).await?;
                Some(Route::new(at, tc))
            }
            None => return Err(ProtocolError::consistency(plate, tc, None)),
        };

        self.set_latch(deck, tc, LatchState::Open).await?;
        self.set_latch(deck, hs, LatchState::Open).await?;

        if self.policy.drives_temperature() {
            log::info!("❄️  setting thermal cycler and temperature block");
        }
        let holds = [
            (tc, ThermalZone::Block, 4.0),
            (tc, ThermalZone::Lid, 100.0),
            (ModuleKind::TemperatureBlock, ThermalZone::Block, 4.0),
        ];
        for (module, zone, target) in holds {
            self.set_thermal_state(
                deck,
                module,
                ThermalCommand::Hold {
                    zone,
                    target: Celsius(target),
                },
            )
            .await?;
        }
        Ok(moved)
    }

    /// End-of-cycle shutdown of the thermal zones.
    pub async fn deactivate_all(&self, deck: &mut DeckState) -> ProtocolResult<()> {
        let zones = [
            (ModuleKind::ThermalCycler, ThermalZone::Block),
            (ModuleKind::ThermalCycler, ThermalZone::Lid),
            (ModuleKind::TemperatureBlock, ThermalZone::Block),
        ];
        for (module, zone) in zones {
            self.set_thermal_state(deck, module, ThermalCommand::Deactivate { zone })
                .await?;
        }
        Ok(())
    }
}
