// src/drivers/simulated.rs
//
// =============================================================================
// PREPFLOW: SIMULATED DECK (v 0.1 )
// =============================================================================
//
// The Glass Deck.
//
// Responsibilities:
// 1. Implement every hardware port without hardware.
// 2. Record each acknowledged command in order (the deck journal).
// 3. Enforce the physical interlocks a real deck would refuse to violate
//    (closed latch, closed lid, double tip pick-up, shaking an open latch).
// 4. Advance a shared `VirtualClock` by the nominal length of every profile.
// 5. Inject failures on demand for tests.

use crate::core::{
    LabwareId, LatchState, ModuleKind, PipetteClass, ThermalProfile, TipRelease, TipSlot,
};
use crate::drivers::{
    LiquidHandler, ModuleCommand, ModuleDriver, ThermalRunner, TransferRequest, VirtualClock,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

// ============================================================================
// 1. THE JOURNAL
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum DeckEvent {
    TipPickUp {
        class: PipetteClass,
        slot: TipSlot,
    },
    TipRelease {
        class: PipetteClass,
        release: TipRelease,
    },
    RackReset(PipetteClass),
    Transfer(TransferRequest),
    Profile {
        module: ModuleKind,
        name: String,
        nominal: Duration,
    },
    Module(ModuleCommand),
}

impl DeckEvent {
    pub fn is_move(&self) -> bool {
        matches!(self, DeckEvent::Module(ModuleCommand::MoveLabware { .. }))
    }
}

struct SimState {
    journal: Vec<DeckEvent>,

    // Physical state as the deck sees it
    latch: LatchState,
    lid: LatchState,
    shaking: bool,
    mounted: HashMap<PipetteClass, TipSlot>,
    positions: HashMap<LabwareId, ModuleKind>,

    // Failure injection
    failing_steps: HashSet<String>,
    failing_profiles: bool,
}

impl Default for SimState {
    fn default() -> Self {
        let mut positions = HashMap::new();
        positions.insert(LabwareId::SamplePlate, ModuleKind::ThermalCycler);
        positions.insert(LabwareId::ReagentPlate, ModuleKind::TemperatureBlock);

        Self {
            journal: Vec::new(),
            latch: LatchState::Closed,
            lid: LatchState::Closed,
            shaking: false,
            mounted: HashMap::new(),
            positions,
            failing_steps: HashSet::new(),
            failing_profiles: false,
        }
    }
}

// ============================================================================
// 2. THE DECK
// ============================================================================

#[derive(Clone, Default)]
pub struct SimulatedDeck {
    state: Arc<Mutex<SimState>>,
    clock: VirtualClock,
}

impl SimulatedDeck {
    pub fn new(clock: VirtualClock) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::default())),
            clock,
        }
    }

    pub fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    /// Snapshot of every acknowledged command, oldest first.
    pub fn journal(&self) -> Vec<DeckEvent> {
        self.lock().journal.clone()
    }

    pub fn count(&self, pred: impl Fn(&DeckEvent) -> bool) -> usize {
        self.lock().journal.iter().filter(|e| pred(e)).count()
    }

    /// Where the deck physically holds a labware item.
    pub fn position_of(&self, labware: LabwareId) -> Option<ModuleKind> {
        self.lock().positions.get(&labware).copied()
    }

    /// Makes every transfer carrying this step label fail.
    pub fn fail_transfer(&self, step: impl Into<String>) {
        self.lock().failing_steps.insert(step.into());
    }

    pub fn fail_profiles(&self) {
        self.lock().failing_profiles = true;
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// 3. PORT IMPLEMENTATIONS
// ============================================================================

#[async_trait]
impl LiquidHandler for SimulatedDeck {
    async fn pick_up_tip(&self, class: PipetteClass, slot: TipSlot) -> Result<()> {
        let mut st = self.lock();
        if let Some(current) = st.mounted.get(&class) {
            return Err(anyhow!("{} already carries a tip from {}", class, current));
        }
        st.mounted.insert(class, slot);
        st.journal.push(DeckEvent::TipPickUp { class, slot });
        Ok(())
    }

    async fn transfer(&self, request: &TransferRequest) -> Result<()> {
        let mut st = self.lock();
        if !st.mounted.contains_key(&request.pipette) {
            return Err(anyhow!("{} has no tip mounted", request.pipette));
        }
        if st.failing_steps.contains(&request.step) {
            return Err(anyhow!("simulated liquid-handling fault"));
        }
        st.journal.push(DeckEvent::Transfer(request.clone()));
        Ok(())
    }

    async fn release_tip(&self, class: PipetteClass, release: TipRelease) -> Result<()> {
        let mut st = self.lock();
        if st.mounted.remove(&class).is_none() {
            return Err(anyhow!("{} has no tip to release", class));
        }
        st.journal.push(DeckEvent::TipRelease { class, release });
        Ok(())
    }

    async fn reset_tipracks(&self, class: PipetteClass) -> Result<()> {
        self.lock().journal.push(DeckEvent::RackReset(class));
        Ok(())
    }
}

#[async_trait]
impl ThermalRunner for SimulatedDeck {
    async fn run_profile(&self, module: ModuleKind, profile: &ThermalProfile) -> Result<()> {
        {
            let st = self.lock();
            if st.failing_profiles {
                return Err(anyhow!("simulated block fault"));
            }
            if module == ModuleKind::ThermalCycler && st.lid == LatchState::Open {
                return Err(anyhow!("profile requested with the lid open"));
            }
        }

        // Hold every step for its nominal duration
        let nominal = profile.nominal_duration();
        self.clock.advance(nominal);

        self.lock().journal.push(DeckEvent::Profile {
            module,
            name: profile.name.clone(),
            nominal,
        });
        Ok(())
    }
}

#[async_trait]
impl ModuleDriver for SimulatedDeck {
    async fn apply(&self, command: &ModuleCommand) -> Result<()> {
        let mut st = self.lock();

        match command {
            ModuleCommand::SetLatch { module, state } => match module {
                ModuleKind::HeaterShaker => {
                    if st.shaking && *state == LatchState::Open {
                        return Err(anyhow!("cannot open the latch while shaking"));
                    }
                    st.latch = *state;
                }
                ModuleKind::ThermalCycler => st.lid = *state,
                other => return Err(anyhow!("{} has no latch", other)),
            },
            ModuleCommand::StartShake { .. } => {
                if st.latch == LatchState::Open {
                    return Err(anyhow!("cannot shake with the latch open"));
                }
                st.shaking = true;
            }
            ModuleCommand::StopShake => st.shaking = false,
            ModuleCommand::MoveLabware {
                labware, from, to, ..
            } => {
                for end in [from, to] {
                    if end.has_latch() && st.latch == LatchState::Closed {
                        return Err(anyhow!("{} latch is closed", end));
                    }
                    if end.has_lid() && st.lid == LatchState::Closed {
                        return Err(anyhow!("{} lid is closed", end));
                    }
                }
                match st.positions.get(labware) {
                    Some(at) if at == from => {}
                    other => {
                        return Err(anyhow!(
                            "gripper found no {} on {} (deck has it on {:?})",
                            labware,
                            from,
                            other
                        ))
                    }
                }
                st.positions.insert(*labware, *to);
            }
            ModuleCommand::SetTemperature { .. } | ModuleCommand::Deactivate { .. } => {}
        }

        st.journal.push(DeckEvent::Module(command.clone()));
        Ok(())
    }
}
