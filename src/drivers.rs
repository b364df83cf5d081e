// src/drivers.rs
//
// =============================================================================
// PREPFLOW: DRIVER MODULE & INTERFACE (v 0.1 )
// =============================================================================
//
// The Hexagonal Ports.
//
// Responsibilities:
// 1. Define the contracts to the excluded collaborators (liquid transfer,
//    thermal profiles) and to the deck itself (module commands).
// 2. Define the two suspension seams: operator acknowledgement and clocks.
// 3. Bundle a complete set of drivers for one run (`DeckDrivers`).
//
// Every call is awaited to completion. A driver returning `Ok` means the
// hardware acknowledged the action, not merely that it was requested.

use crate::core::{
    Celsius, LabwareId, LatchState, Microliters, ModuleKind, OffsetPair, PipetteClass, Rpm,
    ThermalProfile, ThermalZone, TipRelease, TipSlot, WellRef,
};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

// Declare the concrete implementations
pub mod operator;
pub mod simulated;

// ============================================================================
// 1. REQUESTS (What crosses the port)
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MixSpec {
    pub repetitions: u32,
    pub volume: Microliters,
}

impl MixSpec {
    pub fn new(repetitions: u32, volume: f64) -> Self {
        Self {
            repetitions,
            volume: Microliters(volume),
        }
    }
}

/// One column-wide transfer with the tip that is currently mounted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferRequest {
    /// Human label of the stage step, used in diagnostics.
    pub step: String,
    pub pipette: PipetteClass,
    pub source: WellRef,
    /// `None` keeps the liquid in the tip; it leaves with the tip.
    pub dest: Option<WellRef>,
    pub volume: Microliters,
    pub premix: Option<MixSpec>,
    pub mix: Option<MixSpec>,
    pub touch_tip: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ModuleCommand {
    SetLatch {
        module: ModuleKind,
        state: LatchState,
    },
    SetTemperature {
        module: ModuleKind,
        zone: ThermalZone,
        target: Celsius,
    },
    Deactivate {
        module: ModuleKind,
        zone: ThermalZone,
    },
    StartShake {
        rpm: Rpm,
    },
    StopShake,
    MoveLabware {
        labware: LabwareId,
        from: ModuleKind,
        to: ModuleKind,
        use_gripper: bool,
        offsets: OffsetPair,
    },
}

impl ModuleCommand {
    /// The module a failure of this command is attributed to.
    pub fn module(&self) -> ModuleKind {
        match self {
            ModuleCommand::SetLatch { module, .. }
            | ModuleCommand::SetTemperature { module, .. }
            | ModuleCommand::Deactivate { module, .. } => *module,
            ModuleCommand::StartShake { .. } | ModuleCommand::StopShake => {
                ModuleKind::HeaterShaker
            }
            ModuleCommand::MoveLabware { to, .. } => *to,
        }
    }
}

// ============================================================================
// 2. THE PORTS (The Contracts)
// ============================================================================

/// The excluded dispensing primitives.
#[async_trait]
pub trait LiquidHandler: Send + Sync {
    async fn pick_up_tip(&self, class: PipetteClass, slot: TipSlot) -> Result<()>;

    /// Aspirate/dispense/mix as the request describes. Opaque to the core.
    async fn transfer(&self, request: &TransferRequest) -> Result<()>;

    async fn release_tip(&self, class: PipetteClass, release: TipRelease) -> Result<()>;

    /// Marks every rack of this class as full again after a re-rack.
    async fn reset_tipracks(&self, class: PipetteClass) -> Result<()>;
}

/// The excluded thermal-profile executor.
#[async_trait]
pub trait ThermalRunner: Send + Sync {
    /// Blocks until every step of every repetition has been held.
    async fn run_profile(&self, module: ModuleKind, profile: &ThermalProfile) -> Result<()>;
}

#[async_trait]
pub trait ModuleDriver: Send + Sync {
    async fn apply(&self, command: &ModuleCommand) -> Result<()>;
}

/// Single acknowledgement channel to the human at the deck.
#[async_trait]
pub trait Operator: Send + Sync {
    /// Returns only once the operator confirmed the prompt.
    async fn confirm(&self, prompt: &str) -> Result<()>;
}

#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

// ============================================================================
// 3. THE BUNDLE (One Per Run)
// ============================================================================

#[derive(Clone)]
pub struct DeckDrivers {
    pub liquid: Arc<dyn LiquidHandler>,
    pub thermal: Arc<dyn ThermalRunner>,
    pub modules: Arc<dyn ModuleDriver>,
    pub operator: Arc<dyn Operator>,
    pub clock: Arc<dyn Clock>,
}

impl DeckDrivers {
    /// Wires every hardware port to one simulated deck sharing its clock.
    pub fn simulated(deck: &simulated::SimulatedDeck, operator: Arc<dyn Operator>) -> Self {
        Self {
            liquid: Arc::new(deck.clone()),
            thermal: Arc::new(deck.clone()),
            modules: Arc::new(deck.clone()),
            operator,
            clock: Arc::new(deck.clock().clone()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

// ============================================================================
// 4. CLOCKS
// ============================================================================

/// Real waits on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Never sleeps; accumulates the time it was asked to wait.
#[derive(Debug, Clone, Default)]
pub struct VirtualClock {
    elapsed: Arc<Mutex<Duration>>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn advance(&self, duration: Duration) {
        let mut elapsed = self.elapsed.lock().unwrap_or_else(PoisonError::into_inner);
        *elapsed += duration;
    }
}

#[async_trait]
impl Clock for VirtualClock {
    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}
