// src/core.rs
//
// =============================================================================
// PREPFLOW: CORE SCHEMA AUTHORITY (v 0.1 )
// =============================================================================
//
// The shared vocabulary of the deck.
// Every other module speaks in these types: units, modules, labware, wells,
// tip classes, offsets and thermal profiles.
//
// Design Principles:
// 1. Newtype Pattern: Prevent unit errors (uL vs C vs rpm).
// 2. Closed Enums: The deck layout is fixed, so modules and labware are enums.
// 3. Plain Data: Nothing here talks to hardware.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ============================================================================
// 1. TYPE-SAFE UNITS (The "Newtype" Pattern)
// ============================================================================

/// Liquid volume in microliters (uL).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, PartialOrd, Default)]
pub struct Microliters(pub f64);

/// Temperature in degrees Celsius.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, PartialOrd)]
pub struct Celsius(pub f64);

/// Shaker speed in revolutions per minute.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rpm(pub u32);

impl fmt::Display for Microliters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}uL", self.0)
    }
}

impl fmt::Display for Celsius {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}C", self.0)
    }
}

impl fmt::Display for Rpm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}rpm", self.0)
    }
}

// ============================================================================
// 2. HARDWARE MODULES
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    ThermalCycler,
    HeaterShaker,
    MagneticBlock,
    TemperatureBlock,
}

impl ModuleKind {
    pub const ALL: [ModuleKind; 4] = [
        ModuleKind::ThermalCycler,
        ModuleKind::HeaterShaker,
        ModuleKind::MagneticBlock,
        ModuleKind::TemperatureBlock,
    ];

    /// Labware latch that must be open for the gripper to reach the plate.
    pub fn has_latch(&self) -> bool {
        matches!(self, ModuleKind::HeaterShaker)
    }

    /// Motorized lid that must be open for any move in or out.
    pub fn has_lid(&self) -> bool {
        matches!(self, ModuleKind::ThermalCycler)
    }

    pub fn is_thermal(&self) -> bool {
        matches!(
            self,
            ModuleKind::ThermalCycler | ModuleKind::HeaterShaker | ModuleKind::TemperatureBlock
        )
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModuleKind::ThermalCycler => "thermal cycler",
            ModuleKind::HeaterShaker => "heater-shaker",
            ModuleKind::MagneticBlock => "magnetic block",
            ModuleKind::TemperatureBlock => "temperature block",
        };
        f.write_str(name)
    }
}

/// Open/closed state shared by the heater-shaker latch and the cycler lid.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LatchState {
    Open,
    Closed,
}

/// Thermal cycler has two independently controlled zones.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ThermalZone {
    Block,
    Lid,
}

/// A directed gripper route between two modules.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Route {
    pub from: ModuleKind,
    pub to: ModuleKind,
}

impl Route {
    pub fn new(from: ModuleKind, to: ModuleKind) -> Self {
        Self { from, to }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} --> {}", self.from, self.to)
    }
}

// ============================================================================
// 3. LABWARE & WELLS
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum LabwareId {
    /// The working plate. The only labware that travels between modules.
    SamplePlate,
    /// Enzymes, mixes, primers and barcodes, parked on the temperature block.
    ReagentPlate,
    /// Beads, ethanol, RSB and the liquid waste wells.
    Reservoir,
}

impl fmt::Display for LabwareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LabwareId::SamplePlate => "sample plate",
            LabwareId::ReagentPlate => "reagent plate",
            LabwareId::Reservoir => "reservoir",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WellRef {
    pub labware: LabwareId,
    pub well: String,
}

impl WellRef {
    pub fn new(labware: LabwareId, well: impl Into<String>) -> Self {
        Self {
            labware,
            well: well.into(),
        }
    }
}

impl fmt::Display for WellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.labware, self.well)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ReservoirFormat {
    /// NEST 12 x 15 mL reservoir.
    #[default]
    #[serde(rename = "12-well")]
    TwelveWell,
    /// NEST 96 x 2 mL deep well plate.
    #[serde(rename = "96-well")]
    NinetySixWell,
}

impl ReservoirFormat {
    pub fn labware_name(&self) -> &'static str {
        match self {
            ReservoirFormat::TwelveWell => "nest_12_reservoir_15ml",
            ReservoirFormat::NinetySixWell => "nest_96_wellplate_2ml_deep",
        }
    }

    /// Rows that receive liquid when a reservoir column is loaded.
    pub fn rows(&self) -> &'static [char] {
        match self {
            ReservoirFormat::TwelveWell => &['A'],
            ReservoirFormat::NinetySixWell => &['A', 'B', 'C', 'D', 'E', 'F', 'G', 'H'],
        }
    }
}

// ============================================================================
// 4. PIPETTES & TIPS
// ============================================================================

/// Pipette classes, keyed by the tip volume they mount.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum PipetteClass {
    /// 8-channel 50 uL pipette with 50 uL tips.
    Tip50,
    /// 8-channel 1000 uL pipette with 200 uL tips.
    Tip200,
}

impl fmt::Display for PipetteClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipetteClass::Tip50 => f.write_str("p50"),
            PipetteClass::Tip200 => f.write_str("p200"),
        }
    }
}

/// A column of tips in a rack. Racks and columns are 1-based for display.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TipSlot {
    pub rack: u32,
    pub column: u32,
}

impl TipSlot {
    pub const COLUMNS_PER_RACK: u32 = 12;

    /// Slot for the n-th tip column, counting across racks from zero.
    pub fn from_index(index: u32) -> Self {
        Self {
            rack: index / Self::COLUMNS_PER_RACK + 1,
            column: index % Self::COLUMNS_PER_RACK + 1,
        }
    }
}

impl fmt::Display for TipSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rack {} A{}", self.rack, self.column)
    }
}

/// What happens to a tip once a transfer is done with it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TipRelease {
    Trash,
    ReturnToRack,
}

// ============================================================================
// 5. GRIPPER OFFSETS
// ============================================================================

/// Positional bias in millimeters applied by the gripper.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Offset {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl Offset {
    pub const ZERO: Offset = Offset {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct OffsetPair {
    pub pick_up: Offset,
    pub drop: Offset,
}

// ============================================================================
// 6. THERMAL PROFILES (Opaque Recipes)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThermalStep {
    pub temperature: Celsius,
    pub hold_secs: u64,
}

impl ThermalStep {
    pub fn seconds(temperature: f64, secs: u64) -> Self {
        Self {
            temperature: Celsius(temperature),
            hold_secs: secs,
        }
    }

    pub fn minutes(temperature: f64, mins: u64) -> Self {
        Self::seconds(temperature, mins * 60)
    }

    pub fn hold(&self) -> Duration {
        Duration::from_secs(self.hold_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThermalProfile {
    pub name: String,
    pub steps: Vec<ThermalStep>,
    pub repetitions: u32,
    pub max_volume: Microliters,
}

impl ThermalProfile {
    pub fn new(name: impl Into<String>, steps: Vec<ThermalStep>, repetitions: u32) -> Self {
        Self {
            name: name.into(),
            steps,
            repetitions,
            max_volume: Microliters(50.0),
        }
    }

    /// Total time the block spends holding, across all repetitions.
    pub fn nominal_duration(&self) -> Duration {
        let once: Duration = self.steps.iter().map(ThermalStep::hold).sum();
        once * self.repetitions
    }
}
