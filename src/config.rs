// src/config.rs
//
// =============================================================================
// PREPFLOW: RUN CONFIGURATION (v 0.1 )
// =============================================================================
//
// The options a run is invoked with.
//
// Responsibilities:
// 1. Typed, defaulted options (YAML file or built in code).
// 2. JSON overrides on top of a loaded file (`--params '{"column_count": 2}'`).
// 3. Static validation, so bad combinations fail before any motion.
// 4. Gripper offsets and permitted routes as configuration data.

use crate::core::{
    LabwareId, ModuleKind, Offset, OffsetPair, PipetteClass, ReservoirFormat, Route, TipSlot,
};
use crate::error::{ProtocolError, ProtocolResult};
use crate::pipeline::stages::StageId;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;

pub const MAX_COLUMNS: u8 = 3;

/// Deck slots left for tip racks once modules, reservoir and trash are placed.
pub const TIP_RACK_SLOTS: u32 = 6;

// ============================================================================
// 1. TOP-LEVEL OPTIONS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Dry run: no temperatures, no profiles, no settling, shortened mixes.
    pub simulate: bool,
    /// `false` turns every relocation into a manual move with a pause.
    pub use_automated_gripper: bool,
    /// `false` returns used tips to their rack slot instead.
    pub dispose_tips_after_use: bool,
    pub deactivate_modules_on_finish: bool,
    /// Sample columns processed in parallel (1-3).
    pub column_count: u8,
    pub fragmentation_minutes: u32,
    pub amplification_cycles: u32,
    /// Zero gripper offsets instead of the calibrated table.
    pub use_default_module_offsets: bool,
    pub repeat_cycles: u32,
    pub reservoir_format: ReservoirFormat,
    pub reuse_fixed_tips: bool,
    /// Nobody at the deck. Implied by stress runs (`repeat_cycles > 1`).
    pub unattended: bool,

    pub stages: StageToggles,
    pub tip_saving: TipSaving,
    pub tip_racks: TipRackLayout,
    /// Upper bounds (uL) of every waste well but the last.
    pub waste_thresholds: Vec<f64>,
    pub offsets: OffsetTable,
    pub permitted_routes: Vec<Route>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            simulate: false,
            use_automated_gripper: true,
            dispose_tips_after_use: true,
            deactivate_modules_on_finish: true,
            column_count: 3,
            fragmentation_minutes: 15,
            amplification_cycles: 6,
            use_default_module_offsets: false,
            repeat_cycles: 1,
            reservoir_format: ReservoirFormat::TwelveWell,
            reuse_fixed_tips: false,
            unattended: false,
            stages: StageToggles::default(),
            tip_saving: TipSaving::default(),
            tip_racks: TipRackLayout::default(),
            waste_thresholds: vec![1500.0, 3000.0],
            offsets: OffsetTable::calibrated(),
            permitted_routes: default_routes(),
        }
    }
}

/// Every route the gripper has been taught.
pub fn default_routes() -> Vec<Route> {
    use ModuleKind::*;
    vec![
        Route::new(ThermalCycler, HeaterShaker),
        Route::new(HeaterShaker, MagneticBlock),
        Route::new(MagneticBlock, HeaterShaker),
        Route::new(MagneticBlock, ThermalCycler),
        Route::new(HeaterShaker, ThermalCycler),
    ]
}

// ============================================================================
// 2. SUB-SECTIONS
// ============================================================================

/// One enable flag per pipeline stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct StageToggles {
    pub enzymatic_fragmentation: bool,
    pub fragmentation_thermal: bool,
    pub adapter_ligation: bool,
    pub ligation_thermal: bool,
    pub cleanup_1: bool,
    pub cleanup_2: bool,
    pub amplification: bool,
    pub amplification_thermal: bool,
    pub cleanup_3: bool,
}

impl Default for StageToggles {
    fn default() -> Self {
        Self::all(true)
    }
}

impl StageToggles {
    pub fn all(enabled: bool) -> Self {
        Self {
            enzymatic_fragmentation: enabled,
            fragmentation_thermal: enabled,
            adapter_ligation: enabled,
            ligation_thermal: enabled,
            cleanup_1: enabled,
            cleanup_2: enabled,
            amplification: enabled,
            amplification_thermal: enabled,
            cleanup_3: enabled,
        }
    }

    fn flag_mut(&mut self, stage: StageId) -> &mut bool {
        match stage {
            StageId::EnzymaticFragmentation => &mut self.enzymatic_fragmentation,
            StageId::FragmentationThermal => &mut self.fragmentation_thermal,
            StageId::AdapterLigation => &mut self.adapter_ligation,
            StageId::LigationThermal => &mut self.ligation_thermal,
            StageId::Cleanup1 => &mut self.cleanup_1,
            StageId::Cleanup2 => &mut self.cleanup_2,
            StageId::Amplification => &mut self.amplification,
            StageId::AmplificationThermal => &mut self.amplification_thermal,
            StageId::Cleanup3 => &mut self.cleanup_3,
        }
    }

    pub fn is_enabled(&self, stage: StageId) -> bool {
        match stage {
            StageId::EnzymaticFragmentation => self.enzymatic_fragmentation,
            StageId::FragmentationThermal => self.fragmentation_thermal,
            StageId::AdapterLigation => self.adapter_ligation,
            StageId::LigationThermal => self.ligation_thermal,
            StageId::Cleanup1 => self.cleanup_1,
            StageId::Cleanup2 => self.cleanup_2,
            StageId::Amplification => self.amplification,
            StageId::AmplificationThermal => self.amplification_thermal,
            StageId::Cleanup3 => self.cleanup_3,
        }
    }

    pub fn set(&mut self, stage: StageId, enabled: bool) {
        *self.flag_mut(stage) = enabled;
    }

    pub fn enabled_count(&self) -> usize {
        StageId::SEQUENCE
            .iter()
            .filter(|s| self.is_enabled(**s))
            .count()
    }
}

/// Multi-dispense switches, indexed by cleanup (0 = cleanup-1).
/// A multi-dispense serves every column from one tip.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default, deny_unknown_fields)]
pub struct TipSaving {
    pub ethanol_multi_dispense: [bool; 3],
    pub rsb_multi_dispense: [bool; 3],
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct TipRackLayout {
    pub tip50_racks: u32,
    pub tip200_racks: u32,
}

impl Default for TipRackLayout {
    fn default() -> Self {
        Self {
            tip50_racks: 2,
            tip200_racks: 3,
        }
    }
}

impl TipRackLayout {
    pub fn racks(&self, class: PipetteClass) -> u32 {
        match class {
            PipetteClass::Tip50 => self.tip50_racks,
            PipetteClass::Tip200 => self.tip200_racks,
        }
    }

    /// Tip columns available before a re-rack is needed.
    pub fn capacity(&self, class: PipetteClass) -> u32 {
        self.racks(class).saturating_mul(TipSlot::COLUMNS_PER_RACK)
    }
}

// ============================================================================
// 3. GRIPPER OFFSETS
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ModuleOffsets {
    pub pick_up: Offset,
    pub drop: Offset,
}

/// Route-specific pair that replaces the module-derived one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteOffset {
    #[serde(default = "sample_plate")]
    pub labware: LabwareId,
    pub from: ModuleKind,
    pub to: ModuleKind,
    pub offsets: OffsetPair,
}

fn sample_plate() -> LabwareId {
    LabwareId::SamplePlate
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct OffsetTable {
    pub thermal_cycler: ModuleOffsets,
    pub heater_shaker: ModuleOffsets,
    pub magnetic_block: ModuleOffsets,
    pub routes: Vec<RouteOffset>,
}

impl OffsetTable {
    /// Offsets measured on the reference deck.
    pub fn calibrated() -> Self {
        Self {
            thermal_cycler: ModuleOffsets::default(),
            heater_shaker: ModuleOffsets {
                pick_up: Offset::new(0.0, -2.0, 0.0),
                drop: Offset::new(0.0, -2.0, 0.0),
            },
            magnetic_block: ModuleOffsets {
                pick_up: Offset::new(0.0, -2.0, 0.0),
                drop: Offset::new(0.0, 0.0, 0.5),
            },
            routes: Vec::new(),
        }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    fn module(&self, kind: ModuleKind) -> ModuleOffsets {
        match kind {
            ModuleKind::ThermalCycler => self.thermal_cycler,
            ModuleKind::HeaterShaker => self.heater_shaker,
            ModuleKind::MagneticBlock => self.magnetic_block,
            ModuleKind::TemperatureBlock => ModuleOffsets::default(),
        }
    }

    /// Pick-up bias of the source module, drop bias of the destination,
    /// unless a route entry overrides the pair.
    pub fn for_route(&self, labware: LabwareId, from: ModuleKind, to: ModuleKind) -> OffsetPair {
        if let Some(r) = self
            .routes
            .iter()
            .find(|r| r.labware == labware && r.from == from && r.to == to)
        {
            return r.offsets;
        }
        OffsetPair {
            pick_up: self.module(from).pick_up,
            drop: self.module(to).drop,
        }
    }
}

// ============================================================================
// 4. LOADING & OVERRIDES
// ============================================================================

impl RunConfig {
    pub fn from_yaml_str(raw: &str) -> ProtocolResult<Self> {
        serde_yaml::from_str(raw)
            .map_err(|e| ProtocolError::config(format!("failed to parse run config: {e}")))
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> ProtocolResult<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| {
            ProtocolError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Deep-merges a JSON object over the current options.
    pub fn apply_overrides(&mut self, overrides: &Value) -> ProtocolResult<()> {
        if !overrides.is_object() {
            return Err(ProtocolError::config("overrides must be a JSON object"));
        }
        let mut base = serde_json::to_value(&*self)
            .map_err(|e| ProtocolError::config(format!("cannot encode config: {e}")))?;
        merge_json(&mut base, overrides);
        *self = serde_json::from_value(base)
            .map_err(|e| ProtocolError::config(format!("invalid override: {e}")))?;
        Ok(())
    }

    /// Stress preset: full plate, dry run, tips re-racked, no operator.
    pub fn stress_test(cycles: u32) -> Self {
        Self {
            column_count: MAX_COLUMNS,
            simulate: true,
            dispose_tips_after_use: false,
            repeat_cycles: cycles,
            unattended: true,
            ..Self::default()
        }
    }

    pub fn is_unattended(&self) -> bool {
        self.unattended || self.repeat_cycles > 1
    }

    pub fn offsets_in_effect(&self) -> OffsetTable {
        if self.use_default_module_offsets {
            OffsetTable::zero()
        } else {
            self.offsets.clone()
        }
    }

    pub fn route_permitted(&self, from: ModuleKind, to: ModuleKind) -> bool {
        self.permitted_routes
            .iter()
            .any(|r| r.from == from && r.to == to)
    }
}

fn merge_json(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (k, v) in patch {
                match base.get_mut(k) {
                    Some(slot) => merge_json(slot, v),
                    None => {
                        base.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (slot, v) => *slot = v.clone(),
    }
}

// ============================================================================
// 5. STATIC VALIDATION
// ============================================================================

impl RunConfig {
    /// Checks everything that can be known without planning the stages.
    pub fn validate(&self) -> ProtocolResult<()> {
        if !(1..=MAX_COLUMNS).contains(&self.column_count) {
            return Err(ProtocolError::config(format!(
                "column_count must be 1-{MAX_COLUMNS}, got {}",
                self.column_count
            )));
        }
        if self.repeat_cycles == 0 {
            return Err(ProtocolError::config("repeat_cycles must be at least 1"));
        }
        if self.stages.enabled_count() == 0 {
            return Err(ProtocolError::config("every stage is disabled; nothing to run"));
        }
        if self.stages.fragmentation_thermal && self.fragmentation_minutes == 0 {
            return Err(ProtocolError::config(
                "fragmentation_minutes must be positive when the fragmentation thermal step runs",
            ));
        }
        if self.stages.amplification_thermal && self.amplification_cycles == 0 {
            return Err(ProtocolError::config(
                "amplification_cycles must be positive when the amplification thermal step runs",
            ));
        }
        for class in [PipetteClass::Tip50, PipetteClass::Tip200] {
            if self.tip_racks.racks(class) == 0 {
                return Err(ProtocolError::config(format!("no {class} tip racks on deck")));
            }
        }
        let racks = u64::from(self.tip_racks.tip50_racks) + u64::from(self.tip_racks.tip200_racks);
        if racks > u64::from(TIP_RACK_SLOTS) {
            return Err(ProtocolError::config(format!(
                "{racks} tip racks requested but the deck has {TIP_RACK_SLOTS} tip rack slots"
            )));
        }

        let mut last = 0.0;
        for &t in &self.waste_thresholds {
            if !t.is_finite() || t <= last {
                return Err(ProtocolError::config(format!(
                    "waste thresholds must be positive and strictly ascending, got {:?}",
                    self.waste_thresholds
                )));
            }
            last = t;
        }
        if self.waste_thresholds.len() > 2 {
            return Err(ProtocolError::config(
                "the reservoir has three waste wells; at most two thresholds",
            ));
        }

        if !self.use_automated_gripper && self.is_unattended() {
            return Err(ProtocolError::config(
                "manual labware moves need an operator; enable the gripper for unattended runs",
            ));
        }
        Ok(())
    }
}
