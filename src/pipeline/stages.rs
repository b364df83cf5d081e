// src/pipeline/stages.rs
//
// =============================================================================
// PREPFLOW: STAGE DEFINITIONS (v 0.1 )
// =============================================================================
//
// The nine stages of the QIAseq FX library prep, as data.
//
// Responsibilities:
// 1. Name the fixed stage sequence.
// 2. Describe each stage body as a list of `Operation`s.
// 3. Declare where the sample plate must be before each stage.
// 4. Lay out the wells used for 1-3 sample columns.
//
// Nothing here executes. The controller walks these lists.

use crate::config::RunConfig;
use crate::consumables::FixedTip;
use crate::core::{
    Celsius, LabwareId, LatchState, Microliters, ModuleKind, PipetteClass, Rpm, ThermalProfile,
    ThermalStep, ThermalZone, WellRef,
};
use crate::drivers::MixSpec;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ============================================================================
// 1. STAGE IDENTITY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageId {
    EnzymaticFragmentation,
    FragmentationThermal,
    AdapterLigation,
    LigationThermal,
    Cleanup1,
    Cleanup2,
    Amplification,
    AmplificationThermal,
    Cleanup3,
}

impl StageId {
    pub const SEQUENCE: [StageId; 9] = [
        StageId::EnzymaticFragmentation,
        StageId::FragmentationThermal,
        StageId::AdapterLigation,
        StageId::LigationThermal,
        StageId::Cleanup1,
        StageId::Cleanup2,
        StageId::Amplification,
        StageId::AmplificationThermal,
        StageId::Cleanup3,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StageId::EnzymaticFragmentation => "enzymatic-fragmentation",
            StageId::FragmentationThermal => "fragmentation-thermal-step",
            StageId::AdapterLigation => "adapter-ligation",
            StageId::LigationThermal => "ligation-thermal-step",
            StageId::Cleanup1 => "cleanup-1",
            StageId::Cleanup2 => "cleanup-2",
            StageId::Amplification => "amplification",
            StageId::AmplificationThermal => "amplification-thermal-step",
            StageId::Cleanup3 => "cleanup-3",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

// ============================================================================
// 2. OPERATIONS
// ============================================================================

/// A mix plus whether dry runs may collapse it to one cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mix {
    pub spec: MixSpec,
    pub shortenable: bool,
}

impl Mix {
    pub fn dry_runnable(repetitions: u32, volume: f64) -> Self {
        Self {
            spec: MixSpec::new(repetitions, volume),
            shortenable: true,
        }
    }

    pub fn fixed(repetitions: u32, volume: f64) -> Self {
        Self {
            spec: MixSpec::new(repetitions, volume),
            shortenable: false,
        }
    }
}

/// Wells a transfer reads from or writes to, one per sample column.
#[derive(Debug, Clone, PartialEq)]
pub enum WellSet {
    /// Every column uses the same well (reagent or reservoir trough).
    Single(WellRef),
    PerColumn(Vec<WellRef>),
}

impl WellSet {
    pub fn well(&self, col: usize) -> Option<&WellRef> {
        match self {
            WellSet::Single(w) => Some(w),
            WellSet::PerColumn(ws) => ws.get(col),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Wells(WellSet),
    /// Whichever waste well the ledger selects.
    Waste,
    /// Liquid stays in the tip and leaves with it.
    Discard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TipSharing {
    /// Fresh tip for every column.
    PerColumn,
    /// One tip serves every column (multi-dispense).
    Shared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TipPlan {
    pub sharing: TipSharing,
    /// Reserved slot used instead when fixed tips are reused.
    pub fixed: Option<FixedTip>,
}

impl TipPlan {
    pub const FRESH: TipPlan = TipPlan {
        sharing: TipSharing::PerColumn,
        fixed: None,
    };
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferStep {
    pub label: String,
    pub pipette: PipetteClass,
    pub source: WellSet,
    pub target: Target,
    pub volume: Microliters,
    pub premix: Option<Mix>,
    pub mix: Option<Mix>,
    pub touch_tip: bool,
    pub tips: TipPlan,
}

impl TransferStep {
    fn new(
        label: &str,
        pipette: PipetteClass,
        source: WellSet,
        target: Target,
        volume: f64,
    ) -> Self {
        Self {
            label: label.to_string(),
            pipette,
            source,
            target,
            volume: Microliters(volume),
            premix: None,
            mix: None,
            touch_tip: false,
            tips: TipPlan::FRESH,
        }
    }

    fn premix(mut self, mix: Mix) -> Self {
        self.premix = Some(mix);
        self
    }

    fn mix(mut self, mix: Mix) -> Self {
        self.mix = Some(mix);
        self
    }

    fn touch_tip(mut self) -> Self {
        self.touch_tip = true;
        self
    }

    fn tips(mut self, tips: TipPlan) -> Self {
        self.tips = tips;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Comment(String),
    Transfer(TransferStep),
    /// Move the sample plate from wherever it is recorded to `to`.
    Relocate { to: ModuleKind },
    Shake { rpm: Rpm, duration: Duration },
    /// Magnet or bench settling; elided in dry runs.
    Settle { duration: Duration },
    /// Unconditional wait.
    Delay { duration: Duration },
    /// Thermal cycler lid.
    Lid(LatchState),
    Profile(ThermalProfile),
    Hold { zone: ThermalZone, target: Celsius },
}

fn comment(text: &str) -> Operation {
    Operation::Comment(text.to_string())
}

fn minutes(m: f64) -> Duration {
    Duration::from_secs_f64(m * 60.0)
}

// ============================================================================
// 3. THE STAGE
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    pub id: StageId,
    pub enabled: bool,
    /// Module the sample plate must occupy before the stage starts.
    pub requires: ModuleKind,
    pub operations: Vec<Operation>,
}

impl Stage {
    /// Where the stage leaves the sample plate.
    pub fn final_location(&self) -> ModuleKind {
        self.operations
            .iter()
            .rev()
            .find_map(|op| match op {
                Operation::Relocate { to } => Some(*to),
                _ => None,
            })
            .unwrap_or(self.requires)
    }

    /// Every route the stage body itself drives, in order.
    pub fn routes(&self) -> Vec<(ModuleKind, ModuleKind)> {
        let mut at = self.requires;
        let mut routes = Vec::new();
        for op in &self.operations {
            if let Operation::Relocate { to } = op {
                routes.push((at, *to));
                at = *to;
            }
        }
        routes
    }
}

// ============================================================================
// 4. DECK LAYOUT
// ============================================================================

/// Sample plate column sets, sliced to the configured column count.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleLayout {
    /// Input samples; also cleanup-1 working wells.
    pub col1: Vec<WellRef>,
    /// Cleanup-2 working wells.
    pub col2: Vec<WellRef>,
    /// Amplification and cleanup-3 working wells.
    pub col3: Vec<WellRef>,
    /// Final libraries.
    pub col4: Vec<WellRef>,
    /// Barcode wells on the reagent plate.
    pub barcodes: Vec<WellRef>,
}

impl SampleLayout {
    pub fn new(columns: usize) -> Self {
        let set = |labware, first: usize| {
            (first..first + columns)
                .map(|c| WellRef::new(labware, format!("A{c}")))
                .collect::<Vec<_>>()
        };
        Self {
            col1: set(LabwareId::SamplePlate, 1),
            col2: set(LabwareId::SamplePlate, 4),
            col3: set(LabwareId::SamplePlate, 7),
            col4: set(LabwareId::SamplePlate, 10),
            barcodes: set(LabwareId::ReagentPlate, 7),
        }
    }
}

pub mod wells {
    pub const FX_ENZYME: &str = "A1";
    pub const LIGATION_MIX: &str = "A2";
    pub const PRIMER: &str = "A3";
    pub const PCR_MIX: &str = "A4";

    pub const AMPURE: &str = "A1";
    /// One ethanol trough per cleanup.
    pub const ETHANOL: [&str; 3] = ["A3", "A4", "A5"];
    pub const RSB: &str = "A7";
}

fn reagent(well: &str) -> WellSet {
    WellSet::Single(WellRef::new(LabwareId::ReagentPlate, well))
}

fn reservoir(well: &str) -> WellSet {
    WellSet::Single(WellRef::new(LabwareId::Reservoir, well))
}

fn columns(set: &[WellRef]) -> WellSet {
    WellSet::PerColumn(set.to_vec())
}

// ============================================================================
// 5. STAGE BODIES
// ============================================================================

pub fn build(cfg: &RunConfig) -> Vec<Stage> {
    let layout = SampleLayout::new(usize::from(cfg.column_count));
    StageId::SEQUENCE
        .iter()
        .map(|id| {
            let (requires, operations) = body(*id, cfg, &layout);
            Stage {
                id: *id,
                enabled: cfg.stages.is_enabled(*id),
                requires,
                operations,
            }
        })
        .collect()
}

fn body(id: StageId, cfg: &RunConfig, layout: &SampleLayout) -> (ModuleKind, Vec<Operation>) {
    use ModuleKind::*;
    match id {
        StageId::EnzymaticFragmentation => (
            ThermalCycler,
            vec![
                comment("--> Adding FX"),
                Operation::Transfer(
                    TransferStep::new(
                        "adding FX enzyme",
                        PipetteClass::Tip50,
                        reagent(wells::FX_ENZYME),
                        Target::Wells(columns(&layout.col1)),
                        10.0,
                    )
                    .premix(Mix::dry_runnable(2, 11.0))
                    .mix(Mix::dry_runnable(3, 20.0)),
                ),
            ],
        ),
        StageId::FragmentationThermal => (
            ThermalCycler,
            thermal_block(
                ThermalProfile::new(
                    "fragmentation",
                    vec![
                        ThermalStep::minutes(32.0, u64::from(cfg.fragmentation_minutes)),
                        ThermalStep::minutes(65.0, 30),
                    ],
                    1,
                ),
                4.0,
            ),
        ),
        StageId::AdapterLigation => (
            ThermalCycler,
            vec![
                comment("--> Adding Barcodes"),
                Operation::Transfer(
                    TransferStep::new(
                        "adding barcodes",
                        PipetteClass::Tip50,
                        columns(&layout.barcodes),
                        Target::Wells(columns(&layout.col1)),
                        5.0,
                    )
                    .mix(Mix::dry_runnable(3, 10.0)),
                ),
                comment("--> Adding Lig"),
                Operation::Transfer(
                    TransferStep::new(
                        "adding ligation mix",
                        PipetteClass::Tip200,
                        reagent(wells::LIGATION_MIX),
                        Target::Wells(columns(&layout.col1)),
                        45.0,
                    )
                    .premix(Mix::dry_runnable(2, 47.0))
                    .mix(Mix::fixed(10, 80.0)),
                ),
            ],
        ),
        StageId::LigationThermal => {
            let mut ops = thermal_block(
                ThermalProfile::new("ligation", vec![ThermalStep::minutes(20.0, 15)], 1),
                10.0,
            );
            ops.push(Operation::Relocate { to: HeaterShaker });
            (ThermalCycler, ops)
        }
        StageId::Cleanup1 => (
            HeaterShaker,
            cleanup(
                cfg,
                &Cleanup {
                    index: 0,
                    ampure: 80.0,
                    rsb: 50.0,
                    eluate: 50.0,
                    eluate_tip: PipetteClass::Tip200,
                    working: &layout.col1,
                    dest: &layout.col2,
                    lead_in: None,
                    ends_on: Some(HeaterShaker),
                },
            ),
        ),
        StageId::Cleanup2 => (
            HeaterShaker,
            cleanup(
                cfg,
                &Cleanup {
                    index: 1,
                    ampure: 50.0,
                    rsb: 22.0,
                    eluate: 20.0,
                    eluate_tip: PipetteClass::Tip50,
                    working: &layout.col2,
                    dest: &layout.col3,
                    lead_in: Some(Duration::from_secs(3)),
                    ends_on: Some(ThermalCycler),
                },
            ),
        ),
        StageId::Amplification => (
            ThermalCycler,
            vec![
                comment("--> Adding Primer"),
                Operation::Transfer(
                    TransferStep::new(
                        "adding primer",
                        PipetteClass::Tip50,
                        reagent(wells::PRIMER),
                        Target::Wells(columns(&layout.col3)),
                        5.0,
                    )
                    .mix(Mix::fixed(2, 10.0)),
                ),
                comment("--> Adding PCR"),
                Operation::Transfer(
                    TransferStep::new(
                        "adding PCR mix",
                        PipetteClass::Tip200,
                        reagent(wells::PCR_MIX),
                        Target::Wells(columns(&layout.col3)),
                        25.0,
                    )
                    .premix(Mix::dry_runnable(2, 25.0))
                    .mix(Mix::fixed(10, 45.0)),
                ),
            ],
        ),
        StageId::AmplificationThermal => {
            let mut ops = vec![Operation::Lid(LatchState::Closed)];
            ops.extend(
                amplification_profiles(cfg.amplification_cycles)
                    .into_iter()
                    .map(Operation::Profile),
            );
            ops.push(Operation::Hold {
                zone: ThermalZone::Block,
                target: Celsius(4.0),
            });
            ops.push(Operation::Lid(LatchState::Open));
            (ThermalCycler, ops)
        }
        StageId::Cleanup3 => {
            // Picks the amplified plate up from the cycler itself
            let mut ops = vec![Operation::Relocate { to: HeaterShaker }];
            ops.extend(cleanup(
                cfg,
                &Cleanup {
                    index: 2,
                    ampure: 50.0,
                    rsb: 26.0,
                    eluate: 25.0,
                    eluate_tip: PipetteClass::Tip50,
                    working: &layout.col3,
                    dest: &layout.col4,
                    lead_in: None,
                    ends_on: None,
                },
            ));
            (ThermalCycler, ops)
        }
    }
}

/// Lid closed, one profile, cold hold, lid open.
fn thermal_block(profile: ThermalProfile, hold: f64) -> Vec<Operation> {
    vec![
        Operation::Lid(LatchState::Closed),
        Operation::Profile(profile),
        Operation::Hold {
            zone: ThermalZone::Block,
            target: Celsius(hold),
        },
        Operation::Lid(LatchState::Open),
    ]
}

pub fn amplification_profiles(cycles: u32) -> Vec<ThermalProfile> {
    vec![
        ThermalProfile::new("initial denaturation", vec![ThermalStep::seconds(98.0, 45)], 1),
        ThermalProfile::new(
            "amplification",
            vec![
                ThermalStep::seconds(98.0, 15),
                ThermalStep::seconds(60.0, 30),
                ThermalStep::seconds(72.0, 30),
            ],
            cycles,
        ),
        ThermalProfile::new("final extension", vec![ThermalStep::minutes(72.0, 1)], 1),
    ]
}

// --- Bead cleanups ---

struct Cleanup<'a> {
    /// 0-based cleanup number; selects the ethanol trough and tip-saving flags.
    index: usize,
    ampure: f64,
    rsb: f64,
    eluate: f64,
    eluate_tip: PipetteClass,
    working: &'a [WellRef],
    dest: &'a [WellRef],
    lead_in: Option<Duration>,
    ends_on: Option<ModuleKind>,
}

fn sharing(multi_dispense: bool) -> TipSharing {
    if multi_dispense {
        TipSharing::Shared
    } else {
        TipSharing::PerColumn
    }
}

fn cleanup(cfg: &RunConfig, c: &Cleanup<'_>) -> Vec<Operation> {
    use ModuleKind::*;
    let working = || columns(c.working);
    let ethanol_sharing = sharing(cfg.tip_saving.ethanol_multi_dispense[c.index]);
    let rsb_sharing = sharing(cfg.tip_saving.rsb_multi_dispense[c.index]);
    let removal_tip = TipPlan {
        sharing: TipSharing::PerColumn,
        fixed: Some(FixedTip::EthanolRemoval(0)),
    };

    let mut ops = Vec::new();
    if let Some(duration) = c.lead_in {
        ops.push(Operation::Delay { duration });
    }

    ops.push(comment("--> ADDING AMPure"));
    ops.push(Operation::Transfer(
        TransferStep::new(
            "adding AMPure",
            PipetteClass::Tip200,
            reservoir(wells::AMPURE),
            Target::Wells(working()),
            c.ampure,
        )
        .premix(Mix::dry_runnable(3, c.ampure + 3.0))
        .mix(Mix::fixed(2, 70.0))
        .touch_tip(),
    ));
    ops.push(Operation::Shake {
        rpm: Rpm(1600),
        duration: minutes(5.0),
    });
    ops.push(Operation::Relocate { to: MagneticBlock });
    ops.push(Operation::Settle { duration: minutes(4.0) });

    ops.push(comment("--> Removing Supernatant"));
    ops.push(Operation::Transfer(TransferStep::new(
        "removing supernatant",
        PipetteClass::Tip200,
        working(),
        Target::Waste,
        200.0,
    )));

    for _ in 0..2 {
        ops.push(comment("--> ETOH Wash"));
        ops.push(Operation::Transfer(
            TransferStep::new(
                "ethanol wash",
                PipetteClass::Tip200,
                reservoir(wells::ETHANOL[c.index]),
                Target::Wells(working()),
                150.0,
            )
            .tips(TipPlan {
                sharing: ethanol_sharing,
                fixed: Some(FixedTip::EthanolDispense),
            }),
        ));
        ops.push(Operation::Settle { duration: minutes(0.5) });

        ops.push(comment("--> Remove ETOH Wash"));
        ops.push(Operation::Transfer(
            TransferStep::new(
                "removing ethanol wash",
                PipetteClass::Tip200,
                working(),
                Target::Waste,
                200.0,
            )
            .touch_tip()
            .tips(removal_tip),
        ));
    }

    ops.push(Operation::Settle { duration: minutes(1.0) });
    ops.push(comment("--> Removing Residual Wash"));
    ops.push(Operation::Transfer(
        TransferStep::new(
            "removing residual wash",
            PipetteClass::Tip200,
            working(),
            Target::Discard,
            50.0,
        )
        .tips(removal_tip),
    ));
    ops.push(Operation::Settle { duration: minutes(0.5) });

    ops.push(Operation::Relocate { to: HeaterShaker });
    ops.push(comment("--> Adding RSB"));
    ops.push(Operation::Transfer(
        TransferStep::new(
            "adding RSB",
            PipetteClass::Tip50,
            reservoir(wells::RSB),
            Target::Wells(working()),
            c.rsb,
        )
        .tips(TipPlan {
            sharing: rsb_sharing,
            fixed: Some(FixedTip::RsbDispense),
        }),
    ));
    ops.push(Operation::Shake {
        rpm: Rpm(2000),
        duration: minutes(5.0),
    });
    ops.push(Operation::Relocate { to: MagneticBlock });
    ops.push(Operation::Settle { duration: minutes(3.0) });

    ops.push(comment("--> Transferring Supernatant"));
    ops.push(Operation::Transfer(TransferStep::new(
        "transferring eluate",
        c.eluate_tip,
        working(),
        Target::Wells(columns(c.dest)),
        c.eluate,
    )));

    if let Some(to) = c.ends_on {
        ops.push(Operation::Relocate { to });
    }
    ops
}
