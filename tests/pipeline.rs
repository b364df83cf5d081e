use std::sync::Arc;
use std::time::Duration;

use prepflow::core::{LabwareId, ModuleKind, PipetteClass, Route, TipRelease};
use prepflow::drivers::operator::AutoConfirm;
use prepflow::drivers::simulated::{DeckEvent, SimulatedDeck};
use prepflow::drivers::DeckDrivers;
use prepflow::error::ProtocolError;
use prepflow::modules::RelocationCause;
use prepflow::{run, PipelineController, RunConfig, RunReport, StageId};

struct Rig {
    deck: SimulatedDeck,
    operator: AutoConfirm,
    drivers: DeckDrivers,
}

fn rig() -> Rig {
    let deck = SimulatedDeck::default();
    let operator = AutoConfirm::new();
    let drivers = DeckDrivers::simulated(&deck, Arc::new(operator.clone()));
    Rig {
        deck,
        operator,
        drivers,
    }
}

fn dry_run() -> RunConfig {
    RunConfig {
        simulate: true,
        ..RunConfig::default()
    }
}

fn consumed(report: &RunReport, class: PipetteClass) -> u32 {
    report.tip_usage(class).unwrap().consumed
}

// ============================================================================
// PLANNING
// ============================================================================

#[test]
fn test_skipped_ligation_inserts_one_compensating_move() {
    let full = PipelineController::new(dry_run()).unwrap();
    assert!(full.plan().compensations().is_empty());

    // The move the skipped stage would have made
    let ligation = full
        .stages()
        .iter()
        .find(|s| s.id == StageId::LigationThermal)
        .unwrap();
    assert_eq!(
        ligation.routes(),
        vec![(ModuleKind::ThermalCycler, ModuleKind::HeaterShaker)]
    );

    let mut cfg = dry_run();
    cfg.stages.set(StageId::AdapterLigation, false);
    cfg.stages.set(StageId::LigationThermal, false);
    let controller = PipelineController::new(cfg).unwrap();

    assert_eq!(
        controller.plan().compensations(),
        vec![(
            StageId::Cleanup1,
            Route::new(ModuleKind::ThermalCycler, ModuleKind::HeaterShaker)
        )]
    );
}

#[test]
fn test_no_compensation_when_plate_is_already_there() {
    let mut cfg = dry_run();
    cfg.stages.set(StageId::EnzymaticFragmentation, false);
    cfg.stages.set(StageId::FragmentationThermal, false);
    let controller = PipelineController::new(cfg).unwrap();
    assert!(controller.plan().compensations().is_empty());
}

#[test]
fn test_compensation_is_generic_for_later_stages() {
    // Cleanup-2 skipped: the plate stays on the heater-shaker, amplification
    // needs it back in the cycler.
    let mut cfg = dry_run();
    cfg.stages.set(StageId::Cleanup2, false);
    let controller = PipelineController::new(cfg).unwrap();
    assert_eq!(
        controller.plan().compensations(),
        vec![(
            StageId::Amplification,
            Route::new(ModuleKind::HeaterShaker, ModuleKind::ThermalCycler)
        )]
    );
}

#[test]
fn test_stranding_route_is_rejected_before_motion() {
    let mut cfg = dry_run();
    cfg.stages.set(StageId::AdapterLigation, false);
    cfg.stages.set(StageId::LigationThermal, false);
    cfg.stages.set(StageId::Cleanup3, false);
    cfg.permitted_routes
        .retain(|r| *r != Route::new(ModuleKind::ThermalCycler, ModuleKind::HeaterShaker));

    match PipelineController::new(cfg) {
        Err(ProtocolError::Configuration(msg)) => assert!(msg.contains("stranded"), "{msg}"),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("plan accepted a route the gripper cannot drive"),
    }
}

// ============================================================================
// EXECUTION
// ============================================================================

#[tokio::test]
async fn test_full_dry_run() {
    let rig = rig();
    let report = run(dry_run(), rig.drivers.clone()).await.unwrap();

    assert_eq!(report.cycles_completed, 1);
    assert_eq!(report.stages_run, 9);
    assert!(report.stages_skipped.is_empty());
    assert_eq!(report.transfers, 96);

    assert_eq!(consumed(&report, PipetteClass::Tip50), 24);
    assert_eq!(consumed(&report, PipetteClass::Tip200), 72);
    // 72 tips out of 36 slots: one reset mid-run, racks left empty
    assert_eq!(report.rack_resets, 1);

    // 3 cleanups x 3 removals x 3 columns x 200 uL
    assert_eq!(report.waste_total_ul, 5400.0);
    assert_eq!(report.waste_site, "A10");
    assert_eq!(report.waste_switches, 2);

    assert_eq!(report.relocations.stage, 13);
    assert_eq!(report.relocations.compensating, 0);
    assert_eq!(report.relocations.resync, 0);
    assert_eq!(report.sample_plate_on, Some(ModuleKind::MagneticBlock));
    assert_eq!(
        rig.deck.position_of(LabwareId::SamplePlate),
        Some(ModuleKind::MagneticBlock)
    );

    // Six compressed shakes and the cleanup-2 lead-in; no settles, no profiles
    assert_eq!(report.waited_secs, 39.0);
    assert_eq!(rig.deck.clock().elapsed(), Duration::from_secs(39));
    assert_eq!(
        rig.deck.count(|e| matches!(e, DeckEvent::Profile { .. })),
        0
    );

    assert_eq!(
        rig.operator.prompts(),
        vec!["Ready".to_string(), "RESET p200 TIPS".to_string()]
    );
}

#[tokio::test]
async fn test_compensating_move_executes() {
    let rig = rig();
    let mut cfg = dry_run();
    cfg.stages.set(StageId::AdapterLigation, false);
    cfg.stages.set(StageId::LigationThermal, false);

    let controller = PipelineController::new(cfg).unwrap();
    let mut session = controller.new_session().unwrap();
    controller.run(&mut session, &rig.drivers).await.unwrap();

    let compensations = session.stats.compensations();
    assert_eq!(compensations.len(), 1);
    assert_eq!(
        compensations[0].route,
        Route::new(ModuleKind::ThermalCycler, ModuleKind::HeaterShaker)
    );
    assert_eq!(compensations[0].stage, Some(StageId::Cleanup1));
    assert_eq!(
        session.stats.stages_skipped,
        vec![StageId::AdapterLigation, StageId::LigationThermal]
    );
}

#[tokio::test]
async fn test_repeat_cycles_accumulate() {
    let single = run(dry_run(), rig().drivers).await.unwrap();

    let rig = rig();
    let cfg = RunConfig {
        repeat_cycles: 3,
        ..dry_run()
    };
    let report = run(cfg, rig.drivers.clone()).await.unwrap();

    assert_eq!(report.cycles_completed, 3);
    assert_eq!(report.stages_run, 27);
    assert_eq!(report.waste_total_ul, 3.0 * single.waste_total_ul);
    for class in [PipetteClass::Tip50, PipetteClass::Tip200] {
        assert_eq!(consumed(&report, class), 3 * consumed(&single, class));
    }

    // Counters carry over: 216 p200 tips over 36 slots, 72 p50 over 24
    let p200 = report.tip_usage(PipetteClass::Tip200).unwrap();
    let p50 = report.tip_usage(PipetteClass::Tip50).unwrap();
    assert_eq!(p200.racks_exhausted, 5);
    assert_eq!(p50.racks_exhausted, 2);
    assert_eq!(report.rack_resets, 7);

    // Cycles 2 and 3 start by bringing the plate back from the magnet
    assert_eq!(report.relocations.resync, 2);
    assert_eq!(report.relocations.stage, 3 * 13);

    // Stress mode never pauses for a re-rack
    assert_eq!(rig.operator.prompts(), vec!["Ready".to_string(); 3]);
}

#[tokio::test]
async fn test_transfer_failure_halts_the_run() {
    let rig = rig();
    rig.deck.fail_transfer("removing supernatant");

    let controller = PipelineController::new(dry_run()).unwrap();
    let mut session = controller.new_session().unwrap();
    let err = controller
        .run(&mut session, &rig.drivers)
        .await
        .unwrap_err();

    match &err {
        ProtocolError::Transfer { step, .. } => assert_eq!(step, "removing supernatant"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_fatal());

    // Stopped inside cleanup-1, on the magnet, nothing after it ran
    assert!(session.stats.stages_run.contains(&StageId::LigationThermal));
    assert!(!session.stats.stages_run.contains(&StageId::Cleanup1));
    assert_eq!(
        rig.deck.position_of(LabwareId::SamplePlate),
        Some(ModuleKind::MagneticBlock)
    );
    assert_eq!(session.stats.cycles_completed, 0);
}

#[tokio::test]
async fn test_reused_fixed_tips_are_not_counted() {
    let rig = rig();
    let cfg = RunConfig {
        reuse_fixed_tips: true,
        ..dry_run()
    };
    let report = run(cfg, rig.drivers.clone()).await.unwrap();

    // Per cleanup: 6 ethanol dispenses, 6 removals, 3 residual removals
    assert_eq!(consumed(&report, PipetteClass::Tip200), 72 - 3 * 15);
    // RSB dispense tip, three columns per cleanup
    assert_eq!(consumed(&report, PipetteClass::Tip50), 24 - 9);
    assert_eq!(report.rack_resets, 0);

    let returned = rig.deck.count(|e| {
        matches!(
            e,
            DeckEvent::TipRelease {
                release: TipRelease::ReturnToRack,
                ..
            }
        )
    });
    assert_eq!(returned, 45 + 9);
}

#[tokio::test]
async fn test_multi_dispense_shares_one_tip() {
    let rig = rig();
    let mut cfg = dry_run();
    cfg.tip_saving.ethanol_multi_dispense = [true, false, false];
    cfg.tip_saving.rsb_multi_dispense = [true, true, true];
    let report = run(cfg, rig.drivers.clone()).await.unwrap();

    // Cleanup-1 ethanol: 2 tips instead of 6
    assert_eq!(consumed(&report, PipetteClass::Tip200), 72 - 4);
    // RSB: 1 tip per cleanup instead of 3
    assert_eq!(consumed(&report, PipetteClass::Tip50), 24 - 6);
    // Same liquid moved
    assert_eq!(report.transfers, 96);
}

#[tokio::test]
async fn test_tips_are_re_racked_when_not_disposed() {
    let rig = rig();
    let cfg = RunConfig {
        dispose_tips_after_use: false,
        ..dry_run()
    };
    run(cfg, rig.drivers.clone()).await.unwrap();

    let trashed = rig.deck.count(|e| {
        matches!(
            e,
            DeckEvent::TipRelease {
                release: TipRelease::Trash,
                ..
            }
        )
    });
    assert_eq!(trashed, 0);
}

#[tokio::test]
async fn test_deactivation_at_end_of_cycle() {
    let rig = rig();
    run(dry_run(), rig.drivers.clone()).await.unwrap();
    let deactivations = rig.deck.count(|e| {
        matches!(
            e,
            DeckEvent::Module(prepflow::drivers::ModuleCommand::Deactivate { .. })
        )
    });
    assert_eq!(deactivations, 3);

    let quiet = self::rig();
    let cfg = RunConfig {
        deactivate_modules_on_finish: false,
        ..dry_run()
    };
    run(cfg, quiet.drivers.clone()).await.unwrap();
    let deactivations = quiet.deck.count(|e| {
        matches!(
            e,
            DeckEvent::Module(prepflow::drivers::ModuleCommand::Deactivate { .. })
        )
    });
    assert_eq!(deactivations, 0);
}

#[tokio::test]
async fn test_relocations_are_attributed_by_cause() {
    let rig = rig();
    let cfg = RunConfig {
        repeat_cycles: 2,
        ..dry_run()
    };
    let controller = PipelineController::new(cfg).unwrap();
    let mut session = controller.new_session().unwrap();
    controller.run(&mut session, &rig.drivers).await.unwrap();

    let resyncs: Vec<_> = session
        .stats
        .relocations
        .iter()
        .filter(|r| r.cause == RelocationCause::Resync)
        .collect();
    assert_eq!(resyncs.len(), 1);
    assert_eq!(resyncs[0].cycle, 2);
    assert_eq!(
        resyncs[0].route,
        Route::new(ModuleKind::MagneticBlock, ModuleKind::ThermalCycler)
    );
}
