use std::sync::Arc;
use std::time::Duration;

use prepflow::config::OffsetTable;
use prepflow::core::{Celsius, ModuleKind, Rpm, ThermalProfile, ThermalStep, ThermalZone};
use prepflow::drivers::operator::AutoConfirm;
use prepflow::drivers::simulated::{DeckEvent, SimulatedDeck};
use prepflow::drivers::{DeckDrivers, ModuleCommand};
use prepflow::error::ProtocolError;
use prepflow::modules::{DeckState, ModuleCoordinator, ThermalCommand, ThermalState};
use prepflow::policy::RunPolicy;
use prepflow::{run, RunConfig};

fn fragmentation() -> ThermalProfile {
    ThermalProfile::new(
        "fragmentation",
        vec![
            ThermalStep::minutes(32.0, 10),
            ThermalStep::minutes(65.0, 30),
            ThermalStep::minutes(4.0, 5),
        ],
        1,
    )
}

fn policy(simulate: bool) -> RunPolicy {
    RunPolicy {
        simulate,
        ..RunPolicy::default()
    }
}

#[test]
fn test_nominal_duration_counts_repetitions() {
    assert_eq!(fragmentation().nominal_duration(), Duration::from_secs(2700));

    let pcr = ThermalProfile::new(
        "amplification",
        vec![
            ThermalStep::seconds(98.0, 15),
            ThermalStep::seconds(60.0, 30),
            ThermalStep::seconds(72.0, 30),
        ],
        6,
    );
    assert_eq!(pcr.nominal_duration(), Duration::from_secs(450));
}

#[tokio::test]
async fn test_profile_is_skipped_in_dry_run() {
    let deck = SimulatedDeck::default();
    let drivers = DeckDrivers::simulated(&deck, Arc::new(AutoConfirm::new()));
    let policy = policy(true);
    let offsets = OffsetTable::calibrated();
    let coord = ModuleCoordinator::new(&drivers, &policy, &offsets);
    let mut state = DeckState::home();

    coord
        .set_thermal_state(
            &mut state,
            ModuleKind::ThermalCycler,
            ThermalCommand::Profile(fragmentation()),
        )
        .await
        .unwrap();

    assert_eq!(deck.clock().elapsed(), Duration::ZERO);
    assert_eq!(
        deck.count(|e| matches!(e, DeckEvent::Profile { .. })),
        0
    );
}

#[tokio::test]
async fn test_profile_runs_for_its_nominal_length() {
    let deck = SimulatedDeck::default();
    let drivers = DeckDrivers::simulated(&deck, Arc::new(AutoConfirm::new()));
    let policy = policy(false);
    let offsets = OffsetTable::calibrated();
    let coord = ModuleCoordinator::new(&drivers, &policy, &offsets);
    let mut state = DeckState::home();

    coord
        .set_thermal_state(
            &mut state,
            ModuleKind::ThermalCycler,
            ThermalCommand::Profile(fragmentation()),
        )
        .await
        .unwrap();
    coord
        .set_thermal_state(
            &mut state,
            ModuleKind::ThermalCycler,
            ThermalCommand::Hold {
                zone: ThermalZone::Block,
                target: Celsius(4.0),
            },
        )
        .await
        .unwrap();

    assert_eq!(deck.clock().elapsed(), Duration::from_secs(2700));
    assert_eq!(
        state.module(ModuleKind::ThermalCycler).block,
        ThermalState::AtSetpoint(Celsius(4.0))
    );
}

#[tokio::test]
async fn test_failed_profile_is_thermal_error() {
    let deck = SimulatedDeck::default();
    deck.fail_profiles();
    let drivers = DeckDrivers::simulated(&deck, Arc::new(AutoConfirm::new()));
    let policy = policy(false);
    let offsets = OffsetTable::calibrated();
    let coord = ModuleCoordinator::new(&drivers, &policy, &offsets);
    let mut state = DeckState::home();

    let err = coord
        .set_thermal_state(
            &mut state,
            ModuleKind::ThermalCycler,
            ThermalCommand::Profile(fragmentation()),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::Thermal {
            module: ModuleKind::ThermalCycler,
            ..
        }
    ));
}

#[tokio::test]
async fn test_thermal_commands_need_a_thermal_module() {
    let deck = SimulatedDeck::default();
    let drivers = DeckDrivers::simulated(&deck, Arc::new(AutoConfirm::new()));
    let policy = policy(false);
    let offsets = OffsetTable::calibrated();
    let coord = ModuleCoordinator::new(&drivers, &policy, &offsets);
    let mut state = DeckState::home();

    let err = coord
        .set_thermal_state(
            &mut state,
            ModuleKind::MagneticBlock,
            ThermalCommand::Deactivate {
                zone: ThermalZone::Block,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::Thermal { .. }));

    // The temperature block has no lid
    let err = coord
        .set_thermal_state(
            &mut state,
            ModuleKind::TemperatureBlock,
            ThermalCommand::Hold {
                zone: ThermalZone::Lid,
                target: Celsius(100.0),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::Thermal { .. }));
    assert!(deck.journal().is_empty());
}

#[tokio::test]
async fn test_deactivation_is_sent_even_in_dry_run() {
    let deck = SimulatedDeck::default();
    let drivers = DeckDrivers::simulated(&deck, Arc::new(AutoConfirm::new()));
    let policy = policy(true);
    let offsets = OffsetTable::calibrated();
    let coord = ModuleCoordinator::new(&drivers, &policy, &offsets);
    let mut state = DeckState::home();

    coord.deactivate_all(&mut state).await.unwrap();
    let sent = deck.count(|e| matches!(e, DeckEvent::Module(ModuleCommand::Deactivate { .. })));
    assert_eq!(sent, 3);
}

#[tokio::test]
async fn test_shakes_are_compressed_in_simulation() {
    let deck = SimulatedDeck::default();
    let drivers = DeckDrivers::simulated(&deck, Arc::new(AutoConfirm::new()));
    let offsets = OffsetTable::calibrated();
    let mut state = DeckState::home();

    let dry = policy(true);
    let coord = ModuleCoordinator::new(&drivers, &dry, &offsets);
    let waited = coord
        .shake(&mut state, Rpm(1600), Duration::from_secs(300))
        .await
        .unwrap();
    assert_eq!(waited, Duration::from_secs(6));
    let waited = coord
        .shake(&mut state, Rpm(1600), Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(waited, Duration::from_secs(1));
    assert_eq!(coord.settle(Duration::from_secs(240)).await, Duration::ZERO);

    let real = policy(false);
    let coord = ModuleCoordinator::new(&drivers, &real, &offsets);
    let waited = coord
        .shake(&mut state, Rpm(2000), Duration::from_secs(300))
        .await
        .unwrap();
    assert_eq!(waited, Duration::from_secs(300));
    assert_eq!(coord.settle(Duration::from_secs(240)).await, Duration::from_secs(240));

    assert_eq!(deck.clock().elapsed(), Duration::from_secs(6 + 1 + 300 + 240));
}

#[tokio::test]
async fn test_full_reaction_run_time() {
    let deck = SimulatedDeck::default();
    let drivers = DeckDrivers::simulated(&deck, Arc::new(AutoConfirm::new()));
    let report = run(RunConfig::default(), drivers).await.unwrap();

    // Profiles 2700 + 900 + 555, settles 1710, shakes 1800, lead-in 3
    assert_eq!(deck.clock().elapsed(), Duration::from_secs(7668));
    assert_eq!(report.waited_secs, 1710.0 + 1800.0 + 3.0);
    assert_eq!(
        deck.count(|e| matches!(e, DeckEvent::Profile { .. })),
        5
    );
}
