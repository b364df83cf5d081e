use prepflow::core::Microliters;
use prepflow::error::ProtocolError;
use prepflow::waste::{WasteLedger, WASTE_WELLS};

fn ledger() -> WasteLedger {
    WasteLedger::new(&WASTE_WELLS, &[1500.0, 3000.0]).unwrap()
}

#[test]
fn test_second_site_takes_over_past_threshold() {
    let mut waste = ledger();

    let first = waste.record_waste(Microliters(1000.0)).unwrap().clone();
    assert_eq!(first.number, 1);
    assert_eq!(first.well.well, "A12");

    let second = waste.record_waste(Microliters(600.0)).unwrap().clone();
    assert_eq!(second.number, 2);
    assert_eq!(second.well.well, "A11");

    assert_eq!(waste.switches(), 1);
    assert_eq!(waste.cumulative(), Microliters(1600.0));
}

#[test]
fn test_active_site_is_monotone() {
    let mut waste = ledger();
    let mut last = 0;

    for i in 0..40 {
        let volume = if i % 7 == 0 { 0.0 } else { 137.5 };
        let site = waste.record_waste(Microliters(volume)).unwrap();
        assert!(site.number >= last);
        last = site.number;
    }

    // 34 non-zero additions of 137.5
    assert_eq!(waste.cumulative(), Microliters(4675.0));
    assert_eq!(waste.active_site().number, 3);
    assert_eq!(waste.active_site().well.well, "A10");
    assert!(waste.active_site().upper_threshold.is_none());
    assert_eq!(waste.switches(), 2);
}

#[test]
fn test_one_large_dispense_can_skip_a_site() {
    let mut waste = ledger();
    let site = waste.record_waste(Microliters(3200.0)).unwrap();
    assert_eq!(site.number, 3);
    assert_eq!(waste.switches(), 2);
}

#[test]
fn test_invalid_volumes_are_rejected() {
    let mut waste = ledger();
    waste.record_waste(Microliters(100.0)).unwrap();

    let err = waste.record_waste(Microliters(-1.0)).unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidVolume(v) if v == -1.0));

    let err = waste.record_waste(Microliters(f64::NAN)).unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidVolume(_)));

    // Nothing was added
    assert_eq!(waste.cumulative(), Microliters(100.0));
}

#[test]
fn test_bad_thresholds_are_configuration_errors() {
    for thresholds in [
        vec![3000.0, 1500.0],
        vec![1500.0, 1500.0],
        vec![-5.0],
        vec![f64::INFINITY],
        vec![1.0, 2.0, 3.0],
    ] {
        let err = WasteLedger::new(&WASTE_WELLS, &thresholds).unwrap_err();
        assert!(
            matches!(err, ProtocolError::Configuration(_)),
            "accepted {:?}",
            thresholds
        );
    }
}

#[test]
fn test_single_site_without_thresholds() {
    let mut waste = WasteLedger::new(&WASTE_WELLS, &[]).unwrap();
    let site = waste.record_waste(Microliters(1.0e6)).unwrap();
    assert_eq!(site.number, 1);
    assert_eq!(waste.switches(), 0);
}
