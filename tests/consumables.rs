use prepflow::consumables::{FixedTip, RackHooks, TipPool, TipTracker};
use prepflow::core::{PipetteClass, TipSlot};
use prepflow::drivers::operator::{AutoConfirm, ChannelOperator};
use prepflow::drivers::simulated::{DeckEvent, SimulatedDeck};
use prepflow::error::ProtocolError;

fn tracker(capacity: u32, pause_for_reset: bool) -> TipTracker {
    TipTracker::new(
        TipPool::new(PipetteClass::Tip50, capacity),
        TipPool::new(PipetteClass::Tip200, capacity),
        pause_for_reset,
    )
}

#[tokio::test]
async fn test_thirteenth_acquire_resets_twelve_column_rack() {
    let deck = SimulatedDeck::default();
    let operator = AutoConfirm::new();
    let hooks = RackHooks {
        operator: &operator,
        liquid: &deck,
    };
    let mut tips = tracker(12, false);

    for i in 0..12 {
        let lease = tips.acquire(PipetteClass::Tip50, &hooks).await.unwrap();
        assert_eq!(lease.slot, TipSlot::from_index(i));
        assert!(!lease.fixed);
    }
    assert!(tips.pool(PipetteClass::Tip50).is_exhausted());
    assert_eq!(tips.pool(PipetteClass::Tip50).racks_exhausted(), 0);

    let lease = tips.acquire(PipetteClass::Tip50, &hooks).await.unwrap();
    let pool = tips.pool(PipetteClass::Tip50);
    assert_eq!(lease.slot, TipSlot::from_index(0));
    assert_eq!(pool.racks_exhausted(), 1);
    assert_eq!(pool.used(), 1);
    assert_eq!(pool.total_consumed(), 13);
    assert_eq!(tips.resets(), 1);

    // Automated reset: racks reloaded, nobody asked
    assert_eq!(
        deck.count(|e| *e == DeckEvent::RackReset(PipetteClass::Tip50)),
        1
    );
    assert!(operator.prompts().is_empty());

    // The other class is untouched
    assert_eq!(tips.pool(PipetteClass::Tip200).used(), 0);
}

#[tokio::test]
async fn test_counter_stays_within_capacity() {
    let deck = SimulatedDeck::default();
    let operator = AutoConfirm::new();
    let hooks = RackHooks {
        operator: &operator,
        liquid: &deck,
    };
    let mut tips = tracker(5, false);

    for n in 1..=40u32 {
        let before = tips.pool(PipetteClass::Tip200).racks_exhausted();
        tips.acquire(PipetteClass::Tip200, &hooks).await.unwrap();
        let pool = tips.pool(PipetteClass::Tip200);

        assert!(pool.used() >= 1 && pool.used() <= pool.capacity());
        let after = pool.racks_exhausted();
        if after != before {
            // A reset restores exactly zero before the take
            assert_eq!(after, before + 1);
            assert_eq!(pool.used(), 1);
        }
        assert_eq!(pool.racks_exhausted(), (n - 1) / 5);
        assert_eq!(pool.total_consumed(), n);
    }
}

#[tokio::test]
async fn test_fixed_tip_bypasses_counting() {
    let deck = SimulatedDeck::default();
    let operator = AutoConfirm::new();
    let hooks = RackHooks {
        operator: &operator,
        liquid: &deck,
    };
    let mut tips = TipTracker::new(
        TipPool::with_reserved(PipetteClass::Tip50, 24, 1),
        TipPool::with_reserved(PipetteClass::Tip200, 2, 0),
        false,
    );

    tips.engage_fixed(FixedTip::EthanolDispense);
    for _ in 0..10 {
        let lease = tips.acquire(PipetteClass::Tip200, &hooks).await.unwrap();
        assert!(lease.fixed);
        assert_eq!(lease.slot, FixedTip::EthanolDispense.slot());
    }
    // Far past capacity, yet nothing was counted or reset
    assert_eq!(tips.pool(PipetteClass::Tip200).used(), 0);
    assert_eq!(tips.resets(), 0);

    tips.release_fixed(PipetteClass::Tip200);
    let lease = tips.acquire(PipetteClass::Tip200, &hooks).await.unwrap();
    assert!(!lease.fixed);
    assert_eq!(tips.pool(PipetteClass::Tip200).used(), 1);

    // Fresh 50 uL tips start after the reserved RSB slot
    let lease = tips.acquire(PipetteClass::Tip50, &hooks).await.unwrap();
    assert_eq!(lease.slot, TipSlot::from_index(1));
    assert_eq!(tips.pool(PipetteClass::Tip50).capacity(), 23);
}

#[test]
fn test_removal_tips_are_one_per_column() {
    let slots: Vec<TipSlot> = (0..3)
        .map(|c| FixedTip::EthanolRemoval(0).for_column(c).slot())
        .collect();
    assert_eq!(
        slots,
        vec![
            TipSlot { rack: 1, column: 2 },
            TipSlot { rack: 1, column: 3 },
            TipSlot { rack: 1, column: 4 },
        ]
    );
    assert_eq!(FixedTip::RsbDispense.for_column(2), FixedTip::RsbDispense);
}

#[tokio::test]
async fn test_interactive_reset_waits_for_acknowledgement() {
    let deck = SimulatedDeck::default();
    let (operator, mut handle) = ChannelOperator::new();
    let hooks = RackHooks {
        operator: &operator,
        liquid: &deck,
    };
    let mut tips = tracker(1, true);

    tips.acquire(PipetteClass::Tip200, &hooks).await.unwrap();

    let harness = async {
        let prompt = handle.next_prompt().await.unwrap();
        handle.acknowledge().await.unwrap();
        prompt
    };
    let (lease, prompt) = tokio::join!(tips.acquire(PipetteClass::Tip200, &hooks), harness);

    assert_eq!(prompt, "RESET p200 TIPS");
    assert_eq!(lease.unwrap().slot, TipSlot::from_index(0));
    assert_eq!(tips.pool(PipetteClass::Tip200).racks_exhausted(), 1);
    assert_eq!(
        deck.count(|e| *e == DeckEvent::RackReset(PipetteClass::Tip200)),
        1
    );
}

#[tokio::test]
async fn test_lost_operator_is_fatal() {
    let deck = SimulatedDeck::default();
    let (operator, handle) = ChannelOperator::new();
    drop(handle);
    let hooks = RackHooks {
        operator: &operator,
        liquid: &deck,
    };
    let mut tips = tracker(1, true);

    tips.acquire(PipetteClass::Tip50, &hooks).await.unwrap();
    let err = tips.acquire(PipetteClass::Tip50, &hooks).await.unwrap_err();

    assert!(matches!(err, ProtocolError::Operator { .. }));
    assert!(err.is_fatal());
    // No reset without confirmation
    assert_eq!(tips.pool(PipetteClass::Tip50).racks_exhausted(), 0);
}
