use std::sync::Arc;

use prepflow::drivers::operator::{ChannelOperator, ConsoleOperator};
use prepflow::drivers::simulated::SimulatedDeck;
use prepflow::drivers::{DeckDrivers, Operator};
use prepflow::error::ProtocolError;
use prepflow::{run, RunConfig};

fn dry_run() -> RunConfig {
    RunConfig {
        simulate: true,
        ..RunConfig::default()
    }
}

// ============================================================================
// CONSOLE
// ============================================================================

#[tokio::test]
async fn test_console_consumes_one_line_per_prompt() {
    let operator = ConsoleOperator::new(&b"\nyes\n\n"[..]);

    operator.confirm("Ready").await.unwrap();
    operator.confirm("RESET p200 TIPS").await.unwrap();
    operator.confirm("Move plate").await.unwrap();

    let err = operator.confirm("RESET p50 TIPS").await.unwrap_err();
    assert!(err.to_string().contains("input closed"));
}

#[tokio::test]
async fn test_piped_acknowledgements_carry_a_whole_run() {
    let deck = SimulatedDeck::default();
    let operator = ConsoleOperator::new(&b"\n\n"[..]);
    let drivers = DeckDrivers::simulated(&deck, Arc::new(operator));

    let report = run(dry_run(), drivers).await.unwrap();
    assert_eq!(report.cycles_completed, 1);
    assert_eq!(report.rack_resets, 1);
}

#[tokio::test]
async fn test_run_halts_when_acknowledgements_run_out() {
    let deck = SimulatedDeck::default();
    let operator = ConsoleOperator::new(&b"\n"[..]);
    let drivers = DeckDrivers::simulated(&deck, Arc::new(operator));

    let err = run(dry_run(), drivers).await.unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::Operator { ref prompt, .. } if prompt == "RESET p200 TIPS"
    ));
}

// ============================================================================
// CHANNEL
// ============================================================================

#[tokio::test]
async fn test_channel_forwards_prompts_in_order() {
    let (operator, mut handle) = ChannelOperator::new();

    let harness = tokio::spawn(async move {
        let mut seen = Vec::new();
        while let Some(prompt) = handle.next_prompt().await {
            seen.push(prompt);
            handle.acknowledge().await.unwrap();
        }
        seen
    });

    operator.confirm("Ready").await.unwrap();
    operator.confirm("RESET p200 TIPS").await.unwrap();
    drop(operator);

    assert_eq!(
        harness.await.unwrap(),
        vec!["Ready".to_string(), "RESET p200 TIPS".to_string()]
    );
}
