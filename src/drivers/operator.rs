// src/drivers/operator.rs
//
// =============================================================================
// PREPFLOW: OPERATOR CHANNELS (v 0.1 )
// =============================================================================
//
// Three ways a pause point can be acknowledged:
// 1. AutoConfirm:     pre-satisfied. Automated and stress runs never block.
// 2. ConsoleOperator: the person at the deck presses Enter.
// 3. ChannelOperator: an embedding harness acknowledges over a tokio channel.

use crate::drivers::Operator;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;

// ============================================================================
// 1. AUTO CONFIRM
// ============================================================================

/// Confirms immediately and remembers what it was asked.
#[derive(Debug, Clone, Default)]
pub struct AutoConfirm {
    prompts: Arc<Mutex<Vec<String>>>,
}

impl AutoConfirm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Operator for AutoConfirm {
    async fn confirm(&self, prompt: &str) -> Result<()> {
        log::info!("⏯️  {} (auto-confirmed)", prompt);
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt.to_string());
        Ok(())
    }
}

// ============================================================================
// 2. CONSOLE
// ============================================================================

/// One line of input acknowledges one prompt. The reader lives as long as the
/// operator, so piped acknowledgements are consumed in order.
pub struct ConsoleOperator<R = BufReader<Stdin>> {
    lines: tokio::sync::Mutex<Lines<R>>,
}

impl ConsoleOperator {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl<R: AsyncBufRead + Unpin> ConsoleOperator<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: tokio::sync::Mutex::new(reader.lines()),
        }
    }
}

#[async_trait]
impl<R> Operator for ConsoleOperator<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn confirm(&self, prompt: &str) -> Result<()> {
        eprintln!("⏸️  {} -- press Enter to continue", prompt);

        let mut lines = self.lines.lock().await;
        match lines.next_line().await? {
            Some(_) => Ok(()),
            None => Err(anyhow!("input closed while waiting for the operator")),
        }
    }
}

// ============================================================================
// 3. CHANNEL
// ============================================================================

/// Forwards each prompt out and blocks until one acknowledgement comes back.
pub struct ChannelOperator {
    prompts: mpsc::UnboundedSender<String>,
    acks: tokio::sync::Mutex<mpsc::Receiver<()>>,
}

/// The harness side of a `ChannelOperator`.
pub struct AckHandle {
    prompts: mpsc::UnboundedReceiver<String>,
    acks: mpsc::Sender<()>,
}

impl ChannelOperator {
    pub fn new() -> (Self, AckHandle) {
        let (prompt_tx, prompt_rx) = mpsc::unbounded_channel();
        let (ack_tx, ack_rx) = mpsc::channel(1);
        (
            Self {
                prompts: prompt_tx,
                acks: tokio::sync::Mutex::new(ack_rx),
            },
            AckHandle {
                prompts: prompt_rx,
                acks: ack_tx,
            },
        )
    }
}

#[async_trait]
impl Operator for ChannelOperator {
    async fn confirm(&self, prompt: &str) -> Result<()> {
        log::info!("⏸️  {} (waiting for acknowledgement)", prompt);
        self.prompts
            .send(prompt.to_string())
            .map_err(|_| anyhow!("acknowledgement handle dropped"))?;

        let mut acks = self.acks.lock().await;
        acks.recv()
            .await
            .ok_or_else(|| anyhow!("acknowledgement channel closed"))
    }
}

impl AckHandle {
    /// Waits for the next pause point. `None` once the operator side is gone.
    pub async fn next_prompt(&mut self) -> Option<String> {
        self.prompts.recv().await
    }

    pub async fn acknowledge(&self) -> Result<()> {
        self.acks
            .send(())
            .await
            .map_err(|_| anyhow!("operator no longer listening"))
    }
}
