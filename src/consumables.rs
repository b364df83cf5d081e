// src/consumables.rs
//
// =============================================================================
// PREPFLOW: TIP INVENTORY (v 0.1 )
// =============================================================================
//
// The Tip Ledger.
//
// Responsibilities:
// 1. Count tip columns used per pipette class in the current rack set.
// 2. Reset the racks when a pool hits capacity (operator pause or automatic).
// 3. Hand out the reserved fixed tips in reuse mode, outside the counter.
//
// NOTE: fixed tips are exempt from exhaustion accounting. A pool with its
// fixed override engaged never triggers a reset, however often it is used.

use crate::config::RunConfig;
use crate::core::{PipetteClass, TipSlot};
use crate::drivers::{LiquidHandler, Operator};
use crate::error::{ProtocolError, ProtocolResult};
use crate::policy::RunPolicy;

use serde::Serialize;

// ============================================================================
// 1. FIXED TIPS (Reuse Mode)
// ============================================================================

/// Slots 200 uL racks keep back in reuse mode: ethanol dispense + 3 removal tips.
pub const TIP200_RESERVED: u32 = 4;
/// Slots 50 uL racks keep back in reuse mode: the RSB dispense tip.
pub const TIP50_RESERVED: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FixedTip {
    /// One tip dispenses ethanol to every column.
    EthanolDispense,
    /// One removal tip per sample column (0-based).
    EthanolRemoval(usize),
    RsbDispense,
}

impl FixedTip {
    pub fn class(&self) -> PipetteClass {
        match self {
            FixedTip::EthanolDispense | FixedTip::EthanolRemoval(_) => PipetteClass::Tip200,
            FixedTip::RsbDispense => PipetteClass::Tip50,
        }
    }

    /// The same fixed tip, specialised to one sample column where it matters.
    pub fn for_column(self, col: usize) -> FixedTip {
        match self {
            FixedTip::EthanolRemoval(_) => FixedTip::EthanolRemoval(col),
            other => other,
        }
    }

    /// Always in the first rack.
    pub fn slot(&self) -> TipSlot {
        match self {
            FixedTip::EthanolDispense | FixedTip::RsbDispense => TipSlot::from_index(0),
            FixedTip::EthanolRemoval(col) => TipSlot::from_index(1 + *col as u32),
        }
    }
}

// ============================================================================
// 2. THE POOL
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TipPool {
    pub class: PipetteClass,
    used: u32,
    capacity: u32,
    /// Leading slots held back for fixed tips.
    reserved: u32,
    racks_exhausted: u32,
    fixed_override: Option<TipSlot>,
}

impl TipPool {
    pub fn new(class: PipetteClass, capacity: u32) -> Self {
        Self::with_reserved(class, capacity, 0)
    }

    /// `slots` counts every tip column on deck; `reserved` of them are skipped.
    pub fn with_reserved(class: PipetteClass, slots: u32, reserved: u32) -> Self {
        Self {
            class,
            used: 0,
            capacity: slots.saturating_sub(reserved),
            reserved,
            racks_exhausted: 0,
            fixed_override: None,
        }
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn racks_exhausted(&self) -> u32 {
        self.racks_exhausted
    }

    pub fn is_exhausted(&self) -> bool {
        self.used >= self.capacity
    }

    /// Next fresh slot. The only place the counter moves up.
    fn take(&mut self) -> ProtocolResult<TipSlot> {
        if self.is_exhausted() {
            return Err(ProtocolError::ConsumableExhausted {
                class: self.class,
                used: self.used,
                capacity: self.capacity,
            });
        }
        let slot = TipSlot::from_index(self.reserved + self.used);
        self.used += 1;
        Ok(slot)
    }

    fn reset(&mut self) {
        self.used = 0;
        self.racks_exhausted += 1;
    }

    /// Fresh tips taken over the whole run, fixed tips excluded.
    pub fn total_consumed(&self) -> u32 {
        self.used + self.capacity * self.racks_exhausted
    }
}

// ============================================================================
// 3. THE TRACKER
// ============================================================================

/// What `acquire` hands back: the slot to pick up and whether it is a fixed tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TipLease {
    pub class: PipetteClass,
    pub slot: TipSlot,
    pub fixed: bool,
}

/// The collaborators a rack reset needs.
pub struct RackHooks<'a> {
    pub operator: &'a dyn Operator,
    pub liquid: &'a dyn LiquidHandler,
}

#[derive(Debug, Clone, Serialize)]
pub struct TipTracker {
    tip50: TipPool,
    tip200: TipPool,
    pause_for_reset: bool,
    resets: u32,
}

impl TipTracker {
    pub fn new(tip50: TipPool, tip200: TipPool, pause_for_reset: bool) -> Self {
        Self {
            tip50,
            tip200,
            pause_for_reset,
            resets: 0,
        }
    }

    pub fn from_config(cfg: &RunConfig, policy: &RunPolicy) -> Self {
        let (r50, r200) = if policy.reuse_fixed_tips {
            (TIP50_RESERVED, TIP200_RESERVED)
        } else {
            (0, 0)
        };
        let pool = |class, reserved| {
            TipPool::with_reserved(class, cfg.tip_racks.capacity(class), reserved)
        };
        Self::new(
            pool(PipetteClass::Tip50, r50),
            pool(PipetteClass::Tip200, r200),
            policy.pauses_for_tip_reset(),
        )
    }

    pub fn pool(&self, class: PipetteClass) -> &TipPool {
        match class {
            PipetteClass::Tip50 => &self.tip50,
            PipetteClass::Tip200 => &self.tip200,
        }
    }

    fn pool_mut(&mut self, class: PipetteClass) -> &mut TipPool {
        match class {
            PipetteClass::Tip50 => &mut self.tip50,
            PipetteClass::Tip200 => &mut self.tip200,
        }
    }

    /// Rack resets over the run, both classes.
    pub fn resets(&self) -> u32 {
        self.resets
    }

    /// Routes every following `acquire` of this class to the fixed slot.
    pub fn engage_fixed(&mut self, tip: FixedTip) {
        self.pool_mut(tip.class()).fixed_override = Some(tip.slot());
    }

    pub fn release_fixed(&mut self, class: PipetteClass) {
        self.pool_mut(class).fixed_override = None;
    }

    /// Resets the racks if the pool is at capacity. Returns whether it did.
    pub async fn check_and_reset(
        &mut self,
        class: PipetteClass,
        hooks: &RackHooks<'_>,
    ) -> ProtocolResult<bool> {
        let pool = self.pool(class);
        if pool.fixed_override.is_some() || !pool.is_exhausted() {
            return Ok(false);
        }

        log::warn!(
            "🧺 {} racks exhausted ({}/{}), resetting",
            class,
            pool.used,
            pool.capacity
        );

        if self.pause_for_reset {
            let prompt = format!("RESET {} TIPS", class);
            hooks
                .operator
                .confirm(&prompt)
                .await
                .map_err(|e| ProtocolError::Operator {
                    prompt,
                    reason: format!("{e:#}"),
                })?;
        }
        hooks
            .liquid
            .reset_tipracks(class)
            .await
            .map_err(|e| ProtocolError::Transfer {
                step: format!("reset {} tip racks", class),
                reason: format!("{e:#}"),
            })?;

        self.pool_mut(class).reset();
        self.resets += 1;
        Ok(true)
    }

    pub async fn acquire(
        &mut self,
        class: PipetteClass,
        hooks: &RackHooks<'_>,
    ) -> ProtocolResult<TipLease> {
        if let Some(slot) = self.pool(class).fixed_override {
            return Ok(TipLease {
                class,
                slot,
                fixed: true,
            });
        }

        self.check_and_reset(class, hooks).await?;
        let slot = self.pool_mut(class).take()?;
        log::debug!("{} tip from {}", class, slot);
        Ok(TipLease {
            class,
            slot,
            fixed: false,
        })
    }
}
