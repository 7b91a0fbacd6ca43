//! Sequence-number (nonce) coordination for the funding account.
//!
//! The coordinator is owned by the dispatcher's single control flow. Numbers
//! for a whole batch are handed out synchronously before any transfer starts,
//! and the base only moves once the batch has been settled.

use crate::rpc::ChainClient;
use alloy::primitives::Address;
use anyhow::{bail, Context, Result};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Decides what happens to the sequence number of a transfer that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReservationPolicy {
    /// Every assigned number is spent, whatever the outcome.
    #[default]
    ReserveAlways,
    /// Numbers whose transfer never reached the network are handed out again,
    /// lowest first, so accepted transactions are not stranded behind a gap.
    ReserveOnAcceptance,
}

impl ReservationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationPolicy::ReserveAlways => "reserve-always",
            ReservationPolicy::ReserveOnAcceptance => "reserve-on-acceptance",
        }
    }
}

impl fmt::Display for ReservationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationPolicy {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "reserve-always" | "always" => Ok(ReservationPolicy::ReserveAlways),
            "reserve-on-acceptance" | "on-acceptance" => {
                Ok(ReservationPolicy::ReserveOnAcceptance)
            }
            other => bail!(
                "unknown reservation policy {other:?} (expected reserve-always or reserve-on-acceptance)"
            ),
        }
    }
}

#[derive(Debug)]
pub struct SequenceCoordinator {
    policy: ReservationPolicy,
    base: u64,
    released: BTreeSet<u64>,
    outstanding: Vec<u64>,
    fresh_in_flight: u64,
}

impl SequenceCoordinator {
    pub fn new(base: u64, policy: ReservationPolicy) -> Self {
        Self {
            policy,
            base,
            released: BTreeSet::new(),
            outstanding: Vec::new(),
            fresh_in_flight: 0,
        }
    }

    /// Seeds the coordinator from the chain's pending transaction count.
    pub async fn initialize<C>(
        client: &C,
        funding: Address,
        policy: ReservationPolicy,
    ) -> Result<Self>
    where
        C: ChainClient + ?Sized,
    {
        let base = client
            .pending_nonce(funding)
            .await
            .with_context(|| format!("failed to fetch pending nonce for {funding}"))?;
        tracing::info!(%funding, base, policy = %policy, "sequence coordinator initialized");
        Ok(Self::new(base, policy))
    }

    pub fn policy(&self) -> ReservationPolicy {
        self.policy
    }

    /// Next fresh number that has never been handed out.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Numbers released by failed transfers and not yet reassigned.
    pub fn released(&self) -> impl Iterator<Item = u64> + '_ {
        self.released.iter().copied()
    }

    /// Hands out `count` numbers in ascending order. Released numbers are
    /// reused first; the remainder continue from the base. Must be followed by
    /// [`Self::settle`] before the next call.
    pub fn assign(&mut self, count: usize) -> Vec<u64> {
        debug_assert!(
            self.outstanding.is_empty(),
            "previous batch must be settled before assigning again"
        );

        let mut numbers = Vec::with_capacity(count);
        while numbers.len() < count {
            match self.released.pop_first() {
                Some(number) => numbers.push(number),
                None => break,
            }
        }

        let fresh = count - numbers.len();
        numbers.extend((0..fresh as u64).map(|offset| self.base.saturating_add(offset)));

        self.fresh_in_flight = fresh as u64;
        self.outstanding = numbers.clone();
        numbers
    }

    /// Records how each outstanding number ended and advances the base past
    /// every fresh number of the batch. `consumed` is false only when the
    /// transfer provably never reached the network. A number may appear more
    /// than once when it was refilled inside the window; its last outcome wins.
    pub fn settle<I>(&mut self, outcomes: I)
    where
        I: IntoIterator<Item = (u64, bool)>,
    {
        let outstanding = std::mem::take(&mut self.outstanding);
        self.base = self.base.saturating_add(self.fresh_in_flight);
        self.fresh_in_flight = 0;

        if self.policy == ReservationPolicy::ReserveAlways {
            return;
        }

        for (number, consumed) in outcomes {
            if !outstanding.contains(&number) {
                continue;
            }
            if consumed {
                self.released.remove(&number);
            } else {
                self.released.insert(number);
            }
        }

        if !self.released.is_empty() {
            tracing::debug!(
                released = ?self.released,
                base = self.base,
                "sequence numbers released for reuse"
            );
        }
    }
}
