//! Cross-round earnings ledger keyed by participant

use dashmap::DashMap;

use super::{Currency, ParticipantId};

/// Running total of a participant's payoffs across the rounds of a session
pub trait EarningsLedger: Send + Sync {
    /// Add a round payoff to the participant's total
    fn add(&self, participant: ParticipantId, amount: Currency);

    /// Current total; participants never seen total zero
    fn total(&self, participant: ParticipantId) -> Currency;

    /// Start the participant over at zero (first round of a session)
    fn reset(&self, participant: ParticipantId);
}

/// Ledger held in memory for the lifetime of the process
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    totals: DashMap<ParticipantId, Currency>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn participants(&self) -> usize {
        self.totals.len()
    }
}

impl EarningsLedger for InMemoryLedger {
    fn add(&self, participant: ParticipantId, amount: Currency) {
        *self.totals.entry(participant).or_insert(Currency::ZERO) += amount;
    }

    fn total(&self, participant: ParticipantId) -> Currency {
        self.totals
            .get(&participant)
            .map(|entry| *entry.value())
            .unwrap_or(Currency::ZERO)
    }

    fn reset(&self, participant: ParticipantId) {
        self.totals.insert(participant, Currency::ZERO);
    }
}
