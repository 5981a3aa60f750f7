//! Payoff sink: where settled outcomes end up

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::game::{Currency, ParticipantId};

use super::protocol::GroupOutcome;

/// Consumer of settled group outcomes
pub trait PayoffSink: Send + Sync {
    fn record(&self, session_id: Uuid, round: u32, outcome: &GroupOutcome);
}

/// One participant's payoff for one round
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParticipantResult {
    pub round: u32,
    pub group_id: Uuid,
    pub payoff: Currency,
    pub is_winner: bool,
    pub settled_at: DateTime<Utc>,
}

/// In-memory result rows per session and participant
#[derive(Default)]
pub struct ResultBoard {
    rows: DashMap<(Uuid, ParticipantId), Vec<ParticipantResult>>,
}

impl ResultBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settled rounds for a participant, oldest first
    pub fn results_for(&self, session_id: Uuid, participant: ParticipantId) -> Vec<ParticipantResult> {
        self.rows
            .get(&(session_id, participant))
            .map(|rows| rows.value().clone())
            .unwrap_or_default()
    }

    pub fn payoff_sum(&self, session_id: Uuid, participant: ParticipantId) -> Currency {
        self.results_for(session_id, participant)
            .iter()
            .map(|r| r.payoff)
            .sum()
    }
}

impl PayoffSink for ResultBoard {
    fn record(&self, session_id: Uuid, round: u32, outcome: &GroupOutcome) {
        let settled_at = Utc::now();
        let group_id = outcome.group_id();

        for line in outcome.payoffs() {
            info!(
                session_id = %session_id,
                round,
                group_id = %group_id,
                participant = %line.participant,
                payoff = %line.payoff,
                is_winner = line.is_winner,
                "Payoff recorded"
            );

            self.rows
                .entry((session_id, line.participant))
                .or_default()
                .push(ParticipantResult {
                    round,
                    group_id,
                    payoff: line.payoff,
                    is_winner: line.is_winner,
                    settled_at,
                });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::public_goods::{ContributionResult, PublicGoodsOutcome};

    fn outcome(round: u32, payoffs: &[(ParticipantId, f64)]) -> GroupOutcome {
        GroupOutcome::PublicGoods(PublicGoodsOutcome {
            group_id: Uuid::new_v4(),
            round,
            mpcr: 3.0,
            total_contribution: 0,
            players: payoffs
                .iter()
                .map(|(participant, payoff)| ContributionResult {
                    participant: *participant,
                    contribution: 0,
                    payoff: Currency::new(*payoff),
                    total_earnings: Currency::new(*payoff),
                })
                .collect(),
        })
    }

    #[test]
    fn keeps_rows_per_session_and_participant() {
        let board = ResultBoard::new();
        let session = Uuid::new_v4();
        let other_session = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        board.record(session, 1, &outcome(1, &[(alice, 260.0), (bob, 260.0)]));
        board.record(session, 2, &outcome(2, &[(alice, 150.0), (bob, 90.0)]));
        board.record(other_session, 1, &outcome(1, &[(alice, 1.0), (bob, 1.0)]));

        let rows = board.results_for(session, alice);
        assert_eq!(rows.iter().map(|r| r.round).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(board.payoff_sum(session, alice), Currency::new(410.0));
        assert_eq!(board.payoff_sum(session, bob), Currency::new(350.0));
        assert_eq!(board.payoff_sum(other_session, alice), Currency::new(1.0));
        assert!(board.results_for(Uuid::new_v4(), alice).is_empty());
    }
}
