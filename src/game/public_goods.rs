//! Public goods contribution game: MPCR schedule and per-round settlement

use serde::Serialize;
use uuid::Uuid;

use super::ledger::EarningsLedger;
use super::{ensure_group_size, Currency, ParticipantId, SettlementError};

/// Marginal per-capita return applied per round
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MpcrSchedule {
    pub round_one: f64,
    pub round_two: f64,
    /// Applies to round 3 and every round after it
    pub later_rounds: f64,
}

impl MpcrSchedule {
    pub fn rate_for_round(&self, round: u32) -> f64 {
        match round {
            1 => self.round_one,
            2 => self.round_two,
            _ => self.later_rounds,
        }
    }
}

impl Default for MpcrSchedule {
    fn default() -> Self {
        Self {
            round_one: 3.0,
            round_two: 5.0,
            later_rounds: 10.0,
        }
    }
}

/// Game constants for the public goods game
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PublicGoodsConfig {
    pub endowment: u32,
    pub schedule: MpcrSchedule,
    pub num_rounds: u32,
    pub group_size: usize,
}

impl Default for PublicGoodsConfig {
    fn default() -> Self {
        Self {
            endowment: 100,
            schedule: MpcrSchedule::default(),
            num_rounds: 3,
            group_size: 3,
        }
    }
}

/// One participant's record for a single round
#[derive(Debug, Clone)]
pub struct PublicGoodsPlayer {
    pub participant: ParticipantId,
    /// Bounded to `0..=endowment` at submission time
    pub contribution: Option<u32>,
    pub payoff: Option<Currency>,
}

impl PublicGoodsPlayer {
    pub fn new(participant: ParticipantId) -> Self {
        Self {
            participant,
            contribution: None,
            payoff: None,
        }
    }
}

/// A group for one round; the MPCR is fixed at creation
#[derive(Debug, Clone)]
pub struct PublicGoodsGroup {
    pub id: Uuid,
    pub round: u32,
    mpcr: f64,
    pub players: Vec<PublicGoodsPlayer>,
}

impl PublicGoodsGroup {
    pub fn new(
        id: Uuid,
        round: u32,
        schedule: &MpcrSchedule,
        participants: impl IntoIterator<Item = ParticipantId>,
    ) -> Self {
        Self {
            id,
            round,
            mpcr: schedule.rate_for_round(round),
            players: participants
                .into_iter()
                .map(PublicGoodsPlayer::new)
                .collect(),
        }
    }

    pub fn mpcr(&self) -> f64 {
        self.mpcr
    }

    pub fn player_mut(&mut self, participant: ParticipantId) -> Option<&mut PublicGoodsPlayer> {
        self.players.iter_mut().find(|p| p.participant == participant)
    }

    pub fn all_decided(&self) -> bool {
        self.players.iter().all(|p| p.contribution.is_some())
    }
}

/// Reset the running totals when a session starts over at round 1
pub fn initialize_earnings<L: EarningsLedger + ?Sized>(
    round: u32,
    participants: &[ParticipantId],
    ledger: &L,
) {
    if round == 1 {
        for participant in participants {
            ledger.reset(*participant);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContributionResult {
    pub participant: ParticipantId,
    pub contribution: u32,
    pub payoff: Currency,
    pub total_earnings: Currency,
}

/// Frozen result of one settled public goods group
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublicGoodsOutcome {
    pub group_id: Uuid,
    pub round: u32,
    pub mpcr: f64,
    pub total_contribution: u32,
    pub players: Vec<ContributionResult>,
}

/// Settle a group once every member has contributed.
///
/// `payoff = endowment - contribution + total_contribution * mpcr`, and each
/// payoff is added to the participant's ledger total. Contributions are
/// trusted as submitted; nothing is clamped here.
pub fn settle_public_goods<L: EarningsLedger + ?Sized>(
    group: &mut PublicGoodsGroup,
    config: &PublicGoodsConfig,
    ledger: &L,
) -> Result<PublicGoodsOutcome, SettlementError> {
    ensure_group_size(group.id, group.players.len())?;

    let contributions = group
        .players
        .iter()
        .map(|p| {
            p.contribution.ok_or(SettlementError::MissingDecision {
                group_id: group.id,
                participant: p.participant,
            })
        })
        .collect::<Result<Vec<u32>, _>>()?;

    let total_contribution: u32 = contributions.iter().sum();
    let share = Currency::from(total_contribution) * group.mpcr;
    let endowment = Currency::from(config.endowment);

    let mut results = Vec::with_capacity(group.players.len());
    for (player, contribution) in group.players.iter_mut().zip(contributions) {
        let payoff = endowment - Currency::from(contribution) + share;
        player.payoff = Some(payoff);
        ledger.add(player.participant, payoff);

        results.push(ContributionResult {
            participant: player.participant,
            contribution,
            payoff,
            total_earnings: ledger.total(player.participant),
        });
    }

    Ok(PublicGoodsOutcome {
        group_id: group.id,
        round: group.round,
        mpcr: group.mpcr,
        total_contribution,
        players: results,
    })
}
