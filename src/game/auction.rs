//! Common-value second-price auction
//!
//! Every group shares one hidden item value. Players see a noisy private
//! estimate, bid once, and the highest bidder wins. The winner's payoff is the
//! item value minus the second-highest distinct bid, which can be negative when
//! the group overestimates the item.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use uuid::Uuid;

use super::{ensure_group_size, Currency, ParticipantId, SettlementError};

/// Bid bounds and estimate noise
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AuctionConfig {
    pub bid_min: Currency,
    pub bid_max: Currency,
    /// Half-width of the uniform noise added to estimates
    pub bid_noise: Currency,
}

impl AuctionConfig {
    pub fn contains(&self, bid: Currency) -> bool {
        bid.is_finite() && bid >= self.bid_min && bid <= self.bid_max
    }
}

impl Default for AuctionConfig {
    fn default() -> Self {
        Self {
            bid_min: Currency::ZERO,
            bid_max: Currency::new(25.0),
            bid_noise: Currency::new(1.5),
        }
    }
}

/// Draw the common item value uniformly from `[bid_min, bid_max]`, one decimal
pub fn draw_item_value<R: Rng + ?Sized>(config: &AuctionConfig, rng: &mut R) -> Currency {
    let value = rng.gen_range(config.bid_min.amount()..=config.bid_max.amount());
    Currency::new(value).round_to(1)
}

/// Noisy private estimate of `item_value`, kept inside the bid bounds
pub fn generate_value_estimate<R: Rng + ?Sized>(
    item_value: Currency,
    config: &AuctionConfig,
    rng: &mut R,
) -> Currency {
    let noise = config.bid_noise.amount();
    let drawn = if noise > 0.0 {
        rng.gen_range(-noise..=noise)
    } else {
        0.0
    };
    (item_value + Currency::new(drawn))
        .round_to(1)
        .clamp(config.bid_min, config.bid_max)
}

#[derive(Debug, Clone)]
pub struct AuctionPlayer {
    pub participant: ParticipantId,
    pub item_value_estimate: Currency,
    pub bid_amount: Option<Currency>,
    pub is_winner: bool,
    pub payoff: Option<Currency>,
}

/// One auction group. `item_value` is drawn once at creation and never changes.
#[derive(Debug, Clone)]
pub struct AuctionGroup {
    pub id: Uuid,
    item_value: Currency,
    pub highest_bid: Option<Currency>,
    pub highest_bid_holder: Option<ParticipantId>,
    pub players: Vec<AuctionPlayer>,
}

impl AuctionGroup {
    /// Draw the item value, then an independent estimate for every member
    pub fn new<R: Rng + ?Sized>(
        id: Uuid,
        config: &AuctionConfig,
        rng: &mut R,
        participants: impl IntoIterator<Item = ParticipantId>,
    ) -> Self {
        let item_value = draw_item_value(config, rng);
        let players = participants
            .into_iter()
            .map(|participant| AuctionPlayer {
                participant,
                item_value_estimate: generate_value_estimate(item_value, config, rng),
                bid_amount: None,
                is_winner: false,
                payoff: None,
            })
            .collect();

        Self::with_item_value(id, item_value, players)
    }

    pub fn with_item_value(id: Uuid, item_value: Currency, players: Vec<AuctionPlayer>) -> Self {
        Self {
            id,
            item_value,
            highest_bid: None,
            highest_bid_holder: None,
            players,
        }
    }

    pub fn item_value(&self) -> Currency {
        self.item_value
    }

    pub fn player_mut(&mut self, participant: ParticipantId) -> Option<&mut AuctionPlayer> {
        self.players.iter_mut().find(|p| p.participant == participant)
    }

    pub fn all_decided(&self) -> bool {
        self.players.iter().all(|p| p.bid_amount.is_some())
    }
}

/// Second-highest distinct bid.
///
/// Duplicates collapse before ranking, so `[10, 10, 7, 3]` yields 7. When every
/// bid is the same value that value is returned, and the winner then pays
/// against their own bid.
pub fn second_highest_bid(bids: &[Currency]) -> Option<Currency> {
    let mut distinct = bids.to_vec();
    distinct.sort_by(Currency::total_cmp);
    distinct.dedup();

    match distinct.as_slice() {
        [] => None,
        [only] => Some(*only),
        [.., second, _] => Some(*second),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BidResult {
    pub participant: ParticipantId,
    pub item_value_estimate: Currency,
    pub bid_amount: Currency,
    pub is_winner: bool,
    pub payoff: Currency,
    /// Bid above the true item value
    pub overbid: bool,
}

/// Frozen result of one settled auction group
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuctionOutcome {
    pub group_id: Uuid,
    pub item_value: Currency,
    pub highest_bid: Currency,
    pub second_highest_bid: Currency,
    pub winner: ParticipantId,
    pub players: Vec<BidResult>,
}

/// Pick the winner and compute payoffs once every member has bid.
///
/// Ties on the highest bid are broken uniformly with `rng`. The only random
/// draw here is that choice.
pub fn settle_auction<R: Rng + ?Sized>(
    group: &mut AuctionGroup,
    rng: &mut R,
) -> Result<AuctionOutcome, SettlementError> {
    ensure_group_size(group.id, group.players.len())?;

    let bids = group
        .players
        .iter()
        .map(|p| {
            p.bid_amount.ok_or(SettlementError::MissingDecision {
                group_id: group.id,
                participant: p.participant,
            })
        })
        .collect::<Result<Vec<Currency>, _>>()?;

    let no_winner = SettlementError::NoWinner { group_id: group.id };
    let highest = bids
        .iter()
        .copied()
        .max_by(Currency::total_cmp)
        .ok_or_else(|| no_winner.clone())?;

    let tied: Vec<usize> = bids
        .iter()
        .enumerate()
        .filter(|(_, bid)| **bid == highest)
        .map(|(index, _)| index)
        .collect();
    let winner_index = *tied.choose(rng).ok_or_else(|| no_winner.clone())?;
    let second_highest = second_highest_bid(&bids).ok_or(no_winner)?;

    let item_value = group.item_value;
    let winner = group.players[winner_index].participant;
    group.highest_bid = Some(highest);
    group.highest_bid_holder = Some(winner);

    let mut results = Vec::with_capacity(group.players.len());
    for (index, (player, bid)) in group.players.iter_mut().zip(bids).enumerate() {
        let is_winner = index == winner_index;
        let payoff = if is_winner {
            item_value - second_highest
        } else {
            Currency::ZERO
        };
        player.is_winner = is_winner;
        player.payoff = Some(payoff);

        results.push(BidResult {
            participant: player.participant,
            item_value_estimate: player.item_value_estimate,
            bid_amount: bid,
            is_winner,
            payoff,
            overbid: (item_value - bid).is_negative(),
        });
    }

    Ok(AuctionOutcome {
        group_id: group.id,
        item_value,
        highest_bid: highest,
        second_highest_bid: second_highest,
        winner,
        players: results,
    })
}
