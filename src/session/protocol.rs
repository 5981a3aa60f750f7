//! Wire types shared by the session host and the HTTP API

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::{AuctionOutcome, Currency, ParticipantId, PublicGoodsOutcome};

/// Which experiment a session runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameKind {
    /// Contribute to a shared pot multiplied by the round's MPCR
    PublicGoods,
    /// Bid on an item of unknown common value, second price
    Auction,
}

impl GameKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PublicGoods => "public_goods",
            Self::Auction => "auction",
        }
    }
}

impl fmt::Display for GameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A participant's decision for the current round
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Decision {
    /// Amount of the endowment put into the group pot
    Contribution { amount: u32 },
    /// Sealed bid for the auctioned item
    Bid { amount: Currency },
}

impl Decision {
    pub fn game(&self) -> GameKind {
        match self {
            Self::Contribution { .. } => GameKind::PublicGoods,
            Self::Bid { .. } => GameKind::Auction,
        }
    }
}

/// What a participant is allowed to see while deciding
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "game", rename_all = "snake_case")]
pub enum RoundView {
    PublicGoods {
        round: u32,
        group_id: Uuid,
        endowment: u32,
        mpcr: f64,
        group_size: usize,
    },
    Auction {
        round: u32,
        group_id: Uuid,
        /// Private, differs between members of the same group
        item_value_estimate: Currency,
        bid_min: Currency,
        bid_max: Currency,
    },
}

/// Settled result of one group
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "game", rename_all = "snake_case")]
pub enum GroupOutcome {
    PublicGoods(PublicGoodsOutcome),
    Auction(AuctionOutcome),
}

/// Payoff line for one participant, extracted from a group outcome
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PayoffLine {
    pub participant: ParticipantId,
    pub payoff: Currency,
    pub is_winner: bool,
}

impl GroupOutcome {
    pub fn group_id(&self) -> Uuid {
        match self {
            Self::PublicGoods(outcome) => outcome.group_id,
            Self::Auction(outcome) => outcome.group_id,
        }
    }

    pub fn game(&self) -> GameKind {
        match self {
            Self::PublicGoods(_) => GameKind::PublicGoods,
            Self::Auction(_) => GameKind::Auction,
        }
    }

    pub fn payoffs(&self) -> Vec<PayoffLine> {
        match self {
            Self::PublicGoods(outcome) => outcome
                .players
                .iter()
                .map(|p| PayoffLine {
                    participant: p.participant,
                    payoff: p.payoff,
                    is_winner: false,
                })
                .collect(),
            Self::Auction(outcome) => outcome
                .players
                .iter()
                .map(|p| PayoffLine {
                    participant: p.participant,
                    payoff: p.payoff,
                    is_winner: p.is_winner,
                })
                .collect(),
        }
    }
}

/// Session lifecycle, published on a watch channel
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    /// Groups of `round` are open for decisions
    Collecting { round: u32 },
    Finished { rounds: u32 },
    Failed { round: u32, reason: String },
}

/// Session events, broadcast to observers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    RoundStarted { round: u32, groups: usize },
    GroupSettled { round: u32, outcome: GroupOutcome },
    SessionFinished { rounds: u32 },
    SessionFailed { round: u32, reason: String },
}
