//! Session host: group formation, decision barrier, round progression

pub mod grouping;
pub mod protocol;
pub mod registry;
pub mod results;
pub mod round;
pub mod service;

pub use grouping::GroupMatcher;
pub use protocol::{Decision, GameKind, GroupOutcome, RoundView, SessionEvent, SessionStatus};
pub use registry::RoundRegistry;
pub use results::{ParticipantResult, PayoffSink, ResultBoard};
pub use round::{GroupHandle, GroupRound, GroupState};
pub use service::{ParticipantStanding, SessionService, SessionSummary};

use std::time::Duration;

use uuid::Uuid;

use crate::game::{AuctionConfig, Currency, ParticipantId, PublicGoodsConfig};

/// Game constants and host policy applied to every new session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GameSettings {
    pub public_goods: PublicGoodsConfig,
    pub auction: AuctionConfig,
    /// Settle with default decisions once this elapses; `None` waits forever
    pub decision_timeout: Option<Duration>,
    /// Largest session a single request may create
    pub max_participants: usize,
}

/// Default ceiling on participants per session
pub const DEFAULT_MAX_PARTICIPANTS: usize = 300;

impl GameSettings {
    /// Group size for a game; `None` puts the whole session in one group
    pub fn group_size(&self, game: GameKind) -> Option<usize> {
        match game {
            GameKind::PublicGoods => Some(self.public_goods.group_size),
            GameKind::Auction => None,
        }
    }

    pub fn num_rounds(&self, game: GameKind) -> u32 {
        match game {
            GameKind::PublicGoods => self.public_goods.num_rounds,
            GameKind::Auction => 1,
        }
    }
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            public_goods: PublicGoodsConfig::default(),
            auction: AuctionConfig::default(),
            decision_timeout: None,
            max_participants: DEFAULT_MAX_PARTICIPANTS,
        }
    }
}

/// Decision rejected at submission time
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SubmitError {
    #[error("Participant {0} is not a member of this group")]
    NotInGroup(ParticipantId),

    #[error("This round plays {expected}, decision does not apply")]
    WrongGame { expected: GameKind },

    #[error("Contribution {amount} is outside 0..={endowment}")]
    ContributionOutOfBounds { amount: u32, endowment: u32 },

    #[error("Bid {amount} is outside {min}..={max}")]
    BidOutOfBounds {
        amount: Currency,
        min: Currency,
        max: Currency,
    },

    #[error("Participant {0} already decided this round")]
    AlreadySubmitted(ParticipantId),

    #[error("Round is closed for decisions")]
    RoundClosed,
}

/// Session-level errors surfaced to the host
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Unknown session {0}")]
    UnknownSession(Uuid),

    #[error("Participant {participant} is not part of session {session_id}")]
    UnknownParticipant {
        session_id: Uuid,
        participant: ParticipantId,
    },

    #[error("{participants} participants cannot be split into groups of {group_size}")]
    UnevenGroups {
        participants: usize,
        group_size: usize,
    },

    #[error("A group needs at least {required} participants, got {participants}")]
    NotEnoughParticipants { participants: usize, required: usize },

    #[error("Sessions are limited to {max} participants, got {participants}")]
    TooManyParticipants { participants: usize, max: usize },

    #[error("Participant {0} has no open round")]
    NoOpenRound(ParticipantId),

    #[error(transparent)]
    Submit(#[from] SubmitError),
}
