//! Round settlement for the experiment games

pub mod auction;
pub mod currency;
pub mod ledger;
pub mod public_goods;

pub use auction::{AuctionConfig, AuctionGroup, AuctionOutcome};
pub use currency::Currency;
pub use ledger::{EarningsLedger, InMemoryLedger};
pub use public_goods::{MpcrSchedule, PublicGoodsConfig, PublicGoodsGroup, PublicGoodsOutcome};

use uuid::Uuid;

/// Persistent participant identity, stable across rounds of a session
pub type ParticipantId = Uuid;

/// Smallest group settlement will accept
pub const MIN_GROUP_SIZE: usize = 2;

/// Precondition violations detected while settling a group
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettlementError {
    #[error("Group {group_id} has {players} player(s), settlement needs at least 2")]
    TooFewPlayers { group_id: Uuid, players: usize },

    #[error("Participant {participant} in group {group_id} has no recorded decision")]
    MissingDecision {
        group_id: Uuid,
        participant: ParticipantId,
    },

    #[error("No winning bid could be determined for group {group_id}")]
    NoWinner { group_id: Uuid },
}

pub(crate) fn ensure_group_size(group_id: Uuid, players: usize) -> Result<(), SettlementError> {
    if players < MIN_GROUP_SIZE {
        return Err(SettlementError::TooFewPlayers { group_id, players });
    }
    Ok(())
}
