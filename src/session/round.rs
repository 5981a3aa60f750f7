//! Per-group decision barrier
//!
//! Each group of a round runs as its own task. The task owns the group record
//! and collects decisions from an mpsc channel until every member has decided
//! (or the decision timeout fills in defaults), then settles exactly once and
//! returns the outcome. The task consumes itself, so a group can never be
//! settled twice.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::game::auction::{settle_auction, AuctionConfig, AuctionGroup};
use crate::game::public_goods::{settle_public_goods, PublicGoodsConfig, PublicGoodsGroup};
use crate::game::{Currency, EarningsLedger, ParticipantId, SettlementError};

use super::protocol::{Decision, GameKind, GroupOutcome, RoundView};
use super::SubmitError;

/// Group record plus the constants it is settled with
#[derive(Debug, Clone)]
pub enum GroupState {
    PublicGoods {
        group: PublicGoodsGroup,
        config: PublicGoodsConfig,
    },
    Auction {
        group: AuctionGroup,
        config: AuctionConfig,
    },
}

impl GroupState {
    pub fn id(&self) -> Uuid {
        match self {
            Self::PublicGoods { group, .. } => group.id,
            Self::Auction { group, .. } => group.id,
        }
    }

    pub fn game(&self) -> GameKind {
        match self {
            Self::PublicGoods { .. } => GameKind::PublicGoods,
            Self::Auction { .. } => GameKind::Auction,
        }
    }

    pub fn members(&self) -> Vec<ParticipantId> {
        match self {
            Self::PublicGoods { group, .. } => group.players.iter().map(|p| p.participant).collect(),
            Self::Auction { group, .. } => group.players.iter().map(|p| p.participant).collect(),
        }
    }

    /// Private per-member view for the decision screen
    pub fn views(&self, round: u32) -> HashMap<ParticipantId, RoundView> {
        match self {
            Self::PublicGoods { group, config } => group
                .players
                .iter()
                .map(|p| {
                    let view = RoundView::PublicGoods {
                        round,
                        group_id: group.id,
                        endowment: config.endowment,
                        mpcr: group.mpcr(),
                        group_size: group.players.len(),
                    };
                    (p.participant, view)
                })
                .collect(),
            Self::Auction { group, config } => group
                .players
                .iter()
                .map(|p| {
                    let view = RoundView::Auction {
                        round,
                        group_id: group.id,
                        item_value_estimate: p.item_value_estimate,
                        bid_min: config.bid_min,
                        bid_max: config.bid_max,
                    };
                    (p.participant, view)
                })
                .collect(),
        }
    }

    /// Validate and store one decision
    pub fn record(&mut self, participant: ParticipantId, decision: Decision) -> Result<(), SubmitError> {
        match (self, decision) {
            (Self::PublicGoods { group, config }, Decision::Contribution { amount }) => {
                let player = group
                    .player_mut(participant)
                    .ok_or(SubmitError::NotInGroup(participant))?;
                if player.contribution.is_some() {
                    return Err(SubmitError::AlreadySubmitted(participant));
                }
                if amount > config.endowment {
                    return Err(SubmitError::ContributionOutOfBounds {
                        amount,
                        endowment: config.endowment,
                    });
                }
                player.contribution = Some(amount);
                Ok(())
            }
            (Self::Auction { group, config }, Decision::Bid { amount }) => {
                let player = group
                    .player_mut(participant)
                    .ok_or(SubmitError::NotInGroup(participant))?;
                if player.bid_amount.is_some() {
                    return Err(SubmitError::AlreadySubmitted(participant));
                }
                if !config.contains(amount) {
                    return Err(SubmitError::BidOutOfBounds {
                        amount,
                        min: config.bid_min,
                        max: config.bid_max,
                    });
                }
                player.bid_amount = Some(amount);
                Ok(())
            }
            (state, _) => Err(SubmitError::WrongGame {
                expected: state.game(),
            }),
        }
    }

    pub fn all_decided(&self) -> bool {
        match self {
            Self::PublicGoods { group, .. } => group.all_decided(),
            Self::Auction { group, .. } => group.all_decided(),
        }
    }

    /// Give every silent member the default decision; returns how many were filled
    pub fn fill_missing(&mut self) -> usize {
        match self {
            Self::PublicGoods { group, .. } => {
                let mut filled = 0;
                for player in group.players.iter_mut().filter(|p| p.contribution.is_none()) {
                    player.contribution = Some(0);
                    filled += 1;
                }
                filled
            }
            Self::Auction { group, config } => {
                let mut filled = 0;
                for player in group.players.iter_mut().filter(|p| p.bid_amount.is_none()) {
                    player.bid_amount = Some(default_bid(config));
                    filled += 1;
                }
                filled
            }
        }
    }

    pub fn settle<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        ledger: &dyn EarningsLedger,
    ) -> Result<GroupOutcome, SettlementError> {
        match self {
            Self::PublicGoods { group, config } => {
                settle_public_goods(group, config, ledger).map(GroupOutcome::PublicGoods)
            }
            Self::Auction { group, .. } => settle_auction(group, rng).map(GroupOutcome::Auction),
        }
    }
}

/// Decision routed to a group task, acknowledged once recorded or rejected
#[derive(Debug)]
pub struct DecisionInput {
    pub participant: ParticipantId,
    pub decision: Decision,
    pub ack: oneshot::Sender<Result<(), SubmitError>>,
}

/// Host-side handle to a running group
#[derive(Debug, Clone)]
pub struct GroupHandle {
    pub id: Uuid,
    pub round: u32,
    pub game: GameKind,
    pub members: Arc<Vec<ParticipantId>>,
    pub views: Arc<HashMap<ParticipantId, RoundView>>,
    pub decision_tx: mpsc::Sender<DecisionInput>,
    decided: Arc<AtomicUsize>,
}

impl GroupHandle {
    /// Decisions accepted so far
    pub fn decided(&self) -> usize {
        self.decided.load(Ordering::Relaxed)
    }

    pub fn is_open(&self) -> bool {
        !self.decision_tx.is_closed()
    }

    pub fn view_for(&self, participant: ParticipantId) -> Option<RoundView> {
        self.views.get(&participant).cloned()
    }

    /// Send a decision and wait until the group task accepted or rejected it
    pub async fn submit(
        &self,
        participant: ParticipantId,
        decision: Decision,
    ) -> Result<(), SubmitError> {
        if decision.game() != self.game {
            return Err(SubmitError::WrongGame {
                expected: self.game,
            });
        }

        let (ack, ack_rx) = oneshot::channel();
        self.decision_tx
            .send(DecisionInput {
                participant,
                decision,
                ack,
            })
            .await
            .map_err(|_| SubmitError::RoundClosed)?;

        ack_rx.await.map_err(|_| SubmitError::RoundClosed)?
    }
}

/// The barrier task for one group in one round
pub struct GroupRound {
    round: u32,
    state: GroupState,
    rng: ChaCha8Rng,
    decision_rx: mpsc::Receiver<DecisionInput>,
    ledger: Arc<dyn EarningsLedger>,
    decision_timeout: Option<Duration>,
    decided: Arc<AtomicUsize>,
}

impl GroupRound {
    pub fn new(
        round: u32,
        state: GroupState,
        seed: u64,
        ledger: Arc<dyn EarningsLedger>,
        decision_timeout: Option<Duration>,
    ) -> (Self, GroupHandle) {
        let members = state.members();
        let (decision_tx, decision_rx) = mpsc::channel(members.len().max(1) * 2);
        let decided = Arc::new(AtomicUsize::new(0));

        let handle = GroupHandle {
            id: state.id(),
            round,
            game: state.game(),
            views: Arc::new(state.views(round)),
            members: Arc::new(members),
            decision_tx,
            decided: decided.clone(),
        };

        let group_round = Self {
            round,
            state,
            rng: ChaCha8Rng::seed_from_u64(seed),
            decision_rx,
            ledger,
            decision_timeout,
            decided,
        };

        (group_round, handle)
    }

    /// Collect decisions until every member decided, then settle once
    pub async fn run(mut self) -> Result<GroupOutcome, SettlementError> {
        let group_id = self.state.id();
        let round = self.round;
        info!(group_id = %group_id, round, game = %self.state.game(), "Collecting decisions");

        let deadline = self.decision_timeout.map(|timeout| Instant::now() + timeout);

        while !self.state.all_decided() {
            let next = match deadline {
                Some(deadline) => match timeout_at(deadline, self.decision_rx.recv()).await {
                    Ok(next) => next,
                    Err(_) => {
                        let filled = self.state.fill_missing();
                        warn!(group_id = %group_id, round, filled, "Decision timeout, using defaults");
                        break;
                    }
                },
                None => self.decision_rx.recv().await,
            };

            let Some(input) = next else {
                warn!(group_id = %group_id, round, "Decision channel closed before all members decided");
                break;
            };

            let result = self.state.record(input.participant, input.decision);
            match &result {
                Ok(()) => {
                    let decided = self.decided.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!(group_id = %group_id, participant = %input.participant, decided, "Decision recorded");
                }
                Err(e) => {
                    debug!(group_id = %group_id, participant = %input.participant, error = %e, "Decision rejected");
                }
            }
            let _ = input.ack.send(result);
        }

        // Anything still queued is answered with RoundClosed when the receiver drops
        self.decision_rx.close();

        let outcome = self.state.settle(&mut self.rng, self.ledger.as_ref())?;
        info!(group_id = %group_id, round, "Group settled");
        Ok(outcome)
    }
}

/// Default settlement value for silent auction members
pub fn default_bid(config: &AuctionConfig) -> Currency {
    config.bid_min
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::public_goods::MpcrSchedule;
    use crate::game::InMemoryLedger;

    fn public_goods_round(
        members: &[ParticipantId],
        timeout: Option<Duration>,
    ) -> (GroupRound, GroupHandle, Arc<InMemoryLedger>) {
        let group = PublicGoodsGroup::new(
            Uuid::new_v4(),
            1,
            &MpcrSchedule::default(),
            members.iter().copied(),
        );
        let ledger = Arc::new(InMemoryLedger::new());
        let state = GroupState::PublicGoods {
            group,
            config: PublicGoodsConfig::default(),
        };
        let (round, handle) = GroupRound::new(1, state, 7, ledger.clone(), timeout);
        (round, handle, ledger)
    }

    fn members(n: usize) -> Vec<ParticipantId> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    #[tokio::test]
    async fn settles_only_after_every_member_decided() {
        let people = members(3);
        let (round, handle, ledger) = public_goods_round(&people, None);
        let task = tokio::spawn(round.run());

        for participant in &people[..2] {
            tokio_test::assert_ok!(
                handle
                    .submit(*participant, Decision::Contribution { amount: 20 })
                    .await
            );
        }
        assert_eq!(handle.decided(), 2);
        assert!(!task.is_finished());
        assert!(ledger.participants() == 0);

        tokio_test::assert_ok!(
            handle
                .submit(people[2], Decision::Contribution { amount: 20 })
                .await
        );
        let outcome = task.await.unwrap().unwrap();

        match outcome {
            GroupOutcome::PublicGoods(outcome) => {
                assert_eq!(outcome.total_contribution, 60);
                assert!(outcome.players.iter().all(|p| p.payoff == Currency::new(260.0)));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(ledger.total(people[0]), Currency::new(260.0));
    }

    #[test]
    fn record_refuses_decision_for_other_game() {
        let people = members(2);
        let config = AuctionConfig::default();
        let group = AuctionGroup::new(
            Uuid::new_v4(),
            &config,
            &mut ChaCha8Rng::seed_from_u64(3),
            people.iter().copied(),
        );
        let mut state = GroupState::Auction { group, config };

        assert_eq!(
            state.record(people[0], Decision::Contribution { amount: 1 }),
            Err(SubmitError::WrongGame {
                expected: GameKind::Auction
            })
        );
        assert!(!state.all_decided());
    }

    #[tokio::test]
    async fn rejects_duplicates_strangers_and_wrong_game() {
        let people = members(2);
        let (round, handle, _) = public_goods_round(&people, None);
        let task = tokio::spawn(round.run());

        tokio_test::assert_ok!(handle.submit(people[0], Decision::Contribution { amount: 5 }).await);
        assert_eq!(
            handle.submit(people[0], Decision::Contribution { amount: 9 }).await,
            Err(SubmitError::AlreadySubmitted(people[0]))
        );

        let stranger = Uuid::new_v4();
        assert_eq!(
            handle.submit(stranger, Decision::Contribution { amount: 5 }).await,
            Err(SubmitError::NotInGroup(stranger))
        );
        assert_eq!(
            handle
                .submit(people[1], Decision::Bid { amount: Currency::new(3.0) })
                .await,
            Err(SubmitError::WrongGame {
                expected: GameKind::PublicGoods
            })
        );
        assert_eq!(
            handle.submit(people[1], Decision::Contribution { amount: 101 }).await,
            Err(SubmitError::ContributionOutOfBounds {
                amount: 101,
                endowment: 100
            })
        );

        tokio_test::assert_ok!(handle.submit(people[1], Decision::Contribution { amount: 100 }).await);
        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome.payoffs().len(), 2);

        // The barrier is gone once the group settled
        assert_eq!(
            handle.submit(people[1], Decision::Contribution { amount: 1 }).await,
            Err(SubmitError::RoundClosed)
        );
        assert!(!handle.is_open());
    }

    #[tokio::test]
    async fn timeout_settles_with_default_decisions() {
        let people = members(3);
        let (round, handle, _) = public_goods_round(&people, Some(Duration::from_millis(50)));
        let task = tokio::spawn(round.run());

        tokio_test::assert_ok!(handle.submit(people[0], Decision::Contribution { amount: 30 }).await);

        let outcome = task.await.unwrap().unwrap();
        match outcome {
            GroupOutcome::PublicGoods(outcome) => {
                assert_eq!(outcome.total_contribution, 30);
                let contributions: Vec<u32> = outcome.players.iter().map(|p| p.contribution).collect();
                assert_eq!(contributions, vec![30, 0, 0]);
                // 100 - 30 + 3 * 30 and 100 - 0 + 3 * 30
                assert_eq!(outcome.players[0].payoff, Currency::new(160.0));
                assert_eq!(outcome.players[1].payoff, Currency::new(190.0));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn closed_channel_surfaces_missing_decision() {
        let people = members(2);
        let (round, handle, _) = public_goods_round(&people, None);
        drop(handle);

        let err = round.run().await.unwrap_err();
        assert!(matches!(err, SettlementError::MissingDecision { .. }));
    }

    #[tokio::test]
    async fn auction_bids_are_bounded_and_settled() {
        let people = members(3);
        let config = AuctionConfig::default();
        let mut rng = ChaCha8Rng::seed_from_u64(17);
        let group = AuctionGroup::new(Uuid::new_v4(), &config, &mut rng, people.iter().copied());
        let item_value = group.item_value();
        let state = GroupState::Auction { group, config };
        let views = state.views(1);
        assert_eq!(views.len(), 3);

        let (round, handle) =
            GroupRound::new(1, state, 99, Arc::new(InMemoryLedger::new()), None);
        let task = tokio::spawn(round.run());

        assert!(matches!(
            handle.submit(people[0], Decision::Bid { amount: Currency::new(25.5) }).await,
            Err(SubmitError::BidOutOfBounds { .. })
        ));
        assert!(matches!(
            handle.submit(people[0], Decision::Bid { amount: Currency::new(f64::NAN) }).await,
            Err(SubmitError::BidOutOfBounds { .. })
        ));

        for (participant, bid) in people.iter().zip([18.0, 15.0, 3.0]) {
            tokio_test::assert_ok!(
                handle
                    .submit(*participant, Decision::Bid { amount: Currency::new(bid) })
                    .await
            );
        }

        match task.await.unwrap().unwrap() {
            GroupOutcome::Auction(outcome) => {
                assert_eq!(outcome.winner, people[0]);
                assert_eq!(outcome.players[0].payoff, item_value - Currency::new(15.0));
                assert_eq!(outcome.players[1].payoff, Currency::ZERO);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn silent_bidders_default_to_minimum_bid() {
        let config = AuctionConfig::default();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let people = members(2);
        let group = AuctionGroup::new(Uuid::new_v4(), &config, &mut rng, people.iter().copied());
        let mut state = GroupState::Auction { group, config };

        tokio_test::assert_ok!(state.record(people[0], Decision::Bid { amount: Currency::new(4.0) }));
        assert_eq!(state.fill_missing(), 1);
        assert!(state.all_decided());

        if let GroupState::Auction { group, .. } = &state {
            assert_eq!(group.players[1].bid_amount, Some(default_bid(&config)));
        }
    }
}
