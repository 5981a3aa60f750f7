//! Session service - creates sessions and drives them round by round

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::game::auction::AuctionGroup;
use crate::game::public_goods::{initialize_earnings, PublicGoodsGroup};
use crate::game::{Currency, EarningsLedger, InMemoryLedger, ParticipantId};

use super::grouping::GroupMatcher;
use super::protocol::{Decision, GameKind, RoundView, SessionEvent, SessionStatus};
use super::registry::RoundRegistry;
use super::results::{ParticipantResult, PayoffSink, ResultBoard};
use super::round::{GroupRound, GroupState};
use super::{GameSettings, SessionError};

/// One running experiment session
pub struct Session {
    pub id: Uuid,
    pub game: GameKind,
    pub participants: Vec<ParticipantId>,
    pub num_rounds: u32,
    pub seed: u64,
    settings: GameSettings,
    groups: Vec<Vec<ParticipantId>>,
    rng: Mutex<ChaCha8Rng>,
    registry: RoundRegistry,
    status_tx: watch::Sender<SessionStatus>,
    events_tx: broadcast::Sender<SessionEvent>,
}

impl Session {
    fn new(
        game: GameKind,
        participants: Vec<ParticipantId>,
        seed: u64,
        settings: GameSettings,
    ) -> Result<Self, SessionError> {
        let groups = GroupMatcher::new(settings.group_size(game)).form_groups(&participants)?;
        let (status_tx, _) = watch::channel(SessionStatus::Pending);
        let (events_tx, _) = broadcast::channel(64);

        Ok(Self {
            id: Uuid::new_v4(),
            game,
            participants,
            num_rounds: settings.num_rounds(game),
            seed,
            settings,
            groups,
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
            registry: RoundRegistry::new(),
            status_tx,
            events_tx,
        })
    }

    pub fn status(&self) -> SessionStatus {
        self.status_tx.borrow().clone()
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.status(),
            SessionStatus::Pending | SessionStatus::Collecting { .. }
        )
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    pub fn contains(&self, participant: &ParticipantId) -> bool {
        self.participants.contains(participant)
    }

    /// Create and register this round's groups; item values, estimates and
    /// MPCR are fixed here, before any decision is accepted
    fn start_round(&self, round: u32, ledger: &Arc<dyn EarningsLedger>) -> Vec<GroupRound> {
        let mut rng = self.rng.lock();

        if self.game == GameKind::PublicGoods {
            initialize_earnings(round, &self.participants, ledger.as_ref());
        }

        let mut rounds = Vec::with_capacity(self.groups.len());
        for members in &self.groups {
            let group_id = Uuid::new_v4();
            let state = match self.game {
                GameKind::PublicGoods => GroupState::PublicGoods {
                    group: PublicGoodsGroup::new(
                        group_id,
                        round,
                        &self.settings.public_goods.schedule,
                        members.iter().copied(),
                    ),
                    config: self.settings.public_goods,
                },
                GameKind::Auction => GroupState::Auction {
                    group: AuctionGroup::new(
                        group_id,
                        &self.settings.auction,
                        &mut *rng,
                        members.iter().copied(),
                    ),
                    config: self.settings.auction,
                },
            };

            let (group_round, handle) = GroupRound::new(
                round,
                state,
                rng.gen(),
                ledger.clone(),
                self.settings.decision_timeout,
            );
            self.registry.insert(handle);
            rounds.push(group_round);
        }

        rounds
    }

    fn publish(&self, status: SessionStatus) {
        self.status_tx.send_replace(status);
    }

    fn emit(&self, event: SessionEvent) {
        // Nobody listening is fine
        let _ = self.events_tx.send(event);
    }
}

/// Run every round of a session to completion
async fn run_session(
    session: Arc<Session>,
    ledger: Arc<dyn EarningsLedger>,
    sink: Arc<dyn PayoffSink>,
) {
    info!(session_id = %session.id, game = %session.game, rounds = session.num_rounds, "Session started");

    for round in 1..=session.num_rounds {
        let group_rounds = session.start_round(round, &ledger);
        let groups = group_rounds.len();
        let running: Vec<_> = group_rounds
            .into_iter()
            .map(|group_round| tokio::spawn(group_round.run()))
            .collect();

        session.publish(SessionStatus::Collecting { round });
        session.emit(SessionEvent::RoundStarted { round, groups });
        info!(session_id = %session.id, round, groups, "Round open for decisions");

        let mut failure: Option<String> = None;
        for joined in join_all(running).await {
            match joined {
                Ok(Ok(outcome)) => {
                    sink.record(session.id, round, &outcome);
                    session.emit(SessionEvent::GroupSettled { round, outcome });
                }
                Ok(Err(e)) => {
                    error!(session_id = %session.id, round, error = %e, "Group settlement failed");
                    failure.get_or_insert_with(|| e.to_string());
                }
                Err(e) => {
                    error!(session_id = %session.id, round, error = %e, "Group task aborted");
                    failure.get_or_insert_with(|| e.to_string());
                }
            }
        }

        if let Some(reason) = failure {
            session.registry.clear();
            session.publish(SessionStatus::Failed {
                round,
                reason: reason.clone(),
            });
            session.emit(SessionEvent::SessionFailed { round, reason });
            return;
        }

        info!(session_id = %session.id, round, "Round settled");
    }

    session.registry.clear();
    session.publish(SessionStatus::Finished {
        rounds: session.num_rounds,
    });
    session.emit(SessionEvent::SessionFinished {
        rounds: session.num_rounds,
    });
    info!(session_id = %session.id, "Session finished");
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub game: GameKind,
    pub rounds: u32,
    pub seed: u64,
    pub participants: Vec<ParticipantId>,
    pub status: SessionStatus,
    /// Groups of the current round still waiting for decisions
    pub open_groups: usize,
}

impl From<&Session> for SessionSummary {
    fn from(session: &Session) -> Self {
        let status = session.status();
        let open_groups = match status {
            SessionStatus::Collecting { round } => session
                .registry
                .groups_for_round(round)
                .iter()
                .filter(|group| group.is_open())
                .count(),
            _ => 0,
        };

        Self {
            id: session.id,
            game: session.game,
            rounds: session.num_rounds,
            seed: session.seed,
            participants: session.participants.clone(),
            status,
            open_groups,
        }
    }
}

/// A participant's settled rounds and running total
#[derive(Debug, Clone, Serialize)]
pub struct ParticipantStanding {
    pub participant: ParticipantId,
    pub results: Vec<ParticipantResult>,
    pub total_earnings: Currency,
}

/// Owns sessions, the earnings ledger and the result board
pub struct SessionService {
    sessions: DashMap<Uuid, Arc<Session>>,
    ledger: Arc<InMemoryLedger>,
    results: Arc<ResultBoard>,
    settings: GameSettings,
}

impl SessionService {
    pub fn new(settings: GameSettings) -> Self {
        Self {
            sessions: DashMap::new(),
            ledger: Arc::new(InMemoryLedger::new()),
            results: Arc::new(ResultBoard::new()),
            settings,
        }
    }

    /// Create a session with fresh anonymous participants and start it.
    /// Must be called from within a Tokio runtime.
    pub fn create_session(
        &self,
        game: GameKind,
        participant_count: usize,
        seed: Option<u64>,
    ) -> Result<SessionSummary, SessionError> {
        if participant_count > self.settings.max_participants {
            return Err(SessionError::TooManyParticipants {
                participants: participant_count,
                max: self.settings.max_participants,
            });
        }

        let participants: Vec<ParticipantId> =
            (0..participant_count).map(|_| Uuid::new_v4()).collect();
        let seed = seed.unwrap_or_else(rand::random);
        let session = Arc::new(Session::new(game, participants, seed, self.settings)?);
        let summary = SessionSummary::from(session.as_ref());

        self.sessions.insert(session.id, session.clone());
        info!(
            session_id = %session.id,
            game = %game,
            participants = participant_count,
            seed,
            "Created session"
        );

        let ledger: Arc<dyn EarningsLedger> = self.ledger.clone();
        let sink: Arc<dyn PayoffSink> = self.results.clone();
        tokio::spawn(run_session(session, ledger, sink));

        Ok(summary)
    }

    pub fn session(&self, session_id: Uuid) -> Result<Arc<Session>, SessionError> {
        self.sessions
            .get(&session_id)
            .map(|s| s.value().clone())
            .ok_or(SessionError::UnknownSession(session_id))
    }

    pub fn summary(&self, session_id: Uuid) -> Result<SessionSummary, SessionError> {
        Ok(SessionSummary::from(self.session(session_id)?.as_ref()))
    }

    fn member_session(
        &self,
        session_id: Uuid,
        participant: ParticipantId,
    ) -> Result<Arc<Session>, SessionError> {
        let session = self.session(session_id)?;
        if !session.contains(&participant) {
            return Err(SessionError::UnknownParticipant {
                session_id,
                participant,
            });
        }
        Ok(session)
    }

    /// Route a decision to the participant's open group and wait for the ack
    pub async fn submit_decision(
        &self,
        session_id: Uuid,
        participant: ParticipantId,
        decision: Decision,
    ) -> Result<(), SessionError> {
        let session = self.member_session(session_id, participant)?;
        let group = session
            .registry
            .group_for(&participant)
            .ok_or(SessionError::NoOpenRound(participant))?;

        if let Err(e) = group.submit(participant, decision).await {
            warn!(session_id = %session_id, participant = %participant, error = %e, "Decision rejected");
            return Err(e.into());
        }
        Ok(())
    }

    /// What the participant sees for the round currently open
    pub fn participant_view(
        &self,
        session_id: Uuid,
        participant: ParticipantId,
    ) -> Result<RoundView, SessionError> {
        let session = self.member_session(session_id, participant)?;
        session
            .registry
            .group_for(&participant)
            .and_then(|group| group.view_for(participant))
            .ok_or(SessionError::NoOpenRound(participant))
    }

    pub fn participant_results(
        &self,
        session_id: Uuid,
        participant: ParticipantId,
    ) -> Result<ParticipantStanding, SessionError> {
        let session = self.member_session(session_id, participant)?;
        let results = self.results.results_for(session_id, participant);
        let total_earnings = match session.game {
            GameKind::PublicGoods => self.ledger.total(participant),
            GameKind::Auction => self.results.payoff_sum(session_id, participant),
        };

        Ok(ParticipantStanding {
            participant,
            results,
            total_earnings,
        })
    }

    /// Sessions not yet finished or failed
    pub fn active_sessions(&self) -> usize {
        self.sessions.iter().filter(|s| s.value().is_active()).count()
    }

    pub fn open_groups(&self) -> usize {
        self.sessions
            .iter()
            .map(|s| s.value().registry.open_groups())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::session::SubmitError;

    async fn wait_for(
        status: &mut watch::Receiver<SessionStatus>,
        wanted: impl Fn(&SessionStatus) -> bool,
    ) -> SessionStatus {
        let waited = tokio::time::timeout(Duration::from_secs(5), status.wait_for(|s| wanted(s)))
            .await
            .expect("status change in time")
            .expect("session alive");
        waited.clone()
    }

    #[tokio::test]
    async fn public_goods_session_accumulates_earnings() {
        let service = SessionService::new(GameSettings::default());
        let summary = service.create_session(GameKind::PublicGoods, 3, Some(1)).unwrap();
        let session = service.session(summary.id).unwrap();
        let mut status = session.subscribe();
        let people = summary.participants.clone();

        let plays: [[u32; 3]; 3] = [[20, 20, 20], [10, 0, 50], [0, 0, 100]];
        for (index, contributions) in plays.iter().enumerate() {
            let round = index as u32 + 1;
            wait_for(&mut status, |s| *s == SessionStatus::Collecting { round }).await;
            assert_eq!(service.summary(summary.id).unwrap().open_groups, 1);
            if round > 1 {
                let previous = session.registry.groups_for_round(round - 1);
                assert_eq!(previous.len(), 1);
                assert!(previous.iter().all(|group| !group.is_open()));
            }

            match service.participant_view(summary.id, people[0]).unwrap() {
                RoundView::PublicGoods { round: r, mpcr, .. } => {
                    assert_eq!(r, round);
                    assert_eq!(mpcr, GameSettings::default().public_goods.schedule.rate_for_round(round));
                }
                other => panic!("unexpected view {other:?}"),
            }

            for (participant, amount) in people.iter().zip(contributions) {
                service
                    .submit_decision(summary.id, *participant, Decision::Contribution { amount: *amount })
                    .await
                    .unwrap();
            }
        }

        wait_for(&mut status, |s| matches!(s, SessionStatus::Finished { .. })).await;

        // Round 1: 260 each. Round 2 (MPCR 5, total 60): 390, 400, 350.
        // Round 3 (MPCR 10, total 100): 1100, 1100, 1000.
        let expected = [1750.0, 1760.0, 1610.0];
        for (participant, total) in people.iter().zip(expected) {
            let standing = service.participant_results(summary.id, *participant).unwrap();
            assert_eq!(standing.results.len(), 3);
            assert_eq!(standing.total_earnings, Currency::new(total));
            let summed: Currency = standing.results.iter().map(|r| r.payoff).sum();
            assert_eq!(summed, standing.total_earnings);
        }
        assert_eq!(service.active_sessions(), 0);
        assert_eq!(service.open_groups(), 0);
    }

    #[tokio::test]
    async fn auction_session_settles_single_round() {
        let service = SessionService::new(GameSettings::default());
        let summary = service.create_session(GameKind::Auction, 4, Some(8)).unwrap();
        let session = service.session(summary.id).unwrap();
        let mut status = session.subscribe();
        let mut events = session.events();

        wait_for(&mut status, |s| *s == SessionStatus::Collecting { round: 1 }).await;
        let bids = [12.0, 20.5, 20.5, 3.0];
        for (participant, bid) in summary.participants.iter().zip(bids) {
            match service.participant_view(summary.id, *participant).unwrap() {
                RoundView::Auction { item_value_estimate, .. } => {
                    assert!(item_value_estimate >= Currency::ZERO);
                    assert!(item_value_estimate <= Currency::new(25.0));
                }
                other => panic!("unexpected view {other:?}"),
            }
            service
                .submit_decision(summary.id, *participant, Decision::Bid { amount: Currency::new(bid) })
                .await
                .unwrap();
        }

        wait_for(&mut status, |s| *s == SessionStatus::Finished { rounds: 1 }).await;

        let mut settled = None;
        while let Ok(event) = events.try_recv() {
            if let SessionEvent::GroupSettled { outcome, .. } = event {
                settled = Some(outcome);
            }
        }
        let outcome = match settled {
            Some(crate::session::GroupOutcome::Auction(outcome)) => outcome,
            other => panic!("unexpected outcome {other:?}"),
        };

        assert!(outcome.winner == summary.participants[1] || outcome.winner == summary.participants[2]);
        assert_eq!(outcome.second_highest_bid, Currency::new(12.0));

        let winners = summary
            .participants
            .iter()
            .map(|p| service.participant_results(summary.id, *p).unwrap())
            .filter(|standing| standing.results[0].is_winner)
            .count();
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn rejects_unknown_and_misrouted_decisions() {
        let service = SessionService::new(GameSettings::default());
        let summary = service.create_session(GameKind::PublicGoods, 3, Some(2)).unwrap();
        let mut status = service.session(summary.id).unwrap().subscribe();
        wait_for(&mut status, |s| *s == SessionStatus::Collecting { round: 1 }).await;

        let stranger = Uuid::new_v4();
        assert!(matches!(
            service
                .submit_decision(summary.id, stranger, Decision::Contribution { amount: 1 })
                .await,
            Err(SessionError::UnknownParticipant { .. })
        ));
        assert!(matches!(
            service
                .submit_decision(Uuid::new_v4(), stranger, Decision::Contribution { amount: 1 })
                .await,
            Err(SessionError::UnknownSession(_))
        ));

        let member = summary.participants[0];
        assert!(matches!(
            service
                .submit_decision(summary.id, member, Decision::Bid { amount: Currency::new(1.0) })
                .await,
            Err(SessionError::Submit(SubmitError::WrongGame { .. }))
        ));
        assert!(matches!(
            service
                .submit_decision(summary.id, member, Decision::Contribution { amount: 150 })
                .await,
            Err(SessionError::Submit(SubmitError::ContributionOutOfBounds { .. }))
        ));
        assert_eq!(service.active_sessions(), 1);
        assert_eq!(service.open_groups(), 1);
    }

    #[tokio::test]
    async fn rejects_sessions_that_cannot_be_grouped() {
        let service = SessionService::new(GameSettings::default());
        assert!(matches!(
            service.create_session(GameKind::PublicGoods, 4, None),
            Err(SessionError::UnevenGroups { .. })
        ));
        assert!(matches!(
            service.create_session(GameKind::Auction, 1, None),
            Err(SessionError::NotEnoughParticipants { .. })
        ));
    }

    #[tokio::test]
    async fn rejects_sessions_above_participant_ceiling() {
        let settings = GameSettings {
            max_participants: 6,
            ..GameSettings::default()
        };
        let service = SessionService::new(settings);

        assert!(matches!(
            service.create_session(GameKind::Auction, 7, None),
            Err(SessionError::TooManyParticipants { participants: 7, max: 6 })
        ));
        assert!(matches!(
            service.create_session(GameKind::Auction, usize::MAX, None),
            Err(SessionError::TooManyParticipants { .. })
        ));
        assert_eq!(service.active_sessions(), 0);

        tokio_test::assert_ok!(service.create_session(GameKind::Auction, 6, None));
    }
}
