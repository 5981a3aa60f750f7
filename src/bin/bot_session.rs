//! Bot Session Runner
//!
//! Plays one public goods session and one auction session in-process with
//! scripted bots, the way browser bots exercise an experiment before it runs
//! with people.
//!
//! ## Usage
//! ```bash
//! BOT_SEED=7 cargo run --bin bot_session --release
//! ```

use std::env;

use futures::future::join_all;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use econ_games_server::config::Config;
use econ_games_server::game::Currency;
use econ_games_server::session::{
    Decision, GameKind, RoundView, SessionError, SessionService, SessionStatus,
};

/// Bidders shade their estimate by up to this much
const MAX_BID_SHADE: f64 = 2.0;

const AUCTION_BOTS: usize = 4;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(&config.log_level);

    let seed: Option<u64> = env::var("BOT_SEED").ok().map(|s| s.parse()).transpose()?;
    let mut rng = match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    };

    let service = SessionService::new(config.game_settings());

    println!("=======================================================");
    println!("  Bot session: public goods + common-value auction");
    println!("=======================================================\n");

    let public_goods_bots = config.public_goods_group_size * 2;
    play(&service, GameKind::PublicGoods, public_goods_bots, seed, &mut rng).await?;
    play(&service, GameKind::Auction, AUCTION_BOTS, seed, &mut rng).await?;

    Ok(())
}

async fn play(
    service: &SessionService,
    game: GameKind,
    participants: usize,
    seed: Option<u64>,
    rng: &mut ChaCha8Rng,
) -> anyhow::Result<()> {
    let summary = service.create_session(game, participants, seed)?;
    let mut status = service.session(summary.id)?.subscribe();

    loop {
        let current = status.borrow_and_update().clone();
        match current {
            SessionStatus::Pending => {
                status.changed().await?;
            }
            SessionStatus::Collecting { round } => {
                let decisions = summary
                    .participants
                    .iter()
                    .map(|participant| {
                        let view = service.participant_view(summary.id, *participant)?;
                        Ok((*participant, bot_decision(&view, rng)))
                    })
                    .collect::<Result<Vec<_>, SessionError>>()?;

                let submitted = join_all(decisions.into_iter().map(|(participant, decision)| {
                    service.submit_decision(summary.id, participant, decision)
                }))
                .await;
                for result in submitted {
                    result?;
                }

                info!(session_id = %summary.id, round, "Bots decided");
                status
                    .wait_for(|s| *s != SessionStatus::Collecting { round })
                    .await?;
            }
            SessionStatus::Finished { rounds } => {
                println!("{} ({} round(s))", game, rounds);
                println!("{}", "-".repeat(50));
                for (index, participant) in summary.participants.iter().enumerate() {
                    let standing = service.participant_results(summary.id, *participant)?;
                    let wins = standing.results.iter().filter(|r| r.is_winner).count();
                    println!(
                        "  Bot {:>2}: total earnings {:>10}  wins {}",
                        index + 1,
                        standing.total_earnings.to_string(),
                        wins
                    );
                }
                println!();
                return Ok(());
            }
            SessionStatus::Failed { round, reason } => {
                anyhow::bail!("{} session failed in round {}: {}", game, round, reason);
            }
        }
    }
}

fn bot_decision(view: &RoundView, rng: &mut ChaCha8Rng) -> Decision {
    match view {
        RoundView::PublicGoods { endowment, .. } => Decision::Contribution {
            amount: rng.gen_range(0..=*endowment),
        },
        RoundView::Auction {
            item_value_estimate,
            bid_min,
            bid_max,
            ..
        } => {
            let shade = Currency::new(rng.gen_range(0.0..=MAX_BID_SHADE));
            Decision::Bid {
                amount: (*item_value_estimate - shade)
                    .round_to(1)
                    .clamp(*bid_min, *bid_max),
            }
        }
    }
}

fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}
