//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::game::{AuctionConfig, Currency, MpcrSchedule, PublicGoodsConfig};
use crate::session::{GameSettings, DEFAULT_MAX_PARTICIPANTS};

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Per-round endowment in the public goods game
    pub endowment: u32,
    /// MPCR for round 1, round 2, and every later round
    pub mpcr_schedule: MpcrSchedule,
    pub public_goods_rounds: u32,
    pub public_goods_group_size: usize,

    pub bid_min: f64,
    pub bid_max: f64,
    /// Half-width of the noise added to private estimates
    pub bid_noise: f64,

    /// Settle with default decisions after this long; unset waits forever
    pub decision_timeout: Option<Duration>,
    /// Upper bound on participants in one session
    pub max_session_participants: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from any variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = match lookup("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => lookup("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        };

        let defaults = PublicGoodsConfig::default();
        let auction = AuctionConfig::default();

        let config = Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),

            endowment: parse_or(&lookup, "ENDOWMENT", defaults.endowment)?,
            mpcr_schedule: match lookup("MPCR_SCHEDULE") {
                Some(raw) => parse_schedule(&raw)?,
                None => defaults.schedule,
            },
            public_goods_rounds: parse_or(&lookup, "PUBLIC_GOODS_ROUNDS", defaults.num_rounds)?,
            public_goods_group_size: parse_or(
                &lookup,
                "PUBLIC_GOODS_GROUP_SIZE",
                defaults.group_size,
            )?,

            bid_min: parse_or(&lookup, "BID_MIN", auction.bid_min.amount())?,
            bid_max: parse_or(&lookup, "BID_MAX", auction.bid_max.amount())?,
            bid_noise: parse_or(&lookup, "BID_NOISE", auction.bid_noise.amount())?,

            decision_timeout: match lookup("DECISION_TIMEOUT_SECS") {
                Some(raw) => Some(Duration::from_secs(parse_value("DECISION_TIMEOUT_SECS", &raw)?)),
                None => None,
            },
            max_session_participants: parse_or(
                &lookup,
                "MAX_SESSION_PARTICIPANTS",
                DEFAULT_MAX_PARTICIPANTS,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.public_goods_rounds == 0 {
            return Err(ConfigError::invalid("PUBLIC_GOODS_ROUNDS", "0"));
        }
        if self.public_goods_group_size < 2 {
            return Err(ConfigError::invalid(
                "PUBLIC_GOODS_GROUP_SIZE",
                &self.public_goods_group_size.to_string(),
            ));
        }
        if self.max_session_participants < self.public_goods_group_size {
            return Err(ConfigError::invalid(
                "MAX_SESSION_PARTICIPANTS",
                &self.max_session_participants.to_string(),
            ));
        }
        if !(self.bid_min.is_finite() && self.bid_max.is_finite() && self.bid_min < self.bid_max) {
            return Err(ConfigError::invalid(
                "BID_MAX",
                &format!("{} (BID_MIN {})", self.bid_max, self.bid_min),
            ));
        }
        if !(self.bid_noise.is_finite() && self.bid_noise >= 0.0) {
            return Err(ConfigError::invalid("BID_NOISE", &self.bid_noise.to_string()));
        }
        Ok(())
    }

    /// Game constants and host policy handed to the session service
    pub fn game_settings(&self) -> GameSettings {
        GameSettings {
            public_goods: PublicGoodsConfig {
                endowment: self.endowment,
                schedule: self.mpcr_schedule,
                num_rounds: self.public_goods_rounds,
                group_size: self.public_goods_group_size,
            },
            auction: AuctionConfig {
                bid_min: Currency::new(self.bid_min),
                bid_max: Currency::new(self.bid_max),
                bid_noise: Currency::new(self.bid_noise),
            },
            decision_timeout: self.decision_timeout,
            max_participants: self.max_session_participants,
        }
    }
}

fn parse_value<T: FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::invalid(name, raw))
}

fn parse_or<T, F>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&'static str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => parse_value(name, &raw),
        None => Ok(default),
    }
}

/// `"3,5,10"` -> round 1, round 2, round 3 and later
fn parse_schedule(raw: &str) -> Result<MpcrSchedule, ConfigError> {
    let rates = raw
        .split(',')
        .map(|part| parse_value::<f64>("MPCR_SCHEDULE", part))
        .collect::<Result<Vec<_>, _>>()?;

    match rates.as_slice() {
        [round_one, round_two, later_rounds] if rates.iter().all(|r| r.is_finite()) => {
            Ok(MpcrSchedule {
                round_one: *round_one,
                round_two: *round_two,
                later_rounds: *later_rounds,
            })
        }
        _ => Err(ConfigError::invalid("MPCR_SCHEDULE", raw)),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {name}: {value}")]
    Invalid { name: &'static str, value: String },

    #[error("Invalid server address format")]
    InvalidAddress,
}

impl ConfigError {
    fn invalid(name: &'static str, value: &str) -> Self {
        Self::Invalid {
            name,
            value: value.to_string(),
        }
    }
}
