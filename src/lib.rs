//! Econ Games Server - settlement and session host for lab experiments
//!
//! Two multi-round games played by fixed groups of participants:
//! - a public goods contribution game with a per-round MPCR schedule
//! - a common-value second-price auction with noisy private estimates
//!
//! `game` holds the settlement logic; `session` hosts groups, waits for
//! decisions and hands outcomes to a payoff sink; `http` exposes the host.

pub mod app;
pub mod config;
pub mod game;
pub mod http;
pub mod session;
