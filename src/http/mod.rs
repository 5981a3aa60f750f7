//! HTTP surface for the session host

pub mod routes;

pub use routes::{build_router, AppError};
