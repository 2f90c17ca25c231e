//! # Dripline Gateway
//! HTTP trigger for the marketing poller.
//!
//! `GET|POST /api/cron/marketing` runs one poll cycle, guarded by a shared
//! bearer secret. `/health` is public.

pub mod routes;
pub mod server;

pub use server::{AppState, build_router, start};
