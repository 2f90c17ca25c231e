//! # Dripline Scheduler
//!
//! The marketing engine: drip automations advanced one step per due
//! execution, and one-shot campaigns broadcast to a resolved audience.
//!
//! ## Design
//! - SQLite persistence: waits are stored as `next_action_at`, not timers
//! - One poll per tick, sequential and paced sends
//! - Opt-out checked before anything is sent
//!
//! ## Architecture
//! ```text
//! tick (HTTP trigger or tokio interval)
//!   └── Poller::poll_once
//!         ├── due executions → StepExecutor::resume
//!         │                      ├── compliance::is_blocked (opt-out)
//!         │                      ├── enviar_template → Gateways::deliver
//!         │                      └── esperar         → next_action_at
//!         └── due campaigns  → CampaignDispatcher::dispatch
//!                                ├── compliance::excluded_from_audience
//!                                └── audience → Gateways::deliver (paced)
//!
//! Gateways::deliver
//!   ├── phone normalization (+51)
//!   ├── render {{placeholders}}
//!   └── WhatsApp / SMS / Email gateway
//! ```

pub mod automation;
pub mod campaign;
pub mod compliance;
pub mod delivery;
pub mod engine;
pub mod persistence;
pub mod phone;
pub mod poller;
pub mod render;

#[cfg(test)]
mod testing;

pub use automation::StepExecutor;
pub use campaign::CampaignDispatcher;
pub use delivery::{Delivery, Gateways};
pub use engine::spawn_poller;
pub use persistence::SqliteStore;
pub use poller::{PollReport, Poller};
