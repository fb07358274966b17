//! Deterministic simulation toolkit for ferry-transport.
//!
//! Provides an impaired in-memory link (loss, duplication, reordering,
//! corruption, delay with jitter), a scripted client that dials the
//! transport, and a discrete-event scenario runner driven by a mock clock.
//! Every random choice derives from the scenario seed, so runs are
//! reproducible.

pub mod client;
pub mod link;
pub mod scenario;

pub use client::{ClientConfig, ClientState, ScriptedClient};
pub use link::{Link, LinkImpairment, Packet};
pub use scenario::{run_scenario, Outcome, ScenarioConfig, ScenarioReport, Simulation};
